#![forbid(unsafe_code)]

//! kbsync Harness
//!
//! Test rig for the sync engine: a host editor double with the quirks real
//! editors show, a clock that only moves when told, and tracing capture.
//!
//! # Key Components
//!
//! - [`FakeHost`] - In-memory host with an explicit notification outbox
//! - [`HostSettings`] - Host quirks (limits, missing calls, notification order)
//! - [`LabClock`] - Shared, manually advanced clock
//! - [`SessionContext`] - Engine, host and clock wired together
//! - [`with_captured_tracing`] - Records spans and events for assertions

pub mod clock;
pub mod fake_host;
pub mod logging;
pub mod session;

pub use clock::LabClock;
pub use fake_host::{CallCounters, ComposeTransform, FakeHost, HostSettings};
pub use logging::{
    CaptureHandle, CapturedEvent, CapturedSpan, LOG_ENV, init_test_tracing, with_captured_tracing,
};
pub use session::SessionContext;
