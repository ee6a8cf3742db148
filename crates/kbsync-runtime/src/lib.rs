#![forbid(unsafe_code)]

//! kbsync Runtime
//!
//! Keeps a keyboard's view of the host document honest across a delayed,
//! lossy notification channel.
//!
//! # Key Components
//!
//! - [`SyncEngine`] - Owns the session state and dispatches actions, notifications and ticks
//! - [`ExpectedStateModel`] - Pure predictions for outbound actions
//! - [`PendingActionLog`] - Issued actions awaiting confirmation
//! - [`TextFetcher`] - Read-through access to host text with selection probes
//! - [`UpdateReconciler`] - Classification of host notifications
//! - [`LostUpdateWatchdog`] - Forced resync when a confirmation is lost
//!
//! # Role in kbsync
//! `kbsync-runtime` is the orchestrator. It drives the text model from
//! `kbsync-text` with host calls described by `kbsync-core`, and never
//! asserts a composition it cannot justify.

pub mod engine;
pub mod expected;
pub mod fetcher;
pub mod inbox;
pub mod pending;
pub mod reconciler;
pub mod state;
pub mod stats;
pub mod watchdog;

#[cfg(test)]
mod test_support;

pub use engine::{ReadMode, SyncEngine};
pub use expected::{ExpectedStateModel, PlannedEdit, PredictInput, Prediction};
pub use fetcher::{LoadResult, ProbeWindow, TextAround, TextFetcher, TextRequest};
pub use inbox::Inbox;
pub use pending::{PendingAction, PendingActionLog};
pub use reconciler::{Classification, DiscardReason, UpdateOutcome, UpdateReconciler};
pub use state::SyncState;
pub use stats::SyncStats;
pub use watchdog::{LostUpdateWatchdog, WatchdogOutcome};
