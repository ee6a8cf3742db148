#![forbid(unsafe_code)]

//! Core vocabulary for kbsync.
//!
//! # Role in kbsync
//! `kbsync-core` holds everything the other crates agree on: absolute
//! [`Span`]s and edit arithmetic, UTF-16 accounting, the host capability
//! trait, inbound notifications, outbound actions, configuration and the
//! error taxonomy. It has no behavior of its own beyond pure helpers.
//!
//! # How it fits in the system
//! `kbsync-text` builds the cache and composition tracker on these types,
//! `kbsync-runtime` drives them from host notifications, and
//! `kbsync-harness` implements [`HostEditor`] as a host double.

pub mod action;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod flags;
pub mod host;
pub mod span;
pub mod state;
pub mod unicode;

pub use action::{Action, ActionKind, Composing, ExpectedState, KeyCode, resolve_new_cursor};
pub use clock::{Clock, SystemClock};
pub use config::SyncConfig;
pub use error::{Error, Recovery, Result, SyncIssue};
pub use event::{
    Channel, ExtractedText, ExtractedTextRequest, ExtractedTextUpdate, SelectionUpdate,
    UpdateEvent,
};
pub use flags::{ChannelSet, LoadFlags, TextRequestFlags};
pub use host::{HostEditor, HostError, HostResult};
pub use span::{Bias, Edit, Span};
pub use state::TextState;
