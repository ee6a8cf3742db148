#![forbid(unsafe_code)]

//! Local text model for kbsync.
//!
//! # Key Components
//!
//! - [`TextWindowCache`] - before/selected/after regions keyed by absolute offsets
//! - [`CompositionTracker`] - composition span with explicit unknown states
//! - [`CursorKnowledge`] - whether the selection is known at all
//! - [`Step`] - code point to code unit translation over cached text
//!
//! # Role in kbsync
//! `kbsync-text` holds what the engine believes about the document. It
//! never talks to the host; `kbsync-runtime` fills it from host reads and
//! keeps it honest against host notifications.

pub mod composition;
pub mod cursor;
pub mod region;
pub mod step;
pub mod window_cache;

pub use composition::{CompositionSpan, CompositionState, CompositionTracker, Provenance};
pub use cursor::CursorKnowledge;
pub use region::{CacheRead, CachedRegion, Region, Run, Truncation};
pub use step::{Side, Step};
pub use window_cache::{FillOutcome, Runs, TextWindowCache};
