#![forbid(unsafe_code)]

//! kbsync public facade crate.
//!
//! Re-exports the types a keyboard needs to keep its view of the host
//! document in sync: the engine, its configuration, the host protocol and
//! the text model, plus a prelude for day-to-day use.

// --- Core re-exports -------------------------------------------------------

pub use kbsync_core::{
    Action, ActionKind, Clock, Edit, Error, ExtractedText, ExtractedTextRequest,
    ExtractedTextUpdate, HostEditor, HostError, HostResult, KeyCode, LoadFlags, Recovery, Result,
    SelectionUpdate, Span, SyncConfig, SyncIssue, SystemClock, TextRequestFlags, TextState,
    UpdateEvent,
};

// --- Text re-exports -------------------------------------------------------

pub use kbsync_text::{
    CompositionState, CursorKnowledge, Provenance, Region, Side, Step, TextWindowCache,
};

// --- Runtime re-exports ----------------------------------------------------

#[cfg(feature = "runtime")]
pub use kbsync_runtime::{
    Classification, LoadResult, ReadMode, SyncEngine, SyncStats, TextRequest, UpdateOutcome,
    WatchdogOutcome,
};

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        Error, HostEditor, HostError, HostResult, KeyCode, Result, Span, SyncConfig, TextState,
        UpdateEvent,
    };

    #[cfg(feature = "runtime")]
    pub use crate::{ReadMode, SyncEngine, TextRequest, WatchdogOutcome};

    pub use crate::{core, text};

    #[cfg(feature = "runtime")]
    pub use crate::runtime;
}

pub use kbsync_core as core;
#[cfg(feature = "runtime")]
pub use kbsync_runtime as runtime;
pub use kbsync_text as text;

#[cfg(all(test, feature = "runtime"))]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_builds_an_engine() {
        let engine = SyncEngine::new(SyncConfig::default());
        assert_eq!(engine.selection(), None::<Span>);
        assert!(engine.pending().is_empty());
    }
}
