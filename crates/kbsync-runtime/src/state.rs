#![forbid(unsafe_code)]

//! Mutable session model shared by the fetcher, reconciler and watchdog.

use kbsync_core::{ExpectedState, Span};
use kbsync_text::{CompositionTracker, CursorKnowledge, TextWindowCache};

use crate::pending::PendingActionLog;
use crate::stats::SyncStats;

/// Everything the engine believes about the host document.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub cache: TextWindowCache,
    pub composition: CompositionTracker,
    pub cursor: CursorKnowledge,
    pub log: PendingActionLog,
    pub stats: SyncStats,
    /// Whether extracted-text confirmations are expected this session.
    pub monitoring: bool,
    /// Sequence number of the most recent action.
    pub last_seq: u64,
}

impl SyncState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the cursor; an unknown cursor drops all cached text.
    pub fn set_cursor(&mut self, cursor: CursorKnowledge) {
        match cursor {
            CursorKnowledge::Known(selection) => self.cache.reanchor(selection),
            CursorKnowledge::Unknown => self.cache.clear(),
        }
        self.cursor = cursor;
    }

    /// Forget cursor, text and composition.
    pub fn forget(&mut self) {
        self.set_cursor(CursorKnowledge::Unknown);
        self.composition.set_unknown();
    }

    /// The current shape, when both selection and composition bounds are
    /// known.
    #[must_use]
    pub fn expected(&self) -> Option<ExpectedState> {
        let selection = self.cursor.selection()?;
        let composition = self.composition.bounds()?;
        Some(ExpectedState::new(selection, composition))
    }

    #[must_use]
    pub fn selection(&self) -> Option<Span> {
        self.cursor.selection()
    }
}

#[cfg(test)]
mod tests {
    use kbsync_text::Provenance;

    use super::*;

    #[test]
    fn unknown_cursor_clears_cache() {
        let mut state = SyncState::new();
        state
            .cache
            .seed_window(0, "abc", Span::caret(3), true, true);
        state.set_cursor(CursorKnowledge::Unknown);
        assert!(state.cache.is_empty());
        assert_eq!(state.cache.selection(), None);
    }

    #[test]
    fn expected_needs_composition_bounds() {
        let mut state = SyncState::new();
        state.set_cursor(CursorKnowledge::Known(Span::caret(2)));
        assert_eq!(state.expected(), None);
        state.composition.set_absent(Provenance::Confirmed);
        assert_eq!(
            state.expected(),
            Some(ExpectedState::new(Span::caret(2), None))
        );
    }
}
