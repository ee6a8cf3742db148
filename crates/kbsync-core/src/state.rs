#![forbid(unsafe_code)]

//! Whole-document text states.
//!
//! [`TextState`] describes a complete document with its selection and,
//! when something is being composed, its composition. The engine produces
//! one from its cache when the whole document is known; host doubles use it
//! to describe their ground truth.

use std::fmt;

use crate::span::Span;
use crate::unicode::utf16_len;

/// A document with selection, either plain or with a composing region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextState {
    Committed {
        text: String,
        sel_start: usize,
        sel_end: usize,
    },
    Composed {
        before: String,
        composing: String,
        after: String,
        sel_start: usize,
        sel_end: usize,
    },
}

impl TextState {
    /// Plain document built from the text before, inside and after the
    /// selection.
    #[must_use]
    pub fn committed(before: &str, selected: &str, after: &str) -> Self {
        let sel_start = utf16_len(before);
        let sel_end = sel_start + utf16_len(selected);
        Self::Committed {
            text: format!("{before}{selected}{after}"),
            sel_start,
            sel_end,
        }
    }

    /// Document with a composing region and the cursor right after it.
    #[must_use]
    pub fn composed(before: &str, composing: &str, after: &str) -> Self {
        let cursor = utf16_len(before) + utf16_len(composing);
        Self::Composed {
            before: before.to_owned(),
            composing: composing.to_owned(),
            after: after.to_owned(),
            sel_start: cursor,
            sel_end: cursor,
        }
    }

    /// Replace the selection, keeping text and composition.
    #[must_use]
    pub fn with_selection(self, selection: Span) -> Self {
        match self {
            Self::Committed { text, .. } => Self::Committed {
                text,
                sel_start: selection.start,
                sel_end: selection.end,
            },
            Self::Composed {
                before,
                composing,
                after,
                ..
            } => Self::Composed {
                before,
                composing,
                after,
                sel_start: selection.start,
                sel_end: selection.end,
            },
        }
    }

    /// Full document text.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Committed { text, .. } => text.clone(),
            Self::Composed {
                before,
                composing,
                after,
                ..
            } => format!("{before}{composing}{after}"),
        }
    }

    #[must_use]
    pub fn selection(&self) -> Span {
        match self {
            Self::Committed {
                sel_start, sel_end, ..
            }
            | Self::Composed {
                sel_start, sel_end, ..
            } => Span::new(*sel_start, *sel_end),
        }
    }

    /// Composition range, `None` for committed documents.
    #[must_use]
    pub fn composition(&self) -> Option<Span> {
        match self {
            Self::Committed { .. } => None,
            Self::Composed {
                before, composing, ..
            } => Some(Span::with_len(utf16_len(before), utf16_len(composing))),
        }
    }

    /// Composing text, empty for committed documents.
    #[must_use]
    pub fn composing_text(&self) -> &str {
        match self {
            Self::Committed { .. } => "",
            Self::Composed { composing, .. } => composing,
        }
    }
}

impl fmt::Display for TextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed {
                text,
                sel_start,
                sel_end,
            } => write!(f, "Committed({text:?}, {sel_start}..{sel_end})"),
            Self::Composed {
                before,
                composing,
                after,
                sel_start,
                sel_end,
            } => write!(
                f,
                "Composed({before:?}, [{composing:?}], {after:?}, {sel_start}..{sel_end})"
            ),
        }
    }
}
