#![forbid(unsafe_code)]

//! Cursor knowledge, independent of cached text.

use std::fmt;

use kbsync_core::Span;

/// Whether the engine knows where the selection is.
///
/// An `Unknown` cursor forbids all positional math on cached text and
/// composition bounds until it is re-anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorKnowledge {
    Known(Span),
    #[default]
    Unknown,
}

impl CursorKnowledge {
    #[must_use]
    pub const fn selection(&self) -> Option<Span> {
        match self {
            Self::Known(span) => Some(*span),
            Self::Unknown => None,
        }
    }

    #[must_use]
    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<Option<Span>> for CursorKnowledge {
    fn from(selection: Option<Span>) -> Self {
        selection.map_or(Self::Unknown, Self::Known)
    }
}

impl fmt::Display for CursorKnowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(span) => write!(f, "{span}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}
