#![forbid(unsafe_code)]

//! The host editor capability set.
//!
//! The engine talks to the authoritative document only through
//! [`HostEditor`]. Every read may come back shorter than requested, may be
//! refused outright, and no write is guaranteed to produce a notification.
//! Notifications are not part of this trait: they arrive as
//! [`UpdateEvent`](crate::event::UpdateEvent)s through the engine inbox.

use std::fmt;

use crate::action::KeyCode;
use crate::event::{ExtractedText, ExtractedTextRequest};
use crate::flags::TextRequestFlags;

/// Failure reported by a host call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host does not implement this capability.
    Unsupported(&'static str),
    /// The connection to the editor is gone.
    Disconnected,
}

impl HostError {
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(op) => write!(f, "host does not support {op}"),
            Self::Disconnected => write!(f, "host connection lost"),
        }
    }
}

impl std::error::Error for HostError {}

/// Result type for host calls.
pub type HostResult<T> = Result<T, HostError>;

/// Abstract host editor.
///
/// Lengths and offsets are UTF-16 code units. Cursor-relative reads never
/// split a surrogate pair, which may make them one unit shorter than asked.
pub trait HostEditor {
    /// Up to `n` units immediately before the selection start.
    fn text_before_cursor(&mut self, n: usize, flags: TextRequestFlags) -> HostResult<String>;

    /// Up to `n` units immediately after the selection end.
    fn text_after_cursor(&mut self, n: usize, flags: TextRequestFlags) -> HostResult<String>;

    /// The selected text.
    fn selected_text(&mut self, flags: TextRequestFlags) -> HostResult<String>;

    /// A window of the document plus the current selection.
    fn extracted_text(&mut self, request: ExtractedTextRequest) -> HostResult<ExtractedText>;

    fn set_composing_text(&mut self, text: &str, new_cursor_position: i32) -> HostResult<()>;

    fn commit_text(&mut self, text: &str, new_cursor_position: i32) -> HostResult<()>;

    fn finish_composing_text(&mut self) -> HostResult<()>;

    fn set_selection(&mut self, start: usize, end: usize) -> HostResult<()>;

    /// Delete `before` units before the selection and `after` units after it.
    fn delete_surrounding_text(&mut self, before: usize, after: usize) -> HostResult<()>;

    fn send_key_event(&mut self, key: KeyCode) -> HostResult<()>;

    fn begin_batch_edit(&mut self) -> HostResult<()>;

    fn end_batch_edit(&mut self) -> HostResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_error_display() {
        assert_eq!(
            HostError::Unsupported("getSelectedText").to_string(),
            "host does not support getSelectedText"
        );
        assert!(HostError::Unsupported("x").is_unsupported());
        assert!(!HostError::Disconnected.is_unsupported());
    }
}
