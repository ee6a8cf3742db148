#![forbid(unsafe_code)]

//! Keyboard actions and the state they are predicted to leave behind.

use std::fmt;

use crate::span::Span;

/// Keys the keyboard can send as raw key events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Backspace,
    ForwardDelete,
    Enter,
    ArrowLeft,
    ArrowRight,
    Char(char),
}

impl KeyCode {
    /// Text a printable key commits, if any.
    #[must_use]
    pub fn committed_text(self) -> Option<String> {
        match self {
            Self::Enter => Some("\n".to_owned()),
            Self::Char(ch) => Some(ch.to_string()),
            _ => None,
        }
    }
}

/// Category of an issued action, as recorded in the pending log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Compose,
    Commit,
    DeleteBefore,
    DeleteSelected,
    SendKey,
    SetSelection,
    /// Baseline adopted after an out-of-band change on the host.
    External,
}

impl ActionKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compose => "compose",
            Self::Commit => "commit",
            Self::DeleteBefore => "delete_before",
            Self::DeleteSelected => "delete_selected",
            Self::SendKey => "send_key",
            Self::SetSelection => "set_selection",
            Self::External => "external",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound editing request, with lengths already in code units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Compose {
        text: String,
        new_cursor_position: i32,
    },
    Commit {
        text: String,
        new_cursor_position: i32,
    },
    FinishComposing,
    DeleteSurrounding {
        before: usize,
        after: usize,
    },
    DeleteSelected,
    SendKey(KeyCode),
    SetSelection(Span),
}

impl Action {
    #[must_use]
    pub const fn kind(&self) -> ActionKind {
        match self {
            Self::Compose { .. } => ActionKind::Compose,
            Self::Commit { .. } | Self::FinishComposing => ActionKind::Commit,
            Self::DeleteSurrounding { .. } => ActionKind::DeleteBefore,
            Self::DeleteSelected => ActionKind::DeleteSelected,
            Self::SendKey(_) => ActionKind::SendKey,
            Self::SetSelection(_) => ActionKind::SetSelection,
        }
    }
}

/// Predicted selection and composition right after an action lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExpectedState {
    pub selection: Span,
    pub composition: Option<Span>,
}

impl ExpectedState {
    #[must_use]
    pub const fn new(selection: Span, composition: Option<Span>) -> Self {
        Self {
            selection,
            composition,
        }
    }
}

impl fmt::Display for ExpectedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.composition {
            Some(comp) => write!(f, "sel {} comp {}", self.selection, comp),
            None => write!(f, "sel {} comp -", self.selection),
        }
    }
}

/// Predicted composing text attached to an action.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Composing {
    /// Nothing is being composed.
    Absent,
    /// The composing text is exactly this.
    Text(String),
    /// The action leaves the composing text unknown.
    #[default]
    Unknown,
}

impl Composing {
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Absent => Some(""),
            Self::Unknown => None,
        }
    }
}

/// Cursor placement for `commitText`/`setComposingText`.
///
/// `new_cursor_position <= 0` counts from the start of the inserted text,
/// positive values count from its end (`1` lands right after it). The
/// result is clamped to the document; the upper clamp applies only when the
/// document length is known.
#[must_use]
pub fn resolve_new_cursor(
    inserted_at: usize,
    inserted_len: usize,
    new_cursor_position: i32,
    document_len: Option<usize>,
) -> usize {
    let base = if new_cursor_position > 0 {
        (inserted_at + inserted_len) as i64 + i64::from(new_cursor_position) - 1
    } else {
        inserted_at as i64 + i64::from(new_cursor_position)
    };
    let clamped = base.max(0) as usize;
    match document_len {
        Some(len) => clamped.min(len),
        None => clamped,
    }
}
