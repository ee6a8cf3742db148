#![forbid(unsafe_code)]

//! Host notifications.
//!
//! The host reports state changes on two independent channels:
//!
//! - **Selection**: new selection plus the candidates (composition) range.
//! - **Extracted text**: a snapshot of a window of the document plus the
//!   selection, sent while the engine monitors extracted text.
//!
//! Each channel is FIFO on its own. How the two interleave is a property of
//! the host, so nothing here carries a cross-channel ordering.

use crate::span::Span;
use crate::unicode::utf16_len;

/// Notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Selection,
    ExtractedText,
}

impl Channel {
    /// Stable label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Selection => "selection",
            Self::ExtractedText => "extracted_text",
        }
    }
}

/// Payload of `onUpdateSelection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionUpdate {
    /// Selection the host believes the engine saw last.
    pub old: Span,
    /// Selection after the change.
    pub new: Span,
    /// Composition range, `None` when nothing is being composed.
    pub candidates: Option<Span>,
}

/// A window of document text as returned by `getExtractedText` or pushed
/// through `onUpdateExtractedText`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    /// Absolute offset of the first unit of `text`.
    pub start_offset: usize,
    /// Window contents.
    pub text: String,
    /// Part of `text` that changed, relative to `start_offset`; `None` for
    /// a plain snapshot.
    pub partial: Option<Span>,
    /// Selection relative to `start_offset`.
    pub selection: Span,
}

impl ExtractedText {
    /// Snapshot with no partial range.
    #[must_use]
    pub fn snapshot(start_offset: usize, text: impl Into<String>, selection: Span) -> Self {
        Self {
            start_offset,
            text: text.into(),
            partial: None,
            selection,
        }
    }

    /// Absolute document range covered by `text`.
    #[must_use]
    pub fn window(&self) -> Span {
        Span::with_len(self.start_offset, utf16_len(&self.text))
    }

    /// Selection in absolute offsets.
    #[must_use]
    pub fn absolute_selection(&self) -> Span {
        Span::new(
            self.start_offset + self.selection.start,
            self.start_offset + self.selection.end,
        )
    }
}

/// Payload of `onUpdateExtractedText`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTextUpdate {
    /// Monitor token the engine supplied when it asked for monitoring.
    pub token: u32,
    pub text: ExtractedText,
}

/// Request passed to `getExtractedText`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedTextRequest {
    /// Preferred maximum window size in code units.
    pub hint_max_units: usize,
    /// Token echoed back in monitor updates.
    pub token: u32,
    /// Whether the host should keep pushing updates for this token.
    pub monitor: bool,
}

/// One inbound host notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    Selection(SelectionUpdate),
    ExtractedText(ExtractedTextUpdate),
}

impl UpdateEvent {
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Selection(_) => Channel::Selection,
            Self::ExtractedText(_) => Channel::ExtractedText,
        }
    }

    /// Absolute selection reported by the event.
    #[must_use]
    pub fn selection(&self) -> Span {
        match self {
            Self::Selection(update) => update.new,
            Self::ExtractedText(update) => update.text.absolute_selection(),
        }
    }

    /// Composition range, when the channel carries one.
    ///
    /// The outer `Option` is `None` for channels that say nothing about the
    /// composition.
    #[must_use]
    pub fn candidates(&self) -> Option<Option<Span>> {
        match self {
            Self::Selection(update) => Some(update.candidates),
            Self::ExtractedText(_) => None,
        }
    }
}
