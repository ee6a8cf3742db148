#![forbid(unsafe_code)]

//! Host editor double.
//!
//! [`FakeHost`] keeps a UTF-16 document with a selection and a composition
//! and answers every [`HostEditor`] call with Android-like semantics. Writes
//! apply immediately; the notifications they cause are queued in an outbox
//! instead of being delivered, so a test decides when (and whether) the
//! engine sees them.
//!
//! # Quirks
//!
//! | Setting | Default | Effect |
//! |---------|---------|--------|
//! | `text_limit` | unlimited | Longest answer to one `getText*` call |
//! | `selected_text_supported` | true | `getSelectedText` availability |
//! | `extracted_text_supported` | true | `getExtractedText` availability |
//! | `delete_surrounding_supported` | true | `deleteSurroundingText` availability |
//! | `compose_transform` | `None` | Rewrites composing text before applying it |
//! | `update_selection_before_extracted_text` | true | Cross-channel notification order |
//! | `skip_noop_notifications` | true | Stay silent when nothing changed |
//! | `send_selection_updates` | true | Emit `onUpdateSelection` at all |
//!
//! Batch edits hold notifications back until the outermost batch closes,
//! then report the final state once.

use std::collections::VecDeque;

use tracing::trace;

use kbsync_core::{
    Edit, ExtractedText, ExtractedTextRequest, ExtractedTextUpdate, HostEditor, HostError,
    HostResult, KeyCode, SelectionUpdate, Span, TextRequestFlags, TextState, UpdateEvent,
};
use kbsync_core::unicode::utf16_len;

/// How the host rewrites composing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ComposeTransform {
    #[default]
    None,
    /// Every composed string is applied twice: `"ab"` becomes `"abab"`.
    Double,
}

impl ComposeTransform {
    fn apply(self, text: &str) -> String {
        match self {
            Self::None => text.to_owned(),
            Self::Double => text.repeat(2),
        }
    }
}

/// Host behavior knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    pub text_limit: usize,
    pub selected_text_supported: bool,
    pub extracted_text_supported: bool,
    pub delete_surrounding_supported: bool,
    pub compose_transform: ComposeTransform,
    pub update_selection_before_extracted_text: bool,
    pub skip_noop_notifications: bool,
    pub send_selection_updates: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            text_limit: usize::MAX,
            selected_text_supported: true,
            extracted_text_supported: true,
            delete_surrounding_supported: true,
            compose_transform: ComposeTransform::None,
            update_selection_before_extracted_text: true,
            skip_noop_notifications: true,
            send_selection_updates: true,
        }
    }
}

impl HostSettings {
    #[must_use]
    pub fn with_text_limit(mut self, limit: usize) -> Self {
        self.text_limit = limit;
        self
    }

    #[must_use]
    pub fn with_compose_transform(mut self, transform: ComposeTransform) -> Self {
        self.compose_transform = transform;
        self
    }

    #[must_use]
    pub fn without_selected_text(mut self) -> Self {
        self.selected_text_supported = false;
        self
    }

    #[must_use]
    pub fn without_extracted_text(mut self) -> Self {
        self.extracted_text_supported = false;
        self
    }

    #[must_use]
    pub fn without_delete_surrounding(mut self) -> Self {
        self.delete_surrounding_supported = false;
        self
    }

    #[must_use]
    pub fn with_extracted_text_first(mut self) -> Self {
        self.update_selection_before_extracted_text = false;
        self
    }

    #[must_use]
    pub fn with_noop_notifications(mut self) -> Self {
        self.skip_noop_notifications = false;
        self
    }

    #[must_use]
    pub fn without_selection_updates(mut self) -> Self {
        self.send_selection_updates = false;
        self
    }
}

/// Host calls seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallCounters {
    pub before: usize,
    pub after: usize,
    pub selected: usize,
    pub extracted: usize,
    pub writes: usize,
    pub batches: usize,
}

impl CallCounters {
    /// Cursor-relative text reads.
    #[must_use]
    pub const fn text_reads(&self) -> usize {
        self.before + self.after + self.selected
    }
}

/// The host state last described by a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reported {
    selection: Span,
    composition: Option<Span>,
    text: Vec<u16>,
}

/// In-memory host editor.
#[derive(Debug, Clone)]
pub struct FakeHost {
    text: Vec<u16>,
    selection: Span,
    composition: Option<Span>,
    settings: HostSettings,
    counters: CallCounters,
    monitor: Option<(u32, usize)>,
    batch_depth: usize,
    reported: Reported,
    outbox: VecDeque<UpdateEvent>,
}

impl FakeHost {
    /// Committed document with `selection`.
    #[must_use]
    pub fn new(text: &str, selection: Span) -> Self {
        let text: Vec<u16> = text.encode_utf16().collect();
        let selection = clamp(selection, text.len());
        Self {
            reported: Reported {
                selection,
                composition: None,
                text: text.clone(),
            },
            text,
            selection,
            composition: None,
            settings: HostSettings::default(),
            counters: CallCounters::default(),
            monitor: None,
            batch_depth: 0,
            outbox: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: HostSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut HostSettings {
        &mut self.settings
    }

    // ── Ground truth ────────────────────────────────────────────────────

    #[must_use]
    pub fn text(&self) -> String {
        self.slice(0, self.text.len())
    }

    #[must_use]
    pub const fn selection(&self) -> Span {
        self.selection
    }

    #[must_use]
    pub const fn composition(&self) -> Option<Span> {
        self.composition
    }

    /// Composing text, empty when nothing is composed.
    #[must_use]
    pub fn composing_text(&self) -> String {
        self.composition
            .map_or_else(String::new, |span| self.slice(span.start, span.end))
    }

    /// Whole host state.
    #[must_use]
    pub fn state(&self) -> TextState {
        let len = self.text.len();
        match self.composition {
            Some(span) => TextState::composed(
                &self.slice(0, span.start),
                &self.slice(span.start, span.end),
                &self.slice(span.end, len),
            )
            .with_selection(self.selection),
            None => TextState::committed(
                &self.slice(0, self.selection.start),
                &self.slice(self.selection.start, self.selection.end),
                &self.slice(self.selection.end, len),
            ),
        }
    }

    #[must_use]
    pub const fn counters(&self) -> CallCounters {
        self.counters
    }

    pub fn reset_counters(&mut self) {
        self.counters = CallCounters::default();
    }

    /// Monitor token of the last monitoring request, if any.
    #[must_use]
    pub fn monitor_token(&self) -> Option<u32> {
        self.monitor.map(|(token, _)| token)
    }

    // ── Outbox ──────────────────────────────────────────────────────────

    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.outbox.len()
    }

    pub fn pop_event(&mut self) -> Option<UpdateEvent> {
        self.outbox.pop_front()
    }

    pub fn take_events(&mut self) -> Vec<UpdateEvent> {
        self.outbox.drain(..).collect()
    }

    // ── External changes ────────────────────────────────────────────────

    /// Another writer replaces `span` with `text`.
    pub fn external_replace(&mut self, span: Span, text: &str) {
        let span = clamp(span, self.text.len());
        trace!(%span, text, "external replace");
        self.edit(Edit::replacing(span, utf16_len(text)), text);
        self.changed();
    }

    /// Another writer moves the selection.
    pub fn external_select(&mut self, span: Span) {
        self.selection = clamp(span, self.text.len());
        trace!(selection = %self.selection, "external select");
        self.changed();
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn slice(&self, start: usize, end: usize) -> String {
        let len = self.text.len();
        String::from_utf16_lossy(&self.text[start.min(len)..end.min(len)])
    }

    /// Splice `inserted` over the edit and carry selection and composition
    /// across it.
    fn edit(&mut self, edit: Edit, inserted: &str) {
        let end = edit.start + edit.deleted;
        self.text.splice(edit.start..end, inserted.encode_utf16());
        self.selection = self.selection.map_through(&edit);
        self.composition = self
            .composition
            .map(|span| span.map_through(&edit))
            .filter(|span| !span.is_empty());
    }

    /// Replace `target` and place the cursor by the new-cursor-position
    /// rule. Returns the inserted range.
    fn replace(&mut self, target: Span, text: &str, new_cursor_position: i32) -> Span {
        let len = utf16_len(text);
        self.text.splice(target.start..target.end, text.encode_utf16());
        // Positive positions count from the end of the new text, the rest
        // from its start.
        let steps = new_cursor_position.unsigned_abs() as usize;
        let cursor = if new_cursor_position > 0 {
            target.start + len + steps - 1
        } else {
            target.start.saturating_sub(steps)
        };
        self.selection = Span::caret(cursor.min(self.text.len()));
        Span::with_len(target.start, len)
    }

    fn units_before(&self, offset: usize) -> usize {
        match offset {
            0 => 0,
            1 => 1,
            _ if is_low(self.text[offset - 1]) && is_high(self.text[offset - 2]) => 2,
            _ => 1,
        }
    }

    fn units_after(&self, offset: usize) -> usize {
        let len = self.text.len();
        if offset >= len {
            0
        } else if offset + 1 < len && is_high(self.text[offset]) && is_low(self.text[offset + 1]) {
            2
        } else {
            1
        }
    }

    fn window(&self, hint: usize) -> ExtractedText {
        let len = self.text.len();
        if len <= hint {
            return ExtractedText::snapshot(0, self.text(), self.selection);
        }
        let mut start = self.selection.start.saturating_sub(hint / 2);
        if start > 0 && is_low(self.text[start]) {
            start -= 1;
        }
        let mut end = (start + hint).min(len).max(self.selection.end);
        if end < len && is_low(self.text[end]) {
            end += 1;
        }
        let selection = Span::new(self.selection.start - start, self.selection.end - start);
        ExtractedText::snapshot(start, self.slice(start, end), selection)
    }

    /// Queue notifications for whatever changed since the last report.
    fn changed(&mut self) {
        if self.batch_depth > 0 {
            return;
        }
        let current = Reported {
            selection: self.selection,
            composition: self.composition,
            text: self.text.clone(),
        };
        let skip_noop = self.settings.skip_noop_notifications;
        if skip_noop && current == self.reported {
            return;
        }

        let selection = self.settings.send_selection_updates.then(|| {
            UpdateEvent::Selection(SelectionUpdate {
                old: self.reported.selection,
                new: current.selection,
                candidates: current.composition,
            })
        });
        let extracted = match self.monitor {
            Some((token, hint)) if !skip_noop || current.text != self.reported.text => {
                Some(UpdateEvent::ExtractedText(ExtractedTextUpdate {
                    token,
                    text: self.window(hint),
                }))
            }
            _ => None,
        };
        let ordered = if self.settings.update_selection_before_extracted_text {
            [selection, extracted]
        } else {
            [extracted, selection]
        };
        for event in ordered.into_iter().flatten() {
            trace!(channel = event.channel().as_str(), selection = %event.selection(), "notify");
            self.outbox.push_back(event);
        }
        self.reported = current;
    }
}

impl HostEditor for FakeHost {
    fn text_before_cursor(&mut self, n: usize, _flags: TextRequestFlags) -> HostResult<String> {
        self.counters.before += 1;
        let end = self.selection.start;
        let mut start = end.saturating_sub(n.min(self.settings.text_limit));
        if start > 0 && start < end && is_low(self.text[start]) {
            start += 1;
        }
        Ok(self.slice(start, end))
    }

    fn text_after_cursor(&mut self, n: usize, _flags: TextRequestFlags) -> HostResult<String> {
        self.counters.after += 1;
        let start = self.selection.end;
        let len = self.text.len();
        let mut end = start
            .saturating_add(n.min(self.settings.text_limit))
            .min(len);
        if end < len && end > start && is_low(self.text[end]) {
            end -= 1;
        }
        Ok(self.slice(start, end))
    }

    fn selected_text(&mut self, _flags: TextRequestFlags) -> HostResult<String> {
        self.counters.selected += 1;
        if !self.settings.selected_text_supported {
            return Err(HostError::Unsupported("getSelectedText"));
        }
        Ok(self.slice(self.selection.start, self.selection.end))
    }

    fn extracted_text(&mut self, request: ExtractedTextRequest) -> HostResult<ExtractedText> {
        self.counters.extracted += 1;
        if !self.settings.extracted_text_supported {
            return Err(HostError::Unsupported("getExtractedText"));
        }
        if request.monitor {
            self.monitor = Some((request.token, request.hint_max_units));
        }
        Ok(self.window(request.hint_max_units))
    }

    fn set_composing_text(&mut self, text: &str, new_cursor_position: i32) -> HostResult<()> {
        self.counters.writes += 1;
        let text = self.settings.compose_transform.apply(text);
        let target = self.composition.unwrap_or(self.selection);
        let span = self.replace(target, &text, new_cursor_position);
        self.composition = (!span.is_empty()).then_some(span);
        self.changed();
        Ok(())
    }

    fn commit_text(&mut self, text: &str, new_cursor_position: i32) -> HostResult<()> {
        self.counters.writes += 1;
        let target = self.composition.take().unwrap_or(self.selection);
        self.replace(target, text, new_cursor_position);
        self.changed();
        Ok(())
    }

    fn finish_composing_text(&mut self) -> HostResult<()> {
        self.counters.writes += 1;
        self.composition = None;
        self.changed();
        Ok(())
    }

    fn set_selection(&mut self, start: usize, end: usize) -> HostResult<()> {
        self.counters.writes += 1;
        self.selection = clamp(Span::new(start, end), self.text.len());
        self.changed();
        Ok(())
    }

    fn delete_surrounding_text(&mut self, before: usize, after: usize) -> HostResult<()> {
        self.counters.writes += 1;
        if !self.settings.delete_surrounding_supported {
            return Err(HostError::Unsupported("deleteSurroundingText"));
        }
        let after = after.min(self.text.len() - self.selection.end);
        self.edit(Edit::new(self.selection.end, after, 0), "");
        let before = before.min(self.selection.start);
        self.edit(Edit::new(self.selection.start - before, before, 0), "");
        self.changed();
        Ok(())
    }

    fn send_key_event(&mut self, key: KeyCode) -> HostResult<()> {
        self.counters.writes += 1;
        self.composition = None;
        let selection = self.selection;
        match key {
            KeyCode::Backspace | KeyCode::ForwardDelete if !selection.is_empty() => {
                self.edit(Edit::replacing(selection, 0), "");
            }
            KeyCode::Backspace => {
                let units = self.units_before(selection.start);
                self.edit(Edit::new(selection.start - units, units, 0), "");
            }
            KeyCode::ForwardDelete => {
                let units = self.units_after(selection.end);
                self.edit(Edit::new(selection.end, units, 0), "");
            }
            KeyCode::Enter | KeyCode::Char(_) => {
                let text = key.committed_text().unwrap_or_default();
                self.replace(selection, &text, 1);
            }
            KeyCode::ArrowLeft if !selection.is_empty() => {
                self.selection = Span::caret(selection.start);
            }
            KeyCode::ArrowRight if !selection.is_empty() => {
                self.selection = Span::caret(selection.end);
            }
            KeyCode::ArrowLeft => {
                let units = self.units_before(selection.start);
                self.selection = Span::caret(selection.start - units);
            }
            KeyCode::ArrowRight => {
                let units = self.units_after(selection.end);
                self.selection = Span::caret(selection.end + units);
            }
        }
        self.changed();
        Ok(())
    }

    fn begin_batch_edit(&mut self) -> HostResult<()> {
        self.counters.batches += 1;
        self.batch_depth += 1;
        Ok(())
    }

    fn end_batch_edit(&mut self) -> HostResult<()> {
        self.batch_depth = self.batch_depth.saturating_sub(1);
        self.changed();
        Ok(())
    }
}

fn clamp(span: Span, len: usize) -> Span {
    Span::new(span.start.min(len), span.end.min(len))
}

const fn is_high(unit: u16) -> bool {
    matches!(unit, 0xD800..=0xDBFF)
}

const fn is_low(unit: u16) -> bool {
    matches!(unit, 0xDC00..=0xDFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_and_commit_follow_cursor_rule() {
        let mut host = FakeHost::new("xy", Span::caret(1));
        host.set_composing_text("ab", 1).ok();
        assert_eq!(host.state(), TextState::composed("x", "ab", "y"));
        host.commit_text("abc", 0).ok();
        assert_eq!(host.text(), "xabcy");
        assert_eq!(host.selection(), Span::caret(1));
        assert_eq!(host.composition(), None);
    }

    #[test]
    fn doubling_host_doubles_composition() {
        let mut host = FakeHost::new("", Span::caret(0))
            .with_settings(HostSettings::default().with_compose_transform(ComposeTransform::Double));
        host.set_composing_text("a", 1).ok();
        host.set_composing_text("ab", 1).ok();
        assert_eq!(host.composing_text(), "abab");
        assert_eq!(host.selection(), Span::caret(4));
    }

    #[test]
    fn batch_reports_once() {
        let mut host = FakeHost::new("", Span::caret(0));
        host.begin_batch_edit().ok();
        host.set_composing_text("a", 1).ok();
        host.set_composing_text("ab", 1).ok();
        assert_eq!(host.pending_events(), 0);
        host.end_batch_edit().ok();
        let events = host.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].selection(), Span::caret(2));
    }

    #[test]
    fn noop_writes_stay_silent() {
        let mut host = FakeHost::new("abc", Span::caret(3));
        host.set_selection(3, 3).ok();
        assert_eq!(host.pending_events(), 0);

        let mut host = FakeHost::new("abc", Span::caret(3))
            .with_settings(HostSettings::default().with_noop_notifications());
        host.set_selection(3, 3).ok();
        assert_eq!(host.pending_events(), 1);
    }

    #[test]
    fn reads_respect_limit_and_pairs() {
        let mut host = FakeHost::new("a\u{1F600}b", Span::caret(3))
            .with_settings(HostSettings::default().with_text_limit(1));
        let flags = TextRequestFlags::empty();
        assert_eq!(host.text_before_cursor(5, flags).ok().as_deref(), Some(""));
        host.settings_mut().text_limit = usize::MAX;
        assert_eq!(host.text_before_cursor(2, flags).ok().as_deref(), Some("\u{1F600}"));
        assert_eq!(host.text_after_cursor(5, flags).ok().as_deref(), Some("b"));
    }

    #[test]
    fn monitored_text_changes_order_by_setting() {
        let mut host = FakeHost::new("", Span::caret(0))
            .with_settings(HostSettings::default().with_extracted_text_first());
        let request = ExtractedTextRequest {
            hint_max_units: 100,
            token: 9,
            monitor: true,
        };
        host.extracted_text(request).ok();
        host.commit_text("hi", 1).ok();
        let events = host.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], UpdateEvent::ExtractedText(update) if update.token == 9));
        assert!(matches!(events[1], UpdateEvent::Selection(_)));
    }

    #[test]
    fn backspace_removes_whole_pair() {
        let mut host = FakeHost::new("a\u{1F600}", Span::caret(3));
        host.send_key_event(KeyCode::Backspace).ok();
        assert_eq!(host.text(), "a");
        assert_eq!(host.selection(), Span::caret(1));
    }

    #[test]
    fn external_insert_moves_cursor() {
        let mut host = FakeHost::new("ab", Span::caret(2));
        host.external_replace(Span::caret(0), "zz");
        assert_eq!(host.text(), "zzab");
        assert_eq!(host.selection(), Span::caret(4));
        assert_eq!(host.pending_events(), 1);
    }
}
