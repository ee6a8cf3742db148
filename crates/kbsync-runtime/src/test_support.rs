//! Small in-crate host double and clock for unit tests.

use std::cell::Cell;
use std::rc::Rc;

use web_time::{Duration, Instant};

use kbsync_core::{
    Clock, ExtractedText, ExtractedTextRequest, HostEditor, HostError, HostResult, KeyCode, Span,
    TextRequestFlags,
};

/// Manually advanced clock; clones share one time line.
#[derive(Debug, Clone)]
pub(crate) struct TestClock {
    now: Rc<Cell<Instant>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}

/// A UTF-16 document with a selection, a composition and call counters.
/// Writes apply immediately and emit no notifications.
pub(crate) struct Doc {
    pub text: Vec<u16>,
    pub selection: Span,
    pub composition: Option<Span>,
    pub limit: usize,
    pub selected_supported: bool,
    pub extracted_supported: bool,
    pub surrounding_supported: bool,
    pub before_calls: usize,
    pub after_calls: usize,
    pub extracted_calls: usize,
    pub writes: usize,
}

impl Doc {
    pub fn new(text: &str, selection: Span) -> Self {
        Self {
            text: text.encode_utf16().collect(),
            selection,
            composition: None,
            limit: usize::MAX,
            selected_supported: true,
            extracted_supported: true,
            surrounding_supported: false,
            before_calls: 0,
            after_calls: 0,
            extracted_calls: 0,
            writes: 0,
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> String {
        String::from_utf16_lossy(&self.text[start..end])
    }

    pub fn contents(&self) -> String {
        self.slice(0, self.text.len())
    }

    fn replace(&mut self, span: Span, text: &str, new_cursor_position: i32) -> Span {
        let units: Vec<u16> = text.encode_utf16().collect();
        let len = units.len();
        self.text.splice(span.start..span.end, units);
        let cursor = kbsync_core::resolve_new_cursor(
            span.start,
            len,
            new_cursor_position,
            Some(self.text.len()),
        );
        self.selection = Span::caret(cursor);
        Span::with_len(span.start, len)
    }
}

impl HostEditor for Doc {
    fn text_before_cursor(&mut self, n: usize, _: TextRequestFlags) -> HostResult<String> {
        self.before_calls += 1;
        let n = n.min(self.limit);
        let end = self.selection.start;
        Ok(self.slice(end.saturating_sub(n), end))
    }

    fn text_after_cursor(&mut self, n: usize, _: TextRequestFlags) -> HostResult<String> {
        self.after_calls += 1;
        let n = n.min(self.limit);
        let start = self.selection.end;
        Ok(self.slice(start, (start + n).min(self.text.len())))
    }

    fn selected_text(&mut self, _: TextRequestFlags) -> HostResult<String> {
        if !self.selected_supported {
            return Err(HostError::Unsupported("getSelectedText"));
        }
        Ok(self.slice(self.selection.start, self.selection.end))
    }

    fn extracted_text(&mut self, _: ExtractedTextRequest) -> HostResult<ExtractedText> {
        self.extracted_calls += 1;
        if !self.extracted_supported {
            return Err(HostError::Unsupported("getExtractedText"));
        }
        Ok(ExtractedText::snapshot(0, self.contents(), self.selection))
    }

    fn set_composing_text(&mut self, text: &str, new_cursor_position: i32) -> HostResult<()> {
        self.writes += 1;
        let target = self.composition.unwrap_or(self.selection);
        let span = self.replace(target, text, new_cursor_position);
        self.composition = (!span.is_empty()).then_some(span);
        Ok(())
    }

    fn commit_text(&mut self, text: &str, new_cursor_position: i32) -> HostResult<()> {
        self.writes += 1;
        let target = self.composition.take().unwrap_or(self.selection);
        self.replace(target, text, new_cursor_position);
        Ok(())
    }

    fn finish_composing_text(&mut self) -> HostResult<()> {
        self.writes += 1;
        self.composition = None;
        Ok(())
    }

    fn set_selection(&mut self, start: usize, end: usize) -> HostResult<()> {
        self.writes += 1;
        let len = self.text.len();
        self.selection = Span::new(start.min(len), end.min(len));
        Ok(())
    }

    fn delete_surrounding_text(&mut self, before: usize, after: usize) -> HostResult<()> {
        if !self.surrounding_supported {
            return Err(HostError::Unsupported("deleteSurroundingText"));
        }
        self.writes += 1;
        let end = (self.selection.end + after).min(self.text.len());
        self.text.drain(self.selection.end..end);
        let start = self.selection.start.saturating_sub(before);
        self.text.drain(start..self.selection.start);
        self.selection = Span::new(start, self.selection.end - (self.selection.start - start));
        Ok(())
    }

    fn send_key_event(&mut self, _: KeyCode) -> HostResult<()> {
        Err(HostError::Unsupported("sendKeyEvent"))
    }

    fn begin_batch_edit(&mut self) -> HostResult<()> {
        Ok(())
    }

    fn end_batch_edit(&mut self) -> HostResult<()> {
        Ok(())
    }
}
