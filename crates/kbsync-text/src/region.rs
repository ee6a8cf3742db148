#![forbid(unsafe_code)]

//! Cached regions and contiguous runs.

use std::fmt;

use kbsync_core::Span;
use kbsync_core::unicode::{prefix_units, slice_units, suffix_units, utf16_len};

/// The three cached segments around the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Before,
    Selected,
    After,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::Before, Region::Selected, Region::After];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Selected => "selected",
            Self::After => "after",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One cached substring at absolute offsets.
///
/// `bounded` records that the region reaches the document edge on its outer
/// side (the start for `Before`, the end for `After`). `fetched_len` is the
/// longest read already answered by the host for this anchoring, so asking
/// again for that much would return nothing new.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CachedRegion {
    pub(crate) text: String,
    pub(crate) span: Span,
    pub(crate) known: bool,
    pub(crate) bounded: bool,
    pub(crate) fetched_len: usize,
}

impl CachedRegion {
    /// A region with no information.
    #[must_use]
    pub fn unknown() -> Self {
        Self::default()
    }

    /// A known region starting at `abs_start`.
    #[must_use]
    pub fn known(abs_start: usize, text: impl Into<String>, bounded: bool) -> Self {
        let text = text.into();
        let len = utf16_len(&text);
        Self {
            span: Span::with_len(abs_start, len),
            fetched_len: len,
            text,
            known: true,
            bounded,
        }
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.known.then_some(self.text.as_str())
    }

    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.known.then_some(self.span)
    }

    #[must_use]
    pub const fn abs_start(&self) -> usize {
        self.span.start
    }

    #[must_use]
    pub const fn abs_end(&self) -> usize {
        self.span.end
    }

    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.known
    }

    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.known && self.bounded
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.span.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    #[must_use]
    pub const fn fetched_len(&self) -> usize {
        self.fetched_len
    }
}

/// Maximal stretch of contiguous known text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub span: Span,
    pub text: String,
    /// The run starts at the beginning of the document.
    pub bounded_start: bool,
    /// The run ends at the end of the document.
    pub bounded_end: bool,
}

impl Run {
    #[must_use]
    pub fn new(start: usize, text: impl Into<String>, bounded_start: bool, bounded_end: bool) -> Self {
        let text = text.into();
        Self {
            span: Span::with_len(start, utf16_len(&text)),
            text,
            bounded_start: bounded_start || start == 0,
            bounded_end,
        }
    }

    /// Text covering the absolute range `span`, if the run holds all of it.
    #[must_use]
    pub fn slice(&self, span: Span) -> Option<&str> {
        if !self.span.covers(span) {
            return None;
        }
        slice_units(
            &self.text,
            span.start - self.span.start,
            span.end - self.span.start,
        )
    }

    /// Whether `offset` lies inside the run or on one of its edges.
    #[must_use]
    pub const fn touches(&self, offset: usize) -> bool {
        self.span.start <= offset && offset <= self.span.end
    }

    /// The part of the run before `until`, shortened to a code point
    /// boundary.
    #[must_use]
    pub fn head(&self, until: usize) -> Option<Run> {
        if until <= self.span.start {
            return None;
        }
        let units = until.min(self.span.end) - self.span.start;
        let text = prefix_units(&self.text, units);
        if text.is_empty() {
            return None;
        }
        let reaches_end = until >= self.span.end;
        Some(Run::new(
            self.span.start,
            text,
            self.bounded_start,
            self.bounded_end && reaches_end,
        ))
    }

    /// The part of the run from `from` on, shortened to a code point
    /// boundary.
    #[must_use]
    pub fn tail(&self, from: usize) -> Option<Run> {
        if from >= self.span.end {
            return None;
        }
        let units = self.span.end - from.max(self.span.start);
        let text = suffix_units(&self.text, units);
        if text.is_empty() {
            return None;
        }
        let start = self.span.end - utf16_len(text);
        Some(Run::new(
            start,
            text,
            self.bounded_start && from <= self.span.start,
            self.bounded_end,
        ))
    }
}

/// Why a cache read came back shorter than requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Full length available.
    None,
    /// The document ends first; the answer is complete.
    DocumentBoundary,
    /// The host already answered a read this long with less.
    HostLimit,
    /// The cache holds less than requested; the host may have more.
    CacheLimit,
}

impl Truncation {
    /// Whether asking the host could still produce a longer answer.
    #[must_use]
    pub const fn needs_fetch(self) -> bool {
        matches!(self, Self::CacheLimit)
    }
}

/// Result of [`TextWindowCache::read`](crate::TextWindowCache::read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    pub text: String,
    pub truncation: Truncation,
}

impl CacheRead {
    /// Whether fewer units came back than were requested.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        !matches!(self.truncation, Truncation::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_region_measures_utf16() {
        let region = CachedRegion::known(4, "a😀", false);
        assert_eq!(region.span(), Some(Span::new(4, 7)));
        assert_eq!(region.fetched_len(), 3);
    }

    #[test]
    fn unknown_region_hides_text() {
        let region = CachedRegion::unknown();
        assert_eq!(region.text(), None);
        assert!(!region.is_bounded());
    }

    #[test]
    fn run_at_zero_is_bounded() {
        let run = Run::new(0, "abc", false, false);
        assert!(run.bounded_start);
        assert_eq!(run.slice(Span::new(1, 3)), Some("bc"));
        assert_eq!(run.slice(Span::new(1, 4)), None);
    }

    #[test]
    fn head_and_tail_respect_pairs() {
        let run = Run::new(10, "a😀b", false, true);
        let head = run.head(12).unwrap();
        assert_eq!(head.text, "a");
        assert!(!head.bounded_end);
        let tail = run.tail(12).unwrap();
        assert_eq!(tail.text, "b");
        assert_eq!(tail.span, Span::new(13, 14));
        assert!(tail.bounded_end);
        assert_eq!(run.head(10), None);
        assert_eq!(run.tail(14), None);
    }

    #[test]
    fn truncation_only_fetches_on_cache_limit() {
        assert!(Truncation::CacheLimit.needs_fetch());
        assert!(!Truncation::HostLimit.needs_fetch());
        assert!(!Truncation::DocumentBoundary.needs_fetch());
    }
}
