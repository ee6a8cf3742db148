#![forbid(unsafe_code)]

//! Absolute ranges and edit arithmetic over the host document.
//!
//! Every offset exchanged with the host is a UTF-16 code unit index counted
//! from the start of the document. [`Span`] is the shared vocabulary for
//! selections, composition bounds and cached regions; [`Edit`] describes a
//! replacement and knows how to carry offsets across it.

use std::fmt;

/// Half-open range `[start, end)` of UTF-16 code units.
///
/// Construction through [`Span::new`] normalizes reversed bounds, so
/// `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    /// Create a span, swapping the bounds if they are reversed.
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Empty span at `offset` (a collapsed cursor).
    #[must_use]
    pub const fn caret(offset: usize) -> Self {
        Self {
            start: offset,
            end: offset,
        }
    }

    /// Span starting at `start` covering `len` units.
    #[must_use]
    pub const fn with_len(start: usize, len: usize) -> Self {
        Self {
            start,
            end: start + len,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `other` lies entirely inside `self`.
    #[must_use]
    pub const fn covers(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two spans share at least one code unit.
    #[must_use]
    pub const fn overlaps(&self, other: Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Intersection of two spans, if they share any code unit.
    #[must_use]
    pub fn intersect(&self, other: Span) -> Option<Span> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Span { start, end })
    }

    /// Carry this span across `edit`.
    ///
    /// The start follows text inserted exactly at it; the end stays put.
    /// Bounds inside the deleted range collapse onto the edit.
    #[must_use]
    pub fn map_through(&self, edit: &Edit) -> Span {
        let start = edit.map_offset(self.start, Bias::Right);
        let end = edit.map_offset(self.end, Bias::Left).max(start);
        Span { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Which way an offset sitting exactly on an insertion point moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Stay before the inserted text.
    Left,
    /// Move past the inserted text.
    Right,
}

/// A replacement of `deleted` units at `start` by `inserted` units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Edit {
    pub start: usize,
    pub deleted: usize,
    pub inserted: usize,
}

impl Edit {
    #[must_use]
    pub const fn new(start: usize, deleted: usize, inserted: usize) -> Self {
        Self {
            start,
            deleted,
            inserted,
        }
    }

    /// Edit replacing `span` by `inserted` units.
    #[must_use]
    pub const fn replacing(span: Span, inserted: usize) -> Self {
        Self {
            start: span.start,
            deleted: span.len(),
            inserted,
        }
    }

    /// The range removed from the old document.
    #[must_use]
    pub const fn deleted_span(&self) -> Span {
        Span::with_len(self.start, self.deleted)
    }

    /// The range occupied by the inserted text in the new document.
    #[must_use]
    pub const fn inserted_span(&self) -> Span {
        Span::with_len(self.start, self.inserted)
    }

    /// Signed change in document length.
    #[must_use]
    pub const fn delta(&self) -> isize {
        self.inserted as isize - self.deleted as isize
    }

    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.deleted == 0 && self.inserted == 0
    }

    /// Gap-buffer translation of one offset.
    ///
    /// - before the edit: unchanged
    /// - inside the deleted range: collapsed onto the edit (`Left` lands on
    ///   `start`, `Right` lands after the inserted text)
    /// - after the deleted range: shifted by `inserted - deleted`
    #[must_use]
    pub fn map_offset(&self, offset: usize, bias: Bias) -> usize {
        let deleted_end = self.start + self.deleted;
        if offset < self.start {
            return offset;
        }
        if offset > self.start && offset >= deleted_end {
            return offset + self.inserted - self.deleted;
        }
        match bias {
            Bias::Left => self.start,
            Bias::Right => self.start + self.inserted,
        }
    }

    /// Whether the edit rewrites text strictly inside `span`, so content
    /// stored for `span` can no longer be trusted as-is.
    #[must_use]
    pub fn rewrites(&self, span: Span) -> bool {
        if self.deleted > 0 && self.deleted_span().overlaps(span) {
            return true;
        }
        self.inserted > 0 && span.start < self.start && self.start < span.end
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "edit@{} -{} +{}",
            self.start, self.deleted, self.inserted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_reversed_bounds() {
        assert_eq!(Span::new(7, 3), Span { start: 3, end: 7 });
        assert_eq!(Span::new(3, 7).len(), 4);
    }

    #[test]
    fn overlap_and_intersection() {
        let a = Span::new(0, 5);
        let b = Span::new(4, 9);
        assert!(a.overlaps(b));
        assert_eq!(a.intersect(b), Some(Span::new(4, 5)));
        assert!(!a.overlaps(Span::new(5, 9)));
        assert_eq!(a.intersect(Span::new(5, 9)), None);
    }

    #[test]
    fn empty_span_never_overlaps() {
        assert!(!Span::caret(3).overlaps(Span::new(0, 10)));
    }

    #[test]
    fn map_offset_before_and_after() {
        let edit = Edit::new(5, 2, 4);
        assert_eq!(edit.map_offset(3, Bias::Left), 3);
        assert_eq!(edit.map_offset(7, Bias::Left), 9);
        assert_eq!(edit.map_offset(10, Bias::Right), 12);
    }

    #[test]
    fn map_offset_inside_deletion_collapses() {
        let edit = Edit::new(5, 4, 1);
        assert_eq!(edit.map_offset(6, Bias::Left), 5);
        assert_eq!(edit.map_offset(6, Bias::Right), 6);
    }

    #[test]
    fn pure_insertion_respects_bias() {
        let edit = Edit::new(3, 0, 2);
        assert_eq!(edit.map_offset(3, Bias::Left), 3);
        assert_eq!(edit.map_offset(3, Bias::Right), 5);
    }

    #[test]
    fn span_end_stays_before_insertion_at_end() {
        let comp = Span::new(0, 3);
        assert_eq!(comp.map_through(&Edit::new(3, 0, 1)), Span::new(0, 3));
    }

    #[test]
    fn span_start_follows_insertion_at_start() {
        let after = Span::new(3, 10);
        assert_eq!(after.map_through(&Edit::new(3, 0, 2)), Span::new(5, 12));
    }

    #[test]
    fn rewrites_detects_interior_changes() {
        let span = Span::new(2, 6);
        assert!(Edit::new(3, 1, 0).rewrites(span));
        assert!(Edit::new(4, 0, 1).rewrites(span));
        assert!(!Edit::new(6, 0, 1).rewrites(span));
        assert!(!Edit::new(2, 0, 1).rewrites(span));
        assert!(!Edit::new(0, 2, 0).rewrites(span));
    }

    #[test]
    fn delta_is_signed() {
        assert_eq!(Edit::new(0, 5, 2).delta(), -3);
        assert_eq!(Edit::new(0, 0, 2).delta(), 2);
    }
}
