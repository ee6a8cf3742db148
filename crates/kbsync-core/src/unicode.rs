#![forbid(unsafe_code)]

//! UTF-16 accounting over Rust strings.
//!
//! The host measures everything in UTF-16 code units while cached text is
//! held as `String`. These helpers convert between the two without ever
//! splitting a surrogate pair: a unit offset that falls between the two
//! halves of a pair is not a valid boundary and is reported as such.

/// Length of `text` in UTF-16 code units.
#[must_use]
pub fn utf16_len(text: &str) -> usize {
    text.chars().map(char::len_utf16).sum()
}

/// Byte index of the code-unit offset `units`, or `None` when the offset
/// lies past the end or inside a surrogate pair.
#[must_use]
pub fn byte_index(text: &str, units: usize) -> Option<usize> {
    let mut seen = 0usize;
    for (idx, ch) in text.char_indices() {
        if seen == units {
            return Some(idx);
        }
        if seen > units {
            return None;
        }
        seen += ch.len_utf16();
    }
    (seen == units).then_some(text.len())
}

/// Substring covering code units `[start, end)`.
#[must_use]
pub fn slice_units(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let from = byte_index(text, start)?;
    let to = byte_index(text, end)?;
    Some(&text[from..to])
}

/// Longest prefix of `text` that is at most `units` code units long.
#[must_use]
pub fn prefix_units(text: &str, units: usize) -> &str {
    let mut seen = 0usize;
    for (idx, ch) in text.char_indices() {
        let next = seen + ch.len_utf16();
        if next > units {
            return &text[..idx];
        }
        seen = next;
    }
    text
}

/// Longest suffix of `text` that is at most `units` code units long.
#[must_use]
pub fn suffix_units(text: &str, units: usize) -> &str {
    let mut seen = 0usize;
    for (idx, ch) in text.char_indices().rev() {
        let next = seen + ch.len_utf16();
        if next > units {
            return &text[idx + ch.len_utf8()..];
        }
        seen = next;
    }
    text
}

/// Distance covered by a code-point walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Walk {
    /// Code units crossed.
    pub units: usize,
    /// Code points crossed.
    pub points: usize,
}

/// Walk up to `points` code points forward from unit offset `from`.
///
/// Stops early at the end of `text`. Returns an empty walk when `from` is
/// not a valid boundary.
#[must_use]
pub fn walk_forward(text: &str, from: usize, points: usize) -> Walk {
    let Some(start) = byte_index(text, from) else {
        return Walk::default();
    };
    let mut walk = Walk::default();
    for ch in text[start..].chars().take(points) {
        walk.units += ch.len_utf16();
        walk.points += 1;
    }
    walk
}

/// Walk up to `points` code points backward from unit offset `from`.
#[must_use]
pub fn walk_backward(text: &str, from: usize, points: usize) -> Walk {
    let Some(end) = byte_index(text, from) else {
        return Walk::default();
    };
    let mut walk = Walk::default();
    for ch in text[..end].chars().rev().take(points) {
        walk.units += ch.len_utf16();
        walk.points += 1;
    }
    walk
}

/// Whether `ch` needs a surrogate pair in UTF-16.
#[must_use]
pub const fn is_supplementary(ch: char) -> bool {
    ch.len_utf16() == 2
}
