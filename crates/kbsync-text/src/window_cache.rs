#![forbid(unsafe_code)]

//! Three-region text window around the selection.
//!
//! [`TextWindowCache`] keeps what the engine knows about the document as up
//! to three substrings: the text before the selection, the selection itself
//! and the text after it. Each is independently known or unknown and keyed
//! by absolute UTF-16 offsets.
//!
//! # Design
//!
//! The regions are always anchored to the cached selection: `Before` ends at
//! `selection.start`, `Selected` is exactly the selection and `After` starts
//! at `selection.end`. Every structural change (a new anchor, an edit, an
//! invalidation) goes through the same path: flatten the known regions into
//! contiguous [`Run`]s, transform the runs, then split them again around the
//! selection. Text is never invented during that path, only carried, sliced
//! or dropped.
//!
//! # Invariants
//!
//! 1. Adjacent known regions are contiguous, with no gap or overlap.
//! 2. No region boundary falls inside a surrogate pair.
//! 3. A bounded `Before` region starts at offset 0; a bounded `After` region
//!    ends at the end of the document.
//! 4. `fetched_len >= len` for every known region.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Edit outside any known run | Runs are shifted or split, the edited range becomes unknown |
//! | Fill longer than the selection start | Ignored, the caller's cursor is stale |
//! | Slice lands inside a surrogate pair | The piece shrinks to the nearest boundary |

use smallvec::SmallVec;
use tracing::trace;

use kbsync_core::unicode::{prefix_units, suffix_units, utf16_len};
use kbsync_core::{Edit, Span};

use crate::region::{CacheRead, CachedRegion, Region, Run, Truncation};

/// Contiguous known stretches, in document order.
pub type Runs = SmallVec<[Run; 3]>;

/// What a [`TextWindowCache::fill`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FillOutcome {
    /// The region gained or changed content.
    pub changed: bool,
    /// Cached content disagreed with the host and was replaced.
    pub corrected: bool,
    /// Cached content reached past the document boundary and was dropped.
    pub removed: bool,
}

/// Cache of the text around the selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextWindowCache {
    before: CachedRegion,
    selected: CachedRegion,
    after: CachedRegion,
    selection: Option<Span>,
}

impl TextWindowCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, including the anchor.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// The selection the regions are anchored to.
    #[must_use]
    pub const fn selection(&self) -> Option<Span> {
        self.selection
    }

    #[must_use]
    pub const fn region(&self, region: Region) -> &CachedRegion {
        match region {
            Region::Before => &self.before,
            Region::Selected => &self.selected,
            Region::After => &self.after,
        }
    }

    /// Whether no text at all is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Region::ALL
            .iter()
            .all(|&region| self.region(region).text().is_none_or(str::is_empty))
    }

    // ── Anchoring ───────────────────────────────────────────────────────

    /// Re-split the cached text around `selection`.
    ///
    /// Text known before the move stays known wherever it is still
    /// contiguous with the new selection.
    pub fn reanchor(&mut self, selection: Span) {
        if self.selection == Some(selection) {
            return;
        }
        let runs = self.runs();
        self.rebuild(&runs, selection);
    }

    /// Replace the whole cache with one window of host text.
    pub fn seed_window(
        &mut self,
        start: usize,
        text: &str,
        selection: Span,
        bounded_start: bool,
        bounded_end: bool,
    ) {
        let run = Run::new(start, text, bounded_start, bounded_end);
        trace!(window = %run.span, selection = %selection, "seed cache window");
        self.rebuild(&[run], selection);
    }

    /// Whether a window of host text is consistent with everything cached.
    #[must_use]
    pub fn agrees_with(&self, start: usize, text: &str) -> bool {
        let window = Run::new(start, text, false, false);
        self.runs().iter().all(|run| {
            if run.bounded_end && window.span.end > run.span.end {
                return false;
            }
            match run.span.intersect(window.span) {
                None => true,
                Some(common) => match (run.slice(common), window.slice(common)) {
                    (Some(cached), Some(host)) => cached == host,
                    _ => false,
                },
            }
        })
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Read up to `length` units from `region`.
    ///
    /// `Before` offsets count backwards from the selection start;
    /// `Selected` and `After` offsets count forward from the region start.
    /// Returns `None` when the region is unknown.
    #[must_use]
    pub fn read(&self, region: Region, offset: usize, length: usize) -> Option<CacheRead> {
        let cached = self.region(region);
        let text = cached.text()?;
        let available = cached.len().saturating_sub(offset);
        let text = match region {
            Region::Before => suffix_units(prefix_units(text, available), length),
            Region::Selected | Region::After => prefix_units(suffix_units(text, available), length),
        };
        let truncation = if available >= length {
            Truncation::None
        } else if region == Region::Selected || cached.bounded {
            Truncation::DocumentBoundary
        } else if cached.fetched_len >= offset.saturating_add(length) {
            Truncation::HostLimit
        } else {
            Truncation::CacheLimit
        };
        Some(CacheRead {
            text: text.to_owned(),
            truncation,
        })
    }

    /// Text covering the absolute range `span`, if one run holds all of it.
    #[must_use]
    pub fn text_in(&self, span: Span) -> Option<String> {
        if span.is_empty() {
            return Some(String::new());
        }
        self.runs()
            .iter()
            .find_map(|run| run.slice(span).map(str::to_owned))
    }

    /// Document length, once the end of the document has been seen.
    #[must_use]
    pub fn document_len(&self) -> Option<usize> {
        self.after.is_bounded().then_some(self.after.abs_end())
    }

    /// The whole document, when every part of it is cached.
    #[must_use]
    pub fn full_text(&self) -> Option<String> {
        let runs = self.runs();
        match runs.as_slice() {
            [run] if run.bounded_start && run.bounded_end => Some(run.text.clone()),
            _ => None,
        }
    }

    /// Maximal contiguous runs of known text.
    #[must_use]
    pub fn runs(&self) -> Runs {
        let mut runs = Runs::new();
        if self.selection.is_none() {
            return runs;
        }
        for region in Region::ALL {
            let cached = self.region(region);
            if !cached.known {
                continue;
            }
            let bounded_start = region == Region::Before && cached.bounded;
            let bounded_end = region == Region::After && cached.bounded;
            if let Some(last) = runs.last_mut()
                && last.span.end == cached.span.start
            {
                last.text.push_str(&cached.text);
                last.span.end = cached.span.end;
                last.bounded_end = bounded_end;
                continue;
            }
            runs.push(Run::new(
                cached.span.start,
                cached.text.clone(),
                bounded_start,
                bounded_end,
            ));
        }
        runs
    }

    // ── Writes ──────────────────────────────────────────────────────────

    /// Merge text read from the host into `region`.
    ///
    /// `text` is what the host returned for a read of `requested` units and
    /// `bounded` says whether it reached the document edge. Disagreeing
    /// cached content is replaced; agreeing content keeps whichever side is
    /// longer.
    pub fn fill(
        &mut self,
        region: Region,
        text: &str,
        bounded: bool,
        requested: usize,
    ) -> FillOutcome {
        let Some(selection) = self.selection else {
            return FillOutcome::default();
        };
        let new_len = utf16_len(text);
        let old = self.region(region).clone();
        let mut outcome = FillOutcome::default();

        let start = match region {
            Region::Before => match selection.start.checked_sub(new_len) {
                Some(start) => start,
                None => return outcome,
            },
            Region::Selected => {
                if new_len != selection.len() {
                    return outcome;
                }
                selection.start
            }
            Region::After => selection.end,
        };
        let fresh = CachedRegion {
            fetched_len: requested.max(new_len),
            ..CachedRegion::known(start, text, bounded)
        };

        let next = if !old.known {
            outcome.changed = true;
            fresh
        } else {
            let old_len = old.len();
            let common = old_len.min(new_len);
            let agree = match region {
                Region::Before => suffix_units(&old.text, common) == suffix_units(text, common),
                Region::Selected => old.text == text,
                Region::After => prefix_units(&old.text, common) == prefix_units(text, common),
            };
            if !agree {
                outcome.changed = true;
                outcome.corrected = true;
                fresh
            } else if new_len > old_len {
                outcome.changed = true;
                CachedRegion {
                    fetched_len: fresh.fetched_len.max(old.fetched_len),
                    ..fresh
                }
            } else if new_len < old_len && bounded {
                outcome.changed = true;
                outcome.removed = true;
                fresh
            } else {
                CachedRegion {
                    fetched_len: old.fetched_len.max(requested),
                    bounded: old.bounded || (bounded && new_len == old_len),
                    ..old
                }
            }
        };
        if outcome.changed {
            trace!(
                region = region.as_str(),
                units = next.len(),
                corrected = outcome.corrected,
                "cache fill"
            );
        }
        *self.region_mut(region) = next;
        outcome
    }

    /// Splice a locally known edit into the cache and re-split around
    /// `selection_after`.
    ///
    /// When no known run covers the deleted range the edit falls back to
    /// [`shift`](Self::shift) arithmetic and the edited range becomes
    /// unknown.
    pub fn apply_edit(&mut self, edit: Edit, inserted: &str, selection_after: Span) {
        let splice_ok = utf16_len(inserted) == edit.inserted;
        let deleted = edit.deleted_span();
        let mut spliced = false;
        let mut next = Runs::new();
        for run in self.runs() {
            if splice_ok
                && !spliced
                && run.span.covers(deleted)
                && let Some(head) = run.slice(Span::new(run.span.start, deleted.start))
                && let Some(tail) = run.slice(Span::new(deleted.end, run.span.end))
            {
                let text = format!("{head}{inserted}{tail}");
                next.push(Run::new(
                    run.span.start,
                    text,
                    run.bounded_start,
                    run.bounded_end,
                ));
                spliced = true;
                continue;
            }
            next.extend(shift_run(&run, &edit));
        }
        trace!(%edit, spliced, selection = %selection_after, "cache edit");
        self.rebuild(&next, selection_after);
    }

    /// Gap-buffer translation of the whole cache across an edit whose
    /// content is unknown.
    ///
    /// Text before the edit stays, text after it moves by
    /// `inserted_len - deleted_len`, and the edited range becomes unknown.
    pub fn shift(&mut self, edit_start: usize, deleted_len: usize, inserted_len: usize) {
        let Some(selection) = self.selection else {
            return;
        };
        let edit = Edit::new(edit_start, deleted_len, inserted_len);
        let runs: Runs = self
            .runs()
            .iter()
            .flat_map(|run| shift_run(run, &edit))
            .collect();
        self.rebuild(&runs, selection.map_through(&edit));
    }

    /// Forget whatever is cached inside `range`.
    pub fn invalidate(&mut self, range: Span) {
        let Some(selection) = self.selection else {
            return;
        };
        if range.is_empty() {
            return;
        }
        let mut runs = Runs::new();
        for run in self.runs() {
            if !run.span.overlaps(range) {
                runs.push(run);
                continue;
            }
            runs.extend(run.head(range.start));
            runs.extend(run.tail(range.end));
        }
        trace!(%range, "cache invalidate");
        self.rebuild(&runs, selection);
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn region_mut(&mut self, region: Region) -> &mut CachedRegion {
        match region {
            Region::Before => &mut self.before,
            Region::Selected => &mut self.selected,
            Region::After => &mut self.after,
        }
    }

    fn rebuild(&mut self, runs: &[Run], selection: Span) {
        let before = if selection.start == 0 {
            Some(CachedRegion::known(0, "", true))
        } else {
            runs.iter()
                .find(|run| run.span.start < selection.start && run.touches(selection.start))
                .and_then(|run| {
                    let text = run.slice(Span::new(run.span.start, selection.start))?;
                    Some(CachedRegion::known(run.span.start, text, run.bounded_start))
                })
        };
        let selected = if selection.is_empty() {
            Some(CachedRegion::known(selection.start, "", false))
        } else {
            runs.iter()
                .find_map(|run| run.slice(selection))
                .map(|text| CachedRegion::known(selection.start, text, false))
        };
        let after = runs
            .iter()
            .find(|run| run.touches(selection.end))
            .and_then(|run| {
                let text = run.slice(Span::new(selection.end, run.span.end))?;
                if text.is_empty() && !run.bounded_end {
                    return None;
                }
                Some(CachedRegion::known(selection.end, text, run.bounded_end))
            });

        let rebuilt = [before, selected, after].map(Option::unwrap_or_default);
        for (region, mut next) in Region::ALL.into_iter().zip(rebuilt) {
            let old = self.region(region);
            if next.known && old.known && old.span == next.span && old.text == next.text {
                next.fetched_len = next.fetched_len.max(old.fetched_len);
            }
            *self.region_mut(region) = next;
        }
        self.selection = Some(selection);
    }
}

/// Carry one run across an edit whose content is unknown.
fn shift_run(run: &Run, edit: &Edit) -> SmallVec<[Run; 2]> {
    let mut out = SmallVec::new();
    let deleted_end = edit.start + edit.deleted;
    let ends_before = run.span.end < edit.start
        || (run.span.end == edit.start && run.span.start < edit.start);
    if ends_before {
        let mut kept = run.clone();
        if run.span.end == edit.start && edit.inserted > 0 {
            kept.bounded_end = false;
        }
        out.push(kept);
    } else if run.span.start >= deleted_end {
        let start = run.span.start + edit.inserted - edit.deleted;
        out.push(Run::new(start, run.text.clone(), false, run.bounded_end));
    } else {
        if let Some(mut head) = run.head(edit.start) {
            head.bounded_end = false;
            out.push(head);
        }
        if let Some(tail) = run.tail(deleted_end) {
            let start = tail.span.start + edit.inserted - edit.deleted;
            out.push(Run::new(start, tail.text, false, tail.bounded_end));
        }
    }
    out
}
