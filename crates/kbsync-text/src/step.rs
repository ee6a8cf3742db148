#![forbid(unsafe_code)]

//! Code point stepping over cached text.
//!
//! Host lengths are UTF-16 code units, cursor movement is in code points.
//! [`TextWindowCache::step`] converts a signed code point delta into the
//! code unit delta it actually covers, walking the contiguous known run that
//! contains the boundary. Runs already merge the before, selected and after
//! regions, so a step may cross the selection freely; it stops where the
//! known text stops.

use kbsync_core::unicode::{walk_backward, walk_forward};

use crate::window_cache::TextWindowCache;

/// Which selection boundary a step starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The selection start.
    Left,
    /// The selection end.
    Right,
}

/// Distance actually covered by a step. Negative values move backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Step {
    pub code_units: isize,
    pub code_points: isize,
}

impl Step {
    /// Whether the step covered every requested code point.
    #[must_use]
    pub fn is_complete(&self, requested: isize) -> bool {
        self.code_points == requested
    }

    /// Code units covered, without direction.
    #[must_use]
    pub const fn units(&self) -> usize {
        self.code_units.unsigned_abs()
    }
}

impl TextWindowCache {
    /// Step `code_points` from the chosen selection boundary.
    #[must_use]
    pub fn step(&self, side: Side, code_points: isize) -> Step {
        let Some(selection) = self.selection() else {
            return Step::default();
        };
        let from = match side {
            Side::Left => selection.start,
            Side::Right => selection.end,
        };
        self.step_from(from, code_points)
    }

    /// Step `code_points` from the absolute offset `offset`.
    #[must_use]
    pub fn step_from(&self, offset: usize, code_points: isize) -> Step {
        let runs = self.runs();
        let Some(run) = runs.iter().find(|run| run.touches(offset)) else {
            return Step::default();
        };
        let rel = offset - run.span.start;
        let points = code_points.unsigned_abs();
        if code_points >= 0 {
            let walk = walk_forward(&run.text, rel, points);
            Step {
                code_units: walk.units as isize,
                code_points: walk.points as isize,
            }
        } else {
            let walk = walk_backward(&run.text, rel, points);
            Step {
                code_units: -(walk.units as isize),
                code_points: -(walk.points as isize),
            }
        }
    }
}
