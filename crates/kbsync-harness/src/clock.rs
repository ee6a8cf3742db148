#![forbid(unsafe_code)]

//! Deterministic clock for scenarios.

use std::cell::Cell;
use std::rc::Rc;

use web_time::{Duration, Instant};

use kbsync_core::Clock;

/// Manually advanced clock. Clones share one time line, so a test can keep
/// a handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct LabClock {
    now: Rc<Cell<Instant>>,
}

impl LabClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for LabClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for LabClock {
    fn now(&self) -> Instant {
        self.now.get()
    }
}
