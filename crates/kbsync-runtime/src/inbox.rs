#![forbid(unsafe_code)]

//! Queue of host notifications waiting to be reconciled.
//!
//! Host callbacks only ever push here; the engine drains the queue at its
//! own pace, so delivery order and delay are explicit inputs.

use std::collections::VecDeque;

use kbsync_core::UpdateEvent;

#[derive(Debug, Clone, Default)]
pub struct Inbox {
    events: VecDeque<UpdateEvent>,
}

impl Inbox {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: UpdateEvent) {
        self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<UpdateEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Extend<UpdateEvent> for Inbox {
    fn extend<I: IntoIterator<Item = UpdateEvent>>(&mut self, iter: I) {
        self.events.extend(iter);
    }
}
