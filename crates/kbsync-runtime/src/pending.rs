#![forbid(unsafe_code)]

//! Ordered log of issued actions awaiting host confirmation.
//!
//! # Design
//!
//! Each entry records which notification channels must confirm it
//! (`required`) and which already did (`matched`). Channels are FIFO on
//! their own, so confirming an entry on one channel also passes over every
//! older entry on that channel. An entry leaves the log once every required
//! channel has matched and nothing older is still waiting.
//!
//! Inside a batch edit the host coalesces notifications, so closing a batch
//! folds its entries into the last one, which then carries the union of
//! their requirements.
//!
//! # Invariants
//!
//! 1. Entries are ordered by `seq`.
//! 2. At most one batch is open at a time; nested begin/end pairs are
//!    flattened by the engine.

use std::collections::VecDeque;

use tracing::trace;

use kbsync_core::{ActionKind, Channel, ChannelSet, Composing, ExpectedState, Span, UpdateEvent};

use crate::expected::Prediction;

/// One issued action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
    pub seq: u64,
    pub kind: ActionKind,
    /// `None` when the action could not be predicted; such an entry matches
    /// any observation but never proves a composition value.
    pub predicted: Option<ExpectedState>,
    pub composing: Composing,
    pub expects_text_change: bool,
    /// Batch the action was issued in.
    pub batch: Option<u64>,
    pub elidable: bool,
    pub required: ChannelSet,
    pub matched: ChannelSet,
}

impl PendingAction {
    #[must_use]
    pub fn from_prediction(seq: u64, prediction: &Prediction, required: ChannelSet) -> Self {
        Self {
            seq,
            kind: prediction.kind,
            predicted: prediction.expected(),
            composing: prediction.composing.clone(),
            expects_text_change: prediction.expects_text_change,
            batch: None,
            elidable: prediction.elidable,
            required,
            matched: ChannelSet::empty(),
        }
    }

    /// Whether a confirmation on `channel` is still outstanding.
    #[must_use]
    pub fn awaits(&self, channel: Channel) -> bool {
        let bit = ChannelSet::of(channel);
        self.required.contains(bit) && !self.matched.contains(bit)
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.matched.contains(self.required)
    }

    /// Whether the event's shape fits this entry's prediction.
    #[must_use]
    pub fn matches(&self, event: &UpdateEvent) -> bool {
        let Some(predicted) = self.predicted else {
            return true;
        };
        if event.selection() != predicted.selection {
            return false;
        }
        event
            .candidates()
            .is_none_or(|candidates| candidates == predicted.composition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchOrigin {
    id: u64,
    /// Shape before the first action of the batch.
    shape: Option<ExpectedState>,
}

/// The pending action log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingActionLog {
    entries: VecDeque<PendingAction>,
    batch: Option<BatchOrigin>,
    next_batch: u64,
}

impl PendingActionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingAction> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&PendingAction> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn is_latest(&self, index: usize) -> bool {
        index + 1 == self.entries.len()
    }

    /// Number of entries still awaiting any confirmation.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_settled()).count()
    }

    pub fn push(&mut self, mut entry: PendingAction) {
        entry.batch = self.batch.map(|origin| origin.id);
        trace!(seq = entry.seq, kind = %entry.kind, batch = ?entry.batch, "pending push");
        self.entries.push_back(entry);
    }

    /// Number of entries still waiting on `channel`.
    #[must_use]
    pub fn awaiting(&self, channel: Channel) -> usize {
        self.entries.iter().filter(|entry| entry.awaits(channel)).count()
    }

    /// Index of the oldest entry still waiting on `channel`.
    #[must_use]
    pub fn oldest_awaiting(&self, channel: Channel) -> Option<usize> {
        self.entries.iter().position(|entry| entry.awaits(channel))
    }

    /// Entries a notification on `channel` may confirm, oldest first.
    ///
    /// On the selection channel the host may elide notifications for
    /// actions that change nothing, so the search continues past elidable
    /// entries up to and including the first one that is not.
    #[must_use]
    pub fn reachable(&self, channel: Channel) -> Vec<usize> {
        let Some(oldest) = self.oldest_awaiting(channel) else {
            return Vec::new();
        };
        let mut reachable = Vec::new();
        for (index, entry) in self.entries.iter().enumerate().skip(oldest) {
            if !entry.awaits(channel) {
                continue;
            }
            reachable.push(index);
            if channel != Channel::Selection || !entry.elidable {
                break;
            }
        }
        reachable
    }

    /// The single reachable entry past the oldest that matches `event`.
    #[must_use]
    pub fn unique_skip_match(&self, event: &UpdateEvent) -> Option<usize> {
        let reachable = self.reachable(event.channel());
        let mut found = reachable
            .iter()
            .skip(1)
            .copied()
            .filter(|&index| self.entries[index].matches(event));
        let first = found.next()?;
        found.next().is_none().then_some(first)
    }

    /// Record a confirmation of entry `index` on `channel`.
    ///
    /// Older entries still waiting on the channel are passed over; returns
    /// how many.
    pub fn mark(&mut self, index: usize, channel: Channel) -> usize {
        let bit = ChannelSet::of(channel);
        let mut skipped = 0;
        for (at, entry) in self.entries.iter_mut().enumerate().take(index + 1) {
            if at < index && entry.awaits(channel) {
                skipped += 1;
            }
            entry.matched |= bit;
        }
        skipped
    }

    /// Drop settled entries from the front. Returns how many left.
    pub fn settle(&mut self) -> usize {
        let mut removed = 0;
        while self.entries.front().is_some_and(PendingAction::is_settled) {
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    /// Forget every prediction.
    pub fn invalidate_all(&mut self) {
        if !self.entries.is_empty() {
            trace!(dropped = self.entries.len(), "pending invalidate");
        }
        self.entries.clear();
        if let Some(origin) = &mut self.batch {
            origin.shape = None;
        }
    }

    /// Record an out-of-band state as the new baseline.
    ///
    /// The baseline absorbs the `owed` selection notifications still in
    /// flight for the entries it replaces, one entry per notification. With
    /// nothing owed it arrives settled.
    pub fn push_baseline(&mut self, seq: u64, selection: Span, owed: usize) {
        trace!(seq, %selection, owed, "pending baseline");
        let matched = if owed == 0 {
            ChannelSet::SELECTION
        } else {
            ChannelSet::empty()
        };
        for _ in 0..owed.max(1) {
            self.push(PendingAction {
                seq,
                kind: ActionKind::External,
                predicted: None,
                composing: Composing::Unknown,
                expects_text_change: false,
                batch: None,
                elidable: false,
                required: ChannelSet::SELECTION,
                matched,
            });
        }
    }

    // ── Batches ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn batch_open(&self) -> bool {
        self.batch.is_some()
    }

    /// Start tagging entries with a new batch id.
    pub fn open_batch(&mut self, shape: Option<ExpectedState>) -> u64 {
        if let Some(origin) = self.batch {
            return origin.id;
        }
        self.next_batch += 1;
        let id = self.next_batch;
        self.batch = Some(BatchOrigin { id, shape });
        id
    }

    /// Fold the open batch into its last entry.
    pub fn close_batch(&mut self) {
        let Some(origin) = self.batch.take() else {
            return;
        };
        let in_batch: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.batch == Some(origin.id))
            .map(|(index, _)| index)
            .collect();
        let Some(&last) = in_batch.last() else {
            return;
        };

        let mut required = ChannelSet::empty();
        let mut expects_text_change = false;
        for &index in &in_batch {
            let entry = &self.entries[index];
            required |= entry.required;
            expects_text_change |= entry.expects_text_change;
        }
        let mut folded = self.entries[last].clone();
        folded.required = required;
        folded.expects_text_change = expects_text_change;
        folded.elidable = !expects_text_change
            && folded.predicted.is_some()
            && folded.predicted == origin.shape;

        for &index in in_batch.iter().rev() {
            self.entries.remove(index);
        }
        let at = in_batch[0];
        trace!(
            batch = origin.id,
            folded = in_batch.len(),
            seq = folded.seq,
            "pending batch close"
        );
        self.entries.insert(at, folded);
    }
}

#[cfg(test)]
mod tests {
    use kbsync_core::SelectionUpdate;

    use super::*;

    fn entry(seq: u64, selection: usize, elidable: bool) -> PendingAction {
        PendingAction {
            seq,
            kind: ActionKind::SetSelection,
            predicted: Some(ExpectedState::new(Span::caret(selection), None)),
            composing: Composing::Absent,
            expects_text_change: false,
            batch: None,
            elidable,
            required: ChannelSet::SELECTION,
            matched: ChannelSet::empty(),
        }
    }

    fn selection_event(selection: usize) -> UpdateEvent {
        UpdateEvent::Selection(SelectionUpdate {
            old: Span::caret(0),
            new: Span::caret(selection),
            candidates: None,
        })
    }

    #[test]
    fn oldest_awaiting_follows_channel() {
        let mut log = PendingActionLog::new();
        let mut first = entry(1, 1, false);
        first.matched = ChannelSet::SELECTION;
        first.required = ChannelSet::all();
        log.push(first);
        log.push(entry(2, 2, false));
        assert_eq!(log.oldest_awaiting(Channel::Selection), Some(1));
        assert_eq!(log.oldest_awaiting(Channel::ExtractedText), Some(0));
    }

    #[test]
    fn mark_passes_over_older_entries() {
        let mut log = PendingActionLog::new();
        log.push(entry(1, 1, true));
        log.push(entry(2, 2, false));
        assert_eq!(log.mark(1, Channel::Selection), 1);
        assert_eq!(log.settle(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn skip_match_only_past_elidable_entries() {
        let mut log = PendingActionLog::new();
        log.push(entry(1, 0, true));
        log.push(entry(2, 5, false));
        log.push(entry(3, 7, false));
        assert_eq!(log.unique_skip_match(&selection_event(5)), Some(1));
        assert_eq!(log.unique_skip_match(&selection_event(7)), None);
    }

    #[test]
    fn skip_match_must_be_unique() {
        let mut log = PendingActionLog::new();
        log.push(entry(1, 0, true));
        log.push(entry(2, 5, true));
        log.push(entry(3, 5, false));
        assert_eq!(log.unique_skip_match(&selection_event(5)), None);
    }

    #[test]
    fn unpredicted_entries_match_anything() {
        let mut action = entry(1, 0, false);
        action.predicted = None;
        assert!(action.matches(&selection_event(42)));
    }

    #[test]
    fn candidates_must_agree() {
        let action = entry(1, 2, false);
        let event = UpdateEvent::Selection(SelectionUpdate {
            old: Span::caret(0),
            new: Span::caret(2),
            candidates: Some(Span::new(0, 2)),
        });
        assert!(!action.matches(&event));
    }

    #[test]
    fn close_batch_keeps_last_entry() {
        let mut log = PendingActionLog::new();
        log.push(entry(1, 0, false));
        log.open_batch(Some(ExpectedState::new(Span::caret(0), None)));
        let mut text = entry(2, 3, false);
        text.expects_text_change = true;
        text.required = ChannelSet::all();
        log.push(text);
        log.push(entry(3, 4, false));
        log.close_batch();
        assert_eq!(log.len(), 2);
        let folded = log.get(1).expect("folded entry");
        assert_eq!(folded.seq, 3);
        assert_eq!(folded.required, ChannelSet::all());
        assert!(folded.expects_text_change);
        assert!(!log.batch_open());
    }

    #[test]
    fn batch_that_returns_to_origin_is_elidable() {
        let mut log = PendingActionLog::new();
        log.open_batch(Some(ExpectedState::new(Span::caret(0), None)));
        log.push(entry(1, 4, false));
        log.push(entry(2, 0, false));
        log.close_batch();
        assert_eq!(log.get(0).map(|e| e.elidable), Some(true));
    }

    #[test]
    fn baseline_can_arrive_matched() {
        let mut log = PendingActionLog::new();
        log.push_baseline(9, Span::caret(3), 0);
        assert_eq!(log.settle(), 1);
        log.push_baseline(10, Span::caret(3), 1);
        assert_eq!(log.oldest_awaiting(Channel::Selection), Some(0));
    }

    #[test]
    fn baseline_absorbs_every_owed_notification() {
        let mut log = PendingActionLog::new();
        log.push(entry(1, 1, false));
        log.push(entry(2, 2, false));
        assert_eq!(log.awaiting(Channel::Selection), 2);

        log.invalidate_all();
        log.push_baseline(2, Span::caret(4), 2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.mark(0, Channel::Selection), 0);
        assert_eq!(log.settle(), 1);
        assert!(log.is_latest(0));
        assert_eq!(log.awaiting(Channel::Selection), 1);
    }
}
