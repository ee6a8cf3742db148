#![forbid(unsafe_code)]

//! Classification of host notifications against pending predictions.
//!
//! # Design
//!
//! Each notification is classified exactly once:
//!
//! 1. **Match by shape.** The oldest entry still waiting on the event's
//!    channel is compared with the event. A match confirms it.
//! 2. **Skipped entries.** The host may stay silent for actions that change
//!    nothing. The event may then match a newer entry reachable past such
//!    elidable entries; the match is accepted only when it is unique.
//! 3. **Unexpected.** Anything else triggers an authoritative probe. A
//!    probe that agrees with the current state makes the event a stale
//!    echo; otherwise the host changed out of band and the composition
//!    becomes unknown. The log is replaced by an external baseline that
//!    absorbs the selection notifications still owed by the dropped
//!    entries; only the last of them may report composition bounds.
//! 4. **Composition reload.** Once the last outstanding confirmation
//!    arrives with composition bounds known but their text not, one reload
//!    through the fetcher tries to recover the text. A read that cannot
//!    cover the span leaves the text unknown.
//!
//! Notifications for a foreign monitor token, and echoes of the current
//! state with nothing pending, are discarded without a probe.
//!
//! # Invariants
//!
//! 1. Only an event matched to the latest entry mutates the cache or the
//!    composition.
//! 2. An unpredicted entry never supplies a composition value, only bounds
//!    that agree with the current cursor.
//! 3. An unexpected event never supplies composition bounds.
//! 4. At most one composition reload per action epoch.

use std::fmt;

use tracing::{debug, debug_span, warn};

use kbsync_core::{Channel, HostEditor, LoadFlags, Span, SyncConfig, SyncIssue, UpdateEvent};
use kbsync_text::CursorKnowledge;

use crate::fetcher::{TextFetcher, TextRequest};
use crate::pending::PendingAction;
use crate::state::SyncState;

/// Why an event was dropped without a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// It restates the current state and nothing is pending.
    Redundant,
    /// It belongs to another session's extracted-text monitor.
    ForeignToken,
}

/// Verdict for one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Matched the oldest waiting entry.
    Confirmed { seq: u64 },
    /// Matched a newer entry; `elided` older entries were passed over.
    Skipped { seq: u64, elided: usize },
    /// Describes a state that was already superseded.
    Stale,
    /// The host changed in a way no prediction accounts for.
    UnexpectedChange,
    Discarded(DiscardReason),
}

impl Classification {
    /// Whether the event confirmed a prediction.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(self, Self::Confirmed { .. } | Self::Skipped { .. })
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } => "confirmed",
            Self::Skipped { .. } => "skipped",
            Self::Stale => "stale",
            Self::UnexpectedChange => "unexpected_change",
            Self::Discarded(DiscardReason::Redundant) => "discarded_redundant",
            Self::Discarded(DiscardReason::ForeignToken) => "discarded_foreign_token",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of reconciling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub channel: Channel,
    /// Selection reported by the event.
    pub selection: Span,
    pub classification: Classification,
    pub issue: Option<SyncIssue>,
    /// The composition text was recovered by a reload.
    pub composition_reloaded: bool,
}

impl UpdateOutcome {
    fn new(event: &UpdateEvent, classification: Classification) -> Self {
        Self {
            channel: event.channel(),
            selection: event.selection(),
            classification,
            issue: None,
            composition_reloaded: false,
        }
    }

    fn with_issue(mut self, issue: SyncIssue) -> Self {
        self.issue = Some(issue);
        self
    }
}

/// The notification state machine.
#[derive(Debug, Clone, Default)]
pub struct UpdateReconciler {
    reload_attempted: bool,
    retain_on_backtrack: bool,
}

impl UpdateReconciler {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            reload_attempted: false,
            retain_on_backtrack: config.retain_composition_on_cursor_backtrack,
        }
    }

    /// A new action opens a new reload epoch.
    pub fn on_action(&mut self) {
        self.reload_attempted = false;
    }

    /// Classify `event` and update `state` accordingly.
    pub fn reconcile<H: HostEditor>(
        &mut self,
        host: &mut H,
        fetcher: &TextFetcher,
        state: &mut SyncState,
        event: &UpdateEvent,
    ) -> UpdateOutcome {
        let channel = event.channel();
        let _span = debug_span!(
            "kbsync.reconcile",
            channel = channel.as_str(),
            observed = %event.selection()
        )
        .entered();

        if let UpdateEvent::ExtractedText(update) = event
            && update.token != fetcher.token()
        {
            state.stats.discarded += 1;
            debug!(token = update.token, "foreign monitor token");
            return UpdateOutcome::new(event, Classification::Discarded(DiscardReason::ForeignToken));
        }

        match state.log.oldest_awaiting(channel) {
            Some(oldest) => {
                if state.log.get(oldest).is_some_and(|entry| entry.matches(event)) {
                    return self.confirm(host, fetcher, state, event, oldest);
                }
                if let Some(index) = state.log.unique_skip_match(event) {
                    return self.confirm(host, fetcher, state, event, index);
                }
            }
            None if is_redundant(state, event) => {
                state.stats.discarded += 1;
                debug!("redundant echo");
                return UpdateOutcome::new(event, Classification::Discarded(DiscardReason::Redundant));
            }
            None => {}
        }
        self.unexpected(host, fetcher, state, event)
    }

    // ── Confirmation ────────────────────────────────────────────────────

    fn confirm<H: HostEditor>(
        &mut self,
        host: &mut H,
        fetcher: &TextFetcher,
        state: &mut SyncState,
        event: &UpdateEvent,
        index: usize,
    ) -> UpdateOutcome {
        let Some(entry) = state.log.get(index).cloned() else {
            return self.unexpected(host, fetcher, state, event);
        };
        let latest = state.log.is_latest(index);
        let elided = state.log.mark(index, event.channel());
        state.stats.confirmed += 1;
        state.stats.skipped += elided as u64;
        debug!(seq = entry.seq, kind = %entry.kind, latest, elided, "update confirmed");

        if latest {
            adopt(state, event, &entry);
        }
        state.log.settle();

        let classification = if elided == 0 {
            Classification::Confirmed { seq: entry.seq }
        } else {
            Classification::Skipped {
                seq: entry.seq,
                elided,
            }
        };
        let mut outcome = UpdateOutcome::new(event, classification);
        if state.log.is_empty() {
            outcome.composition_reloaded = self.reload_composition(host, fetcher, state);
        }
        outcome
    }

    // ── Unexpected events ───────────────────────────────────────────────

    fn unexpected<H: HostEditor>(
        &mut self,
        host: &mut H,
        fetcher: &TextFetcher,
        state: &mut SyncState,
        event: &UpdateEvent,
    ) -> UpdateOutcome {
        let observed = event.selection();
        let expected = state.selection();
        let probe = match fetcher.probe(host, state) {
            Ok(probe) => probe,
            Err(err) => {
                let issue = SyncIssue::UnexpectedChange { observed, expected };
                state.stats.record(&issue);
                state.forget();
                state.log.invalidate_all();
                warn!(error = %err, recovery = %issue.recovery(), "probe failed, state forgotten");
                return UpdateOutcome::new(event, Classification::UnexpectedChange).with_issue(issue);
            }
        };

        let probed = probe.selection();
        let agrees = state
            .cache
            .agrees_with(probe.text.start_offset, &probe.text.text);
        let current = observed == probed;
        // A current event that disagrees with the tracked bounds is news.
        let contradicts = current
            && event
                .candidates()
                .is_some_and(|candidates| state.composition.bounds() != Some(candidates));
        if expected == Some(probed) && agrees && !contradicts {
            let issue = SyncIssue::StaleEvent { observed };
            state.stats.record(&issue);
            debug!(%probed, "stale update");
            return UpdateOutcome::new(event, Classification::Stale).with_issue(issue);
        }

        let issue = SyncIssue::UnexpectedChange { observed, expected };
        state.stats.record(&issue);
        // The probe carries no composition, so the event's candidates prove
        // nothing even when its selection is current.
        let retained =
            self.retain_on_backtrack && agrees && state.composition.bounds().is_some();
        if !retained {
            state.composition.set_unknown();
        }

        let mut owed = state.log.awaiting(Channel::Selection);
        if event.channel() == Channel::Selection {
            owed = owed.saturating_sub(1);
        }
        if !current {
            owed = owed.max(1);
        }
        state.log.invalidate_all();
        state.log.push_baseline(state.last_seq, probed, owed);
        state.log.settle();
        fetcher.adopt_probe(state, &probe);
        self.reload_attempted = false;

        warn!(
            issue = issue.issue_type(),
            recovery = %issue.recovery(),
            %observed,
            %probed,
            retained,
            owed,
            "unexpected host change"
        );
        UpdateOutcome::new(event, Classification::UnexpectedChange).with_issue(issue)
    }

    // ── Composition reload ──────────────────────────────────────────────

    /// One attempt per epoch to recover composition text whose bounds are
    /// known. Returns whether the text is now known.
    fn reload_composition<H: HostEditor>(
        &mut self,
        host: &mut H,
        fetcher: &TextFetcher,
        state: &mut SyncState,
    ) -> bool {
        if !state.composition.needs_text() {
            return false;
        }
        if state.composition.resolve_text(&state.cache) {
            return true;
        }
        if self.reload_attempted {
            return false;
        }
        let (Some(selection), Some(span)) = (state.selection(), state.composition.span()) else {
            return false;
        };
        self.reload_attempted = true;
        state.stats.composition_reloads += 1;

        let mut request = TextRequest::around(
            selection.start.saturating_sub(span.start),
            span.end.saturating_sub(selection.end),
        );
        if !selection.is_empty() && selection.overlaps(span) {
            request = request.with_selection();
        }
        let result = fetcher.load(host, state, request);
        if result.flags.contains(LoadFlags::SELECTION_UPDATED) {
            state.composition.set_unknown();
            debug!("selection moved during composition reload");
            return false;
        }
        let resolved = state.composition.resolve_text(&state.cache);
        debug!(%span, resolved, "composition reload");
        resolved
    }
}

/// Apply what a confirmation of the latest entry proves.
fn adopt(state: &mut SyncState, event: &UpdateEvent, entry: &PendingAction) {
    match event {
        UpdateEvent::Selection(update) => {
            if entry.predicted.is_some() {
                state.composition.confirm();
                return;
            }
            match state.cursor {
                CursorKnowledge::Unknown => state.set_cursor(CursorKnowledge::Known(update.new)),
                CursorKnowledge::Known(current) if current != update.new => {
                    debug!(%current, observed = %update.new, "observation left to the next probe");
                    return;
                }
                CursorKnowledge::Known(_) => {}
            }
            if state.composition.bounds().is_none() {
                state.composition.set_bounds(update.candidates);
            }
        }
        UpdateEvent::ExtractedText(update) => {
            let window = &update.text;
            let selection = window.absolute_selection();
            if state.selection() != Some(selection)
                || state.cache.agrees_with(window.start_offset, &window.text)
            {
                return;
            }
            debug!(window = %window.window(), "extracted text disagrees with cache");
            state.cache.seed_window(
                window.start_offset,
                &window.text,
                selection,
                window.start_offset == 0,
                false,
            );
            if let Some(span) = state.composition.span() {
                let provenance = state.composition.provenance();
                state.composition.set_known(span, None, provenance);
            }
        }
    }
}

fn is_redundant(state: &SyncState, event: &UpdateEvent) -> bool {
    match event {
        UpdateEvent::Selection(update) => {
            state.selection() == Some(update.new)
                && state.composition.bounds() == Some(update.candidates)
        }
        UpdateEvent::ExtractedText(update) => {
            let window = &update.text;
            state.selection() == Some(window.absolute_selection())
                && state.cache.agrees_with(window.start_offset, &window.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use kbsync_core::{Action, ChannelSet, ExtractedText, ExtractedTextUpdate, SelectionUpdate};
    use kbsync_text::Provenance;

    use super::*;
    use crate::expected::{ExpectedStateModel, PredictInput};
    use crate::test_support::Doc;

    struct Rig {
        host: Doc,
        state: SyncState,
        fetcher: TextFetcher,
        reconciler: UpdateReconciler,
        seq: u64,
    }

    impl Rig {
        fn new(text: &str, cursor: usize) -> Self {
            let mut state = SyncState::new();
            state.set_cursor(CursorKnowledge::Known(Span::caret(cursor)));
            state.composition.set_absent(Provenance::Confirmed);
            let config = SyncConfig::default();
            Self {
                host: Doc::new(text, Span::caret(cursor)),
                state,
                fetcher: TextFetcher::new(config.clone()),
                reconciler: UpdateReconciler::new(&config),
                seq: 0,
            }
        }

        /// Predict and record an action without touching the host.
        fn issue(&mut self, action: Action) {
            let prediction =
                ExpectedStateModel::predict(&action, &PredictInput::from_state(&self.state));
            for planned in &prediction.edits {
                self.state
                    .cache
                    .apply_edit(planned.edit, &planned.inserted, planned.selection_after);
            }
            self.state.set_cursor(prediction.selection.into());
            match prediction.composition {
                Some(Some(span)) => self.state.composition.set_known(
                    span,
                    prediction.composing.text().map(str::to_owned),
                    Provenance::Predicted,
                ),
                Some(None) => self.state.composition.set_absent(Provenance::Predicted),
                None => self.state.composition.set_unknown(),
            }
            self.seq += 1;
            self.state.last_seq = self.seq;
            self.state.log.push(PendingAction::from_prediction(
                self.seq,
                &prediction,
                ChannelSet::SELECTION,
            ));
            self.reconciler.on_action();
        }

        fn deliver(&mut self, event: UpdateEvent) -> UpdateOutcome {
            self.reconciler
                .reconcile(&mut self.host, &self.fetcher, &mut self.state, &event)
        }
    }

    fn selection(new: usize, candidates: Option<Span>) -> UpdateEvent {
        UpdateEvent::Selection(SelectionUpdate {
            old: Span::caret(0),
            new: Span::caret(new),
            candidates,
        })
    }

    fn compose(text: &str) -> Action {
        Action::Compose {
            text: text.into(),
            new_cursor_position: 1,
        }
    }

    #[test]
    fn in_order_updates_confirm_without_probe() {
        let mut rig = Rig::new("", 0);
        rig.issue(compose("a"));
        rig.issue(compose("ab"));
        rig.host.set_composing_text("ab", 1).ok();

        let first = rig.deliver(selection(1, Some(Span::new(0, 1))));
        let second = rig.deliver(selection(2, Some(Span::new(0, 2))));
        assert_eq!(first.classification, Classification::Confirmed { seq: 1 });
        assert_eq!(second.classification, Classification::Confirmed { seq: 2 });
        assert_eq!(rig.host.extracted_calls, 0);
        assert_eq!(rig.state.composition.text(), Some("ab"));
        assert!(rig.state.composition.is_confirmed());
        assert!(rig.state.log.is_empty());
    }

    #[test]
    fn external_change_degrades_composition() {
        let mut rig = Rig::new("", 0);
        rig.issue(compose("a"));
        rig.host.set_composing_text("a", 1).ok();
        rig.host.commit_text("zz", 1).ok();

        let outcome = rig.deliver(selection(1, Some(Span::new(0, 1))));
        assert_eq!(outcome.classification, Classification::Confirmed { seq: 1 });

        let outcome = rig.deliver(selection(2, None));
        assert_eq!(outcome.classification, Classification::UnexpectedChange);
        assert_eq!(rig.state.selection(), Some(Span::caret(2)));
        assert_eq!(rig.state.composition.bounds(), None);
        assert_eq!(rig.state.stats.unexpected, 1);
        assert!(rig.state.log.is_empty());
    }

    #[test]
    fn stale_echo_keeps_state() {
        let mut rig = Rig::new("abc", 3);
        rig.issue(Action::SetSelection(Span::caret(1)));
        rig.host.set_selection(1, 1).ok();
        rig.deliver(selection(1, None));

        let outcome = rig.deliver(selection(2, None));
        assert_eq!(outcome.classification, Classification::Stale);
        assert_eq!(rig.state.composition.bounds(), Some(None));
        assert_eq!(rig.state.stats.stale, 1);
    }

    #[test]
    fn redundant_echo_is_discarded_without_probe() {
        let mut rig = Rig::new("abc", 3);
        let outcome = rig.deliver(selection(3, None));
        assert_eq!(
            outcome.classification,
            Classification::Discarded(DiscardReason::Redundant)
        );
        assert_eq!(rig.host.extracted_calls, 0);
    }

    #[test]
    fn foreign_token_is_discarded() {
        let mut rig = Rig::new("abc", 3);
        rig.fetcher.set_token(7);
        let event = UpdateEvent::ExtractedText(ExtractedTextUpdate {
            token: 3,
            text: ExtractedText::snapshot(0, "zzz", Span::caret(0)),
        });
        let outcome = rig.deliver(event);
        assert_eq!(
            outcome.classification,
            Classification::Discarded(DiscardReason::ForeignToken)
        );
        assert_eq!(rig.state.stats.discarded, 1);
    }

    #[test]
    fn elided_noop_is_skipped() {
        let mut rig = Rig::new("abc", 3);
        rig.issue(Action::SetSelection(Span::caret(3)));
        rig.issue(Action::SetSelection(Span::caret(1)));
        rig.host.set_selection(1, 1).ok();
        let outcome = rig.deliver(selection(1, None));
        assert_eq!(
            outcome.classification,
            Classification::Skipped { seq: 2, elided: 1 }
        );
        assert!(outcome.classification.is_expected());
        assert_eq!(rig.state.stats.skipped, 1);
    }

    #[test]
    fn doubled_composition_recovers_on_second_update() {
        let mut rig = Rig::new("", 0);
        rig.issue(compose("a"));
        rig.issue(compose("ab"));
        rig.host.set_composing_text("abab", 1).ok();

        let first = rig.deliver(selection(2, Some(Span::new(0, 2))));
        assert_eq!(first.classification, Classification::UnexpectedChange);
        assert_eq!(rig.state.composition.text(), None);

        let second = rig.deliver(selection(4, Some(Span::new(0, 4))));
        assert!(second.classification.is_expected());
        assert!(second.composition_reloaded);
        assert_eq!(rig.state.composition.text(), Some("abab"));
        assert_eq!(rig.state.composition.span(), Some(Span::new(0, 4)));
    }

    #[test]
    fn current_event_with_other_bounds_is_not_stale() {
        let mut rig = Rig::new("", 0);
        rig.issue(compose("a"));
        rig.issue(Action::SetSelection(Span::caret(0)));
        rig.host.set_composing_text("aa", 1).ok();
        rig.host.set_selection(0, 0).ok();

        let first = rig.deliver(selection(2, Some(Span::new(0, 2))));
        assert_eq!(first.classification, Classification::Stale);

        let second = rig.deliver(selection(0, Some(Span::new(0, 2))));
        assert_eq!(second.classification, Classification::UnexpectedChange);
        assert_eq!(rig.state.composition.bounds(), None);
        assert_eq!(rig.state.selection(), Some(Span::caret(0)));
    }

    #[test]
    fn current_candidates_are_not_trusted() {
        let mut rig = Rig::new("", 0);
        rig.issue(compose("a"));
        rig.issue(Action::FinishComposing);
        rig.host.set_composing_text("aa", 1).ok();
        rig.host.finish_composing_text().ok();

        // Selection agrees with the host, but the composition is long gone.
        let first = rig.deliver(selection(2, Some(Span::new(0, 2))));
        assert_eq!(first.classification, Classification::UnexpectedChange);
        assert_eq!(rig.state.composition.bounds(), None);
        assert_eq!(rig.state.log.outstanding(), 1);

        let second = rig.deliver(selection(2, None));
        assert!(second.classification.is_expected());
        assert_eq!(rig.state.composition.bounds(), Some(None));
        assert!(rig.state.log.is_empty());
    }

    #[test]
    fn only_the_last_owed_notification_reports_bounds() {
        let mut rig = Rig::new("", 0);
        rig.issue(compose("a"));
        rig.issue(compose("ab"));
        rig.issue(Action::FinishComposing);
        rig.host.set_composing_text("abab", 1).ok();
        rig.host.finish_composing_text().ok();

        let first = rig.deliver(selection(2, Some(Span::new(0, 2))));
        assert_eq!(first.classification, Classification::UnexpectedChange);
        let second = rig.deliver(selection(4, Some(Span::new(0, 4))));
        assert!(second.classification.is_expected());
        assert_eq!(rig.state.composition.bounds(), None);
        assert_eq!(rig.state.log.outstanding(), 1);

        let third = rig.deliver(selection(4, None));
        assert!(third.classification.is_expected());
        assert_eq!(rig.state.composition.bounds(), Some(None));
    }

    #[test]
    fn backtrack_policy_retains_composition() {
        let config = SyncConfig::default().retaining_composition_on_cursor_backtrack(true);
        let mut rig = Rig::new("", 0);
        rig.reconciler = UpdateReconciler::new(&config);
        rig.issue(compose("ab"));
        rig.host.set_composing_text("ab", 1).ok();
        rig.deliver(selection(2, Some(Span::new(0, 2))));

        rig.host.set_selection(1, 1).ok();
        let outcome = rig.deliver(selection(1, Some(Span::new(0, 2))));
        assert_eq!(outcome.classification, Classification::UnexpectedChange);
        assert_eq!(rig.state.composition.text(), Some("ab"));
    }

    #[test]
    fn failed_probe_forgets_everything() {
        let mut rig = Rig::new("abc", 3);
        rig.host.extracted_supported = false;
        rig.host.selected_supported = false;
        let outcome = rig.deliver(selection(1, None));
        assert_eq!(outcome.classification, Classification::UnexpectedChange);
        assert!(!rig.state.cursor.is_known());
        assert_eq!(rig.state.composition.bounds(), None);
    }
}
