#![forbid(unsafe_code)]

//! The sync engine: one owner for every piece of session state.
//!
//! # Design
//!
//! Outbound actions run synchronously:
//!
//! ```text
//! action ──► predict ──► host write ──► apply prediction ──► log entry ──► arm watchdog
//! ```
//!
//! Inbound notifications never re-enter the engine. The embedding pushes
//! them with [`SyncEngine::enqueue`] and later calls [`SyncEngine::drain`],
//! which reconciles them one at a time. [`SyncEngine::tick`] checks the
//! watchdog against the engine's [`Clock`].
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Host rejects a write | Disconnected or unsupported call | Cursor and composition forgotten, error returned |
//! | Selection moved under a read | External change not yet notified | Composition unknown, predictions dropped |
//! | Confirmation never arrives | Host dropped a notification | Watchdog probe on the next tick past the deadline |
//! | Monitoring refused | Host lacks extracted text | Session continues on the selection channel alone |

use tracing::{debug, debug_span, warn};
use web_time::Instant;

use kbsync_core::unicode::{slice_units, utf16_len};
use kbsync_core::{
    Action, ChannelSet, Clock, Error, HostEditor, HostResult, KeyCode, LoadFlags, Result, Span,
    SyncConfig, SystemClock, TextState, UpdateEvent,
};
use kbsync_text::{CompositionState, CursorKnowledge, Provenance, Region, Side, TextWindowCache};

use crate::expected::{ExpectedStateModel, PredictInput, Prediction};
use crate::fetcher::{LoadResult, TextFetcher, TextRequest};
use crate::inbox::Inbox;
use crate::pending::{PendingAction, PendingActionLog};
use crate::reconciler::{UpdateOutcome, UpdateReconciler};
use crate::state::SyncState;
use crate::stats::SyncStats;
use crate::watchdog::{LostUpdateWatchdog, WatchdogOutcome};

/// Where a cursor-relative read may take its answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Cache first, host for whatever is missing.
    #[default]
    Default,
    /// Cache only; `None` when the region is not cached.
    CacheOnly,
    /// Always ask the host.
    Fresh,
}

/// Text-state sync engine for one input session at a time.
#[derive(Debug)]
pub struct SyncEngine<C: Clock = SystemClock> {
    config: SyncConfig,
    state: SyncState,
    fetcher: TextFetcher,
    reconciler: UpdateReconciler,
    watchdog: LostUpdateWatchdog,
    inbox: Inbox,
    clock: C,
    next_seq: u64,
    next_token: u32,
    batch_depth: usize,
}

impl SyncEngine<SystemClock> {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SyncEngine<C> {
    /// Engine reading deadlines from `clock`. The configuration is
    /// clamped to its valid ranges.
    #[must_use]
    pub fn with_clock(config: SyncConfig, clock: C) -> Self {
        let config = config.validated();
        Self {
            fetcher: TextFetcher::new(config.clone()),
            reconciler: UpdateReconciler::new(&config),
            watchdog: LostUpdateWatchdog::new(config.lost_update_timeout),
            config,
            state: SyncState::new(),
            inbox: Inbox::new(),
            clock,
            next_seq: 0,
            next_token: 0,
            batch_depth: 0,
        }
    }

    /// Begin a new input session.
    ///
    /// Everything learned in the previous session is dropped. A known
    /// initial selection means nothing is being composed yet.
    pub fn restart<H: HostEditor>(&mut self, host: &mut H, initial_selection: Option<Span>) {
        self.next_token = self.next_token.wrapping_add(1);
        self.fetcher.set_token(self.next_token);
        self.state = SyncState::new();
        self.reconciler = UpdateReconciler::new(&self.config);
        self.inbox.clear();
        self.watchdog.disarm();
        self.batch_depth = 0;

        if let Some(selection) = initial_selection {
            self.state.set_cursor(CursorKnowledge::Known(selection));
            self.state.composition.set_absent(Provenance::Confirmed);
        }
        if self.config.monitor_extracted_text {
            match self.fetcher.start_monitoring(host, &mut self.state) {
                Ok(window) => {
                    self.fetcher.adopt_probe(&mut self.state, &window);
                    self.state.monitoring = true;
                }
                Err(err) => warn!(error = %err, "extracted text monitoring unavailable"),
            }
        }
        debug!(
            token = self.next_token,
            selection = ?initial_selection,
            monitoring = self.state.monitoring,
            "session restart"
        );
    }

    // ── Actions ─────────────────────────────────────────────────────────

    /// `setComposingText`. Returns the action's sequence number.
    pub fn compose<H: HostEditor>(
        &mut self,
        host: &mut H,
        text: &str,
        new_cursor_position: i32,
    ) -> Result<u64> {
        self.issue(
            host,
            Action::Compose {
                text: text.to_owned(),
                new_cursor_position,
            },
        )
    }

    /// `commitText`.
    pub fn commit<H: HostEditor>(
        &mut self,
        host: &mut H,
        text: &str,
        new_cursor_position: i32,
    ) -> Result<u64> {
        self.issue(
            host,
            Action::Commit {
                text: text.to_owned(),
                new_cursor_position,
            },
        )
    }

    pub fn finish_composing<H: HostEditor>(&mut self, host: &mut H) -> Result<u64> {
        self.issue(host, Action::FinishComposing)
    }

    /// Delete `before` units before the selection and `after` units after it.
    pub fn delete_surrounding<H: HostEditor>(
        &mut self,
        host: &mut H,
        before: usize,
        after: usize,
    ) -> Result<u64> {
        self.issue(host, Action::DeleteSurrounding { before, after })
    }

    /// Delete whole code points around the selection.
    ///
    /// Counts are converted to units over cached text, loading enough
    /// context first. Code points past the known text count one unit each.
    pub fn delete_surrounding_in_code_points<H: HostEditor>(
        &mut self,
        host: &mut H,
        before: usize,
        after: usize,
    ) -> Result<u64> {
        self.load_context(host, before.saturating_mul(2), after.saturating_mul(2));
        let before = units_for(&self.state.cache, Side::Left, before);
        let after = units_for(&self.state.cache, Side::Right, after);
        self.issue(host, Action::DeleteSurrounding { before, after })
    }

    /// Delete the current selection.
    pub fn delete_selected<H: HostEditor>(&mut self, host: &mut H) -> Result<u64> {
        let selection = self.state.selection().ok_or(Error::CursorUnknown)?;
        if selection.is_empty() {
            return Err(Error::EmptySelection);
        }
        self.issue(host, Action::DeleteSelected)
    }

    pub fn send_key<H: HostEditor>(&mut self, host: &mut H, key: KeyCode) -> Result<u64> {
        let collapsed = self.state.selection().is_none_or(|selection| selection.is_empty());
        match key {
            KeyCode::Backspace | KeyCode::ArrowLeft if collapsed => self.load_context(host, 2, 0),
            KeyCode::ForwardDelete | KeyCode::ArrowRight if collapsed => {
                self.load_context(host, 0, 2);
            }
            _ => {}
        }
        self.issue(host, Action::SendKey(key))
    }

    pub fn set_selection<H: HostEditor>(&mut self, host: &mut H, start: usize, end: usize) -> Result<u64> {
        self.issue(host, Action::SetSelection(Span::new(start, end)))
    }

    fn issue<H: HostEditor>(&mut self, host: &mut H, action: Action) -> Result<u64> {
        let prediction =
            ExpectedStateModel::predict(&action, &PredictInput::from_state(&self.state));
        let seq = self.next_seq + 1;
        let _span = debug_span!("kbsync.issue", seq, kind = %prediction.kind).entered();

        let action = match (action, self.state.selection()) {
            (Action::DeleteSurrounding { .. }, Some(selection)) => {
                let (before, after) = planned_deletion(&prediction, selection);
                Action::DeleteSurrounding { before, after }
            }
            (action, _) => action,
        };
        if let Err(err) = send(host, &action) {
            self.state.stats.write_failures += 1;
            self.state.forget();
            warn!(error = %err, "host rejected write");
            return Err(err.into());
        }

        self.next_seq = seq;
        self.apply(&prediction);
        let mut required = ChannelSet::SELECTION;
        if self.state.monitoring && prediction.expects_text_change {
            required |= ChannelSet::EXTRACTED_TEXT;
        }
        self.state
            .log
            .push(PendingAction::from_prediction(seq, &prediction, required));
        self.state.last_seq = seq;
        self.state.stats.actions += 1;
        self.reconciler.on_action();
        if self.batch_depth == 0 {
            self.watchdog.arm(self.clock.now());
        }
        debug!(
            expected = ?prediction.expected(),
            elidable = prediction.elidable,
            "action issued"
        );
        Ok(seq)
    }

    /// Apply a prediction optimistically to cache, cursor and composition.
    fn apply(&mut self, prediction: &Prediction) {
        for planned in &prediction.edits {
            self.state
                .cache
                .apply_edit(planned.edit, &planned.inserted, planned.selection_after);
        }
        self.state.set_cursor(prediction.selection.into());
        let composition = &mut self.state.composition;
        match prediction.composition {
            Some(Some(span)) => composition.set_known(
                span,
                prediction.composing.text().map(str::to_owned),
                Provenance::Predicted,
            ),
            Some(None) => composition.set_absent(Provenance::Predicted),
            None => composition.set_unknown(),
        }
    }

    // ── Batches ─────────────────────────────────────────────────────────

    /// Open a batch edit. Nested calls are flattened.
    pub fn begin_batch_edit<H: HostEditor>(&mut self, host: &mut H) -> Result<()> {
        host.begin_batch_edit()?;
        self.batch_depth += 1;
        if self.batch_depth == 1 {
            let id = self.state.log.open_batch(self.state.expected());
            debug!(batch = id, "batch open");
        }
        Ok(())
    }

    /// Close a batch edit. Closing the outermost batch folds its actions
    /// into one awaited confirmation and restarts the watchdog.
    pub fn end_batch_edit<H: HostEditor>(&mut self, host: &mut H) -> Result<()> {
        if self.batch_depth == 0 {
            debug!("end_batch_edit without an open batch");
            return Ok(());
        }
        let result = host.end_batch_edit();
        self.batch_depth -= 1;
        if self.batch_depth == 0 {
            self.state.log.close_batch();
            if self.state.log.outstanding() > 0 {
                self.watchdog.arm(self.clock.now());
            }
            debug!(pending = self.state.log.len(), "batch closed");
        }
        result.map_err(Error::from)
    }

    #[must_use]
    pub const fn batch_open(&self) -> bool {
        self.batch_depth > 0
    }

    // ── Notifications ───────────────────────────────────────────────────

    /// Queue a host notification for the next [`drain`](Self::drain).
    pub fn enqueue(&mut self, event: UpdateEvent) {
        self.inbox.push(event);
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.inbox.len()
    }

    /// Reconcile every queued notification, in arrival order.
    pub fn drain<H: HostEditor>(&mut self, host: &mut H) -> Vec<UpdateOutcome> {
        let _span = debug_span!("kbsync.drain", queued = self.inbox.len()).entered();
        let mut outcomes = Vec::with_capacity(self.inbox.len());
        while let Some(event) = self.inbox.pop() {
            let outstanding = self.state.log.outstanding();
            let outcome = self
                .reconciler
                .reconcile(host, &self.fetcher, &mut self.state, &event);
            let remaining = self.state.log.outstanding();
            if remaining == 0 {
                self.watchdog.disarm();
            } else if remaining != outstanding && self.batch_depth == 0 {
                self.watchdog.arm(self.clock.now());
            }
            debug!(classification = %outcome.classification, remaining, "update reconciled");
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Check the watchdog deadline.
    pub fn tick<H: HostEditor>(&mut self, host: &mut H) -> WatchdogOutcome {
        let now = self.clock.now();
        if self.batch_depth > 0 {
            let due = self.watchdog.deadline().is_some_and(|deadline| now >= deadline);
            return if due {
                WatchdogOutcome::Deferred
            } else {
                WatchdogOutcome::Idle
            };
        }
        if !self.watchdog.expired(now) {
            return WatchdogOutcome::Idle;
        }
        let _span = debug_span!("kbsync.watchdog").entered();
        self.watchdog.resync(host, &self.fetcher, &mut self.state)
    }

    // ── Reads ───────────────────────────────────────────────────────────

    /// Read text around the cursor through the cache.
    pub fn get_text_around_cursor<H: HostEditor>(
        &mut self,
        host: &mut H,
        request: TextRequest,
    ) -> LoadResult {
        self.load(host, request)
    }

    pub fn text_before_cursor<H: HostEditor>(
        &mut self,
        host: &mut H,
        units: usize,
        mode: ReadMode,
    ) -> Option<String> {
        match mode {
            ReadMode::CacheOnly => self.cached(Region::Before, units),
            ReadMode::Default => self.load(host, TextRequest::before(units)).text.before,
            ReadMode::Fresh => self.load(host, TextRequest::before(units).fresh()).text.before,
        }
    }

    pub fn text_after_cursor<H: HostEditor>(
        &mut self,
        host: &mut H,
        units: usize,
        mode: ReadMode,
    ) -> Option<String> {
        match mode {
            ReadMode::CacheOnly => self.cached(Region::After, units),
            ReadMode::Default => self.load(host, TextRequest::after(units)).text.after,
            ReadMode::Fresh => self.load(host, TextRequest::after(units).fresh()).text.after,
        }
    }

    pub fn selected_text<H: HostEditor>(&mut self, host: &mut H, mode: ReadMode) -> Option<String> {
        match mode {
            ReadMode::CacheOnly => {
                let len = self.state.selection()?.len();
                self.cached(Region::Selected, len)
            }
            ReadMode::Default => self.load(host, TextRequest::selected()).text.selected,
            ReadMode::Fresh => self.load(host, TextRequest::selected().fresh()).text.selected,
        }
    }

    fn cached(&self, region: Region, units: usize) -> Option<String> {
        self.state.cache.read(region, 0, units).map(|read| read.text)
    }

    fn load<H: HostEditor>(&mut self, host: &mut H, request: TextRequest) -> LoadResult {
        let result = self.fetcher.load(host, &mut self.state, request);
        if result.flags.contains(LoadFlags::SELECTION_UPDATED) {
            self.state.composition.set_unknown();
            self.state.log.invalidate_all();
            self.watchdog.disarm();
            warn!(selection = ?self.state.selection(), "selection moved under a read, predictions dropped");
        }
        result
    }

    fn load_context<H: HostEditor>(&mut self, host: &mut H, before: usize, after: usize) {
        if before + after > 0 {
            self.load(host, TextRequest::around(before, after));
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    #[must_use]
    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    /// Monitor token of the current session.
    #[must_use]
    pub const fn token(&self) -> u32 {
        self.fetcher.token()
    }

    #[must_use]
    pub fn selection(&self) -> Option<Span> {
        self.state.selection()
    }

    #[must_use]
    pub const fn cursor(&self) -> CursorKnowledge {
        self.state.cursor
    }

    #[must_use]
    pub const fn composition(&self) -> &CompositionState {
        self.state.composition.state()
    }

    /// Composing text, `Some("")` when nothing is composed and `None`
    /// when the engine cannot tell.
    #[must_use]
    pub fn composing_text(&self) -> Option<String> {
        self.state.composition.composing_text()
    }

    #[must_use]
    pub const fn cache(&self) -> &TextWindowCache {
        &self.state.cache
    }

    #[must_use]
    pub const fn pending(&self) -> &PendingActionLog {
        &self.state.log
    }

    #[must_use]
    pub const fn stats(&self) -> SyncStats {
        self.state.stats
    }

    #[must_use]
    pub const fn watchdog_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    /// The whole document, when every part of it and the composition
    /// bounds are known.
    #[must_use]
    pub fn snapshot(&self) -> Option<TextState> {
        let text = self.state.cache.full_text()?;
        let selection = self.state.selection()?;
        let state = match self.state.composition.bounds()? {
            None => TextState::Committed {
                sel_start: selection.start,
                sel_end: selection.end,
                text,
            },
            Some(span) => {
                let before = slice_units(&text, 0, span.start)?;
                let composing = slice_units(&text, span.start, span.end)?;
                let after = slice_units(&text, span.end, utf16_len(&text))?;
                TextState::composed(before, composing, after).with_selection(selection)
            }
        };
        Some(state)
    }
}

fn send<H: HostEditor>(host: &mut H, action: &Action) -> HostResult<()> {
    match action {
        Action::Compose {
            text,
            new_cursor_position,
        } => host.set_composing_text(text, *new_cursor_position),
        Action::Commit {
            text,
            new_cursor_position,
        } => host.commit_text(text, *new_cursor_position),
        Action::FinishComposing => host.finish_composing_text(),
        Action::DeleteSurrounding { before, after } => host.delete_surrounding_text(*before, *after),
        Action::DeleteSelected => host.send_key_event(KeyCode::ForwardDelete),
        Action::SendKey(key) => host.send_key_event(*key),
        Action::SetSelection(span) => host.set_selection(span.start, span.end),
    }
}

/// Lengths a deletion prediction settled on after clamping and pair
/// widening, as `(before, after)`.
fn planned_deletion(prediction: &Prediction, selection: Span) -> (usize, usize) {
    prediction
        .edits
        .iter()
        .fold((0, 0), |(before, after), planned| {
            if planned.edit.start >= selection.end {
                (before, after + planned.edit.deleted)
            } else {
                (before + planned.edit.deleted, after)
            }
        })
}

/// Code units covered by `points` code points from one selection edge.
fn units_for(cache: &TextWindowCache, side: Side, points: usize) -> usize {
    let signed = match side {
        Side::Left => -(points as isize),
        Side::Right => points as isize,
    };
    let step = cache.step(side, signed);
    let missing = points - step.code_points.unsigned_abs();
    step.units() + missing
}

#[cfg(test)]
mod tests {
    use kbsync_core::SelectionUpdate;
    use tracing_test::traced_test;
    use web_time::Duration;

    use super::*;
    use crate::reconciler::Classification;
    use crate::test_support::{Doc, TestClock};

    fn engine(text: &str, cursor: usize) -> (Doc, SyncEngine<TestClock>, TestClock) {
        let clock = TestClock::new();
        let mut host = Doc::new(text, Span::caret(cursor));
        let mut engine = SyncEngine::with_clock(SyncConfig::default(), clock.clone());
        engine.restart(&mut host, Some(Span::caret(cursor)));
        (host, engine, clock)
    }

    /// The selection notification `host` would send now.
    fn echo(host: &Doc) -> UpdateEvent {
        UpdateEvent::Selection(SelectionUpdate {
            old: Span::caret(0),
            new: host.selection,
            candidates: host.composition,
        })
    }

    #[test]
    fn confirmed_compose_clears_log_and_watchdog() {
        let (mut host, mut engine, _) = engine("", 0);
        let seq = engine.compose(&mut host, "a", 1).expect("compose");
        assert_eq!(seq, 1);
        assert_eq!(engine.pending().len(), 1);
        assert!(engine.watchdog_deadline().is_some());

        engine.enqueue(echo(&host));
        let outcomes = engine.drain(&mut host);
        assert_eq!(outcomes[0].classification, Classification::Confirmed { seq: 1 });
        assert!(engine.pending().is_empty());
        assert!(engine.watchdog_deadline().is_none());
        assert_eq!(engine.composing_text().as_deref(), Some("a"));
        assert_eq!(engine.stats().probes, 0);
    }

    #[test]
    #[traced_test]
    fn rejected_write_degrades_state() {
        let (mut host, mut engine, _) = engine("ab", 2);
        let err = engine.send_key(&mut host, KeyCode::Backspace).unwrap_err();
        assert!(matches!(err, Error::Host(_)));
        assert_eq!(engine.stats().write_failures, 1);
        assert_eq!(engine.selection(), None);
        assert_eq!(engine.composing_text(), None);
        assert!(logs_contain("host rejected write"));
    }

    #[test]
    fn delete_selected_needs_a_selection() {
        let (mut host, mut engine, _) = engine("ab", 2);
        assert_eq!(engine.delete_selected(&mut host), Err(Error::EmptySelection));

        let mut engine = SyncEngine::with_clock(SyncConfig::default(), TestClock::new());
        engine.restart(&mut host, None);
        assert_eq!(engine.delete_selected(&mut host), Err(Error::CursorUnknown));
    }

    #[test]
    fn silent_host_triggers_watchdog() {
        let (mut host, mut engine, clock) = engine("", 0);
        engine.compose(&mut host, "a", 1).expect("compose");
        assert_eq!(engine.tick(&mut host), WatchdogOutcome::Idle);

        clock.advance(Duration::from_millis(600));
        assert_eq!(engine.tick(&mut host), WatchdogOutcome::Matched);
        assert!(engine.pending().is_empty());
        assert_eq!(engine.selection(), Some(Span::caret(1)));
        assert_eq!(engine.composing_text(), None);
        assert_eq!(engine.stats().watchdog_fires, 1);
        assert_eq!(engine.tick(&mut host), WatchdogOutcome::Idle);
    }

    #[test]
    fn watchdog_waits_for_batch_to_close() {
        let (mut host, mut engine, clock) = engine("", 0);
        engine.compose(&mut host, "a", 1).expect("compose");
        engine.begin_batch_edit(&mut host).expect("begin");
        engine.compose(&mut host, "ab", 1).expect("compose");
        clock.advance(Duration::from_millis(600));
        assert_eq!(engine.tick(&mut host), WatchdogOutcome::Deferred);

        engine.end_batch_edit(&mut host).expect("end");
        assert_eq!(engine.pending().len(), 2);
        assert_eq!(engine.tick(&mut host), WatchdogOutcome::Idle);
        assert!(engine.watchdog_deadline().is_some());
    }

    #[test]
    fn snapshot_needs_whole_document() {
        let (mut host, mut engine, _) = engine("", 0);
        assert_eq!(engine.snapshot(), None);
        assert_eq!(
            engine.text_after_cursor(&mut host, 10, ReadMode::Default).as_deref(),
            Some("")
        );
        engine.compose(&mut host, "hi", 1).expect("compose");
        assert_eq!(engine.snapshot(), Some(TextState::composed("", "hi", "")));
    }

    #[test]
    fn cache_only_reads_never_touch_host() {
        let (mut host, mut engine, _) = engine("hello", 5);
        assert_eq!(engine.text_before_cursor(&mut host, 3, ReadMode::CacheOnly), None);
        assert_eq!(host.before_calls, 0);
        assert_eq!(
            engine.text_before_cursor(&mut host, 3, ReadMode::Default).as_deref(),
            Some("llo")
        );
        assert_eq!(
            engine.text_before_cursor(&mut host, 3, ReadMode::CacheOnly).as_deref(),
            Some("llo")
        );
        assert_eq!(host.before_calls, 1);
        engine.text_before_cursor(&mut host, 3, ReadMode::Fresh);
        assert_eq!(host.before_calls, 2);
    }

    #[test]
    fn code_point_deletion_counts_pairs() {
        let (mut host, mut engine, _) = engine("a\u{1F600}", 3);
        host.surrounding_supported = true;
        engine.delete_surrounding_in_code_points(&mut host, 1, 0).expect("delete");
        assert_eq!(host.contents(), "a");
        assert_eq!(engine.selection(), Some(Span::caret(1)));
    }

    #[test]
    fn restart_changes_token_and_forgets() {
        let (mut host, mut engine, _) = engine("ab", 2);
        let token = engine.token();
        engine.compose(&mut host, "x", 1).expect("compose");
        engine.restart(&mut host, None);
        assert_ne!(engine.token(), token);
        assert!(engine.pending().is_empty());
        assert_eq!(engine.selection(), None);
        assert_eq!(engine.stats(), SyncStats::default());
    }
}
