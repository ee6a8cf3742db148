#![forbid(unsafe_code)]

//! Read-through access to host text.
//!
//! [`TextFetcher::load`] answers "give me `n` units before the cursor, the
//! selection and `m` units after it" from the cache where it can and from
//! the host where it must, filling the cache with whatever the host
//! returns.
//!
//! # Invariants
//!
//! 1. At most one host call per segment (before, selected, after) per load,
//!    probe included: a segment read by the probe answers the load too.
//! 2. At most one selection probe per load.
//! 3. Requests are capped at `get_text_limit`; a capped answer is reported
//!    as a truncated read, never as a failure.
//! 4. Styled reads always go to the host and are never cached.
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Cursor unknown | One extracted-text probe, then cached reads |
//! | Probe unsupported | Uncached cursor-relative reads |
//! | `getSelectedText` unsupported | Fall back to the probe window, else unknown |
//! | Before-text disagrees with the cursor | One probe re-anchors the cache |
//! | Host disconnected | Segment reported unknown |

use smallvec::SmallVec;
use tracing::{debug, debug_span, trace, warn};

use kbsync_core::unicode::{prefix_units, slice_units, suffix_units, utf16_len};
use kbsync_core::{
    ExtractedText, ExtractedTextRequest, HostEditor, HostError, HostResult, LoadFlags, Span,
    SyncConfig, SyncIssue, TextRequestFlags,
};
use kbsync_text::{CursorKnowledge, FillOutcome, Region, Truncation};

use crate::state::SyncState;

// ── Requests and results ────────────────────────────────────────────────

/// What a caller wants to read around the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextRequest {
    /// Units before the selection start.
    pub before: usize,
    /// Units after the selection end.
    pub after: usize,
    pub include_selection: bool,
    /// Skip the cache and ask the host.
    pub force_fresh: bool,
    pub flags: TextRequestFlags,
}

impl TextRequest {
    #[must_use]
    pub fn around(before: usize, after: usize) -> Self {
        Self {
            before,
            after,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn before(units: usize) -> Self {
        Self::around(units, 0)
    }

    #[must_use]
    pub fn after(units: usize) -> Self {
        Self::around(0, units)
    }

    #[must_use]
    pub fn selected() -> Self {
        Self::default().with_selection()
    }

    #[must_use]
    pub fn with_selection(mut self) -> Self {
        self.include_selection = true;
        self
    }

    #[must_use]
    pub fn fresh(mut self) -> Self {
        self.force_fresh = true;
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TextRequestFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Text around the cursor. `None` marks a segment that could not be read
/// (or, for the selection, was not requested).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextAround {
    pub before: Option<String>,
    pub selected: Option<String>,
    pub after: Option<String>,
}

/// Outcome of [`TextFetcher::load`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadResult {
    pub text: TextAround,
    pub flags: LoadFlags,
    pub issues: SmallVec<[SyncIssue; 2]>,
}

impl LoadResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.flags.contains(LoadFlags::FULL_REQUEST_COMPLETED)
    }
}

/// A probed window of host text and what it says about the document edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeWindow {
    pub text: ExtractedText,
    pub bounded_start: bool,
    pub bounded_end: bool,
}

impl ProbeWindow {
    #[must_use]
    pub fn selection(&self) -> Span {
        self.text.absolute_selection()
    }

    fn from_extracted(text: ExtractedText, hint: usize) -> Self {
        let bounded_start = text.start_offset == 0;
        let bounded_end = bounded_start && utf16_len(&text.text) < hint;
        Self {
            text,
            bounded_start,
            bounded_end,
        }
    }
}

// ── Fetcher ─────────────────────────────────────────────────────────────

/// One host reply to a segment read.
#[derive(Debug, Clone)]
struct Answer {
    /// Units requested.
    asked: usize,
    text: HostResult<String>,
}

impl Answer {
    /// The reply cut down to `units`, with the length it answers for.
    fn cropped(&self, region: Region, units: usize) -> HostResult<(String, usize)> {
        let text = self.text.clone()?;
        if region == Region::Selected || utf16_len(&text) <= units {
            return Ok((text, self.asked));
        }
        let cut = match region {
            Region::Before => suffix_units(&text, units),
            _ => prefix_units(&text, units),
        };
        Ok((cut.to_owned(), units))
    }
}

#[derive(Default)]
struct Pass {
    result: LoadResult,
    probed: bool,
    /// The cursor came from a probe during this load.
    anchored: bool,
    complete: bool,
    /// Units the load wants on each side; a read probe asks for at least this.
    reach: (usize, usize),
    before: Option<Answer>,
    selected: Option<Answer>,
    after: Option<Answer>,
}

impl Pass {
    fn new() -> Self {
        Self {
            complete: true,
            ..Self::default()
        }
    }

    fn answer(&mut self, region: Region) -> &mut Option<Answer> {
        match region {
            Region::Before => &mut self.before,
            Region::Selected => &mut self.selected,
            Region::After => &mut self.after,
        }
    }

    fn absorb(&mut self, outcome: FillOutcome) {
        if outcome.changed {
            self.result.flags |= LoadFlags::UPDATED_CACHE;
        }
        if outcome.corrected {
            self.result.flags |= LoadFlags::CORRECTED_STALE;
        }
        if outcome.removed {
            self.result.flags |= LoadFlags::REMOVED_STALE;
        }
    }
}

/// Read-through text accessor.
#[derive(Debug, Clone)]
pub struct TextFetcher {
    config: SyncConfig,
    token: u32,
}

impl TextFetcher {
    #[must_use]
    pub fn new(config: SyncConfig) -> Self {
        Self { config, token: 0 }
    }

    #[must_use]
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Monitor token of the current session.
    #[must_use]
    pub const fn token(&self) -> u32 {
        self.token
    }

    pub fn set_token(&mut self, token: u32) {
        self.token = token;
    }

    // ── Selection probes ────────────────────────────────────────────────

    /// Authoritative selection reload.
    ///
    /// Uses `getExtractedText`; hosts without it are probed with
    /// cursor-relative reads, which only works when the document start is
    /// within reach.
    pub fn probe<H: HostEditor>(&self, host: &mut H, state: &mut SyncState) -> HostResult<ProbeWindow> {
        self.probe_in(host, state, &mut Pass::new())
    }

    fn probe_in<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        pass: &mut Pass,
    ) -> HostResult<ProbeWindow> {
        state.stats.probes += 1;
        let request = ExtractedTextRequest {
            hint_max_units: self.config.probe_window,
            token: self.token,
            monitor: false,
        };
        match host.extracted_text(request) {
            Ok(text) => {
                let probe = ProbeWindow::from_extracted(text, self.config.probe_window);
                trace!(selection = %probe.selection(), window = %probe.text.window(), "probe");
                Ok(probe)
            }
            Err(HostError::Unsupported(op)) => {
                record(state, None, SyncIssue::UnsupportedOperation(op));
                self.probe_by_reads(host, state, pass)
            }
            Err(err) => Err(err),
        }
    }

    fn probe_by_reads<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        pass: &mut Pass,
    ) -> HostResult<ProbeWindow> {
        let window = self.config.probe_window;
        let flags = TextRequestFlags::empty();
        let (before, asked) = ask(state, pass, Region::Before, window.max(pass.reach.0), |units| {
            host.text_before_cursor(units, flags)
        })?;
        let start = utf16_len(&before);
        if start + 1 >= asked {
            return Err(HostError::Unsupported("getExtractedText"));
        }
        let (selected, _) = ask(state, pass, Region::Selected, 0, |_| host.selected_text(flags))?;
        let (after, asked) = ask(state, pass, Region::After, window.max(pass.reach.1), |units| {
            host.text_after_cursor(units, flags)
        })?;
        let end = start + utf16_len(&selected);
        let bounded_end = utf16_len(&after) + 1 < asked;
        let text = ExtractedText::snapshot(0, format!("{before}{selected}{after}"), Span::new(start, end));
        trace!(selection = %text.selection, "probe by reads");
        Ok(ProbeWindow {
            text,
            bounded_start: true,
            bounded_end,
        })
    }

    /// Ask the host to monitor extracted text and return its first window.
    pub fn start_monitoring<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
    ) -> HostResult<ProbeWindow> {
        let hint = self.config.extract_monitor_text_limit;
        let request = ExtractedTextRequest {
            hint_max_units: hint,
            token: self.token,
            monitor: true,
        };
        match host.extracted_text(request) {
            Ok(text) => Ok(ProbeWindow::from_extracted(text, hint)),
            Err(err) => {
                if let HostError::Unsupported(op) = err {
                    record(state, None, SyncIssue::UnsupportedOperation(op));
                }
                Err(err)
            }
        }
    }

    /// Anchor cursor and cache to a probed window.
    ///
    /// Returns whether the cache was reseeded. A window that agrees with
    /// the cache at the same selection is merged into it instead.
    pub fn adopt_probe(&self, state: &mut SyncState, probe: &ProbeWindow) -> bool {
        let selection = probe.selection();
        let window = &probe.text;
        let keep = state.cache.selection() == Some(selection)
            && state.cache.agrees_with(window.start_offset, &window.text);
        if keep {
            let rel = window.selection;
            let parts = [
                (Region::Before, 0, rel.start, probe.bounded_start),
                (Region::Selected, rel.start, rel.end, false),
                (Region::After, rel.end, utf16_len(&window.text), probe.bounded_end),
            ];
            for (region, start, end, bounded) in parts {
                if let Some(part) = slice_units(&window.text, start, end) {
                    state.cache.fill(region, part, bounded, end - start);
                }
            }
        } else {
            state.cache.seed_window(
                window.start_offset,
                &window.text,
                selection,
                probe.bounded_start,
                probe.bounded_end,
            );
        }
        state.set_cursor(CursorKnowledge::Known(selection));
        !keep
    }

    fn resolve_selection<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        pass: &mut Pass,
    ) -> Option<Span> {
        pass.probed = true;
        match self.probe_in(host, state, pass) {
            Ok(probe) => {
                self.adopt_probe(state, &probe);
                pass.anchored = true;
                pass.result.flags |= LoadFlags::SELECTION_LOADED;
                Some(probe.selection())
            }
            Err(err) => {
                warn!(error = %err, "selection probe failed");
                None
            }
        }
    }

    /// Probe once more and report whether the selection moved.
    fn recheck<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        pass: &mut Pass,
        selection: &mut Span,
    ) {
        if pass.probed {
            return;
        }
        if let Some(resolved) = self.resolve_selection(host, state, pass)
            && resolved != *selection
        {
            debug!(assumed = %selection, actual = %resolved, "selection moved under a read");
            pass.result.flags |= LoadFlags::SELECTION_UPDATED;
            *selection = resolved;
        }
    }

    // ── Loads ───────────────────────────────────────────────────────────

    /// Read text around the cursor.
    pub fn load<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        request: TextRequest,
    ) -> LoadResult {
        let _span = debug_span!(
            "kbsync.load",
            before = request.before,
            after = request.after,
            selection = request.include_selection,
            fresh = request.force_fresh
        )
        .entered();
        let limit = self.config.get_text_limit;
        let mut pass = Pass::new();
        pass.reach = (request.before.min(limit), request.after.min(limit));

        let selection = if request.flags.contains(TextRequestFlags::STYLED) {
            None
        } else {
            match state.selection() {
                Some(selection) => Some(selection),
                None => self.resolve_selection(host, state, &mut pass),
            }
        };
        match selection {
            Some(mut selection) => {
                pass.result.text.before =
                    self.load_before(host, state, &request, &mut selection, &mut pass);
                if request.include_selection {
                    pass.result.text.selected =
                        self.load_selected(host, state, &request, &mut selection, &mut pass);
                    pass.complete &= pass.result.text.selected.is_some();
                }
                pass.result.text.after = self.load_after(host, state, &request, selection, &mut pass);
            }
            None => self.load_uncached(host, state, &request, &mut pass),
        }

        if pass.complete {
            pass.result.flags |= LoadFlags::FULL_REQUEST_COMPLETED;
        }
        debug!(flags = ?pass.result.flags, issues = pass.result.issues.len(), "text load");
        pass.result
    }

    fn load_before<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        request: &TextRequest,
        selection: &mut Span,
        pass: &mut Pass,
    ) -> Option<String> {
        if request.before == 0 {
            return Some(String::new());
        }
        let capped = request.before.min(self.config.get_text_limit);
        if !request.force_fresh
            && let Some(read) = state.cache.read(Region::Before, 0, capped)
            && !read.truncation.needs_fetch()
        {
            let bounded = read.truncation == Truncation::DocumentBoundary;
            finish_segment(state, pass, request.before, &read.text, bounded);
            return Some(read.text);
        }

        let (text, asked) = host_read(state, pass, Region::Before, capped, |units| {
            host.text_before_cursor(units, request.flags)
        })?;
        let returned = utf16_len(&text);
        let fits = |selection: Span| {
            returned <= selection.start && (returned + 1 >= asked || returned == selection.start)
        };
        if !fits(*selection) {
            self.recheck(host, state, pass, selection);
        }
        // A short answer at a probed cursor is a host-side truncation.
        let bounded = if fits(*selection) || (pass.anchored && returned <= selection.start) {
            let bounded = returned == selection.start;
            let outcome = state.cache.fill(Region::Before, &text, bounded, asked);
            pass.absorb(outcome);
            bounded
        } else {
            returned + 1 < asked
        };
        finish_segment(state, pass, request.before, &text, bounded);
        Some(text)
    }

    fn load_selected<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        request: &TextRequest,
        selection: &mut Span,
        pass: &mut Pass,
    ) -> Option<String> {
        if selection.is_empty() {
            return Some(String::new());
        }
        if !request.force_fresh
            && let Some(read) = state.cache.read(Region::Selected, 0, selection.len())
        {
            return Some(read.text);
        }

        pass.result.flags |= LoadFlags::REQUESTED;
        let fresh = pass.selected.is_none();
        let reply = ask(state, pass, Region::Selected, selection.len(), |_| {
            host.selected_text(request.flags)
        });
        match reply {
            Ok((text, _)) => {
                pass.result.flags |= LoadFlags::LOADED_FRESH;
                if utf16_len(&text) != selection.len() {
                    self.recheck(host, state, pass, selection);
                }
                if utf16_len(&text) == selection.len() {
                    let outcome = state.cache.fill(Region::Selected, &text, false, selection.len());
                    pass.absorb(outcome);
                }
                Some(text)
            }
            Err(HostError::Unsupported(op)) => {
                if fresh {
                    record(state, Some(&mut pass.result), SyncIssue::UnsupportedOperation(op));
                }
                self.recheck(host, state, pass, selection);
                state
                    .cache
                    .read(Region::Selected, 0, selection.len())
                    .map(|read| read.text)
            }
            Err(err) => {
                warn!(error = %err, op = "getSelectedText", "host read failed");
                None
            }
        }
    }

    fn load_after<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        request: &TextRequest,
        selection: Span,
        pass: &mut Pass,
    ) -> Option<String> {
        if request.after == 0 {
            return Some(String::new());
        }
        let capped = request.after.min(self.config.get_text_limit);
        if !request.force_fresh
            && let Some(read) = state.cache.read(Region::After, 0, capped)
            && !read.truncation.needs_fetch()
        {
            let bounded = read.truncation == Truncation::DocumentBoundary;
            finish_segment(state, pass, request.after, &read.text, bounded);
            return Some(read.text);
        }

        let (text, asked) = host_read(state, pass, Region::After, capped, |units| {
            host.text_after_cursor(units, request.flags)
        })?;
        let bounded = utf16_len(&text) + 1 < asked;
        if state.selection() == Some(selection) {
            let outcome = state.cache.fill(Region::After, &text, bounded, asked);
            pass.absorb(outcome);
        }
        finish_segment(state, pass, request.after, &text, bounded);
        Some(text)
    }

    /// Straight host reads for styled requests or an unresolvable cursor.
    fn load_uncached<H: HostEditor>(
        &self,
        host: &mut H,
        state: &mut SyncState,
        request: &TextRequest,
        pass: &mut Pass,
    ) {
        let limit = self.config.get_text_limit;
        let flags = request.flags;

        pass.result.text.before = if request.before == 0 {
            Some(String::new())
        } else {
            let capped = request.before.min(limit);
            host_read(state, pass, Region::Before, capped, |units| {
                host.text_before_cursor(units, flags)
            })
            .map(|(text, asked)| {
                finish_segment(state, pass, request.before, &text, utf16_len(&text) + 1 < asked);
                text
            })
        };
        if request.include_selection {
            let text = host_read(state, pass, Region::Selected, 0, |_| host.selected_text(flags))
                .map(|(text, _)| text);
            pass.complete &= text.is_some();
            pass.result.text.selected = text;
        }
        pass.result.text.after = if request.after == 0 {
            Some(String::new())
        } else {
            let capped = request.after.min(limit);
            host_read(state, pass, Region::After, capped, |units| {
                host.text_after_cursor(units, flags)
            })
            .map(|(text, asked)| {
                finish_segment(state, pass, request.after, &text, utf16_len(&text) + 1 < asked);
                text
            })
        };
        pass.complete &= pass.result.text.before.is_some() && pass.result.text.after.is_some();
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

/// Ask the host for one segment. A segment already asked during this pass
/// is answered from that reply instead of a second call.
fn ask(
    state: &mut SyncState,
    pass: &mut Pass,
    region: Region,
    units: usize,
    call: impl FnOnce(usize) -> HostResult<String>,
) -> HostResult<(String, usize)> {
    let slot = pass.answer(region);
    if let Some(answer) = slot.as_ref() {
        trace!(?region, units, asked = answer.asked, "segment answered earlier in this pass");
        return answer.cropped(region, units);
    }
    state.stats.host_reads += 1;
    let text = call(units);
    *slot = Some(Answer {
        asked: units,
        text: text.clone(),
    });
    text.map(|text| (text, units))
}

/// [`ask`] for load paths: sets result flags and records failures.
fn host_read(
    state: &mut SyncState,
    pass: &mut Pass,
    region: Region,
    units: usize,
    call: impl FnOnce(usize) -> HostResult<String>,
) -> Option<(String, usize)> {
    pass.result.flags |= LoadFlags::REQUESTED;
    let fresh = pass.answer(region).is_none();
    match ask(state, pass, region, units, call) {
        Ok(reply) => {
            pass.result.flags |= LoadFlags::LOADED_FRESH;
            Some(reply)
        }
        Err(HostError::Unsupported(op)) => {
            if fresh {
                record(state, Some(&mut pass.result), SyncIssue::UnsupportedOperation(op));
            }
            pass.complete = false;
            None
        }
        Err(err) => {
            warn!(error = %err, "host read failed");
            pass.complete = false;
            None
        }
    }
}

/// Account for one segment answer: complete when it has every requested
/// unit or reaches the document edge.
fn finish_segment(state: &mut SyncState, pass: &mut Pass, requested: usize, text: &str, bounded: bool) {
    let returned = utf16_len(text);
    if returned >= requested || bounded {
        return;
    }
    pass.complete = false;
    record(
        state,
        Some(&mut pass.result),
        SyncIssue::TruncatedRead {
            requested,
            returned,
        },
    );
}

fn record(state: &mut SyncState, result: Option<&mut LoadResult>, issue: SyncIssue) {
    debug!(
        issue = issue.issue_type(),
        recovery = %issue.recovery(),
        "{issue}"
    );
    state.stats.record(&issue);
    if let Some(result) = result {
        result.issues.push(issue);
    }
}
