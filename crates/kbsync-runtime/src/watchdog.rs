#![forbid(unsafe_code)]

//! Forced resync when a confirmation never arrives.
//!
//! The watchdog is a single-shot deadline. The engine arms it whenever an
//! action is issued or a confirmation makes partial progress, disarms it
//! once the log is clear, and holds it while a batch edit is open. Expiry
//! costs one authoritative probe:
//!
//! | Probe result | Effect |
//! |--------------|--------|
//! | Matches the current selection and cached text | Confirmed composition kept, log cleared |
//! | Differs | Composition unknown, log cleared, cache re-seeded |
//! | Fails | Cursor, cache and composition forgotten |
//!
//! A probe says nothing about the composition, so a composition that was
//! only ever predicted becomes unknown even when the probe matches.

use tracing::{debug, warn};
use web_time::{Duration, Instant};

use kbsync_core::{HostEditor, SyncIssue};

use crate::fetcher::TextFetcher;
use crate::state::SyncState;

/// What a watchdog check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Not armed, or the deadline has not passed.
    Idle,
    /// Expired inside an open batch; checked again after it closes.
    Deferred,
    Matched,
    Mismatched,
    ProbeFailed,
}

/// Single-shot deadline for outstanding confirmations.
#[derive(Debug, Clone)]
pub struct LostUpdateWatchdog {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl LostUpdateWatchdog {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start or restart the countdown from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.timeout);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the deadline has passed. Firing disarms the watchdog.
    pub fn expired(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Probe the host and rebuild expectations from the result.
    pub fn resync<H: HostEditor>(
        &mut self,
        host: &mut H,
        fetcher: &TextFetcher,
        state: &mut SyncState,
    ) -> WatchdogOutcome {
        self.disarm();
        let issue = SyncIssue::LostUpdateTimeout {
            outstanding: state.log.outstanding(),
        };
        state.stats.record(&issue);
        warn!(issue = issue.issue_type(), recovery = %issue.recovery(), "{issue}");

        let probe = match fetcher.probe(host, state) {
            Ok(probe) => probe,
            Err(err) => {
                warn!(error = %err, "resync probe failed");
                state.forget();
                state.log.invalidate_all();
                return WatchdogOutcome::ProbeFailed;
            }
        };
        let matched = state.selection() == Some(probe.selection())
            && state
                .cache
                .agrees_with(probe.text.start_offset, &probe.text.text);
        state.log.invalidate_all();
        if !matched || !state.composition.is_confirmed() {
            state.composition.set_unknown();
        }
        fetcher.adopt_probe(state, &probe);
        debug!(matched, selection = %probe.selection(), "watchdog resync");
        if matched {
            WatchdogOutcome::Matched
        } else {
            WatchdogOutcome::Mismatched
        }
    }
}
