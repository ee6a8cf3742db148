#![forbid(unsafe_code)]

//! Session counters.

use kbsync_core::SyncIssue;

/// Counters for one input session, reset by
/// [`SyncEngine::restart`](crate::SyncEngine::restart).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Actions forwarded to the host.
    pub actions: u64,
    /// Notifications matched to a pending action.
    pub confirmed: u64,
    /// Pending actions passed over because the host elided them.
    pub skipped: u64,
    pub stale: u64,
    pub unexpected: u64,
    pub discarded: u64,
    /// Authoritative selection reloads.
    pub probes: u64,
    /// `getText*` calls issued to the host.
    pub host_reads: u64,
    pub composition_reloads: u64,
    pub watchdog_fires: u64,
    pub truncated_reads: u64,
    pub unsupported_fallbacks: u64,
    /// Writes the host rejected.
    pub write_failures: u64,
}

impl SyncStats {
    /// Count a classified issue.
    pub fn record(&mut self, issue: &SyncIssue) {
        match issue {
            SyncIssue::StaleEvent { .. } => self.stale += 1,
            SyncIssue::UnexpectedChange { .. } => self.unexpected += 1,
            SyncIssue::TruncatedRead { .. } => self.truncated_reads += 1,
            SyncIssue::UnsupportedOperation(_) => self.unsupported_fallbacks += 1,
            SyncIssue::LostUpdateTimeout { .. } => self.watchdog_fires += 1,
        }
    }
}
