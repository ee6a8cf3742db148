#![forbid(unsafe_code)]

//! Error model and recovery mapping.
//!
//! # Design Principles
//!
//! 1. **Nothing reaches the keyboard UI**: synchronization problems are
//!    classified as [`SyncIssue`]s and resolved inside the engine.
//! 2. **Admit ignorance**: every issue maps to a [`Recovery`] that either
//!    ignores the input, rereads the host, or degrades state to unknown.
//! 3. **Typed write failures**: the only failures callers see are rejected
//!    writes and invalid requests, reported through [`Error`].

use std::fmt;

use crate::host::HostError;
use crate::span::Span;

// ── Synchronization issues ──────────────────────────────────────────────

/// Classified synchronization problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncIssue {
    /// A notification describes a state that has already been superseded.
    StaleEvent { observed: Span },
    /// The host changed in a way no prediction accounts for.
    UnexpectedChange {
        observed: Span,
        expected: Option<Span>,
    },
    /// A read returned fewer units than requested.
    TruncatedRead { requested: usize, returned: usize },
    /// The host declined a capability.
    UnsupportedOperation(&'static str),
    /// A confirmation never arrived.
    LostUpdateTimeout { outstanding: usize },
}

/// What the engine does about an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Drop the input; state is unaffected.
    Ignore,
    /// Reload the selection and mark the composition unknown.
    ReloadSelection,
    /// Keep the shorter answer as valid.
    AcceptPartial,
    /// Try an alternative read path, or report the value unknown.
    FallbackRead,
    /// Probe the host and rebuild expectations from the result.
    ForceResync,
}

impl SyncIssue {
    #[must_use]
    pub const fn recovery(&self) -> Recovery {
        match self {
            Self::StaleEvent { .. } => Recovery::Ignore,
            Self::UnexpectedChange { .. } => Recovery::ReloadSelection,
            Self::TruncatedRead { .. } => Recovery::AcceptPartial,
            Self::UnsupportedOperation(_) => Recovery::FallbackRead,
            Self::LostUpdateTimeout { .. } => Recovery::ForceResync,
        }
    }

    /// Label for logs and counters.
    #[must_use]
    pub const fn issue_type(&self) -> &'static str {
        match self {
            Self::StaleEvent { .. } => "stale_event",
            Self::UnexpectedChange { .. } => "unexpected_change",
            Self::TruncatedRead { .. } => "truncated_read",
            Self::UnsupportedOperation(_) => "unsupported_operation",
            Self::LostUpdateTimeout { .. } => "lost_update_timeout",
        }
    }

    /// Whether resolving the issue costs composition knowledge.
    #[must_use]
    pub const fn degrades_composition(&self) -> bool {
        matches!(self, Self::UnexpectedChange { .. })
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleEvent { observed } => write!(f, "stale update at {observed}"),
            Self::UnexpectedChange {
                observed,
                expected: Some(expected),
            } => write!(f, "unexpected selection {observed}, expected {expected}"),
            Self::UnexpectedChange {
                observed,
                expected: None,
            } => write!(f, "unexpected selection {observed}"),
            Self::TruncatedRead {
                requested,
                returned,
            } => write!(f, "read truncated: {returned} of {requested} units"),
            Self::UnsupportedOperation(op) => write!(f, "unsupported host operation: {op}"),
            Self::LostUpdateTimeout { outstanding } => {
                write!(f, "no confirmation for {outstanding} pending actions")
            }
        }
    }
}

impl fmt::Display for Recovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => write!(f, "ignore"),
            Self::ReloadSelection => write!(f, "reload_selection"),
            Self::AcceptPartial => write!(f, "accept_partial"),
            Self::FallbackRead => write!(f, "fallback_read"),
            Self::ForceResync => write!(f, "force_resync"),
        }
    }
}

// ── Caller-visible errors ───────────────────────────────────────────────

/// Failure of a public engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The host rejected a write.
    Host(HostError),
    /// The operation needs a selection the engine cannot resolve.
    CursorUnknown,
    /// The operation needs a non-empty selection.
    EmptySelection,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(err) => write!(f, "{err}"),
            Self::CursorUnknown => write!(f, "selection is unknown"),
            Self::EmptySelection => write!(f, "selection is empty"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::error::Error as StdError;

    use super::*;

    #[test]
    fn every_issue_has_a_recovery() {
        let issues = [
            SyncIssue::StaleEvent {
                observed: Span::caret(1),
            },
            SyncIssue::UnexpectedChange {
                observed: Span::caret(1),
                expected: None,
            },
            SyncIssue::TruncatedRead {
                requested: 10,
                returned: 4,
            },
            SyncIssue::UnsupportedOperation("getSelectedText"),
            SyncIssue::LostUpdateTimeout { outstanding: 2 },
        ];
        let recoveries: Vec<Recovery> = issues.iter().map(SyncIssue::recovery).collect();
        assert_eq!(
            recoveries,
            vec![
                Recovery::Ignore,
                Recovery::ReloadSelection,
                Recovery::AcceptPartial,
                Recovery::FallbackRead,
                Recovery::ForceResync,
            ]
        );
    }

    #[test]
    fn only_unexpected_change_degrades_composition() {
        assert!(
            SyncIssue::UnexpectedChange {
                observed: Span::caret(0),
                expected: Some(Span::caret(1)),
            }
            .degrades_composition()
        );
        assert!(!SyncIssue::LostUpdateTimeout { outstanding: 1 }.degrades_composition());
    }

    #[test]
    fn issue_display() {
        let issue = SyncIssue::TruncatedRead {
            requested: 10,
            returned: 4,
        };
        assert_eq!(issue.to_string(), "read truncated: 4 of 10 units");
        assert_eq!(issue.issue_type(), "truncated_read");
    }

    #[test]
    fn host_error_is_source() {
        let err = Error::from(HostError::Disconnected);
        assert!(StdError::source(&err).is_some());
        assert!(StdError::source(&Error::CursorUnknown).is_none());
        assert_eq!(err.to_string(), "host connection lost");
    }

    #[test]
    fn recovery_display() {
        assert_eq!(Recovery::ForceResync.to_string(), "force_resync");
    }
}
