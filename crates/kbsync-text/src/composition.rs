#![forbid(unsafe_code)]

//! Composition span tracking.
//!
//! The tracker holds what the engine can justify about the composing region:
//! nothing is being composed, a span with or without its text, or nothing
//! known at all. A span whose text cannot be justified keeps `text = None`;
//! its bounds may still be known from a host report.
//!
//! # Invariants
//!
//! 1. `text`, when present, has exactly `span.len()` UTF-16 units.
//! 2. An edit that rewrites any unit inside the span clears `text`.
//! 3. `Confirmed` provenance is only ever set by a host observation.

use std::fmt;

use tracing::trace;

use kbsync_core::unicode::utf16_len;
use kbsync_core::{Edit, Span};

use crate::window_cache::TextWindowCache;

/// A composing region and, when justified, its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionSpan {
    pub span: Span,
    pub text: Option<String>,
}

impl CompositionSpan {
    #[must_use]
    pub fn new(span: Span, text: Option<String>) -> Self {
        let text = text.filter(|text| utf16_len(text) == span.len());
        Self { span, text }
    }
}

/// Tri-state composition knowledge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CompositionState {
    /// Nothing is being composed.
    Absent,
    Span(CompositionSpan),
    /// Neither the bounds nor the text can be justified.
    #[default]
    Unknown,
}

impl CompositionState {
    /// Composition bounds, with `Some(None)` meaning "known to be absent".
    #[must_use]
    pub fn bounds(&self) -> Option<Option<Span>> {
        match self {
            Self::Absent => Some(None),
            Self::Span(comp) => Some(Some(comp.span)),
            Self::Unknown => None,
        }
    }

    /// Composing text, with `Some("")` when nothing is composed.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Absent => Some(""),
            Self::Span(comp) => comp.text.as_deref(),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for CompositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Span(CompositionSpan {
                span,
                text: Some(text),
            }) => write!(f, "{span} {text:?}"),
            Self::Span(CompositionSpan { span, text: None }) => write!(f, "{span} ?"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Where the current composition value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provenance {
    /// Applied optimistically when an action was issued.
    #[default]
    Predicted,
    /// Matched by a host notification or read back from the host.
    Confirmed,
}

/// Holds the composition span and its provenance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompositionTracker {
    state: CompositionState,
    provenance: Provenance,
}

impl CompositionTracker {
    /// A tracker that knows nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> &CompositionState {
        &self.state
    }

    #[must_use]
    pub const fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        self.provenance == Provenance::Confirmed && self.state != CompositionState::Unknown
    }

    /// See [`CompositionState::bounds`].
    #[must_use]
    pub fn bounds(&self) -> Option<Option<Span>> {
        self.state.bounds()
    }

    /// The composing span, when one is known to exist.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.bounds().flatten()
    }

    /// See [`CompositionState::text`].
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.state.text()
    }

    /// Owned composing text, `None` when it cannot be justified.
    #[must_use]
    pub fn composing_text(&self) -> Option<String> {
        self.text().map(str::to_owned)
    }

    /// Whether bounds are known but the text is not.
    #[must_use]
    pub fn needs_text(&self) -> bool {
        matches!(&self.state, CompositionState::Span(comp) if comp.text.is_none())
    }

    pub fn set_absent(&mut self, provenance: Provenance) {
        self.set(CompositionState::Absent, provenance);
    }

    /// Record a composing span. An empty span means nothing is composed.
    pub fn set_known(&mut self, span: Span, text: Option<String>, provenance: Provenance) {
        if span.is_empty() {
            self.set(CompositionState::Absent, provenance);
        } else {
            self.set(
                CompositionState::Span(CompositionSpan::new(span, text)),
                provenance,
            );
        }
    }

    /// Record host-reported bounds whose text is not known.
    pub fn set_bounds(&mut self, span: Option<Span>) {
        match span {
            Some(span) => self.set_known(span, None, Provenance::Confirmed),
            None => self.set_absent(Provenance::Confirmed),
        }
    }

    pub fn set_unknown(&mut self) {
        self.set(CompositionState::Unknown, Provenance::Predicted);
    }

    /// Promote the current value to confirmed.
    pub fn confirm(&mut self) {
        if self.state != CompositionState::Unknown {
            self.provenance = Provenance::Confirmed;
        }
    }

    /// Carry the span across an edit whose content is not composition text.
    pub fn shift(&mut self, edit: &Edit) {
        let CompositionState::Span(comp) = &mut self.state else {
            return;
        };
        if edit.rewrites(comp.span) {
            comp.text = None;
        }
        comp.span = comp.span.map_through(edit);
        if comp.span.is_empty() {
            self.state = CompositionState::Absent;
        }
    }

    /// Fill in unknown text from the cache. Returns whether text was found.
    pub fn resolve_text(&mut self, cache: &TextWindowCache) -> bool {
        let CompositionState::Span(comp) = &mut self.state else {
            return false;
        };
        if comp.text.is_some() {
            return true;
        }
        match cache.text_in(comp.span) {
            Some(text) => {
                trace!(span = %comp.span, "composition text resolved from cache");
                comp.text = Some(text);
                true
            }
            None => false,
        }
    }

    fn set(&mut self, state: CompositionState, provenance: Provenance) {
        trace!(composition = %state, ?provenance, "composition update");
        self.state = state;
        self.provenance = provenance;
    }
}
