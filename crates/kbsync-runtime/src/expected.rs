#![forbid(unsafe_code)]

//! Optimistic predictions for outbound actions.
//!
//! [`ExpectedStateModel::predict`] is a pure function of what the engine
//! currently knows and of the action parameters. It never consults the
//! host: predictions are made at issue time and checked later by the
//! reconciler.
//!
//! A [`Prediction`] carries independent answers for the selection after the
//! action, the composition bounds after it and the edits that keep the
//! cache in step. Each answer is `None` when the inputs do not justify one.
//!
//! # Invariants
//!
//! 1. Planned edits are listed by descending start, so applying them in
//!    order never moves a later edit.
//! 2. Composing text is only predicted when the composition bounds are.
//! 3. Key events finish any composition before acting.

use smallvec::{SmallVec, smallvec};

use kbsync_core::unicode::utf16_len;
use kbsync_core::{
    Action, ActionKind, Composing, Edit, ExpectedState, KeyCode, Span, resolve_new_cursor,
};
use kbsync_text::{CompositionState, CompositionTracker, Provenance, TextWindowCache};

use crate::state::SyncState;

/// Read-only view of the knowledge a prediction starts from.
#[derive(Debug, Clone, Copy)]
pub struct PredictInput<'a> {
    pub selection: Option<Span>,
    pub composition: &'a CompositionState,
    pub cache: &'a TextWindowCache,
}

impl<'a> PredictInput<'a> {
    #[must_use]
    pub fn from_state(state: &'a SyncState) -> Self {
        Self {
            selection: state.selection(),
            composition: state.composition.state(),
            cache: &state.cache,
        }
    }

    fn shape(&self) -> Option<ExpectedState> {
        Some(ExpectedState::new(
            self.selection?,
            self.composition.bounds()?,
        ))
    }
}

/// One cache edit implied by an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEdit {
    pub edit: Edit,
    pub inserted: String,
    /// Selection once this edit (and every earlier one) has landed.
    pub selection_after: Span,
}

/// Predicted effect of one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub kind: ActionKind,
    /// Selection after the action, `None` when it cannot be predicted.
    pub selection: Option<Span>,
    /// Composition bounds after the action; see
    /// [`CompositionState::bounds`].
    pub composition: Option<Option<Span>>,
    pub composing: Composing,
    pub edits: SmallVec<[PlannedEdit; 2]>,
    pub expects_text_change: bool,
    /// The predicted shape equals the shape before the action, so the host
    /// may send no notification at all.
    pub elidable: bool,
}

impl Prediction {
    fn opaque(kind: ActionKind, composition: Option<Option<Span>>, expects_text_change: bool) -> Self {
        let composing = match composition {
            Some(None) => Composing::Absent,
            _ => Composing::Unknown,
        };
        Self {
            kind,
            selection: None,
            composition,
            composing,
            edits: SmallVec::new(),
            expects_text_change,
            elidable: false,
        }
    }

    /// The full predicted shape, when both halves are known.
    #[must_use]
    pub fn expected(&self) -> Option<ExpectedState> {
        Some(ExpectedState::new(self.selection?, self.composition?))
    }
}

/// Pure predictor for outbound actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpectedStateModel;

impl ExpectedStateModel {
    #[must_use]
    pub fn predict(action: &Action, input: &PredictInput<'_>) -> Prediction {
        let mut prediction = match action {
            Action::Compose {
                text,
                new_cursor_position,
            } => replace_target(ActionKind::Compose, text, *new_cursor_position, true, input),
            Action::Commit {
                text,
                new_cursor_position,
            } => replace_target(ActionKind::Commit, text, *new_cursor_position, false, input),
            Action::FinishComposing => Prediction {
                kind: ActionKind::Commit,
                selection: input.selection,
                composition: Some(None),
                composing: Composing::Absent,
                edits: SmallVec::new(),
                expects_text_change: false,
                elidable: false,
            },
            Action::DeleteSurrounding { before, after } => {
                delete_surrounding(*before, *after, input)
            }
            Action::DeleteSelected => key(ActionKind::DeleteSelected, KeyCode::ForwardDelete, input),
            Action::SendKey(code) => key(ActionKind::SendKey, *code, input),
            Action::SetSelection(span) => set_selection(*span, input),
        };
        let expected = prediction.expected();
        prediction.elidable =
            !prediction.expects_text_change && expected.is_some() && expected == input.shape();
        prediction
    }
}

// ── Text insertion ──────────────────────────────────────────────────────

/// `setComposingText` / `commitText`: replace the composition if there is
/// one, the selection otherwise.
fn replace_target(
    kind: ActionKind,
    text: &str,
    new_cursor_position: i32,
    composing: bool,
    input: &PredictInput<'_>,
) -> Prediction {
    let len = utf16_len(text);
    let (Some(selection), Some(bounds)) = (input.selection, input.composition.bounds()) else {
        let composition = (!composing || len == 0).then_some(None);
        return Prediction::opaque(kind, composition, true);
    };
    let target = bounds.unwrap_or(selection);
    let edit = Edit::replacing(target, len);
    let document_len = input
        .cache
        .document_len()
        .map(|doc| doc.saturating_sub(target.len()) + len);
    let cursor = resolve_new_cursor(target.start, len, new_cursor_position, document_len);
    let selection_after = Span::caret(cursor);

    let (composition, composing_text) = if composing && len > 0 {
        (
            Some(Span::with_len(target.start, len)),
            Composing::Text(text.to_owned()),
        )
    } else {
        (None, Composing::Absent)
    };
    let expects_text_change = input
        .cache
        .text_in(target)
        .map_or(!edit.is_noop(), |old| old != text);

    Prediction {
        kind,
        selection: Some(selection_after),
        composition: Some(composition),
        composing: composing_text,
        edits: smallvec![PlannedEdit {
            edit,
            inserted: text.to_owned(),
            selection_after,
        }],
        expects_text_change,
        elidable: false,
    }
}

// ── Deletion ────────────────────────────────────────────────────────────

fn delete_surrounding(before: usize, after: usize, input: &PredictInput<'_>) -> Prediction {
    let kind = ActionKind::DeleteBefore;
    let Some(selection) = input.selection else {
        return Prediction::opaque(kind, None, before + after > 0);
    };

    let mut before = before.min(selection.start);
    if before > 0 && splits_pair(input.cache, selection.start - before) {
        before += 1;
    }
    let mut after = match input.cache.document_len() {
        Some(doc) => after.min(doc.saturating_sub(selection.end)),
        None => after,
    };
    if after > 0 && splits_pair(input.cache, selection.end + after) {
        after += 1;
    }

    let after_edit = Edit::new(selection.end, after, 0);
    let before_edit = Edit::new(selection.start - before, before, 0);
    let selection_after = Span::new(selection.start - before, selection.end - before);

    let mut edits = SmallVec::new();
    if after > 0 {
        edits.push(PlannedEdit {
            edit: after_edit,
            inserted: String::new(),
            selection_after: selection,
        });
    }
    if before > 0 {
        edits.push(PlannedEdit {
            edit: before_edit,
            inserted: String::new(),
            selection_after,
        });
    }
    let (composition, composing) = carry_composition(input.composition, &[after_edit, before_edit]);

    Prediction {
        kind,
        selection: Some(selection_after),
        composition,
        composing,
        edits,
        expects_text_change: before + after > 0,
        elidable: false,
    }
}

/// Whether `offset` falls between the halves of a cached surrogate pair.
fn splits_pair(cache: &TextWindowCache, offset: usize) -> bool {
    if offset == 0 {
        return false;
    }
    cache
        .text_in(Span::new(offset - 1, offset + 1))
        .is_some_and(|text| text.chars().count() == 1)
}

fn carry_composition(state: &CompositionState, edits: &[Edit]) -> (Option<Option<Span>>, Composing) {
    let mut tracker = CompositionTracker::new();
    match state {
        CompositionState::Unknown => return (None, Composing::Unknown),
        CompositionState::Absent => return (Some(None), Composing::Absent),
        CompositionState::Span(comp) => {
            tracker.set_known(comp.span, comp.text.clone(), Provenance::Predicted);
        }
    }
    for edit in edits.iter().filter(|edit| !edit.is_noop()) {
        tracker.shift(edit);
    }
    (tracker.bounds(), composing_of(tracker.state()))
}

fn composing_of(state: &CompositionState) -> Composing {
    match state {
        CompositionState::Absent => Composing::Absent,
        CompositionState::Span(comp) => comp
            .text
            .clone()
            .map_or(Composing::Unknown, Composing::Text),
        CompositionState::Unknown => Composing::Unknown,
    }
}

// ── Keys ────────────────────────────────────────────────────────────────

enum KeyEffect {
    Edit {
        edit: Edit,
        inserted: String,
        cursor: usize,
    },
    Move(usize),
    Unknown {
        changes_text: bool,
    },
}

fn key(kind: ActionKind, code: KeyCode, input: &PredictInput<'_>) -> Prediction {
    let changes_text = !matches!(code, KeyCode::ArrowLeft | KeyCode::ArrowRight);
    let Some(selection) = input.selection else {
        return Prediction::opaque(kind, Some(None), changes_text);
    };
    let effect = match code {
        KeyCode::Char(_) | KeyCode::Enter => {
            let text = code.committed_text().unwrap_or_default();
            let len = utf16_len(&text);
            KeyEffect::Edit {
                edit: Edit::replacing(selection, len),
                inserted: text,
                cursor: selection.start + len,
            }
        }
        KeyCode::Backspace | KeyCode::ForwardDelete if !selection.is_empty() => KeyEffect::Edit {
            edit: Edit::replacing(selection, 0),
            inserted: String::new(),
            cursor: selection.start,
        },
        KeyCode::Backspace => match step_units(input.cache, selection.start, -1) {
            Some(0) => KeyEffect::Move(selection.start),
            Some(units) => KeyEffect::Edit {
                edit: Edit::new(selection.start - units, units, 0),
                inserted: String::new(),
                cursor: selection.start - units,
            },
            None => KeyEffect::Unknown { changes_text },
        },
        KeyCode::ForwardDelete => match step_units(input.cache, selection.end, 1) {
            Some(0) => KeyEffect::Move(selection.end),
            Some(units) => KeyEffect::Edit {
                edit: Edit::new(selection.end, units, 0),
                inserted: String::new(),
                cursor: selection.end,
            },
            None => KeyEffect::Unknown { changes_text },
        },
        KeyCode::ArrowLeft if !selection.is_empty() => KeyEffect::Move(selection.start),
        KeyCode::ArrowRight if !selection.is_empty() => KeyEffect::Move(selection.end),
        KeyCode::ArrowLeft => match step_units(input.cache, selection.start, -1) {
            Some(units) => KeyEffect::Move(selection.start - units),
            None => KeyEffect::Unknown { changes_text },
        },
        KeyCode::ArrowRight => match step_units(input.cache, selection.end, 1) {
            Some(units) => KeyEffect::Move(selection.end + units),
            None => KeyEffect::Unknown { changes_text },
        },
    };

    match effect {
        KeyEffect::Unknown { changes_text } => Prediction::opaque(kind, Some(None), changes_text),
        KeyEffect::Move(cursor) => Prediction {
            kind,
            selection: Some(Span::caret(cursor)),
            composition: Some(None),
            composing: Composing::Absent,
            edits: SmallVec::new(),
            expects_text_change: false,
            elidable: false,
        },
        KeyEffect::Edit {
            edit,
            inserted,
            cursor,
        } => {
            let selection_after = Span::caret(cursor);
            Prediction {
                kind,
                selection: Some(selection_after),
                composition: Some(None),
                composing: Composing::Absent,
                expects_text_change: !edit.is_noop(),
                edits: smallvec![PlannedEdit {
                    edit,
                    inserted,
                    selection_after,
                }],
                elidable: false,
            }
        }
    }
}

/// Units covered by one code point step, `Some(0)` at a document edge and
/// `None` when the cache cannot tell.
fn step_units(cache: &TextWindowCache, offset: usize, points: isize) -> Option<usize> {
    if points < 0 && offset == 0 {
        return Some(0);
    }
    if points > 0 && cache.document_len() == Some(offset) {
        return Some(0);
    }
    let step = cache.step_from(offset, points);
    step.is_complete(points).then(|| step.units())
}

// ── Selection ───────────────────────────────────────────────────────────

fn set_selection(span: Span, input: &PredictInput<'_>) -> Prediction {
    let target = match input.cache.document_len() {
        Some(doc) => Span::new(span.start.min(doc), span.end.min(doc)),
        None => span,
    };
    Prediction {
        kind: ActionKind::SetSelection,
        selection: Some(target),
        composition: input.composition.bounds(),
        composing: composing_of(input.composition),
        edits: SmallVec::new(),
        expects_text_change: false,
        elidable: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        cache: TextWindowCache,
        composition: CompositionState,
        selection: Option<Span>,
    }

    impl Fixture {
        fn committed(text: &str, cursor: usize) -> Self {
            let mut cache = TextWindowCache::new();
            cache.seed_window(0, text, Span::caret(cursor), true, true);
            Self {
                cache,
                composition: CompositionState::Absent,
                selection: Some(Span::caret(cursor)),
            }
        }

        fn input(&self) -> PredictInput<'_> {
            PredictInput {
                selection: self.selection,
                composition: &self.composition,
                cache: &self.cache,
            }
        }

        fn predict(&self, action: Action) -> Prediction {
            ExpectedStateModel::predict(&action, &self.input())
        }
    }

    #[test]
    fn compose_at_cursor() {
        let fixture = Fixture::committed("hi ", 3);
        let prediction = fixture.predict(Action::Compose {
            text: "ab".into(),
            new_cursor_position: 1,
        });
        assert_eq!(
            prediction.expected(),
            Some(ExpectedState::new(Span::caret(5), Some(Span::new(3, 5))))
        );
        assert_eq!(prediction.composing, Composing::Text("ab".into()));
        assert!(prediction.expects_text_change);
        assert!(!prediction.elidable);
    }

    #[test]
    fn compose_replaces_existing_composition() {
        let mut fixture = Fixture::committed("xa", 2);
        fixture.composition = CompositionState::Span(kbsync_text::CompositionSpan::new(
            Span::new(1, 2),
            Some("a".into()),
        ));
        let prediction = fixture.predict(Action::Compose {
            text: "ab".into(),
            new_cursor_position: 1,
        });
        assert_eq!(prediction.selection, Some(Span::caret(3)));
        assert_eq!(prediction.composition, Some(Some(Span::new(1, 3))));
        assert_eq!(prediction.edits[0].edit, Edit::new(1, 1, 2));
    }

    #[test]
    fn commit_cursor_is_clamped_to_known_document() {
        let fixture = Fixture::committed("abc", 1);
        let prediction = fixture.predict(Action::Commit {
            text: "xy".into(),
            new_cursor_position: 10,
        });
        assert_eq!(prediction.selection, Some(Span::caret(5)));
        assert_eq!(prediction.composition, Some(None));
        assert_eq!(prediction.composing, Composing::Absent);
    }

    #[test]
    fn compose_with_unknown_composition_is_opaque() {
        let mut fixture = Fixture::committed("abc", 1);
        fixture.composition = CompositionState::Unknown;
        let prediction = fixture.predict(Action::Compose {
            text: "x".into(),
            new_cursor_position: 1,
        });
        assert_eq!(prediction.expected(), None);
        assert_eq!(prediction.composing, Composing::Unknown);
    }

    #[test]
    fn commit_with_unknown_cursor_still_ends_composition() {
        let mut fixture = Fixture::committed("abc", 1);
        fixture.selection = None;
        let prediction = fixture.predict(Action::Commit {
            text: "x".into(),
            new_cursor_position: 1,
        });
        assert_eq!(prediction.selection, None);
        assert_eq!(prediction.composition, Some(None));
    }

    #[test]
    fn delete_surrounding_plans_both_sides() {
        let fixture = Fixture::committed("abcdef", 3);
        let prediction = fixture.predict(Action::DeleteSurrounding {
            before: 2,
            after: 10,
        });
        assert_eq!(prediction.selection, Some(Span::caret(1)));
        let edits: Vec<Edit> = prediction.edits.iter().map(|planned| planned.edit).collect();
        assert_eq!(edits, vec![Edit::new(3, 3, 0), Edit::new(1, 2, 0)]);
    }

    #[test]
    fn delete_surrounding_widens_over_pairs() {
        let fixture = Fixture::committed("a😀b", 3);
        let prediction = fixture.predict(Action::DeleteSurrounding {
            before: 1,
            after: 0,
        });
        assert_eq!(prediction.selection, Some(Span::caret(1)));
    }

    #[test]
    fn delete_surrounding_carries_composition() {
        let mut fixture = Fixture::committed("abcdef", 6);
        fixture.composition = CompositionState::Span(kbsync_text::CompositionSpan::new(
            Span::new(4, 6),
            Some("ef".into()),
        ));
        let clear = fixture.predict(Action::DeleteSurrounding {
            before: 1,
            after: 0,
        });
        assert_eq!(clear.composition, Some(Some(Span::new(4, 5))));
        assert_eq!(clear.composing, Composing::Unknown);

        fixture.selection = Some(Span::caret(3));
        let before = fixture.predict(Action::DeleteSurrounding {
            before: 2,
            after: 0,
        });
        assert_eq!(before.composition, Some(Some(Span::new(2, 4))));
        assert_eq!(before.composing, Composing::Text("ef".into()));
    }

    #[test]
    fn backspace_removes_a_whole_pair() {
        let fixture = Fixture::committed("a😀", 3);
        let prediction = fixture.predict(Action::SendKey(KeyCode::Backspace));
        assert_eq!(prediction.selection, Some(Span::caret(1)));
        assert_eq!(prediction.edits[0].edit, Edit::new(1, 2, 0));
    }

    #[test]
    fn backspace_at_document_start_is_elidable() {
        let fixture = Fixture::committed("abc", 0);
        let prediction = fixture.predict(Action::SendKey(KeyCode::Backspace));
        assert!(prediction.edits.is_empty());
        assert!(prediction.elidable);
    }

    #[test]
    fn key_without_context_is_opaque() {
        let mut fixture = Fixture::committed("abc", 3);
        fixture.cache = TextWindowCache::new();
        let prediction = fixture.predict(Action::SendKey(KeyCode::ArrowLeft));
        assert_eq!(prediction.selection, None);
        assert_eq!(prediction.composition, Some(None));
        assert!(!prediction.expects_text_change);
    }

    #[test]
    fn arrow_collapses_selection() {
        let mut fixture = Fixture::committed("abcdef", 0);
        fixture.selection = Some(Span::new(1, 4));
        fixture.cache.reanchor(Span::new(1, 4));
        let prediction = fixture.predict(Action::SendKey(KeyCode::ArrowRight));
        assert_eq!(prediction.selection, Some(Span::caret(4)));
    }

    #[test]
    fn set_selection_is_clamped_and_keeps_composition() {
        let fixture = Fixture::committed("abc", 1);
        let prediction = fixture.predict(Action::SetSelection(Span::new(2, 9)));
        assert_eq!(prediction.selection, Some(Span::new(2, 3)));
        assert_eq!(prediction.composition, Some(None));
        let same = fixture.predict(Action::SetSelection(Span::caret(1)));
        assert!(same.elidable);
    }
}
