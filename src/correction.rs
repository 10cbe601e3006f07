//! Turning mismatch records into caret movement, selection, deletion and retyping.
//!
//! The surface gives no caret feedback, so every edit starts from document start
//! (Ctrl+Home) and reaches its target by replaying jumps whose landing spots are
//! predicted on a model of the captured text.

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cursor_nav::{paragraph_down, plain_jump_is_safe, word_right};
use crate::device::Surface;
use crate::keyboard::{KEY_DELETE, KEY_DOWN, KEY_LEFTCTRL, KEY_RIGHT};
use crate::model::{ErrorRecord, FormattingSpan, SessionState, VerificationResult};
use crate::synth::Synthesizer;
use crate::verify::Verifier;

/// Paragraph jumps are only considered this far (in chars) from the target.
const PARAGRAPH_MIN_DISTANCE: usize = 80;
const WORD_MIN_DISTANCE: usize = 12;

const PARAGRAPH_KEY_PAUSE_MS: u64 = 100;
const WORD_KEY_PAUSE_MS: u64 = 50;
const CHAR_KEY_PAUSE_MS: u64 = 10;
const HOME_SETTLE_MS: u64 = 300;
const SELECT_SETTLE_MS: u64 = 200;
const DELETE_SETTLE_MS: u64 = 200;
const RETYPE_GROUP: usize = 50;
const RETYPE_GROUP_PAUSE_MS: u64 = 100;
const EDIT_SETTLE_MS: u64 = 300;
pub const EDITS_PER_BATCH: usize = 10;
const EDIT_BATCH_PAUSE_MS: u64 = 2000;
const FORMAT_BATCH_PAUSE_MS: u64 = 1000;
const PASS_SETTLE_MS: u64 = 500;

/// A second pass is only attempted when at most this many errors remain.
pub const SECOND_PASS_MAX_ERRORS: usize = 5;

/// Replace `delete` chars at `position` (captured-text coordinates) with `insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub position: usize,
    pub delete: usize,
    pub insert: String,
}

/// Edits for `errors`, last position first so earlier offsets stay valid.
pub fn plan(errors: &[ErrorRecord]) -> Vec<Edit> {
    let mut edits: Vec<Edit> = errors
        .iter()
        .map(|e| Edit {
            position: e.position,
            delete: e.actual.chars().count(),
            insert: e.expected.clone(),
        })
        .collect();
    edits.sort_by(|a, b| b.position.cmp(&a.position));
    edits
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Paragraph,
    Word,
    Char,
}

impl Move {
    fn keys(self) -> (&'static [u32], u32, u64) {
        match self {
            Move::Paragraph => (&[KEY_LEFTCTRL], KEY_DOWN, PARAGRAPH_KEY_PAUSE_MS),
            Move::Word => (&[KEY_LEFTCTRL], KEY_RIGHT, WORD_KEY_PAUSE_MS),
            Move::Char => (&[], KEY_RIGHT, CHAR_KEY_PAUSE_MS),
        }
    }
}

/// Key sequence taking the caret from `from` to `to` on `buf`, as runs of
/// identical moves. Jumps are taken only when their predicted landing does not
/// pass `to`.
fn route(buf: &[char], from: usize, to: usize) -> Vec<(Move, usize)> {
    let to = to.min(buf.len());
    let mut cursor = from.min(to);
    let mut runs: Vec<(Move, usize)> = Vec::new();

    while cursor < to {
        let remaining = to - cursor;
        let paragraph = paragraph_down(buf, cursor);
        let word = word_right(buf, cursor);

        let (step, landing) = if remaining > PARAGRAPH_MIN_DISTANCE
            && paragraph > cursor
            && paragraph <= to
        {
            (Move::Paragraph, paragraph)
        } else if remaining >= WORD_MIN_DISTANCE
            && word > cursor
            && word <= to
            && plain_jump_is_safe(buf, cursor, word)
        {
            (Move::Word, word)
        } else {
            (Move::Char, cursor + 1)
        };

        match runs.last_mut() {
            Some((last, count)) if *last == step => *count += 1,
            _ => runs.push((step, 1)),
        }
        cursor = landing;
    }
    runs
}

/// Ctrl+Home, then walk to `target` along the predicted route.
fn navigate<S: Surface>(synth: &mut Synthesizer<S>, buf: &[char], target: usize) -> Result<()> {
    synth.document_start()?;
    synth.pause(HOME_SETTLE_MS);
    for (step, count) in route(buf, 0, target) {
        let (modifiers, keycode, key_pause) = step.keys();
        synth.repeat(modifiers, keycode, count, key_pause)?;
    }
    Ok(())
}

fn apply_edit<S: Surface>(synth: &mut Synthesizer<S>, buf: &mut Vec<char>, edit: &Edit) -> Result<()> {
    let delete = edit.delete.min(buf.len() - edit.position);
    navigate(synth, buf, edit.position)?;

    if delete > 0 {
        synth.select_right(delete, CHAR_KEY_PAUSE_MS)?;
        synth.pause(SELECT_SETTLE_MS);
        synth.tap(KEY_DELETE)?;
        synth.pause(DELETE_SETTLE_MS);
    }

    let insert: Vec<char> = edit.insert.chars().collect();
    for group in insert.chunks(RETYPE_GROUP) {
        for &c in group {
            synth.type_char(c);
        }
        synth.pause(RETYPE_GROUP_PAUSE_MS);
    }

    buf.splice(edit.position..edit.position + delete, insert);
    Ok(())
}

/// Applies correction passes and runs the verify/correct retry loop.
#[derive(Debug, Clone)]
pub struct Corrector {
    passes: usize,
    enabled: bool,
}

impl Default for Corrector {
    fn default() -> Self {
        Self {
            passes: 0,
            enabled: true,
        }
    }
}

impl Corrector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A corrector whose retry loop only verifies.
    pub fn verify_only() -> Self {
        Self {
            passes: 0,
            enabled: false,
        }
    }

    /// Correction passes run so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Apply the edits for `errors` against the surface whose content was
    /// `captured`. Returns the number of edits applied.
    pub fn apply_pass<S: Surface>(
        &mut self,
        synth: &mut Synthesizer<S>,
        captured: &str,
        errors: &[ErrorRecord],
    ) -> usize {
        self.passes += 1;
        let mut buf: Vec<char> = captured.chars().collect();
        let mut applied = 0usize;

        for edit in plan(errors) {
            if edit.position > buf.len() {
                debug!(
                    "skipping edit at {} beyond document end ({})",
                    edit.position,
                    buf.len()
                );
                continue;
            }
            if applied > 0 && applied % EDITS_PER_BATCH == 0 {
                synth.pause(EDIT_BATCH_PAUSE_MS);
            }
            match apply_edit(synth, &mut buf, &edit) {
                Ok(()) => applied += 1,
                Err(err) => warn!("edit at {} failed: {err:#}", edit.position),
            }
            synth.pause(EDIT_SETTLE_MS);
        }

        if let Err(err) = synth.document_start() {
            warn!("failed to return to document start: {err:#}");
        }
        synth.pause(PASS_SETTLE_MS);
        info!("correction pass {}: applied {applied} edit(s)", self.passes);
        applied
    }

    /// Verify; on failure correct and re-verify, with one extra pass when only a
    /// few errors remain. Never reports success with errors left. A
    /// [`verify_only`](Self::verify_only) corrector stops after the first verification.
    pub fn verify_and_correct<S: Surface>(
        &mut self,
        synth: &mut Synthesizer<S>,
        verifier: &mut Verifier,
        expected: &str,
        on_state: &mut dyn FnMut(SessionState),
    ) -> VerificationResult {
        on_state(SessionState::Verifying);
        let mut result = verifier.verify(synth, expected);
        if !self.enabled {
            return result;
        }

        for pass in 0..2 {
            if result.success || !result.capture_available || result.errors.is_empty() {
                break;
            }
            if pass == 1 && result.errors.len() > SECOND_PASS_MAX_ERRORS {
                debug!(
                    "{} errors remain; not attempting another pass",
                    result.errors.len()
                );
                break;
            }
            let Some(captured) = verifier.last_capture().map(str::to_string) else {
                break;
            };

            on_state(SessionState::Correcting);
            self.apply_pass(synth, &captured, &result.errors);

            on_state(SessionState::Verifying);
            result = verifier.verify(synth, expected);
        }
        result
    }
}

/// Select each non-empty span on the surface and toggle its formatting.
/// Returns the number of spans toggled.
pub fn apply_formatting<S: Surface>(
    synth: &mut Synthesizer<S>,
    text: &str,
    spans: &[FormattingSpan],
) -> usize {
    let buf: Vec<char> = text.chars().collect();
    let mut applied = 0usize;

    for span in spans.iter().filter(|s| !s.is_empty() && s.end <= buf.len()) {
        if applied > 0 && applied % EDITS_PER_BATCH == 0 {
            synth.pause(FORMAT_BATCH_PAUSE_MS);
        }
        let result = navigate(synth, &buf, span.start)
            .and_then(|()| synth.select_right(span.len(), CHAR_KEY_PAUSE_MS))
            .and_then(|()| synth.toggle_formatting(span.kind));
        match result {
            Ok(()) => applied += 1,
            Err(err) => warn!(
                "failed to apply {:?} to {}..{}: {err:#}",
                span.kind, span.start, span.end
            ),
        }
        synth.pause(EDIT_SETTLE_MS);
    }

    if let Err(err) = synth.document_start() {
        warn!("failed to return to document start: {err:#}");
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FormattingKind, MismatchKind, SessionOptions};
    use crate::pacing::Pacer;
    use crate::sim::SimSurface;
    use crate::verify::diff;
    use pretty_assertions::assert_eq;

    fn synth(sim: SimSurface) -> Synthesizer<SimSurface> {
        Synthesizer::new(sim, Pacer::instant(9), 0, 0)
    }

    fn record(position: usize, expected: &str, actual: &str) -> ErrorRecord {
        ErrorRecord {
            position,
            expected: expected.to_string(),
            actual: actual.to_string(),
            context: String::new(),
            kind: MismatchKind::ContentMismatch,
        }
    }

    #[test]
    fn plan_orders_edits_last_first() {
        let edits = plan(&[record(2, "ab", "x"), record(9, "", "zz")]);
        assert_eq!(
            edits,
            vec![
                Edit {
                    position: 9,
                    delete: 2,
                    insert: String::new()
                },
                Edit {
                    position: 2,
                    delete: 1,
                    insert: "ab".to_string()
                },
            ]
        );
    }

    #[test]
    fn route_never_overshoots() {
        let text: Vec<char> = "Intro paragraph, with punctuation!\nSecond line of plain words here\n"
            .repeat(4)
            .chars()
            .collect();
        for target in [0, 5, 17, 40, 90, 133, text.len()] {
            let mut cursor = 0;
            for (step, count) in route(&text, 0, target) {
                for _ in 0..count {
                    cursor = match step {
                        Move::Paragraph => paragraph_down(&text, cursor),
                        Move::Word => word_right(&text, cursor),
                        Move::Char => cursor + 1,
                    };
                    assert!(cursor <= target, "overshot {target}: {cursor}");
                }
            }
            assert_eq!(cursor, target);
        }
    }

    #[test]
    fn route_uses_jumps_for_long_distances() {
        let text: Vec<char> = format!("{}\n{}", "a".repeat(100), "plain words to skip over now")
            .chars()
            .collect();
        let runs = route(&text, 0, text.len() - 3);
        assert_eq!(runs[0], (Move::Paragraph, 1));
        assert!(runs.iter().any(|(m, _)| *m == Move::Word));
    }

    #[test]
    fn single_pass_fixes_substitution() {
        let expected = "The quick brown fox jumps over the lazy dog.";
        let actual = "The quick crown fox jumps over the lazy dog.";
        let mut s = synth(SimSurface::with_text(actual));
        let mut corrector = Corrector::new();

        let applied = corrector.apply_pass(&mut s, actual, &diff(expected, actual, 20));
        assert_eq!(applied, 1);
        assert_eq!(s.surface().text(), expected);
        assert_eq!(s.surface().cursor(), 0);
    }

    #[test]
    fn trailing_surplus_is_deleted_without_retyping() {
        let mut s = synth(SimSurface::with_text("Hello\nWorld!"));
        let mut corrector = Corrector::new();
        corrector.apply_pass(
            &mut s,
            "Hello\nWorld!",
            &diff("Hello\nWorld", "Hello\nWorld!", 20),
        );
        assert_eq!(s.surface().text(), "Hello\nWorld");
    }

    #[test]
    fn empty_selection_never_presses_delete() {
        let mut s = synth(SimSurface::with_text("Hello"));
        let mut corrector = Corrector::new();
        corrector.apply_pass(&mut s, "Hello", &diff("Hello!", "Hello", 20));
        assert_eq!(s.surface().text(), "Hello!");
        assert_eq!(s.surface().presses_of(KEY_DELETE), 0);
    }

    #[test]
    fn edits_beyond_document_end_are_skipped() {
        let mut s = synth(SimSurface::with_text("abc"));
        let mut corrector = Corrector::new();
        let applied = corrector.apply_pass(&mut s, "abc", &[record(10, "x", "")]);
        assert_eq!(applied, 0);
        assert_eq!(s.surface().text(), "abc");
    }

    #[test]
    fn verify_and_correct_converges_and_counts_passes() {
        let expected = "alpha beta gamma\n\ndelta epsilon";
        let mut s = synth(SimSurface::with_text("alpha bexa gamma\n\ndelta epsilonn"));
        let mut verifier = Verifier::new(&SessionOptions::default());
        let mut corrector = Corrector::new();
        let mut states = Vec::new();

        let result =
            corrector.verify_and_correct(&mut s, &mut verifier, expected, &mut |st| states.push(st));
        assert!(result.success);
        assert_eq!(result.match_percentage, 100.0);
        assert_eq!(corrector.passes(), 1);
        assert_eq!(
            states,
            vec![
                SessionState::Verifying,
                SessionState::Correcting,
                SessionState::Verifying
            ]
        );
    }

    #[test]
    fn verify_only_reports_without_editing() {
        let expected = "alpha beta gamma";
        let mut s = synth(SimSurface::with_text("alpha bexa gamma"));
        let mut verifier = Verifier::new(&SessionOptions::default());
        let mut corrector = Corrector::verify_only();
        let mut states = Vec::new();

        let result =
            corrector.verify_and_correct(&mut s, &mut verifier, expected, &mut |st| states.push(st));
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(corrector.passes(), 0);
        assert_eq!(states, vec![SessionState::Verifying]);
        assert_eq!(s.surface().text(), "alpha bexa gamma");
        assert_eq!(s.surface().presses_of(KEY_DELETE), 0);
    }

    #[test]
    fn formatting_selects_each_span() {
        let text = "make this bold and this italic";
        let spans = [
            FormattingSpan {
                kind: FormattingKind::Bold,
                start: 10,
                end: 14,
            },
            FormattingSpan {
                kind: FormattingKind::Italic,
                start: 24,
                end: 30,
            },
        ];
        let mut s = synth(SimSurface::with_text(text));
        assert_eq!(apply_formatting(&mut s, text, &spans), 2);

        let toggled: Vec<(FormattingKind, usize, usize)> = s
            .surface()
            .toggles()
            .iter()
            .map(|t| (t.kind, t.start, t.end))
            .collect();
        assert_eq!(
            toggled,
            vec![
                (FormattingKind::Bold, 10, 14),
                (FormattingKind::Italic, 24, 30)
            ]
        );
        assert_eq!(s.surface().selection(), None);
    }
}
