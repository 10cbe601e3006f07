use pretty_assertions::assert_eq;

use retyper::correction::{plan, Corrector, Edit};
use retyper::markup::{chunk, parse_formatting, preprocess, restore_markers};
use retyper::model::{ErrorRecord, MismatchKind, SessionOptions};
use retyper::pacing::Pacer;
use retyper::sim::SimSurface;
use retyper::synth::Synthesizer;
use retyper::verify::{diff, evaluate, similarity, Verifier};

fn synth(sim: SimSurface) -> Synthesizer<SimSurface> {
    Synthesizer::new(sim, Pacer::instant(3), 0, 0)
}

const PROSE: &str = "Keyboards were once mechanical.\n\nToday they are mostly membranes, \
                     although enthusiasts still build their own.\n\nThis sentence ends the text.";

#[test]
fn identical_capture_scores_full_marks() {
    assert_eq!(similarity(PROSE, PROSE), 100.0);
    assert!(diff(PROSE, PROSE, 20).is_empty());

    let mut s = synth(SimSurface::with_text(PROSE));
    let mut verifier = Verifier::new(&SessionOptions::default());
    let result = verifier.verify(&mut s, PROSE);
    assert!(result.success);
    assert!(result.capture_available);
    assert_eq!(result.match_percentage, 100.0);
}

#[test]
fn chunking_preserves_the_document() {
    let long_token = "x".repeat(64);
    let text = format!("{PROSE}\n\n{long_token} tail words\n");
    for max in [1, 7, 16, 40, 500] {
        let chunks = chunk(&text, max);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);

        let mut offset = 0;
        for c in &chunks {
            assert_eq!(c.offset, offset);
            offset += c.char_len();
            let single_token = !c.text.trim().contains(char::is_whitespace);
            assert!(
                c.char_len() <= max || single_token,
                "chunk {} of {} chars exceeds {max}",
                c.index,
                c.char_len()
            );
        }
    }
}

#[test]
fn restored_markers_reproduce_marked_text() {
    let marked = "A **bold** claim, an _aside_ and __underlined__ words.\n\n**Again** here.";
    let (clean, spans) = parse_formatting(marked);
    assert_eq!(
        clean,
        "A bold claim, an aside and underlined words.\n\nAgain here."
    );
    assert_eq!(restore_markers(&clean, &spans), marked);

    let doc = preprocess(marked, true);
    assert_eq!(doc.marked, marked);
    assert_eq!(doc.text, clean);
}

#[test]
fn one_substitution_is_one_record_and_one_edit() {
    let expected = "The meeting moves to Thursday afternoon.";
    let actual = "The meeting moves to Friday afternoon.";
    let errors = diff(expected, "The meeting moves to Thursdxy afternoon.", 20);
    assert_eq!(
        errors,
        vec![ErrorRecord {
            position: 27,
            expected: "a".to_string(),
            actual: "x".to_string(),
            context: "... to Thursdxy afternoo...".to_string(),
            kind: MismatchKind::ContentMismatch,
        }]
    );
    assert_eq!(
        plan(&errors),
        vec![Edit {
            position: 27,
            delete: 1,
            insert: "a".to_string()
        }]
    );

    // A length-changing substitution still converges in a single pass.
    let errors = diff(expected, actual, 20);
    let mut s = synth(SimSurface::with_text(actual));
    let mut corrector = Corrector::new();
    corrector.apply_pass(&mut s, actual, &errors);
    assert_eq!(s.surface().text(), expected);
    assert_eq!(similarity(expected, &s.surface().text()), 100.0);
    assert_eq!(corrector.passes(), 1);
}

#[test]
fn substitution_replay_converges_in_one_pass() {
    let expected = "Every edit starts from the top of the document.";
    let actual = "Every edit starts from the bottom of the document.";
    let errors = diff(expected, actual, 20);

    let mut s = synth(SimSurface::with_text(actual));
    let mut corrector = Corrector::new();
    corrector.apply_pass(&mut s, actual, &errors);

    let result = evaluate(expected, &s.surface().text(), 99.0, true, 20);
    assert!(result.success);
    assert_eq!(result.match_percentage, 100.0);
}

#[test]
fn trailing_insertion_is_reported_and_removed() {
    let expected = "Hello\nWorld";
    let actual = "Hello\nWorld!";

    let errors = diff(expected, actual, 20);
    assert_eq!(
        errors,
        vec![ErrorRecord {
            position: 11,
            expected: String::new(),
            actual: "!".to_string(),
            context: "[end of document - extra content]".to_string(),
            kind: MismatchKind::LengthMismatch,
        }]
    );

    let mut s = synth(SimSurface::with_text(actual));
    let mut verifier = Verifier::new(&SessionOptions::default());
    let mut corrector = Corrector::new();
    let result = corrector.verify_and_correct(&mut s, &mut verifier, expected, &mut |_| {});

    assert!(result.success);
    assert_eq!(result.match_percentage, 100.0);
    assert_eq!(s.surface().text(), expected);
}

#[test]
fn lenient_mode_accepts_near_matches() {
    let expected = "a".repeat(60) + " and then some more ordinary words to pad it out";
    let actual = expected.replacen("ordinary", "ordinarx", 1);

    let strict = evaluate(&expected, &actual, 99.0, true, 20);
    assert!(!strict.success);
    assert_eq!(strict.errors.len(), 1);

    let lenient = evaluate(&expected, &actual, 95.0, false, 20);
    assert!(lenient.success);
    assert_eq!(lenient.errors.len(), 1);
}
