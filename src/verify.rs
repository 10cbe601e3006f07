//! Capturing surface content and comparing it against the expected text.
//!
//! Similarity is the Ratcliff/Obershelp ratio over chars: repeatedly take the
//! longest matching block, recurse on both sides, and score `2·M / T` where `M` is
//! the matched char count and `T` the combined length. Every char may seed a
//! match, so a typo in long prose costs only the chars it touches.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::device::Surface;
use crate::error::EngineError;
use crate::keyboard::{KEY_A, KEY_C};
use crate::markup::normalize_line_endings;
use crate::model::{ErrorRecord, MismatchKind, SessionOptions, VerificationResult};
use crate::synth::Synthesizer;

pub const CAPTURE_ATTEMPTS: u32 = 3;
/// At or above this many chars on either side, diffing switches to opcodes.
pub const SCAN_LIMIT: usize = 10_000;
const CONTEXT_CHARS: usize = 10;

const CLEAR_SETTLE_MS: u64 = 200;
const SELECT_SETTLE_MS: u64 = 500;
const COPY_SETTLE_MS: u64 = 500;
const RETRY_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Match {
    a: usize,
    b: usize,
    size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpTag {
    Replace,
    Delete,
    Insert,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Opcode {
    tag: OpTag,
    a1: usize,
    a2: usize,
    b1: usize,
    b2: usize,
}

struct SequenceMatcher<'a> {
    a: &'a [char],
    b: &'a [char],
    b2j: HashMap<char, Vec<usize>>,
}

impl<'a> SequenceMatcher<'a> {
    fn new(a: &'a [char], b: &'a [char]) -> Self {
        let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
        for (j, &c) in b.iter().enumerate() {
            b2j.entry(c).or_default().push(j);
        }
        Self { a, b, b2j }
    }

    fn find_longest_match(&self, alo: usize, ahi: usize, blo: usize, bhi: usize) -> Match {
        let a = self.a;
        let mut best = Match {
            a: alo,
            b: blo,
            size: 0,
        };

        // prev[j - blo + 1]: length of the match ending at (i - 1, j); only
        // touched slots are non-zero.
        let width = bhi - blo;
        let mut prev = vec![0usize; width + 1];
        let mut cur = vec![0usize; width + 1];
        let mut prev_touched: Vec<usize> = Vec::new();
        let mut cur_touched: Vec<usize> = Vec::new();

        for i in alo..ahi {
            if let Some(indices) = self.b2j.get(&a[i]) {
                for &j in indices {
                    if j < blo {
                        continue;
                    }
                    if j >= bhi {
                        break;
                    }
                    let slot = j - blo;
                    let k = prev[slot] + 1;
                    cur[slot + 1] = k;
                    cur_touched.push(slot + 1);
                    if k > best.size {
                        best = Match {
                            a: i + 1 - k,
                            b: j + 1 - k,
                            size: k,
                        };
                    }
                }
            }
            for &slot in &prev_touched {
                prev[slot] = 0;
            }
            prev_touched.clear();
            std::mem::swap(&mut prev, &mut cur);
            std::mem::swap(&mut prev_touched, &mut cur_touched);
        }
        best
    }

    /// Matching blocks in ascending order, not yet merged.
    fn matching_blocks(&self) -> Vec<Match> {
        let mut queue = vec![(0, self.a.len(), 0, self.b.len())];
        let mut blocks = Vec::new();

        while let Some((alo, ahi, blo, bhi)) = queue.pop() {
            let m = self.find_longest_match(alo, ahi, blo, bhi);
            if m.size == 0 {
                continue;
            }
            blocks.push(m);
            if alo < m.a && blo < m.b {
                queue.push((alo, m.a, blo, m.b));
            }
            if m.a + m.size < ahi && m.b + m.size < bhi {
                queue.push((m.a + m.size, ahi, m.b + m.size, bhi));
            }
        }
        blocks.sort_by_key(|m| (m.a, m.b, m.size));
        blocks
    }
}

/// Matching blocks of two sequences, computed once and shared by the ratio and
/// the opcode diff.
///
/// The shared prefix and suffix are matched directly; only the region between
/// them goes through the matcher. Blocks end with a `(len_a, len_b, 0)` sentinel.
struct Alignment {
    blocks: Vec<Match>,
    total: usize,
}

impl Alignment {
    fn new(a: &[char], b: &[char]) -> Self {
        let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
        let suffix = a[prefix..]
            .iter()
            .rev()
            .zip(b[prefix..].iter().rev())
            .take_while(|(x, y)| x == y)
            .count();
        let (a_end, b_end) = (a.len() - suffix, b.len() - suffix);

        let mut blocks = Vec::new();
        if prefix > 0 {
            blocks.push(Match {
                a: 0,
                b: 0,
                size: prefix,
            });
        }
        if prefix < a_end && prefix < b_end {
            let matcher = SequenceMatcher::new(&a[prefix..a_end], &b[prefix..b_end]);
            blocks.extend(matcher.matching_blocks().into_iter().map(|m| Match {
                a: m.a + prefix,
                b: m.b + prefix,
                size: m.size,
            }));
        }
        if suffix > 0 {
            blocks.push(Match {
                a: a_end,
                b: b_end,
                size: suffix,
            });
        }

        let mut collapsed: Vec<Match> = Vec::with_capacity(blocks.len() + 1);
        for m in blocks {
            match collapsed.last_mut() {
                Some(last) if last.a + last.size == m.a && last.b + last.size == m.b => {
                    last.size += m.size;
                }
                _ => collapsed.push(m),
            }
        }
        collapsed.push(Match {
            a: a.len(),
            b: b.len(),
            size: 0,
        });

        Self {
            blocks: collapsed,
            total: a.len() + b.len(),
        }
    }

    fn ratio(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        let matched: usize = self.blocks.iter().map(|m| m.size).sum();
        2.0 * matched as f64 / self.total as f64
    }

    fn opcodes(&self) -> Vec<Opcode> {
        let (mut i, mut j) = (0, 0);
        let mut out = Vec::new();
        for m in &self.blocks {
            let tag = match (i < m.a, j < m.b) {
                (true, true) => Some(OpTag::Replace),
                (true, false) => Some(OpTag::Delete),
                (false, true) => Some(OpTag::Insert),
                (false, false) => None,
            };
            if let Some(tag) = tag {
                out.push(Opcode {
                    tag,
                    a1: i,
                    a2: m.a,
                    b1: j,
                    b2: m.b,
                });
            }
            i = m.a + m.size;
            j = m.b + m.size;
            if m.size > 0 {
                out.push(Opcode {
                    tag: OpTag::Equal,
                    a1: m.a,
                    a2: i,
                    b1: m.b,
                    b2: j,
                });
            }
        }
        out
    }
}

/// Similarity of `actual` to `expected` on a 0-100 scale.
pub fn similarity(expected: &str, actual: &str) -> f64 {
    let a: Vec<char> = expected.chars().collect();
    let b: Vec<char> = actual.chars().collect();
    Alignment::new(&a, &b).ratio() * 100.0
}

fn collect(chars: &[char], start: usize, end: usize) -> String {
    chars[start.min(chars.len())..end.min(chars.len())]
        .iter()
        .collect()
}

fn context_around(actual: &[char], start: usize, end: usize) -> String {
    let from = start.saturating_sub(CONTEXT_CHARS);
    let to = (end + CONTEXT_CHARS).min(actual.len());
    format!("...{}...", collect(actual, from, to))
}

fn trailing_record(expected: &[char], actual: &[char]) -> Option<ErrorRecord> {
    let shared = expected.len().min(actual.len());
    let context = match expected.len().cmp(&actual.len()) {
        std::cmp::Ordering::Equal => return None,
        std::cmp::Ordering::Greater => "[end of document - missing content]",
        std::cmp::Ordering::Less => "[end of document - extra content]",
    };
    Some(ErrorRecord {
        position: shared,
        expected: collect(expected, shared, expected.len()),
        actual: collect(actual, shared, actual.len()),
        context: context.to_string(),
        kind: MismatchKind::LengthMismatch,
    })
}

fn scan_mismatches(expected: &[char], actual: &[char], budget: usize) -> Vec<ErrorRecord> {
    let shared = expected.len().min(actual.len());
    let mut errors = Vec::new();
    let mut run_start: Option<usize> = None;

    let close_run = |start: usize, end: usize, errors: &mut Vec<ErrorRecord>| {
        errors.push(ErrorRecord {
            position: start,
            expected: collect(expected, start, end),
            actual: collect(actual, start, end),
            context: context_around(actual, start, end),
            kind: MismatchKind::ContentMismatch,
        });
    };

    for pos in 0..shared {
        if errors.len() >= budget {
            return errors;
        }
        let differs = expected[pos] != actual[pos];
        match (differs, run_start) {
            (true, None) => run_start = Some(pos),
            (false, Some(start)) => {
                close_run(start, pos, &mut errors);
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        if errors.len() < budget {
            close_run(start, shared, &mut errors);
        }
    }
    errors
}

fn opcode_mismatches(
    expected: &[char],
    actual: &[char],
    alignment: &Alignment,
    max_errors: usize,
) -> Vec<ErrorRecord> {
    let changes: Vec<Opcode> = alignment
        .opcodes()
        .into_iter()
        .filter(|op| op.tag != OpTag::Equal)
        .collect();

    let record = |op: &Opcode| {
        let at_tail = op.a2 == expected.len() && op.b2 == actual.len();
        let kind = if at_tail && op.tag != OpTag::Replace {
            MismatchKind::LengthMismatch
        } else {
            MismatchKind::ContentMismatch
        };
        ErrorRecord {
            position: op.b1,
            expected: collect(expected, op.a1, op.a2),
            actual: collect(actual, op.b1, op.b2),
            context: context_around(actual, op.b1, op.b2),
            kind,
        }
    };

    let tail = changes
        .last()
        .filter(|op| op.a2 == expected.len() && op.b2 == actual.len());
    let mut errors: Vec<ErrorRecord> = match tail {
        Some(tail) if changes.len() > max_errors => changes[..max_errors - 1]
            .iter()
            .chain(std::iter::once(tail))
            .map(record)
            .collect(),
        _ => changes.iter().take(max_errors).map(record).collect(),
    };
    errors.sort_by_key(|e| e.position);
    errors
}

/// `alignment`, when given, must be `Alignment::new(expected, actual)`.
fn mismatches(
    expected: &[char],
    actual: &[char],
    max_errors: usize,
    alignment: Option<&Alignment>,
) -> Vec<ErrorRecord> {
    let max_errors = max_errors.max(1);
    if expected == actual {
        return Vec::new();
    }

    if expected.len() >= SCAN_LIMIT || actual.len() >= SCAN_LIMIT {
        return match alignment {
            Some(alignment) => opcode_mismatches(expected, actual, alignment, max_errors),
            None => {
                let alignment = Alignment::new(expected, actual);
                opcode_mismatches(expected, actual, &alignment, max_errors)
            }
        };
    }

    let trailing = trailing_record(expected, actual);
    let budget = if trailing.is_some() {
        max_errors - 1
    } else {
        max_errors
    };
    let mut errors = scan_mismatches(expected, actual, budget);
    errors.extend(trailing);
    errors
}

/// Mismatch records between `expected` and `actual`, at most `max_errors`.
///
/// When the lengths differ a trailing record covering the surplus or missing tail
/// is always included.
pub fn diff(expected: &str, actual: &str, max_errors: usize) -> Vec<ErrorRecord> {
    let e: Vec<char> = expected.chars().collect();
    let a: Vec<char> = actual.chars().collect();
    mismatches(&e, &a, max_errors, None)
}

/// Compare texts and apply the success predicate.
pub fn evaluate(
    expected: &str,
    actual: &str,
    threshold: f64,
    strict: bool,
    max_errors: usize,
) -> VerificationResult {
    let e: Vec<char> = expected.chars().collect();
    let a: Vec<char> = actual.chars().collect();
    let alignment = Alignment::new(&e, &a);

    let match_percentage = alignment.ratio() * 100.0;
    let errors = mismatches(&e, &a, max_errors, Some(&alignment));
    let success = match_percentage >= threshold && (!strict || errors.is_empty());
    VerificationResult {
        match_percentage,
        errors,
        success,
        capture_available: true,
    }
}

/// Reads the surface back through select-all/copy and scores it.
#[derive(Debug, Clone)]
pub struct Verifier {
    threshold: f64,
    strict: bool,
    max_errors: usize,
    last_capture: Option<String>,
}

impl Verifier {
    pub fn new(options: &SessionOptions) -> Self {
        Self {
            threshold: options.success_threshold(),
            strict: options.strict,
            max_errors: options.max_errors,
            last_capture: None,
        }
    }

    /// Text read by the most recent successful capture.
    pub fn last_capture(&self) -> Option<&str> {
        self.last_capture.as_deref()
    }

    /// Select everything, copy it and read the content channel, retrying with
    /// backoff. The caret ends at document start either way.
    pub fn capture_current<S: Surface>(
        &mut self,
        synth: &mut Synthesizer<S>,
    ) -> Result<String, EngineError> {
        let captured = Self::copy_with_retries(synth);
        if let Err(err) = synth.document_start() {
            debug!("failed to collapse selection after capture: {err:#}");
        }

        let text = normalize_line_endings(&captured?);
        self.last_capture = Some(text.clone());
        Ok(text)
    }

    fn copy_with_retries<S: Surface>(synth: &mut Synthesizer<S>) -> Result<String, EngineError> {
        for attempt in 1..=CAPTURE_ATTEMPTS {
            match Self::copy_once(synth) {
                Ok(Some(text)) => return Ok(text),
                Ok(None) => debug!("capture attempt {attempt} returned no text"),
                Err(err) => debug!("capture attempt {attempt} failed: {err:#}"),
            }
            synth.pause(RETRY_BACKOFF_MS);
        }
        Err(EngineError::VerificationUnavailable {
            attempts: CAPTURE_ATTEMPTS,
        })
    }

    fn copy_once<S: Surface>(synth: &mut Synthesizer<S>) -> anyhow::Result<Option<String>> {
        synth.surface_mut().clear_content()?;
        synth.pause(CLEAR_SETTLE_MS);
        synth.shortcut(KEY_A)?;
        synth.pause(SELECT_SETTLE_MS);
        synth.shortcut(KEY_C)?;
        synth.pause(COPY_SETTLE_MS);
        synth.surface_mut().read_content()
    }

    pub fn evaluate(&self, expected: &str, actual: &str) -> VerificationResult {
        evaluate(expected, actual, self.threshold, self.strict, self.max_errors)
    }

    /// Capture the surface and compare it with `expected`.
    ///
    /// An empty channel when nothing is expected counts as an empty document;
    /// otherwise an exhausted capture yields an unsuccessful result with
    /// `capture_available == false`.
    pub fn verify<S: Surface>(
        &mut self,
        synth: &mut Synthesizer<S>,
        expected: &str,
    ) -> VerificationResult {
        match self.capture_current(synth) {
            Ok(actual) => self.evaluate(expected, &actual),
            Err(_) if expected.is_empty() => {
                self.last_capture = Some(String::new());
                self.evaluate(expected, "")
            }
            Err(err) => {
                warn!("{err}");
                self.last_capture = None;
                VerificationResult::unavailable()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::Pacer;
    use crate::sim::SimSurface;
    use pretty_assertions::assert_eq;

    fn record(
        position: usize,
        expected: &str,
        actual: &str,
        context: &str,
        kind: MismatchKind,
    ) -> ErrorRecord {
        ErrorRecord {
            position,
            expected: expected.to_string(),
            actual: actual.to_string(),
            context: context.to_string(),
            kind,
        }
    }

    #[test]
    fn ratio_matches_known_values() {
        assert_eq!(similarity("", ""), 100.0);
        assert_eq!(similarity("abc", ""), 0.0);
        assert_eq!(similarity("abcd", "bcde"), 75.0);
        assert_eq!(similarity("same text", "same text"), 100.0);
    }

    #[test]
    fn matching_blocks_cover_interleaved_matches() {
        let a: Vec<char> = "abxcd".chars().collect();
        let b: Vec<char> = "abcd".chars().collect();
        assert_eq!(
            Alignment::new(&a, &b).blocks,
            vec![
                Match { a: 0, b: 0, size: 2 },
                Match { a: 3, b: 2, size: 2 },
                Match { a: 5, b: 4, size: 0 },
            ]
        );
    }

    #[test]
    fn repeated_chars_do_not_break_long_ratios() {
        let expected = "a".repeat(300);
        let actual = format!("{}b", "a".repeat(300));
        let score = similarity(&expected, &actual);
        assert!(score > 99.0, "{score}");
    }

    #[test]
    fn one_typo_in_long_prose_costs_one_char() {
        let expected = "The committee met on Tuesday to review the budget for the coming year. "
            .repeat(18);
        assert!(expected.chars().count() > 1_000);
        let at = expected.len() / 2;
        let mut actual = expected.clone();
        let original = &expected[at..at + 1];
        let swapped = if original == "x" { "y" } else { "x" };
        actual.replace_range(at..at + 1, swapped);

        let n = expected.chars().count() as f64;
        let score = similarity(&expected, &actual);
        assert!((score - 100.0 * (n - 1.0) / n).abs() < 1e-9, "{score}");

        let lenient = evaluate(&expected, &actual, 95.0, false, 20);
        assert!(lenient.success);
        assert_eq!(lenient.errors.len(), 1);
    }

    #[test]
    fn identical_texts_align_without_matching() {
        let text: Vec<char> = "plain words ".repeat(5_000).chars().collect();
        let alignment = Alignment::new(&text, &text);
        assert_eq!(
            alignment.blocks,
            vec![
                Match {
                    a: 0,
                    b: 0,
                    size: text.len()
                },
                Match {
                    a: text.len(),
                    b: text.len(),
                    size: 0
                },
            ]
        );

        let joined: String = text.iter().collect();
        assert!(diff(&joined, &joined, 20).is_empty());
        let result = evaluate(&joined, &joined, 99.0, true, 20);
        assert_eq!(result.match_percentage, 100.0);
        assert!(result.success);
    }

    #[test]
    fn shared_prefix_and_suffix_bracket_the_matched_middle() {
        let a: Vec<char> = "header abc middle xyz footer".chars().collect();
        let b: Vec<char> = "header xyz middle abc footer".chars().collect();
        let alignment = Alignment::new(&a, &b);
        assert_eq!(alignment.blocks.first().map(|m| (m.a, m.b)), Some((0, 0)));
        assert_eq!(alignment.blocks[0].size, 7);
        let last_real = alignment.blocks[alignment.blocks.len() - 2];
        assert_eq!(last_real.a + last_real.size, a.len());
        assert_eq!(last_real.b + last_real.size, b.len());
    }

    #[test]
    fn single_substitution_is_one_record() {
        let errors = diff("the quick brown fox", "the quick clown fox", 20);
        assert_eq!(
            errors,
            vec![record(
                10,
                "br",
                "cl",
                "...the quick clown fox...",
                MismatchKind::ContentMismatch
            )]
        );
    }

    #[test]
    fn extra_tail_is_a_length_record() {
        let errors = diff("Hello\nWorld", "Hello\nWorld!", 20);
        assert_eq!(
            errors,
            vec![record(
                11,
                "",
                "!",
                "[end of document - extra content]",
                MismatchKind::LengthMismatch
            )]
        );
    }

    #[test]
    fn missing_tail_keeps_full_segment() {
        let expected = format!("start {}", "x".repeat(40));
        let errors = diff(&expected, "start ", 20);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].position, 6);
        assert_eq!(errors[0].expected, "x".repeat(40));
    }

    #[test]
    fn trailing_record_survives_error_cap() {
        let expected = "a.b.c.d.e.";
        let actual = "a,b,c,d,e,extra";
        let errors = diff(expected, actual, 3);
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[2].kind, MismatchKind::LengthMismatch);
        assert_eq!(errors[2].actual, "extra");
    }

    #[test]
    fn large_inputs_use_opcodes() {
        let expected: String = (0..1_500).map(|i| format!("line {i} ")).collect();
        assert!(expected.len() >= SCAN_LIMIT);
        let at = expected.find("line 700 ").unwrap();
        let mut actual = expected.clone();
        actual.replace_range(at..at + 4, "LINE");
        actual.push_str("tail");

        let errors = diff(&expected, &actual, 20);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].position, at);
        assert_eq!(errors[0].expected, "line");
        assert_eq!(errors[0].actual, "LINE");
        assert_eq!(errors[0].kind, MismatchKind::ContentMismatch);
        assert_eq!(errors[1].position, expected.len());
        assert_eq!(errors[1].kind, MismatchKind::LengthMismatch);
        assert_eq!(errors[1].actual, "tail");
    }

    #[test]
    fn strict_mode_requires_no_errors() {
        let expected = "x".repeat(200);
        let actual = format!("{}y", "x".repeat(199));
        let strict = evaluate(&expected, &actual, 99.0, true, 20);
        assert!(strict.match_percentage >= 99.0);
        assert!(!strict.success);

        let lenient = evaluate(&expected, &actual, 95.0, false, 20);
        assert!(lenient.success);
    }

    fn synth(sim: SimSurface) -> Synthesizer<SimSurface> {
        Synthesizer::new(sim, Pacer::instant(5), 0, 0)
    }

    #[test]
    fn capture_reads_whole_document_and_collapses_selection() {
        let mut s = synth(SimSurface::with_text("line one\nline two"));
        let mut verifier = Verifier::new(&SessionOptions::default());
        let text = verifier.capture_current(&mut s).unwrap();
        assert_eq!(text, "line one\nline two");
        assert_eq!(s.surface().selection(), None);
        assert_eq!(s.surface().cursor(), 0);
    }

    #[test]
    fn capture_retries_empty_reads() {
        let mut s = synth(SimSurface::with_text("abc").with_empty_reads(2));
        let mut verifier = Verifier::new(&SessionOptions::default());
        assert_eq!(verifier.capture_current(&mut s).unwrap(), "abc");
    }

    #[test]
    fn exhausted_capture_is_unavailable_not_empty() {
        let mut s = synth(SimSurface::with_text("abc").with_empty_reads(3));
        let mut verifier = Verifier::new(&SessionOptions::default());
        let err = verifier.capture_current(&mut s).unwrap_err();
        assert!(matches!(
            err,
            EngineError::VerificationUnavailable { attempts: 3 }
        ));

        let mut s = synth(SimSurface::with_text("abc").with_empty_reads(3));
        let result = verifier.verify(&mut s, "abc");
        assert!(!result.capture_available);
        assert!(!result.success);
    }
}
