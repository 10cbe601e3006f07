use tracing::{debug, info, warn};

use crate::advisor::{last_sentence, NoopAdvisor, TextAdvisor};
use crate::correction::{apply_formatting, Corrector};
use crate::device::Surface;
use crate::error::EngineError;
use crate::focus::FocusController;
use crate::keyboard::find_first_unmapped_char;
use crate::markup::{chunk, preprocess};
use crate::model::{
    Chunk, Document, FormattingMode, Outcome, Point, SessionEvent, SessionOptions, SessionReport,
    SessionState, VerificationResult,
};
use crate::pacing::{CancelToken, Pacer};
use crate::synth::{kinds_at, Synthesizer};
use crate::verify::Verifier;

const COUNTDOWN_STEP_MS: u64 = 1000;

/// Largest chunk a session will type between checkpoints.
pub const MAX_CHUNK_SIZE: usize = 50_000;
/// Largest document, in chars after preprocessing, a session accepts.
pub const MAX_DOCUMENT_CHARS: usize = 1_000_000;

/// Reject option combinations a session cannot run with.
pub fn validate(options: &SessionOptions) -> Result<(), EngineError> {
    let fail = |msg: &str| Err(EngineError::InvalidOptions(msg.to_string()));
    if options.max_chunk_size == 0 {
        return fail("max_chunk_size must be at least 1");
    }
    if options.max_chunk_size > MAX_CHUNK_SIZE {
        return Err(EngineError::InvalidOptions(format!(
            "max_chunk_size must not exceed {MAX_CHUNK_SIZE}"
        )));
    }
    if options.max_errors == 0 {
        return fail("max_errors must be at least 1");
    }
    if options.progress_step == 0 {
        return fail("progress_step must be at least 1");
    }
    if options.jitter_ms > options.delay_ms {
        return fail("jitter_ms must not exceed delay_ms");
    }
    Ok(())
}

/// Reject documents with nothing to type or more than [`MAX_DOCUMENT_CHARS`].
pub fn validate_document(doc: &Document) -> Result<(), EngineError> {
    if doc.text.trim().is_empty() {
        return Err(EngineError::InvalidDocument(
            "document has no text to type".to_string(),
        ));
    }
    let len = doc.char_len();
    if len > MAX_DOCUMENT_CHARS {
        return Err(EngineError::InvalidDocument(format!(
            "document has {len} chars; at most {MAX_DOCUMENT_CHARS} are supported"
        )));
    }
    Ok(())
}

fn corrector_for(options: &SessionOptions) -> Corrector {
    if options.correct {
        Corrector::new()
    } else {
        Corrector::verify_only()
    }
}

/// Where typing has got to inside the document.
#[derive(Debug, Default)]
struct Cursor {
    typed: usize,
    since_verify: usize,
    last_progress: usize,
    chunks_typed: usize,
}

/// One typing run: preprocessing, focus, chunked typing with periodic
/// verification and correction, final verification, formatting.
pub struct Session<S: Surface> {
    synth: Synthesizer<S>,
    focus: FocusController,
    verifier: Verifier,
    corrector: Corrector,
    advisor: Box<dyn TextAdvisor>,
    options: SessionOptions,
    state: SessionState,
    cancel: CancelToken,
}

impl<S: Surface> Session<S> {
    pub fn new(surface: S, options: SessionOptions) -> Result<Self, EngineError> {
        let pacer = Pacer::realtime(options.seed);
        Self::with_pacer(surface, options, pacer)
    }

    pub fn with_pacer(surface: S, options: SessionOptions, pacer: Pacer) -> Result<Self, EngineError> {
        validate(&options)?;
        Ok(Self {
            synth: Synthesizer::new(surface, pacer, options.delay_ms, options.jitter_ms),
            focus: FocusController::new(),
            verifier: Verifier::new(&options),
            corrector: corrector_for(&options),
            advisor: Box::new(NoopAdvisor),
            options,
            state: SessionState::Idle,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_advisor(mut self, advisor: impl TextAdvisor + 'static) -> Self {
        self.advisor = Box::new(advisor);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn surface(&self) -> &S {
        self.synth.surface()
    }

    pub fn into_surface(self) -> S {
        self.synth.into_surface()
    }

    /// Forget everything a finished run left behind.
    fn reset(&mut self) {
        debug!("resetting session after {}", self.state);
        self.synth.reset_counters();
        self.focus = FocusController::new();
        self.verifier = Verifier::new(&self.options);
        self.corrector = corrector_for(&self.options);
        self.state = SessionState::Idle;
    }

    fn set_state(&mut self, state: SessionState, observer: &mut dyn FnMut(&SessionEvent)) {
        debug!("session state: {state}");
        self.state = state;
        observer(&SessionEvent::StateChanged(state));
    }

    fn progress(&self, cursor: &mut Cursor, total: usize, observer: &mut dyn FnMut(&SessionEvent)) {
        if cursor.last_progress == cursor.typed && cursor.typed != 0 {
            return;
        }
        cursor.last_progress = cursor.typed;
        observer(&SessionEvent::Progress {
            typed: cursor.typed,
            total,
        });
    }

    /// Type `document_text` into the surface and verify it.
    ///
    /// Only an unusable document and focus acquisition failures are errors;
    /// everything else ends in a report, with `outcome` telling whether the text
    /// verified. Running again starts from fresh counters.
    pub fn run(
        &mut self,
        document_text: &str,
        focus_point: Option<Point>,
        observer: &mut dyn FnMut(&SessionEvent),
    ) -> Result<SessionReport, EngineError> {
        if self.state.is_terminal() {
            self.reset();
        }
        self.set_state(SessionState::Preprocessing, observer);
        let doc = preprocess(document_text, self.options.normalize_paragraphs);
        if let Err(err) = validate_document(&doc) {
            warn!("{err}");
            self.set_state(SessionState::Failed, observer);
            return Err(err);
        }
        let chunks = chunk(&doc.text, self.options.max_chunk_size);
        let total = doc.char_len();
        info!(
            "typing {total} chars in {} chunk(s), {} formatting span(s)",
            chunks.len(),
            doc.spans.len()
        );
        if let Some((idx, c)) = find_first_unmapped_char(&doc.text) {
            info!("{c:?} at {idx} has no US-layout key; it will need literal entry");
        }

        self.set_state(SessionState::AwaitingFocus, observer);
        let mut cursor = Cursor::default();
        if !self.countdown(observer) {
            return Ok(self.cancelled(&doc, &chunks, &cursor, None, false, observer));
        }
        if let Err(err) = self.focus.acquire(&mut self.synth, focus_point) {
            warn!("{err}");
            self.set_state(SessionState::Failed, observer);
            return Err(err);
        }

        let mut last_result: Option<VerificationResult> = None;
        for (idx, current) in chunks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(self.cancelled(&doc, &chunks, &cursor, last_result, true, observer));
            }
            if idx > 0 {
                self.refocus_if_drifted(observer)?;
            }

            if let Some(result) = self.type_chunk(&doc, current, total, &mut cursor, observer) {
                last_result = Some(result);
            }
            if self.options.formatting == FormattingMode::Inline {
                self.synth.sync_formatting(&[]);
            }
            cursor.chunks_typed += 1;
            self.progress(&mut cursor, total, observer);

            let last_chunk = idx + 1 == chunks.len();
            if !last_chunk {
                cursor.since_verify = 0;
                let prefix: String = doc.text.chars().take(cursor.typed).collect();
                last_result = Some(self.checkpoint(&prefix, observer));
                self.resume_typing(current.index, observer);
                self.synth.pause(self.options.chunk_pause_ms);
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(self.cancelled(&doc, &chunks, &cursor, last_result, true, observer));
        }

        let result = self.checkpoint(&doc.text, observer);
        let formatting_applied = match self.options.formatting {
            FormattingMode::After if doc.spans.iter().any(|s| !s.is_empty()) => {
                self.set_state(SessionState::Formatting, observer);
                apply_formatting(&mut self.synth, &doc.text, &doc.spans)
            }
            FormattingMode::Inline => doc.spans.iter().filter(|s| !s.is_empty()).count(),
            _ => 0,
        };
        if let Err(err) = self.synth.document_start() {
            warn!("failed to return to document start: {err:#}");
        }

        cursor.typed = total;
        self.progress(&mut cursor, total, observer);

        let outcome = if result.success {
            Outcome::Verified
        } else {
            Outcome::Partial
        };
        let summary = format!(
            "verification {}: {:.1}% match, {} error(s) remaining",
            if result.success { "passed" } else { "failed" },
            result.match_percentage,
            result.errors.len()
        );
        info!("{summary}");
        observer(&SessionEvent::Status(summary));
        self.set_state(SessionState::Done, observer);

        Ok(self.report(&doc, &chunks, &cursor, Some(result), outcome, formatting_applied))
    }

    /// Returns false if cancelled during the countdown.
    fn countdown(&mut self, observer: &mut dyn FnMut(&SessionEvent)) -> bool {
        let secs = self.options.countdown_secs;
        if secs > 0 {
            observer(&SessionEvent::Status(format!(
                "Focus the target window. Starting in {secs}s..."
            )));
            for remaining in (1..=secs).rev() {
                observer(&SessionEvent::Status(format!("{remaining}...")));
                if !self
                    .synth
                    .pacer_mut()
                    .pause_interruptible(COUNTDOWN_STEP_MS, &self.cancel)
                {
                    return false;
                }
            }
        }
        !self.cancel.is_cancelled()
    }

    fn refocus_if_drifted(
        &mut self,
        observer: &mut dyn FnMut(&SessionEvent),
    ) -> Result<(), EngineError> {
        if !self.focus.check_drift(&mut self.synth) {
            return Ok(());
        }
        observer(&SessionEvent::Status(
            "pointer moved away from the target; re-focusing".to_string(),
        ));
        if let Err(err) = self.focus.reacquire(&mut self.synth) {
            warn!("{err}");
            self.set_state(SessionState::Failed, observer);
            return Err(err);
        }
        if let Err(err) = self.synth.document_end() {
            warn!("failed to move caret to document end: {err:#}");
        }
        Ok(())
    }

    /// Type one chunk, running in-chunk verifications on the configured cadence.
    /// Returns the last in-chunk verification, if any ran.
    fn type_chunk(
        &mut self,
        doc: &Document,
        current: &Chunk,
        total: usize,
        cursor: &mut Cursor,
        observer: &mut dyn FnMut(&SessionEvent),
    ) -> Option<VerificationResult> {
        self.set_state(SessionState::Typing(current.index), observer);
        let inline = self.options.formatting == FormattingMode::Inline;
        let interval = self.options.verify_interval;
        let chunk_len = current.char_len();
        let mut last_result = None;

        for (k, c) in current.text.chars().enumerate() {
            if inline {
                self.synth
                    .sync_formatting(&kinds_at(&doc.spans, current.offset + k));
            }
            self.synth.type_char(c);
            cursor.typed += 1;
            cursor.since_verify += 1;

            if cursor.typed - cursor.last_progress >= self.options.progress_step {
                self.progress(cursor, total, observer);
            }

            // The chunk-end checkpoint covers a cadence hit on the last char.
            if interval > 0 && cursor.since_verify >= interval && k + 1 < chunk_len {
                cursor.since_verify = 0;
                if inline {
                    self.synth.sync_formatting(&[]);
                }
                let prefix: String = doc.text.chars().take(cursor.typed).collect();
                self.review_recent(&prefix, observer);
                last_result = Some(self.checkpoint(&prefix, observer));
                self.resume_typing(current.index, observer);
            }
        }
        last_result
    }

    fn review_recent(&mut self, typed: &str, observer: &mut dyn FnMut(&SessionEvent)) {
        let Some(sentence) = last_sentence(typed) else {
            return;
        };
        for advice in self.advisor.review(sentence) {
            let line = format!("suggestion for \"{sentence}\": {}", advice.message);
            info!("{line}");
            observer(&SessionEvent::Status(line));
        }
    }

    /// Verify the surface against `expected`, correcting as the retry policy allows.
    fn checkpoint(
        &mut self,
        expected: &str,
        observer: &mut dyn FnMut(&SessionEvent),
    ) -> VerificationResult {
        let state = &mut self.state;
        let result = self.corrector.verify_and_correct(
            &mut self.synth,
            &mut self.verifier,
            expected,
            &mut |next| {
                debug!("session state: {next}");
                *state = next;
                observer(&SessionEvent::StateChanged(next));
            },
        );

        if !result.capture_available {
            observer(&SessionEvent::Status(
                "surface content unavailable; continuing without verification".to_string(),
            ));
        } else if !result.success {
            warn!(
                "{} error(s) remain at {:.1}% match",
                result.errors.len(),
                result.match_percentage
            );
            for error in &result.errors {
                debug!("{error}");
            }
        }
        result
    }

    /// Put the caret back at the end of the typed text and re-enter `Typing`.
    fn resume_typing(&mut self, chunk_index: usize, observer: &mut dyn FnMut(&SessionEvent)) {
        if let Err(err) = self.synth.document_end() {
            warn!("failed to move caret to document end: {err:#}");
        }
        self.set_state(SessionState::Typing(chunk_index), observer);
    }

    fn cancelled(
        &mut self,
        doc: &Document,
        chunks: &[Chunk],
        cursor: &Cursor,
        last_result: Option<VerificationResult>,
        focused: bool,
        observer: &mut dyn FnMut(&SessionEvent),
    ) -> SessionReport {
        if focused {
            if let Err(err) = self.synth.document_start() {
                warn!("failed to return to document start: {err:#}");
            }
        }
        info!("cancelled after {} of {} chars", cursor.typed, doc.char_len());
        self.set_state(SessionState::Cancelled, observer);
        self.report(doc, chunks, cursor, last_result, Outcome::Cancelled, 0)
    }

    fn report(
        &self,
        doc: &Document,
        chunks: &[Chunk],
        cursor: &Cursor,
        verification: Option<VerificationResult>,
        outcome: Outcome,
        formatting_applied: usize,
    ) -> SessionReport {
        let text = match self.verifier.last_capture() {
            Some(captured) => captured.to_string(),
            None => doc.text.chars().take(cursor.typed).collect(),
        };
        SessionReport {
            text,
            verification,
            final_state: self.state,
            outcome,
            chunks_typed: cursor.chunks_typed,
            chunks_total: chunks.len(),
            dropped: self.synth.dropped().to_vec(),
            fallbacks: self.synth.fallbacks(),
            refocus_count: self.focus.reacquisitions(),
            correction_passes: self.corrector.passes(),
            formatting_applied,
        }
    }
}

/// Run one session over `surface` with real-time pacing.
pub fn run<S: Surface>(
    surface: S,
    document_text: &str,
    focus_point: Option<Point>,
    options: SessionOptions,
    progress: Option<&mut dyn FnMut(&SessionEvent)>,
) -> Result<SessionReport, EngineError> {
    let mut session = Session::new(surface, options)?;
    match progress {
        Some(observer) => session.run(document_text, focus_point, observer),
        None => session.run(document_text, focus_point, &mut |_| {}),
    }
}
