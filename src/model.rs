use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Pressed,
    Released,
}

/// Screen coordinate in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormattingKind {
    Bold,
    Italic,
    Underline,
}

impl FormattingKind {
    pub const ALL: [FormattingKind; 3] = [
        FormattingKind::Bold,
        FormattingKind::Italic,
        FormattingKind::Underline,
    ];

    /// Inline delimiter used in marked source text.
    pub fn marker(self) -> &'static str {
        match self {
            FormattingKind::Bold => "**",
            FormattingKind::Underline => "__",
            FormattingKind::Italic => "_",
        }
    }
}

/// Formatting applied to `[start, end)` of the clean text (char offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattingSpan {
    pub kind: FormattingKind,
    pub start: usize,
    pub end: usize,
}

impl FormattingSpan {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }
}

/// Source text after marker stripping, with the spans the markers described.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Document {
    pub marked: String,
    pub text: String,
    pub spans: Vec<FormattingSpan>,
}

impl Document {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    /// Char offset of the first character within the clean document.
    pub offset: usize,
    pub text: String,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchKind {
    /// Text differs inside the region both sides share.
    ContentMismatch,
    /// One side runs past the end of the other.
    LengthMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Char offset into the captured text.
    pub position: usize,
    pub expected: String,
    pub actual: String,
    pub context: String,
    pub kind: MismatchKind,
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "at {}: expected \"{}\", found \"{}\" ({})",
            self.position,
            preview(&self.expected),
            preview(&self.actual),
            self.context
        )
    }
}

fn preview(s: &str) -> String {
    const MAX: usize = 20;
    let escaped: String = s.chars().flat_map(char::escape_default).collect();
    if escaped.chars().count() > MAX {
        let head: String = escaped.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        escaped
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub match_percentage: f64,
    pub errors: Vec<ErrorRecord>,
    pub success: bool,
    /// False when the surface content could not be read at all.
    pub capture_available: bool,
}

impl VerificationResult {
    pub fn unavailable() -> Self {
        Self {
            match_percentage: 0.0,
            errors: Vec::new(),
            success: false,
            capture_available: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormattingMode {
    /// Type clean text, then select and toggle each span once verified.
    #[default]
    After,
    /// Toggle formatting shortcuts while typing.
    Inline,
    /// Type clean text only.
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub delay_ms: u64,
    pub jitter_ms: u64,
    pub verify_interval: usize,
    pub max_chunk_size: usize,
    pub strict: bool,
    /// Apply correction passes when verification finds mismatches.
    pub correct: bool,
    pub max_errors: usize,
    pub countdown_secs: u64,
    pub chunk_pause_ms: u64,
    pub progress_step: usize,
    pub normalize_paragraphs: bool,
    pub formatting: FormattingMode,
    pub seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            delay_ms: 20,
            jitter_ms: 5,
            verify_interval: 100,
            max_chunk_size: 500,
            strict: true,
            correct: true,
            max_errors: 20,
            countdown_secs: 0,
            chunk_pause_ms: 500,
            progress_step: 25,
            normalize_paragraphs: true,
            formatting: FormattingMode::After,
            seed: None,
        }
    }
}

impl SessionOptions {
    /// Minimum similarity (0-100) a verification must reach.
    pub fn success_threshold(&self) -> f64 {
        if self.strict {
            99.0
        } else {
            95.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "chunk", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Preprocessing,
    AwaitingFocus,
    Typing(usize),
    Verifying,
    Correcting,
    Formatting,
    Done,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Done | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Preprocessing => f.write_str("preprocessing"),
            SessionState::AwaitingFocus => f.write_str("awaiting focus"),
            SessionState::Typing(i) => write!(f, "typing chunk {}", i + 1),
            SessionState::Verifying => f.write_str("verifying"),
            SessionState::Correcting => f.write_str("correcting"),
            SessionState::Formatting => f.write_str("formatting"),
            SessionState::Done => f.write_str("done"),
            SessionState::Cancelled => f.write_str("cancelled"),
            SessionState::Failed => f.write_str("failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    Progress { typed: usize, total: usize },
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Verified,
    Partial,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub text: String,
    pub verification: Option<VerificationResult>,
    pub final_state: SessionState,
    pub outcome: Outcome,
    pub chunks_typed: usize,
    pub chunks_total: usize,
    pub dropped: Vec<crate::error::SynthesisError>,
    pub fallbacks: usize,
    pub refocus_count: usize,
    pub correction_passes: usize,
    pub formatting_applied: usize,
}

impl SessionReport {
    pub fn is_verified(&self) -> bool {
        self.outcome == Outcome::Verified
    }
}
