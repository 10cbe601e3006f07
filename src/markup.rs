//! Inline formatting markers, paragraph spacing and chunking.
//!
//! Markers are `**bold**`, `__underline__` and `_italic_`. Offsets handed out by
//! this module are char offsets into the clean (marker-free) text.

use crate::model::{Chunk, Document, FormattingKind, FormattingSpan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Text(char),
    Open { kind: FormattingKind, paired: bool },
    Close { kind: FormattingKind },
}

fn kind_slot(kind: FormattingKind) -> usize {
    match kind {
        FormattingKind::Bold => 0,
        FormattingKind::Italic => 1,
        FormattingKind::Underline => 2,
    }
}

// Longest marker first: "**" and "__" win over "_".
const MARKER_PRECEDENCE: [FormattingKind; 3] = [
    FormattingKind::Bold,
    FormattingKind::Underline,
    FormattingKind::Italic,
];

fn marker_at(chars: &[char], idx: usize) -> Option<FormattingKind> {
    MARKER_PRECEDENCE.into_iter().find(|kind| {
        let marker = kind.marker();
        let len = marker.len();
        idx + len <= chars.len() && marker.chars().zip(&chars[idx..idx + len]).all(|(a, &b)| a == b)
    })
}

fn tokenize(chars: &[char]) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(chars.len());
    let mut open: [Option<usize>; 3] = [None; 3];

    let mut idx = 0;
    while idx < chars.len() {
        let Some(kind) = marker_at(chars, idx) else {
            tokens.push(Token::Text(chars[idx]));
            idx += 1;
            continue;
        };

        let slot = kind_slot(kind);
        match open[slot].take() {
            Some(opener) => {
                tokens[opener] = Token::Open { kind, paired: true };
                tokens.push(Token::Close { kind });
            }
            None => {
                open[slot] = Some(tokens.len());
                tokens.push(Token::Open {
                    kind,
                    paired: false,
                });
            }
        }
        idx += kind.marker().len();
    }
    tokens
}

/// Split marked text into clean text and the spans its markers describe.
///
/// Spans come back in the order their opening markers appear. An opener with no
/// closer stays in the clean text as literal characters.
pub fn parse_formatting(text: &str) -> (String, Vec<FormattingSpan>) {
    let chars: Vec<char> = text.chars().collect();
    let tokens = tokenize(&chars);

    let mut clean = String::with_capacity(text.len());
    let mut spans: Vec<FormattingSpan> = Vec::new();
    let mut active: [Option<usize>; 3] = [None; 3];
    let mut offset = 0usize;

    for token in tokens {
        match token {
            Token::Text(c) => {
                clean.push(c);
                offset += 1;
            }
            Token::Open {
                kind,
                paired: false,
            } => {
                clean.push_str(kind.marker());
                offset += kind.marker().chars().count();
            }
            Token::Open { kind, paired: true } => {
                active[kind_slot(kind)] = Some(spans.len());
                spans.push(FormattingSpan {
                    kind,
                    start: offset,
                    end: offset,
                });
            }
            Token::Close { kind } => {
                if let Some(span_idx) = active[kind_slot(kind)].take() {
                    spans[span_idx].end = offset;
                }
            }
        }
    }

    (clean, spans)
}

pub fn strip_markers(text: &str) -> String {
    parse_formatting(text).0
}

/// Re-insert marker delimiters for `spans` into `clean`.
///
/// At a shared offset, spans ending there close first (latest-opened first), then
/// spans starting there open in list order.
pub fn restore_markers(clean: &str, spans: &[FormattingSpan]) -> String {
    let chars: Vec<char> = clean.chars().collect();
    let mut out = String::with_capacity(clean.len() + spans.len() * 4);

    for offset in 0..=chars.len() {
        for span in spans
            .iter()
            .rev()
            .filter(|s| !s.is_empty() && s.end == offset)
        {
            out.push_str(span.kind.marker());
        }
        for span in spans.iter().filter(|s| s.start == offset) {
            out.push_str(span.kind.marker());
            if span.is_empty() {
                out.push_str(span.kind.marker());
            }
        }
        if let Some(&c) = chars.get(offset) {
            out.push(c);
        }
    }
    out
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Turn single line breaks between two non-blank lines into paragraph breaks.
pub fn normalize_paragraphs(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = String::with_capacity(text.len() + lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
            if !is_blank(lines[idx - 1]) && !is_blank(line) {
                out.push('\n');
            }
        }
        out.push_str(line);
    }
    out
}

/// Pieces a paragraph can be cut into: whole runs of non-whitespace, and single
/// whitespace characters.
fn split_units(paragraph: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut word_start: Option<usize> = None;

    for (byte_idx, c) in paragraph.char_indices() {
        if c.is_whitespace() {
            if let Some(start) = word_start.take() {
                units.push(&paragraph[start..byte_idx]);
            }
            units.push(&paragraph[byte_idx..byte_idx + c.len_utf8()]);
        } else if word_start.is_none() {
            word_start = Some(byte_idx);
        }
    }
    if let Some(start) = word_start {
        units.push(&paragraph[start..]);
    }
    units
}

/// Greedily pack newline-terminated paragraphs into chunks of at most `max_size`
/// chars. Oversized paragraphs are cut at whitespace; a single token longer than
/// `max_size` becomes its own chunk.
pub fn chunk(text: &str, max_size: usize) -> Vec<Chunk> {
    let max_size = max_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    let mut offset = 0usize;

    let mut push_unit = |unit: &str, chunks: &mut Vec<Chunk>| {
        let unit_len = unit.chars().count();
        if current_len > 0 && current_len + unit_len > max_size {
            chunks.push(Chunk {
                index: chunks.len(),
                offset,
                text: std::mem::take(&mut current),
            });
            offset += current_len;
            current_len = 0;
        }
        current.push_str(unit);
        current_len += unit_len;
    };

    for paragraph in text.split_inclusive('\n') {
        if paragraph.chars().count() <= max_size {
            push_unit(paragraph, &mut chunks);
        } else {
            for unit in split_units(paragraph) {
                push_unit(unit, &mut chunks);
            }
        }
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            index: chunks.len(),
            offset,
            text: current,
        });
    }
    chunks
}

/// `\r\n` and lone `\r` become `\n`; captures come back with `\n` only.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Normalize (optionally) and parse raw input into a [`Document`].
///
/// Line endings are always unified before anything else.
pub fn preprocess(input: &str, normalize: bool) -> Document {
    let unified = normalize_line_endings(input);
    let marked = if normalize {
        normalize_paragraphs(&unified)
    } else {
        unified
    };
    let (text, spans) = parse_formatting(&marked);
    Document {
        marked,
        text,
        spans,
    }
}
