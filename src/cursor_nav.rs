//! Where Ctrl+Arrow keys put the caret.
//!
//! The correction planner uses these to predict jump landings on its model of the
//! surface text; the simulated surface uses the same functions to execute them, so
//! both sides agree by construction. Real editors disagree at punctuation, which is
//! why the planner only trusts word jumps across [`plain_jump_is_safe`] spans.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Word,
    Whitespace,
    Punctuation,
}

pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '\''
}

fn classify(c: char) -> CharClass {
    if c.is_whitespace() {
        CharClass::Whitespace
    } else if is_word_char(c) {
        CharClass::Word
    } else {
        CharClass::Punctuation
    }
}

/// Ctrl+Left: skip whitespace to the left, then the run of same-class characters,
/// stopping at the beginning of that run.
pub fn word_left(buf: &[char], cursor: usize) -> usize {
    let mut idx = cursor.min(buf.len());

    while idx > 0 && classify(buf[idx - 1]) == CharClass::Whitespace {
        idx -= 1;
    }
    if idx == 0 {
        return 0;
    }

    let class = classify(buf[idx - 1]);
    while idx > 0 && classify(buf[idx - 1]) == class {
        idx -= 1;
    }
    idx
}

/// Ctrl+Right: from inside a word/punctuation run, move to the end of that run;
/// from whitespace, move to the start of the next run.
pub fn word_right(buf: &[char], cursor: usize) -> usize {
    let mut idx = cursor.min(buf.len());
    if idx >= buf.len() {
        return buf.len();
    }

    let started_in_whitespace = classify(buf[idx]) == CharClass::Whitespace;
    while idx < buf.len() && classify(buf[idx]) == CharClass::Whitespace {
        idx += 1;
    }
    if idx >= buf.len() || started_in_whitespace {
        return idx;
    }

    let class = classify(buf[idx]);
    while idx < buf.len() && classify(buf[idx]) == class {
        idx += 1;
    }
    idx
}

/// Ctrl+Down: start of the next paragraph (the character after the next newline),
/// or the end of the buffer.
pub fn paragraph_down(buf: &[char], cursor: usize) -> usize {
    let idx = cursor.min(buf.len());
    buf[idx..]
        .iter()
        .position(|&c| c == '\n')
        .map(|offset| idx + offset + 1)
        .unwrap_or(buf.len())
}

/// Ctrl+Up: start of the current paragraph, or of the previous one when already
/// at a paragraph start.
pub fn paragraph_up(buf: &[char], cursor: usize) -> usize {
    let idx = cursor.min(buf.len());
    if idx == 0 {
        return 0;
    }
    let search_end = if buf[idx - 1] == '\n' { idx - 1 } else { idx };
    buf[..search_end]
        .iter()
        .rposition(|&c| c == '\n')
        .map(|nl| nl + 1)
        .unwrap_or(0)
}

/// A word jump between `from` and `to` is only trusted when the traversed span and
/// the characters touching both endpoints are ASCII letters, digits or spaces.
pub fn plain_jump_is_safe(buf: &[char], from: usize, to: usize) -> bool {
    let len = buf.len();
    let (start, end) = (from.min(to).min(len), from.max(to).min(len));
    if start == end {
        return true;
    }

    let plain = |c: &char| c.is_ascii_alphanumeric() || *c == ' ';
    let before_ok = start == 0 || plain(&buf[start - 1]);
    let after_ok = end == len || plain(&buf[end]);
    before_ok && after_ok && buf[start..end].iter().all(plain)
}
