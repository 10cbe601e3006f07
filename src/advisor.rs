use serde::Serialize;

/// One suggestion from a text reviewer, relative to the reviewed snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advice {
    pub message: String,
    pub offset: usize,
    pub length: usize,
    pub replacements: Vec<String>,
}

/// Reviews recently typed text (a grammar checker, a spell checker, ...).
///
/// Advice is informational: the session reports it but never edits on its basis.
pub trait TextAdvisor {
    fn review(&mut self, text: &str) -> Vec<Advice>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAdvisor;

impl TextAdvisor for NoopAdvisor {
    fn review(&mut self, _text: &str) -> Vec<Advice> {
        Vec::new()
    }
}

impl<F> TextAdvisor for F
where
    F: FnMut(&str) -> Vec<Advice>,
{
    fn review(&mut self, text: &str) -> Vec<Advice> {
        self(text)
    }
}

/// Sentences shorter than this are not worth reviewing.
pub const MIN_SENTENCE_CHARS: usize = 10;

/// The last complete or trailing sentence of `text`, trimmed, if it is longer
/// than [`MIN_SENTENCE_CHARS`].
pub fn last_sentence(text: &str) -> Option<&str> {
    let trimmed = text.trim_end();
    let body = trimmed.trim_end_matches(&['.', '!', '?'][..]);
    let start = body
        .rfind(&['.', '!', '?', '\n'][..])
        .map(|idx| idx + 1)
        .unwrap_or(0);
    let sentence = trimmed[start..].trim_start();
    (sentence.chars().count() > MIN_SENTENCE_CHARS).then_some(sentence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_trailing_sentence() {
        assert_eq!(
            last_sentence("First one. The second sentence is here. "),
            Some("The second sentence is here.")
        );
        assert_eq!(
            last_sentence("Line one\nand an unfinished clause"),
            Some("and an unfinished clause")
        );
    }

    #[test]
    fn short_sentences_are_skipped() {
        assert_eq!(last_sentence("Long enough sentence. Short."), None);
        assert_eq!(last_sentence(""), None);
    }

    #[test]
    fn closures_are_advisors() {
        let mut advisor = |text: &str| {
            vec![Advice {
                message: format!("checked {} chars", text.len()),
                offset: 0,
                length: 0,
                replacements: Vec::new(),
            }]
        };
        assert_eq!(advisor.review("abc")[0].message, "checked 3 chars");
        assert!(NoopAdvisor.review("abc").is_empty());
    }
}
