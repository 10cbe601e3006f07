use anyhow::Result;
use tracing::{debug, warn};

use crate::device::Surface;
use crate::error::SynthesisError;
use crate::keyboard::{
    char_to_keystroke, KeyStroke, KEY_B, KEY_END, KEY_HOME, KEY_I, KEY_LEFTCTRL, KEY_LEFTSHIFT,
    KEY_RIGHT, KEY_U,
};
use crate::markup::parse_formatting;
use crate::model::{FormattingKind, FormattingSpan, KeyState};
use crate::pacing::Pacer;

pub const FORMAT_SETTLE_MS: u64 = 100;
pub const NAV_BATCH: usize = 20;
const NAV_BATCH_PAUSE_MS: u64 = 50;

fn shortcut_key(kind: FormattingKind) -> u32 {
    match kind {
        FormattingKind::Bold => KEY_B,
        FormattingKind::Italic => KEY_I,
        FormattingKind::Underline => KEY_U,
    }
}

/// Formatting kinds covering `pos`, in canonical order.
pub fn kinds_at(spans: &[FormattingSpan], pos: usize) -> Vec<FormattingKind> {
    FormattingKind::ALL
        .into_iter()
        .filter(|&kind| spans.iter().any(|s| s.kind == kind && s.contains(pos)))
        .collect()
}

/// Turns characters, shortcuts and caret movement into paced key events on a
/// [`Surface`].
pub struct Synthesizer<S: Surface> {
    surface: S,
    pacer: Pacer,
    delay_ms: u64,
    jitter_ms: u64,
    formatting_on: Vec<FormattingKind>,
    fallbacks: usize,
    dropped: Vec<SynthesisError>,
}

impl<S: Surface> Synthesizer<S> {
    pub fn new(surface: S, pacer: Pacer, delay_ms: u64, jitter_ms: u64) -> Self {
        Self {
            surface,
            pacer,
            delay_ms,
            jitter_ms,
            formatting_on: Vec::new(),
            fallbacks: 0,
            dropped: Vec::new(),
        }
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    pub fn pacer_mut(&mut self) -> &mut Pacer {
        &mut self.pacer
    }

    pub fn pause(&mut self, ms: u64) {
        self.pacer.pause(ms);
    }

    /// Characters that went through the literal-entry fallback.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }

    pub fn dropped(&self) -> &[SynthesisError] {
        &self.dropped
    }

    /// Clear the fallback and dropped-char tallies.
    pub fn reset_counters(&mut self) {
        self.fallbacks = 0;
        self.dropped.clear();
    }

    /// Press and release `keycode`. The release is attempted even when the press
    /// fails.
    pub fn tap(&mut self, keycode: u32) -> Result<()> {
        let pressed = self.surface.key(keycode, KeyState::Pressed);
        let released = self.surface.key(keycode, KeyState::Released);
        pressed.and(released)
    }

    /// Hold `modifiers`, tap `keycode`, release the modifiers in reverse order.
    /// Every modifier that was pressed is released, whatever fails in between.
    pub fn chord(&mut self, modifiers: &[u32], keycode: u32) -> Result<()> {
        let mut held = Vec::with_capacity(modifiers.len());
        let mut result = Ok(());

        for &modifier in modifiers {
            match self.surface.key(modifier, KeyState::Pressed) {
                Ok(()) => held.push(modifier),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if result.is_ok() {
            result = self.tap(keycode);
        }
        for &modifier in held.iter().rev() {
            let released = self.surface.key(modifier, KeyState::Released);
            if result.is_ok() {
                result = released;
            }
        }
        result
    }

    pub fn shortcut(&mut self, keycode: u32) -> Result<()> {
        self.chord(&[KEY_LEFTCTRL], keycode)
    }

    fn press_stroke(&mut self, stroke: KeyStroke) -> Result<()> {
        if stroke.shift {
            self.chord(&[KEY_LEFTSHIFT], stroke.keycode)
        } else {
            self.tap(stroke.keycode)
        }
    }

    /// Type one character, falling back to literal entry when it has no key or its
    /// key fails. Returns false when the character had to be dropped.
    pub fn type_char(&mut self, c: char) -> bool {
        let delivered = match char_to_keystroke(c) {
            Some(stroke) => match self.press_stroke(stroke) {
                Ok(()) => true,
                Err(err) => {
                    debug!("key for {c:?} failed ({err:#}); trying literal entry");
                    self.type_literal(c)
                }
            },
            None => self.type_literal(c),
        };
        self.pacer.keystroke_pause(self.delay_ms, self.jitter_ms);
        delivered
    }

    fn type_literal(&mut self, c: char) -> bool {
        match self.surface.type_literal(c) {
            Ok(()) => {
                self.fallbacks += 1;
                true
            }
            Err(err) => {
                let dropped = SynthesisError {
                    ch: c,
                    reason: format!("{err:#}"),
                };
                warn!("{dropped}");
                self.dropped.push(dropped);
                false
            }
        }
    }

    pub fn type_text(&mut self, text: &str) {
        for c in text.chars() {
            self.type_char(c);
        }
    }

    /// Ctrl+B / Ctrl+I / Ctrl+U, then a short settle delay.
    pub fn toggle_formatting(&mut self, kind: FormattingKind) -> Result<()> {
        let result = self.shortcut(shortcut_key(kind));
        self.pacer.pause(FORMAT_SETTLE_MS);
        result
    }

    /// Toggle shortcuts until exactly `desired` is active for the next character.
    pub fn sync_formatting(&mut self, desired: &[FormattingKind]) {
        for kind in FormattingKind::ALL {
            let on = self.formatting_on.contains(&kind);
            if on == desired.contains(&kind) {
                continue;
            }
            if let Err(err) = self.toggle_formatting(kind) {
                warn!("failed to toggle {kind:?}: {err:#}");
                continue;
            }
            if on {
                self.formatting_on.retain(|&k| k != kind);
            } else {
                self.formatting_on.push(kind);
            }
        }
    }

    /// Type `text` whose first character sits at `offset` in span coordinates,
    /// bracketing span contents with formatting toggles. All formatting is off
    /// again when this returns.
    pub fn type_spans(&mut self, text: &str, spans: &[FormattingSpan], offset: usize) {
        for (idx, c) in text.chars().enumerate() {
            self.sync_formatting(&kinds_at(spans, offset + idx));
            self.type_char(c);
        }
        self.sync_formatting(&[]);
    }

    /// Parse markers out of `marked` and type the clean text with formatting.
    pub fn type_with_formatting(&mut self, marked: &str) {
        let (clean, spans) = parse_formatting(marked);
        self.type_spans(&clean, &spans, 0);
    }

    /// Tap `keycode` (with `modifiers` held) `count` times, in batches of
    /// [`NAV_BATCH`] with a short pause between batches.
    pub fn repeat(
        &mut self,
        modifiers: &[u32],
        keycode: u32,
        count: usize,
        key_pause_ms: u64,
    ) -> Result<()> {
        for done in 0..count {
            if done > 0 && done % NAV_BATCH == 0 {
                self.pacer.pause(NAV_BATCH_PAUSE_MS);
            }
            self.chord(modifiers, keycode)?;
            self.pacer.pause(key_pause_ms);
        }
        Ok(())
    }

    /// Extend a selection `count` characters to the right of the caret.
    pub fn select_right(&mut self, count: usize, key_pause_ms: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.surface.key(KEY_LEFTSHIFT, KeyState::Pressed)?;
        let result = self.repeat(&[], KEY_RIGHT, count, key_pause_ms);
        let released = self.surface.key(KEY_LEFTSHIFT, KeyState::Released);
        result.and(released)
    }

    pub fn document_start(&mut self) -> Result<()> {
        self.shortcut(KEY_HOME)
    }

    pub fn document_end(&mut self) -> Result<()> {
        self.shortcut(KEY_END)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::KEY_H;
    use crate::sim::SimSurface;
    use pretty_assertions::assert_eq;

    fn synth(sim: SimSurface) -> Synthesizer<SimSurface> {
        Synthesizer::new(sim, Pacer::instant(3), 20, 5)
    }

    #[test]
    fn types_mixed_case_and_control_chars() {
        let mut s = synth(SimSurface::new());
        s.type_text("Hello, World!\n\tok");
        assert_eq!(s.surface().text(), "Hello, World!\n\tok");
        assert!(s.surface().held_keys().is_empty());
        assert!(s.dropped().is_empty());
    }

    #[test]
    fn each_keystroke_is_paced_within_jitter_band() {
        let mut s = synth(SimSurface::new());
        s.type_text("abcd");
        let elapsed = s.pacer_mut().elapsed_ms();
        assert!((60..=100).contains(&elapsed), "{elapsed}");
    }

    #[test]
    fn unmapped_char_uses_literal_fallback() {
        let mut s = synth(SimSurface::new());
        s.type_text("café");
        assert_eq!(s.surface().text(), "café");
        assert_eq!(s.fallbacks(), 1);
    }

    #[test]
    fn char_is_dropped_when_fallback_also_fails() {
        let mut s = synth(SimSurface::new().without_literal_entry());
        s.type_text("naïve");
        assert_eq!(s.surface().text(), "nave");
        assert_eq!(
            s.dropped(),
            &[SynthesisError {
                ch: 'ï',
                reason: "literal entry disabled".to_string()
            }]
        );
    }

    #[test]
    fn failed_key_falls_back_and_leaves_nothing_held() {
        let mut s = synth(SimSurface::new().reject_keycode(KEY_H));
        s.type_text("Hh");
        assert_eq!(s.surface().text(), "Hh");
        assert_eq!(s.fallbacks(), 2);
        assert!(s.surface().held_keys().is_empty());
    }

    #[test]
    fn formatting_toggles_bracket_span_contents() {
        let mut s = synth(SimSurface::new());
        s.type_with_formatting("a **bc** d");
        assert_eq!(s.surface().text(), "a bc d");

        let toggles: Vec<(FormattingKind, usize)> = s
            .surface()
            .toggles()
            .iter()
            .map(|t| (t.kind, t.start))
            .collect();
        assert_eq!(
            toggles,
            vec![(FormattingKind::Bold, 2), (FormattingKind::Bold, 4)]
        );
    }

    #[test]
    fn formatting_is_closed_at_text_end() {
        let mut s = synth(SimSurface::new());
        s.type_with_formatting("_tail_");
        assert_eq!(s.surface().toggles().len(), 2);
    }

    #[test]
    fn select_right_releases_shift() {
        let mut s = synth(SimSurface::with_text("abcdef"));
        s.document_start().unwrap();
        s.select_right(3, 0).unwrap();
        assert_eq!(s.surface().selection(), Some((0, 3)));
        assert!(s.surface().held_keys().is_empty());
    }
}
