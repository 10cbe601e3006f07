use std::collections::BTreeSet;

use anyhow::{anyhow, Result};

use crate::cursor_nav;
use crate::device::Surface;
use crate::keyboard::{
    is_modifier, keystroke_to_char, KEY_A, KEY_B, KEY_BACKSPACE, KEY_C, KEY_DELETE, KEY_DOWN,
    KEY_END, KEY_HOME, KEY_I, KEY_LEFT, KEY_LEFTCTRL, KEY_LEFTSHIFT, KEY_RIGHT, KEY_RIGHTCTRL,
    KEY_RIGHTSHIFT, KEY_U, KEY_UP,
};
use crate::model::{FormattingKind, KeyState, Point};

#[derive(Debug, Default, Clone)]
struct SimEditorState {
    buf: Vec<char>,
    cursor: usize,
    anchor: Option<usize>,
}

impl SimEditorState {
    fn selection(&self) -> Option<(usize, usize)> {
        let anchor = self.anchor?;
        if anchor == self.cursor {
            return None;
        }
        Some((anchor.min(self.cursor), anchor.max(self.cursor)))
    }

    fn delete_selection(&mut self) -> bool {
        let Some((start, end)) = self.selection() else {
            self.anchor = None;
            return false;
        };
        self.buf.drain(start..end);
        self.cursor = start;
        self.anchor = None;
        true
    }

    fn insert_char(&mut self, c: char) {
        self.delete_selection();
        self.buf.insert(self.cursor, c);
        self.cursor += 1;
    }

    fn backspace(&mut self) {
        if self.delete_selection() || self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        self.buf.remove(self.cursor);
    }

    fn delete(&mut self) {
        if self.delete_selection() || self.cursor >= self.buf.len() {
            return;
        }
        self.buf.remove(self.cursor);
    }

    /// Move the caret, extending the selection when `extend` is set.
    fn move_to(&mut self, to: usize, extend: bool) {
        if extend {
            self.anchor.get_or_insert(self.cursor);
        } else {
            self.anchor = None;
        }
        self.cursor = to.min(self.buf.len());
    }

    fn select_all(&mut self) {
        self.anchor = Some(0);
        self.cursor = self.buf.len();
    }

    fn line_start(&self) -> usize {
        self.buf[..self.cursor]
            .iter()
            .rposition(|&c| c == '\n')
            .map(|nl| nl + 1)
            .unwrap_or(0)
    }

    fn line_end(&self) -> usize {
        self.buf[self.cursor..]
            .iter()
            .position(|&c| c == '\n')
            .map(|offset| self.cursor + offset)
            .unwrap_or(self.buf.len())
    }

    fn as_string(&self) -> String {
        self.buf.iter().collect()
    }
}

/// A formatting shortcut as the simulated editor received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatToggle {
    pub kind: FormattingKind,
    /// Selected range when the shortcut arrived, or the caret twice.
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default, Clone)]
struct Faults {
    rejected_keycodes: BTreeSet<u32>,
    literal_disabled: bool,
    typo_every: usize,
    typos_remaining: usize,
    eligible_typed: usize,
    empty_reads: usize,
    click_fails: bool,
    pointer_unavailable: bool,
    drift_after_presses: Option<(usize, Point)>,
}

/// In-memory editor implementing [`Surface`].
///
/// Models a caret, a shift-extended selection, word and paragraph jumps, a
/// clipboard and the Ctrl+A/C/B/I/U shortcuts on a US-QWERTY layout. It does not
/// model editor-specific behaviors such as auto-correction or smart quotes,
/// except for the typos it is told to inject.
#[derive(Debug, Default, Clone)]
pub struct SimSurface {
    editor: SimEditorState,
    held: BTreeSet<u32>,
    clipboard: Option<String>,
    pointer: Point,
    clicks: usize,
    presses: usize,
    toggles: Vec<FormatToggle>,
    key_log: Vec<(u32, KeyState)>,
    faults: Faults,
}

fn typo_for(c: char) -> Option<char> {
    match c {
        'a'..='y' | 'A'..='Y' | '0'..='8' => char::from_u32(c as u32 + 1),
        'z' => Some('a'),
        'Z' => Some('A'),
        '9' => Some('0'),
        _ => None,
    }
}

impl SimSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with existing content, caret at the end.
    pub fn with_text(text: &str) -> Self {
        let mut sim = Self::default();
        sim.editor.buf = text.chars().collect();
        sim.editor.cursor = sim.editor.buf.len();
        sim
    }

    /// Key presses for `keycode` fail.
    pub fn reject_keycode(mut self, keycode: u32) -> Self {
        self.faults.rejected_keycodes.insert(keycode);
        self
    }

    pub fn without_literal_entry(mut self) -> Self {
        self.faults.literal_disabled = true;
        self
    }

    /// Every `every`-th typed letter or digit lands as a neighbouring character,
    /// up to `limit` typos in total.
    pub fn with_typos(mut self, every: usize, limit: usize) -> Self {
        self.faults.typo_every = every;
        self.faults.typos_remaining = limit;
        self
    }

    /// The first `count` content reads come back empty.
    pub fn with_empty_reads(mut self, count: usize) -> Self {
        self.faults.empty_reads = count;
        self
    }

    pub fn with_failing_click(mut self) -> Self {
        self.faults.click_fails = true;
        self
    }

    pub fn without_pointer_position(mut self) -> Self {
        self.faults.pointer_unavailable = true;
        self
    }

    /// Move the pointer to `to` once `presses` key presses have been received.
    pub fn drift_pointer_after(mut self, presses: usize, to: Point) -> Self {
        self.faults.drift_after_presses = Some((presses, to));
        self
    }

    pub fn text(&self) -> String {
        self.editor.as_string()
    }

    pub fn cursor(&self) -> usize {
        self.editor.cursor
    }

    pub fn selection(&self) -> Option<(usize, usize)> {
        self.editor.selection()
    }

    /// Keys currently held down.
    pub fn held_keys(&self) -> Vec<u32> {
        self.held.iter().copied().collect()
    }

    pub fn clicks(&self) -> usize {
        self.clicks
    }

    pub fn pointer(&self) -> Point {
        self.pointer
    }

    pub fn toggles(&self) -> &[FormatToggle] {
        &self.toggles
    }

    pub fn key_log(&self) -> &[(u32, KeyState)] {
        &self.key_log
    }

    pub fn presses_of(&self, keycode: u32) -> usize {
        self.key_log
            .iter()
            .filter(|&&(k, state)| k == keycode && state == KeyState::Pressed)
            .count()
    }

    fn shift_down(&self) -> bool {
        self.held.contains(&KEY_LEFTSHIFT) || self.held.contains(&KEY_RIGHTSHIFT)
    }

    fn ctrl_down(&self) -> bool {
        self.held.contains(&KEY_LEFTCTRL) || self.held.contains(&KEY_RIGHTCTRL)
    }

    fn maybe_typo(&mut self, c: char) -> char {
        let faults = &mut self.faults;
        if faults.typo_every == 0 || faults.typos_remaining == 0 {
            return c;
        }
        let Some(typo) = typo_for(c) else {
            return c;
        };
        faults.eligible_typed += 1;
        if faults.eligible_typed % faults.typo_every == 0 {
            faults.typos_remaining -= 1;
            typo
        } else {
            c
        }
    }

    fn ctrl_shortcut(&mut self, keycode: u32, shift: bool) {
        let editor = &mut self.editor;
        match keycode {
            KEY_A => editor.select_all(),
            KEY_C => {
                if let Some((start, end)) = editor.selection() {
                    self.clipboard = Some(editor.buf[start..end].iter().collect());
                }
            }
            KEY_B | KEY_I | KEY_U => {
                let kind = match keycode {
                    KEY_B => FormattingKind::Bold,
                    KEY_I => FormattingKind::Italic,
                    _ => FormattingKind::Underline,
                };
                let (start, end) = editor
                    .selection()
                    .unwrap_or((editor.cursor, editor.cursor));
                self.toggles.push(FormatToggle { kind, start, end });
            }
            KEY_HOME => editor.move_to(0, shift),
            KEY_END => {
                let len = editor.buf.len();
                editor.move_to(len, shift);
            }
            KEY_LEFT => {
                let to = cursor_nav::word_left(&editor.buf, editor.cursor);
                editor.move_to(to, shift);
            }
            KEY_RIGHT => {
                let to = cursor_nav::word_right(&editor.buf, editor.cursor);
                editor.move_to(to, shift);
            }
            KEY_UP => {
                let to = cursor_nav::paragraph_up(&editor.buf, editor.cursor);
                editor.move_to(to, shift);
            }
            KEY_DOWN => {
                let to = cursor_nav::paragraph_down(&editor.buf, editor.cursor);
                editor.move_to(to, shift);
            }
            KEY_BACKSPACE => editor.backspace(),
            KEY_DELETE => editor.delete(),
            // Unknown shortcuts do nothing, as in most editors.
            _ => {}
        }
    }

    fn plain_key(&mut self, keycode: u32, shift: bool) -> Result<()> {
        let editor = &mut self.editor;
        match keycode {
            KEY_LEFT => {
                let to = match (shift, editor.selection()) {
                    (false, Some((start, _))) => start,
                    _ => editor.cursor.saturating_sub(1),
                };
                editor.move_to(to, shift);
            }
            KEY_RIGHT => {
                let to = match (shift, editor.selection()) {
                    (false, Some((_, end))) => end,
                    _ => editor.cursor + 1,
                };
                editor.move_to(to, shift);
            }
            KEY_HOME => {
                let to = editor.line_start();
                editor.move_to(to, shift);
            }
            KEY_END => {
                let to = editor.line_end();
                editor.move_to(to, shift);
            }
            KEY_UP | KEY_DOWN => {}
            KEY_BACKSPACE => editor.backspace(),
            KEY_DELETE => editor.delete(),
            _ => {
                let c = keystroke_to_char(keycode, shift).ok_or_else(|| {
                    anyhow!("simulated surface does not support keycode {keycode} (shift={shift})")
                })?;
                let c = self.maybe_typo(c);
                self.editor.insert_char(c);
            }
        }
        Ok(())
    }
}

impl Surface for SimSurface {
    fn key(&mut self, keycode: u32, state: KeyState) -> Result<()> {
        if state == KeyState::Released {
            self.held.remove(&keycode);
            self.key_log.push((keycode, state));
            return Ok(());
        }

        if self.faults.rejected_keycodes.contains(&keycode) {
            return Err(anyhow!("simulated failure posting keycode {keycode}"));
        }

        self.key_log.push((keycode, state));
        self.held.insert(keycode);
        self.presses += 1;
        if let Some((after, to)) = self.faults.drift_after_presses {
            if self.presses >= after {
                self.pointer = to;
                self.faults.drift_after_presses = None;
            }
        }

        if is_modifier(keycode) {
            return Ok(());
        }

        let shift = self.shift_down();
        if self.ctrl_down() {
            self.ctrl_shortcut(keycode, shift);
            Ok(())
        } else {
            self.plain_key(keycode, shift)
        }
    }

    fn type_literal(&mut self, c: char) -> Result<()> {
        if self.faults.literal_disabled {
            return Err(anyhow!("literal entry disabled"));
        }
        self.editor.insert_char(c);
        Ok(())
    }

    fn move_pointer(&mut self, to: Point) -> Result<()> {
        self.pointer = to;
        Ok(())
    }

    fn click(&mut self) -> Result<()> {
        if self.faults.click_fails {
            return Err(anyhow!("simulated click failure"));
        }
        self.clicks += 1;
        self.editor.anchor = None;
        Ok(())
    }

    fn pointer_position(&mut self) -> Result<Point> {
        if self.faults.pointer_unavailable {
            return Err(anyhow!("pointer position unavailable"));
        }
        Ok(self.pointer)
    }

    fn read_content(&mut self) -> Result<Option<String>> {
        if self.faults.empty_reads > 0 {
            self.faults.empty_reads -= 1;
            return Ok(None);
        }
        Ok(self.clipboard.clone().filter(|text| !text.is_empty()))
    }

    fn clear_content(&mut self) -> Result<()> {
        self.clipboard = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyboard::KEY_H;
    use pretty_assertions::assert_eq;

    fn tap(sim: &mut SimSurface, keycode: u32) {
        sim.key(keycode, KeyState::Pressed).unwrap();
        sim.key(keycode, KeyState::Released).unwrap();
    }

    fn ctrl(sim: &mut SimSurface, keycode: u32) {
        sim.key(KEY_LEFTCTRL, KeyState::Pressed).unwrap();
        tap(sim, keycode);
        sim.key(KEY_LEFTCTRL, KeyState::Released).unwrap();
    }

    #[test]
    fn shift_selection_then_delete_removes_range() {
        let mut sim = SimSurface::with_text("hello world");
        ctrl(&mut sim, KEY_HOME);
        sim.key(KEY_LEFTSHIFT, KeyState::Pressed).unwrap();
        for _ in 0..6 {
            tap(&mut sim, KEY_RIGHT);
        }
        sim.key(KEY_LEFTSHIFT, KeyState::Released).unwrap();
        assert_eq!(sim.selection(), Some((0, 6)));

        tap(&mut sim, KEY_DELETE);
        assert_eq!(sim.text(), "world");
        assert_eq!(sim.cursor(), 0);
    }

    #[test]
    fn select_all_copy_fills_clipboard() {
        let mut sim = SimSurface::with_text("abc\ndef");
        ctrl(&mut sim, KEY_A);
        ctrl(&mut sim, KEY_C);
        assert_eq!(sim.read_content().unwrap().as_deref(), Some("abc\ndef"));

        sim.clear_content().unwrap();
        assert_eq!(sim.read_content().unwrap(), None);
    }

    #[test]
    fn typing_replaces_selection() {
        let mut sim = SimSurface::with_text("abc");
        ctrl(&mut sim, KEY_A);
        tap(&mut sim, KEY_H);
        assert_eq!(sim.text(), "h");
    }

    #[test]
    fn ctrl_arrows_follow_cursor_nav() {
        let mut sim = SimSurface::with_text("one two\nthree");
        ctrl(&mut sim, KEY_HOME);
        ctrl(&mut sim, KEY_RIGHT);
        assert_eq!(sim.cursor(), 3);
        ctrl(&mut sim, KEY_DOWN);
        assert_eq!(sim.cursor(), 8);
        ctrl(&mut sim, KEY_END);
        assert_eq!(sim.cursor(), 13);
    }

    #[test]
    fn injected_typos_respect_limit() {
        let mut sim = SimSurface::new().with_typos(2, 1);
        for _ in 0..4 {
            tap(&mut sim, KEY_A);
        }
        assert_eq!(sim.text(), "abaa");
    }

    #[test]
    fn rejected_key_reports_error_and_is_not_held() {
        let mut sim = SimSurface::new().reject_keycode(KEY_H);
        assert!(sim.key(KEY_H, KeyState::Pressed).is_err());
        assert!(sim.held_keys().is_empty());
    }

    #[test]
    fn formatting_shortcut_records_selection() {
        let mut sim = SimSurface::with_text("bold");
        ctrl(&mut sim, KEY_A);
        ctrl(&mut sim, KEY_B);
        assert_eq!(
            sim.toggles(),
            &[FormatToggle {
                kind: FormattingKind::Bold,
                start: 0,
                end: 4
            }]
        );
    }
}
