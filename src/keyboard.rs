#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStroke {
    pub keycode: u32,
    pub shift: bool,
}

impl KeyStroke {
    const fn plain(keycode: u32) -> Self {
        Self {
            keycode,
            shift: false,
        }
    }

    const fn shifted(keycode: u32) -> Self {
        Self {
            keycode,
            shift: true,
        }
    }
}

// Linux evdev keycodes (see linux/input-event-codes.h)
pub const KEY_1: u32 = 2;
pub const KEY_2: u32 = 3;
pub const KEY_3: u32 = 4;
pub const KEY_4: u32 = 5;
pub const KEY_5: u32 = 6;
pub const KEY_6: u32 = 7;
pub const KEY_7: u32 = 8;
pub const KEY_8: u32 = 9;
pub const KEY_9: u32 = 10;
pub const KEY_0: u32 = 11;

pub const KEY_MINUS: u32 = 12;
pub const KEY_EQUAL: u32 = 13;
pub const KEY_BACKSPACE: u32 = 14;
pub const KEY_TAB: u32 = 15;

pub const KEY_Q: u32 = 16;
pub const KEY_W: u32 = 17;
pub const KEY_E: u32 = 18;
pub const KEY_R: u32 = 19;
pub const KEY_T: u32 = 20;
pub const KEY_Y: u32 = 21;
pub const KEY_U: u32 = 22;
pub const KEY_I: u32 = 23;
pub const KEY_O: u32 = 24;
pub const KEY_P: u32 = 25;

pub const KEY_LEFTBRACE: u32 = 26;
pub const KEY_RIGHTBRACE: u32 = 27;
pub const KEY_ENTER: u32 = 28;

pub const KEY_LEFTCTRL: u32 = 29;

pub const KEY_A: u32 = 30;
pub const KEY_S: u32 = 31;
pub const KEY_D: u32 = 32;
pub const KEY_F: u32 = 33;
pub const KEY_G: u32 = 34;
pub const KEY_H: u32 = 35;
pub const KEY_J: u32 = 36;
pub const KEY_K: u32 = 37;
pub const KEY_L: u32 = 38;

pub const KEY_SEMICOLON: u32 = 39;
pub const KEY_APOSTROPHE: u32 = 40;
pub const KEY_GRAVE: u32 = 41;

pub const KEY_LEFTSHIFT: u32 = 42;

pub const KEY_BACKSLASH: u32 = 43;

pub const KEY_Z: u32 = 44;
pub const KEY_X: u32 = 45;
pub const KEY_C: u32 = 46;
pub const KEY_V: u32 = 47;
pub const KEY_B: u32 = 48;
pub const KEY_N: u32 = 49;
pub const KEY_M: u32 = 50;

pub const KEY_COMMA: u32 = 51;
pub const KEY_DOT: u32 = 52;
pub const KEY_SLASH: u32 = 53;

pub const KEY_RIGHTSHIFT: u32 = 54;

pub const KEY_LEFTALT: u32 = 56;
pub const KEY_SPACE: u32 = 57;

pub const KEY_RIGHTCTRL: u32 = 97;
pub const KEY_RIGHTALT: u32 = 100;

pub const KEY_HOME: u32 = 102;
pub const KEY_UP: u32 = 103;
pub const KEY_LEFT: u32 = 105;
pub const KEY_RIGHT: u32 = 106;
pub const KEY_END: u32 = 107;
pub const KEY_DOWN: u32 = 108;
pub const KEY_DELETE: u32 = 111;

// Modifiers we release on backend open/close so a run never starts or ends with one held.
pub const COMMON_MODIFIER_KEYCODES: [u32; 6] = [
    KEY_LEFTSHIFT,
    KEY_RIGHTSHIFT,
    KEY_LEFTCTRL,
    KEY_RIGHTCTRL,
    KEY_LEFTALT,
    KEY_RIGHTALT,
];

pub fn is_modifier(keycode: u32) -> bool {
    COMMON_MODIFIER_KEYCODES.contains(&keycode)
}

const LETTER_KEYCODES: [u32; 26] = [
    KEY_A, KEY_B, KEY_C, KEY_D, KEY_E, KEY_F, KEY_G, KEY_H, KEY_I, KEY_J, KEY_K, KEY_L, KEY_M,
    KEY_N, KEY_O, KEY_P, KEY_Q, KEY_R, KEY_S, KEY_T, KEY_U, KEY_V, KEY_W, KEY_X, KEY_Y, KEY_Z,
];

// Digit and punctuation keys: (keycode, unshifted, shifted).
const SYMBOL_KEYS: [(u32, char, char); 21] = [
    (KEY_1, '1', '!'),
    (KEY_2, '2', '@'),
    (KEY_3, '3', '#'),
    (KEY_4, '4', '$'),
    (KEY_5, '5', '%'),
    (KEY_6, '6', '^'),
    (KEY_7, '7', '&'),
    (KEY_8, '8', '*'),
    (KEY_9, '9', '('),
    (KEY_0, '0', ')'),
    (KEY_MINUS, '-', '_'),
    (KEY_EQUAL, '=', '+'),
    (KEY_LEFTBRACE, '[', '{'),
    (KEY_RIGHTBRACE, ']', '}'),
    (KEY_BACKSLASH, '\\', '|'),
    (KEY_SEMICOLON, ';', ':'),
    (KEY_APOSTROPHE, '\'', '"'),
    (KEY_GRAVE, '`', '~'),
    (KEY_COMMA, ',', '<'),
    (KEY_DOT, '.', '>'),
    (KEY_SLASH, '/', '?'),
];

/// US-QWERTY keystroke producing `c`, or `None` when the character has no key
/// (anything outside printable ASCII, newline, tab and space).
pub fn char_to_keystroke(c: char) -> Option<KeyStroke> {
    match c {
        '\n' => return Some(KeyStroke::plain(KEY_ENTER)),
        '\t' => return Some(KeyStroke::plain(KEY_TAB)),
        ' ' => return Some(KeyStroke::plain(KEY_SPACE)),
        _ => {}
    }

    if c.is_ascii_lowercase() {
        let idx = (c as u8 - b'a') as usize;
        return Some(KeyStroke::plain(LETTER_KEYCODES[idx]));
    }
    if c.is_ascii_uppercase() {
        let idx = (c as u8 - b'A') as usize;
        return Some(KeyStroke::shifted(LETTER_KEYCODES[idx]));
    }

    SYMBOL_KEYS.iter().find_map(|&(keycode, plain, shifted)| {
        if c == plain {
            Some(KeyStroke::plain(keycode))
        } else if c == shifted {
            Some(KeyStroke::shifted(keycode))
        } else {
            None
        }
    })
}

/// Reverse lookup used by the simulated surface.
pub fn keystroke_to_char(keycode: u32, shift: bool) -> Option<char> {
    match keycode {
        KEY_ENTER => return Some('\n'),
        KEY_TAB => return Some('\t'),
        KEY_SPACE => return Some(' '),
        _ => {}
    }

    if let Some(idx) = LETTER_KEYCODES.iter().position(|&k| k == keycode) {
        let c = (b'a' + idx as u8) as char;
        return Some(if shift { c.to_ascii_uppercase() } else { c });
    }

    SYMBOL_KEYS
        .iter()
        .find(|(k, _, _)| *k == keycode)
        .map(|&(_, plain, shifted)| if shift { shifted } else { plain })
}

pub fn find_first_unmapped_char(text: &str) -> Option<(usize, char)> {
    text.chars()
        .enumerate()
        .find(|&(_idx, c)| char_to_keystroke(c).is_none())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_printable_ascii_char_round_trips() {
        for b in 32u8..=126u8 {
            let c = b as char;
            let stroke = char_to_keystroke(c).unwrap_or_else(|| panic!("no stroke for {c:?}"));
            assert_eq!(keystroke_to_char(stroke.keycode, stroke.shift), Some(c));
        }
    }

    #[test]
    fn control_chars_use_dedicated_keys() {
        assert_eq!(char_to_keystroke('\n'), Some(KeyStroke::plain(KEY_ENTER)));
        assert_eq!(char_to_keystroke('\t'), Some(KeyStroke::plain(KEY_TAB)));
        assert_eq!(char_to_keystroke(' '), Some(KeyStroke::plain(KEY_SPACE)));
        assert_eq!(char_to_keystroke('\r'), None);
    }

    #[test]
    fn non_ascii_has_no_keystroke() {
        assert_eq!(char_to_keystroke('é'), None);
        assert_eq!(find_first_unmapped_char("caf\u{e9} ok"), Some((3, 'é')));
    }

    #[test]
    fn common_modifier_list_contains_expected_keys() {
        assert!(is_modifier(KEY_LEFTSHIFT));
        assert!(is_modifier(KEY_RIGHTCTRL));
        assert!(is_modifier(KEY_RIGHTALT));
        assert!(!is_modifier(KEY_A));
    }
}
