use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::protocol::{xproto, xtest};
use x11rb::rust_connection::RustConnection;

use crate::keyboard::COMMON_MODIFIER_KEYCODES;
use crate::model::{KeyState, Point};

const LEFT_BUTTON: u8 = 1;

fn evdev_to_x11_keycode(evdev_keycode: u32) -> Result<u8> {
    // On most Linux Xorg setups, X11 keycodes are evdev + 8.
    let x11 = evdev_keycode
        .checked_add(8)
        .ok_or_else(|| anyhow!("evdev keycode overflow"))?;
    u8::try_from(x11).map_err(|_| anyhow!("evdev keycode {evdev_keycode} out of range for X11"))
}

fn key_state_to_x11_event_type(state: KeyState) -> u8 {
    match state {
        KeyState::Pressed => xproto::KEY_PRESS_EVENT,
        KeyState::Released => xproto::KEY_RELEASE_EVENT,
    }
}

fn query_xtest(conn: &impl Connection) -> Result<()> {
    let ext = conn
        .extension_information(xtest::X11_EXTENSION_NAME)
        .context("failed to query X11 extension info")?;

    if ext.is_none() {
        return Err(anyhow!(
            "X11 backend requires the XTEST extension (not present on this X server)"
        ));
    }
    Ok(())
}

/// Keysym for a character: Latin-1 maps directly, everything else uses the
/// Unicode keysym range.
fn keysym_for_char(c: char) -> xproto::Keysym {
    let code = c as u32;
    if (0x20..=0x7e).contains(&code) || (0xa0..=0xff).contains(&code) {
        code
    } else {
        0x0100_0000 | code
    }
}

struct KeyboardMapping {
    min_keycode: u8,
    per_keycode: usize,
    keysyms: Vec<xproto::Keysym>,
}

impl KeyboardMapping {
    fn fetch(conn: &impl Connection) -> Result<Self> {
        let setup = conn.setup();
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);
        let count = max_keycode - min_keycode + 1;
        let reply = conn
            .get_keyboard_mapping(min_keycode, count)
            .context("failed to request keyboard mapping")?
            .reply()
            .context("failed to read keyboard mapping")?;

        let per_keycode = reply.keysyms_per_keycode as usize;
        if per_keycode == 0 {
            return Err(anyhow!("X server returned 0 keysyms per keycode"));
        }
        Ok(Self {
            min_keycode,
            per_keycode,
            keysyms: reply.keysyms,
        })
    }

    fn keysym(&self, keycode: u8, index: usize) -> xproto::Keysym {
        let row = (keycode - self.min_keycode) as usize * self.per_keycode;
        self.keysyms
            .get(row + index)
            .copied()
            .unwrap_or(x11rb::NO_SYMBOL)
    }

    /// Highest keycode with no keysyms bound; used as a scratch key for literals.
    fn spare_keycode(&self) -> Option<u8> {
        self.keysyms
            .chunks(self.per_keycode)
            .enumerate()
            .rev()
            .find(|(_, row)| row.iter().all(|&sym| sym == x11rb::NO_SYMBOL))
            .and_then(|(idx, _)| u8::try_from(idx).ok())
            .map(|idx| self.min_keycode + idx)
    }
}

fn validate_us_keymap(mapping: &KeyboardMapping) -> Result<()> {
    // Representative keys only: (evdev, unshifted, shifted).
    let checks: &[(u32, char, char)] = &[
        (crate::keyboard::KEY_A, 'a', 'A'),
        (crate::keyboard::KEY_Q, 'q', 'Q'),
        (crate::keyboard::KEY_1, '1', '!'),
        (crate::keyboard::KEY_MINUS, '-', '_'),
        (crate::keyboard::KEY_APOSTROPHE, '\'', '"'),
        (crate::keyboard::KEY_LEFTBRACE, '[', '{'),
        (crate::keyboard::KEY_RIGHTBRACE, ']', '}'),
    ];

    for &(evdev, unshifted, shifted) in checks {
        let keycode = evdev_to_x11_keycode(evdev)?;
        let got0 = mapping.keysym(keycode, 0);
        let got1 = mapping.keysym(keycode, 1);

        if got0 == x11rb::NO_SYMBOL || got1 == x11rb::NO_SYMBOL {
            return Err(anyhow!(
                "X11 backend could not validate the X server keymap (keycode {keycode}: got {got0:#x}/{got1:#x}). This backend assumes X11 keycodes are evdev+8 and requires a US keymap."
            ));
        }
        if got0 != keysym_for_char(unshifted) || got1 != keysym_for_char(shifted) {
            return Err(anyhow!(
                "X11 backend requires a US keyboard layout, but the X server keymap does not match (keycode {keycode}: got {got0:#x}/{got1:#x}). Try `setxkbmap us`."
            ));
        }
    }
    Ok(())
}

/// Keyboard and pointer synthesis through XTEST.
pub struct X11Input {
    conn: RustConnection,
    root: xproto::Window,
    spare_keycode: Option<u8>,
    per_keycode: u8,
    literal_bound: bool,
}

impl X11Input {
    pub fn connect() -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("failed to connect to X11")?;
        query_xtest(&conn)?;

        let mapping = KeyboardMapping::fetch(&conn)?;
        validate_us_keymap(&mapping)?;
        let spare_keycode = mapping.spare_keycode();
        if spare_keycode.is_none() {
            warn!("no unbound X11 keycode available; characters outside US ASCII will be skipped");
        }
        let per_keycode = u8::try_from(mapping.per_keycode)
            .map_err(|_| anyhow!("X server reported too many keysyms per keycode"))?;

        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .ok_or_else(|| anyhow!("invalid X11 screen index"))?
            .root;

        let input = Self {
            conn,
            root,
            spare_keycode,
            per_keycode,
            literal_bound: false,
        };
        // X11 has no per-client modifier state; start from a neutral one.
        input.release_common_modifiers();
        Ok(input)
    }

    fn fake(&self, type_: u8, detail: u8, x: i16, y: i16) -> Result<()> {
        self.conn
            .xtest_fake_input(type_, detail, x11rb::CURRENT_TIME, self.root, x, y, 0)
            .context("failed to send XTEST fake input")?;
        self.conn
            .flush()
            .context("failed to flush X11 connection")?;
        Ok(())
    }

    fn release_common_modifiers(&self) {
        for keycode in COMMON_MODIFIER_KEYCODES {
            if let Ok(code) = evdev_to_x11_keycode(keycode) {
                let _ = self.fake(xproto::KEY_RELEASE_EVENT, code, 0, 0);
            }
        }
    }

    fn bind_spare(&mut self, keysym: xproto::Keysym) -> Result<u8> {
        let keycode = self
            .spare_keycode
            .ok_or_else(|| anyhow!("no unbound keycode available for literal entry"))?;
        let row = vec![keysym; self.per_keycode as usize];
        self.conn
            .change_keyboard_mapping(1, keycode, self.per_keycode, &row)
            .context("failed to remap scratch keycode")?;
        // Round trip so the server has applied the mapping before the key event.
        self.conn
            .get_input_focus()
            .context("failed to sync X11 connection")?
            .reply()
            .context("failed to sync X11 connection")?;
        self.literal_bound = keysym != x11rb::NO_SYMBOL;
        Ok(keycode)
    }

    pub fn key(&mut self, keycode: u32, state: KeyState) -> Result<()> {
        let x11_keycode = evdev_to_x11_keycode(keycode)?;
        self.fake(key_state_to_x11_event_type(state), x11_keycode, 0, 0)
    }

    pub fn type_literal(&mut self, c: char) -> Result<()> {
        let keycode = self.bind_spare(keysym_for_char(c))?;
        self.fake(xproto::KEY_PRESS_EVENT, keycode, 0, 0)?;
        self.fake(xproto::KEY_RELEASE_EVENT, keycode, 0, 0)
    }

    pub fn move_pointer(&mut self, to: Point) -> Result<()> {
        let x = i16::try_from(to.x).map_err(|_| anyhow!("x coordinate {} out of range", to.x))?;
        let y = i16::try_from(to.y).map_err(|_| anyhow!("y coordinate {} out of range", to.y))?;
        self.fake(xproto::MOTION_NOTIFY_EVENT, 0, x, y)
    }

    pub fn click(&mut self) -> Result<()> {
        self.fake(xproto::BUTTON_PRESS_EVENT, LEFT_BUTTON, 0, 0)?;
        self.fake(xproto::BUTTON_RELEASE_EVENT, LEFT_BUTTON, 0, 0)
    }

    pub fn pointer_position(&mut self) -> Result<Point> {
        let reply = self
            .conn
            .query_pointer(self.root)
            .context("failed to query pointer")?
            .reply()
            .context("failed to read pointer position")?;
        Ok(Point::new(i32::from(reply.root_x), i32::from(reply.root_y)))
    }
}

impl Drop for X11Input {
    fn drop(&mut self) {
        self.release_common_modifiers();
        if self.literal_bound {
            if let Err(err) = self.bind_spare(x11rb::NO_SYMBOL) {
                debug!("failed to restore scratch keycode: {err:#}");
            }
        }
        let _ = self.conn.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evdev_keycodes_shift_by_eight() {
        assert_eq!(evdev_to_x11_keycode(crate::keyboard::KEY_A).ok(), Some(38));
        assert!(evdev_to_x11_keycode(300).is_err());
    }

    #[test]
    fn keysyms_cover_latin1_and_unicode() {
        assert_eq!(keysym_for_char('a'), 0x61);
        assert_eq!(keysym_for_char('é'), 0xe9);
        assert_eq!(keysym_for_char('€'), 0x0100_20ac);
    }

    #[test]
    fn spare_keycode_is_last_unbound_row() {
        let mapping = KeyboardMapping {
            min_keycode: 8,
            per_keycode: 2,
            keysyms: vec![0x61, 0x41, 0, 0, 0x62, 0x42, 0, 0, 0x63, 0],
        };
        assert_eq!(mapping.spare_keycode(), Some(11));
        assert_eq!(mapping.keysym(10, 1), 0x42);
    }
}
