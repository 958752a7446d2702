//! XTEST-backed input synthesis

use std::sync::Arc;

use tracing::{debug, info, trace};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::xproto::{self, ConnectionExt as _};
use x11rb::protocol::xtest::{self, ConnectionExt as XTestExt};
use x11rb::rust_connection::RustConnection;
use x11rb::CURRENT_TIME;

use super::InputSynth;
use crate::transport::{TransportError, WindowId};

// Keysym constants from X11/keysymdef.h
const XK_BACKSPACE: u32 = 0xFF08;
const XK_TAB: u32 = 0xFF09;
const XK_RETURN: u32 = 0xFF0D;
const XK_ESCAPE: u32 = 0xFF1B;
const XK_DELETE: u32 = 0xFFFF;
const XK_SHIFT_L: u32 = 0xFFE1;
/// Keysyms for code points outside Latin-1
const UNICODE_KEYSYM: u32 = 0x0100_0000;

/// Keysym that types `c`
pub fn keysym_for(c: char) -> u32 {
    match c {
        '\n' | '\r' => XK_RETURN,
        '\t' => XK_TAB,
        '\u{8}' => XK_BACKSPACE,
        '\u{1b}' => XK_ESCAPE,
        '\u{7f}' => XK_DELETE,
        ' '..='~' | '\u{a0}'..='\u{ff}' => c as u32,
        _ => UNICODE_KEYSYM | c as u32,
    }
}

/// Keycode to keysym table as reported by GetKeyboardMapping
#[derive(Debug, Clone, Default)]
pub struct KeyboardMap {
    min_keycode: u8,
    keysyms_per_keycode: usize,
    keysyms: Vec<u32>,
}

impl KeyboardMap {
    pub fn new(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode: keysyms_per_keycode as usize,
            keysyms,
        }
    }

    /// Keycode producing `keysym`, and whether Shift must be held.
    ///
    /// Unshifted positions win over shifted ones on any key.
    pub fn lookup(&self, keysym: u32) -> Option<(u8, bool)> {
        if self.keysyms_per_keycode == 0 {
            return None;
        }
        for column in 0..self.keysyms_per_keycode.min(2) {
            let found = self
                .keysyms
                .chunks(self.keysyms_per_keycode)
                .position(|row| row.get(column) == Some(&keysym));
            if let Some(index) = found {
                let keycode = self.min_keycode as usize + index;
                if let Ok(keycode) = u8::try_from(keycode) {
                    return Some((keycode, column == 1));
                }
            }
        }
        None
    }
}

/// Injects pointer and keyboard input through the XTEST extension
pub struct XTestSynth {
    conn: Arc<RustConnection>,
    root: WindowId,
    keymap: KeyboardMap,
    shift: Option<u8>,
}

impl XTestSynth {
    /// Fails when the server lacks XTEST
    pub fn new(conn: Arc<RustConnection>, root: WindowId) -> Result<Self, TransportError> {
        if conn.extension_information(xtest::X11_EXTENSION_NAME)?.is_none() {
            return Err(TransportError::MissingExtension("XTEST"));
        }
        let version = conn.xtest_get_version(2, 2)?.reply()?;
        debug!("XTEST {}.{}", version.major_version, version.minor_version);

        let setup = conn.setup();
        let (min_keycode, max_keycode) = (setup.min_keycode, setup.max_keycode);
        let reply = conn
            .get_keyboard_mapping(min_keycode, max_keycode - min_keycode + 1)?
            .reply()?;
        let keymap = KeyboardMap::new(min_keycode, reply.keysyms_per_keycode, reply.keysyms);
        let shift = keymap.lookup(XK_SHIFT_L).map(|(keycode, _)| keycode);
        info!("XTEST input synthesis ready");

        Ok(Self {
            conn,
            root,
            keymap,
            shift,
        })
    }

    fn fake(&self, kind: u8, detail: u8, x: i16, y: i16) -> Result<(), TransportError> {
        self.conn
            .xtest_fake_input(kind, detail, CURRENT_TIME, self.root, x, y, 0)?;
        Ok(())
    }

    fn key(&self, keycode: u8, pressed: bool) -> Result<(), TransportError> {
        let kind = if pressed {
            xproto::KEY_PRESS_EVENT
        } else {
            xproto::KEY_RELEASE_EVENT
        };
        self.fake(kind, keycode, 0, 0)
    }
}

fn clamp(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

impl InputSynth for XTestSynth {
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), TransportError> {
        self.fake(xproto::MOTION_NOTIFY_EVENT, 0, clamp(x), clamp(y))?;
        self.conn.flush()?;
        Ok(())
    }

    fn click(&mut self, x: i32, y: i32, button: u8, pressed: bool) -> Result<(), TransportError> {
        self.fake(xproto::MOTION_NOTIFY_EVENT, 0, clamp(x), clamp(y))?;
        let kind = if pressed {
            xproto::BUTTON_PRESS_EVENT
        } else {
            xproto::BUTTON_RELEASE_EVENT
        };
        self.fake(kind, button, 0, 0)?;
        self.conn.flush()?;
        Ok(())
    }

    fn character(&mut self, c: char) -> Result<(), TransportError> {
        let keysym = keysym_for(c);
        let Some((keycode, shifted)) = self.keymap.lookup(keysym) else {
            debug!("No keycode for {:?} (keysym 0x{:x})", c, keysym);
            return Ok(());
        };
        trace!("Typing {:?} with keycode {}{}", c, keycode, if shifted { " + Shift" } else { "" });

        let shift = self.shift.filter(|_| shifted);
        if let Some(shift) = shift {
            self.key(shift, true)?;
        }
        self.key(keycode, true)?;
        self.key(keycode, false)?;
        if let Some(shift) = shift {
            self.key(shift, false)?;
        }
        self.conn.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keysyms() {
        assert_eq!(keysym_for('a'), 0x61);
        assert_eq!(keysym_for('~'), 0x7e);
        assert_eq!(keysym_for('é'), 0xe9);
        assert_eq!(keysym_for('\n'), XK_RETURN);
        assert_eq!(keysym_for('\t'), XK_TAB);
        assert_eq!(keysym_for('\u{8}'), XK_BACKSPACE);
        assert_eq!(keysym_for('€'), 0x0100_20ac);
    }

    /// keycode 8: a/A, 9: 1/!, 10: Shift_L
    fn keymap() -> KeyboardMap {
        KeyboardMap::new(8, 2, vec![0x61, 0x41, 0x31, 0x21, XK_SHIFT_L, 0])
    }

    #[test]
    fn test_lookup_columns() {
        let map = keymap();
        assert_eq!(map.lookup(keysym_for('a')), Some((8, false)));
        assert_eq!(map.lookup(keysym_for('A')), Some((8, true)));
        assert_eq!(map.lookup(keysym_for('!')), Some((9, true)));
        assert_eq!(map.lookup(XK_SHIFT_L), Some((10, false)));
        assert_eq!(map.lookup(keysym_for('z')), None);
    }

    #[test]
    fn test_unshifted_position_wins() {
        // keycode 8 has '!' shifted, keycode 9 has it plain
        let map = KeyboardMap::new(8, 2, vec![0x31, 0x21, 0x21, 0]);
        assert_eq!(map.lookup(0x21), Some((9, false)));
    }

    #[test]
    fn test_empty_map() {
        assert_eq!(KeyboardMap::default().lookup(0x61), None);
    }
}
