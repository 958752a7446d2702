//! Input synthesis on the mirrored display
//!
//! Unlike [`InputReplay`](crate::mirror::InputReplay), which addresses one
//! window with a synthetic event, these inputs go through the server's own
//! input path as if a real device produced them.

pub mod xtest;

use crate::transport::TransportError;

pub use xtest::{KeyboardMap, XTestSynth, keysym_for};

pub trait InputSynth {
    /// Warp the pointer to root coordinates
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), TransportError>;

    fn click(&mut self, x: i32, y: i32, button: u8, pressed: bool) -> Result<(), TransportError>;

    /// Type one character, pressing Shift when the keymap needs it
    fn character(&mut self, c: char) -> Result<(), TransportError>;
}
