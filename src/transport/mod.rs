//! Windowing transport
//!
//! Everything the mirror core needs from the X server goes through the
//! [`DisplayTransport`] trait: tree and attribute queries, pixel reads, event
//! selection, damage watches, focus and synthetic event delivery. The x11rb
//! implementation lives in [`x11`]; tests drive the core through an
//! in-memory display.

pub mod error;
pub mod event;
pub mod surface;
pub mod x11;

#[cfg(test)]
pub mod fake;

use bitflags::bitflags;
use tracing::warn;

use crate::shared::Rect;

pub use error::TransportError;
pub use event::{
    CrossingDetail, CrossingKind, DisplayEvent, PointerEvent, SurfaceEvent, SyntheticEvent,
};

/// X window handle, stable for the lifetime of the window
pub type WindowId = u32;

bitflags! {
    /// Core protocol event mask (same bit layout as the wire format)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const KEY_PRESS = 1 << 0;
        const KEY_RELEASE = 1 << 1;
        const BUTTON_PRESS = 1 << 2;
        const BUTTON_RELEASE = 1 << 3;
        const ENTER_WINDOW = 1 << 4;
        const LEAVE_WINDOW = 1 << 5;
        const POINTER_MOTION = 1 << 6;
        const BUTTON_MOTION = 1 << 13;
        const EXPOSURE = 1 << 15;
        const STRUCTURE_NOTIFY = 1 << 17;
        const SUBSTRUCTURE_NOTIFY = 1 << 19;
        const FOCUS_CHANGE = 1 << 21;
    }
}

bitflags! {
    /// Modifier and pointer button state carried by input events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ButtonState: u16 {
        const SHIFT = 1 << 0;
        const LOCK = 1 << 1;
        const CONTROL = 1 << 2;
        const MOD1 = 1 << 3;
        const BUTTON1 = 1 << 8;
        const BUTTON2 = 1 << 9;
        const BUTTON3 = 1 << 10;
        const BUTTON4 = 1 << 11;
        const BUTTON5 = 1 << 12;
    }
}

impl ButtonState {
    /// State bit for a core pointer button (1..=5); other buttons carry no bit
    pub fn for_button(button: u8) -> ButtonState {
        match button {
            1 => ButtonState::BUTTON1,
            2 => ButtonState::BUTTON2,
            3 => ButtonState::BUTTON3,
            4 => ButtonState::BUTTON4,
            5 => ButtonState::BUTTON5,
            _ => ButtonState::empty(),
        }
    }

    /// Apply a press or release to the tracked state
    pub fn apply(&mut self, button: u8, pressed: bool) {
        self.set(ButtonState::for_button(button), pressed);
    }
}

/// Window class as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClass {
    /// Has pixels that can be read back and mirrored
    InputOutput,
    /// Input-only windows never carry a texture
    InputOnly,
}

/// Live window attributes (geometry plus the state the mirror cares about)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAttributes {
    /// Position relative to the parent, size in pixels
    pub geometry: Rect,
    /// Map state is `Viewable` (mapped and all ancestors mapped)
    pub viewable: bool,
    pub class: WindowClass,
    pub override_redirect: bool,
    /// Union of every client's event selection on this window
    pub event_mask: EventMask,
}

/// Native pixel rectangle read back from a window
#[derive(Debug, Clone)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    /// 3 or 4, native BGR(X) byte order
    pub bytes_per_pixel: u8,
    /// Bytes per scanline including padding
    pub stride: usize,
    pub data: Vec<u8>,
}

/// Request/response contract with the windowing system
pub trait DisplayTransport {
    /// Root window of the mirrored screen
    fn root(&self) -> WindowId;

    /// Query geometry, map state, class and event selection
    fn window_attributes(&self, window: WindowId) -> Result<WindowAttributes, TransportError>;

    /// Children in stacking order, bottom-most first
    fn query_children(&self, window: WindowId) -> Result<Vec<WindowId>, TransportError>;

    /// `WM_NAME`, if set
    fn fetch_name(&self, window: WindowId) -> Result<Option<String>, TransportError>;

    /// `WM_TRANSIENT_FOR`, if set
    fn transient_for(&self, window: WindowId) -> Result<Option<WindowId>, TransportError>;

    /// Read a pixel rectangle (window-local coordinates)
    fn get_image(&self, window: WindowId, area: Rect) -> Result<Image, TransportError>;

    fn select_input(&self, window: WindowId, mask: EventMask) -> Result<(), TransportError>;

    /// Start receiving damage reports for a window (no-op when already watched)
    fn watch_damage(&self, window: WindowId) -> Result<(), TransportError>;

    /// Drop bookkeeping for a destroyed window
    fn forget_window(&self, window: WindowId);

    /// Give keyboard focus to a window (reverting to its parent)
    fn set_input_focus(&self, window: WindowId) -> Result<(), TransportError>;

    /// Deliver a synthetic event to its target window
    fn send_event(&self, event: &SyntheticEvent) -> Result<(), TransportError>;

    fn grab_server(&self) -> Result<(), TransportError>;

    fn ungrab_server(&self) -> Result<(), TransportError>;

    fn flush(&self) -> Result<(), TransportError>;
}

/// Holds the server grabbed until dropped
pub struct ServerGrab<'a, T: DisplayTransport + ?Sized> {
    transport: &'a T,
}

impl<'a, T: DisplayTransport + ?Sized> ServerGrab<'a, T> {
    pub fn new(transport: &'a T) -> Result<Self, TransportError> {
        transport.grab_server()?;
        Ok(Self { transport })
    }
}

impl<T: DisplayTransport + ?Sized> Drop for ServerGrab<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.transport.ungrab_server() {
            warn!("Failed to release server grab: {}", e);
        }
    }
}
