//! Input connection for the preview window
//!
//! The GL window is created through Xlib (see `render::gl_context`); its
//! pointer, key and structure events are read through a separate x11rb
//! connection so they can be drained with the same non-blocking polling as
//! the mirrored display.

use std::sync::Arc;

use anyhow::{Context, Result};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{self, ChangeWindowAttributesAux, ConnectionExt};
use x11rb::rust_connection::RustConnection;

use super::WindowId;

/// Pointer, key and resize events of the preview window
fn surface_event_mask() -> xproto::EventMask {
    xproto::EventMask::POINTER_MOTION
        | xproto::EventMask::BUTTON_PRESS
        | xproto::EventMask::BUTTON_RELEASE
        | xproto::EventMask::KEY_PRESS
        | xproto::EventMask::KEY_RELEASE
        | xproto::EventMask::STRUCTURE_NOTIFY
}

/// Connect to the display hosting the preview window and select its input
pub fn connect_surface(display: Option<&str>, window: WindowId) -> Result<Arc<RustConnection>> {
    let (conn, _) = x11rb::connect(display).context("Failed to connect to surface display")?;
    conn.change_window_attributes(
        window,
        &ChangeWindowAttributesAux::new().event_mask(surface_event_mask()),
    )
    .context("Failed to select input on the preview window")?;
    conn.flush()?;
    Ok(Arc::new(conn))
}
