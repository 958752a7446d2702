//! x11rb implementation of the windowing transport

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, trace};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::damage::{self, ConnectionExt as DamageExt, ReportLevel};
use x11rb::protocol::xproto::{
    self, AtomEnum, ButtonPressEvent, ChangeWindowAttributesAux, ConnectionExt, EnterNotifyEvent,
    ImageFormat, InputFocus, KeyButMask, KeyPressEvent, MapState, Motion, MotionNotifyEvent,
    NotifyDetail, NotifyMode,
};
use x11rb::protocol::{ErrorKind, Event};
use x11rb::rust_connection::RustConnection;
use x11rb::{CURRENT_TIME, NONE};

use super::{
    ButtonState, CrossingKind, DisplayEvent, DisplayTransport, EventMask, Image, PointerEvent,
    SurfaceEvent, SyntheticEvent, TransportError, WindowAttributes, WindowClass, WindowId,
};
use crate::shared::Rect;

/// Selection on the root: structure changes of top-levels and focus
const ROOT_EVENT_MASK: EventMask = EventMask::STRUCTURE_NOTIFY
    .union(EventMask::SUBSTRUCTURE_NOTIFY)
    .union(EventMask::FOCUS_CHANGE);

/// `same_screen` and `focus` bits of `EnterNotify.same_screen_focus`
const SAME_SCREEN_FOCUS: u8 = 0x03;

/// Connection to the mirrored display
pub struct X11Transport {
    conn: Arc<RustConnection>,
    screen_num: usize,
    root: WindowId,
    /// Damage object per watched window
    damage: RefCell<HashMap<WindowId, damage::Damage>>,
}

impl X11Transport {
    /// Connect, verify DAMAGE and start listening on the root
    pub fn connect(display_name: &str) -> Result<Self, TransportError> {
        let (conn, screen_num) =
            x11rb::connect(Some(display_name)).map_err(|source| TransportError::Connect {
                display: display_name.to_string(),
                source,
            })?;
        let root = conn.setup().roots[screen_num].root;
        info!("Connected to X server {}, screen {}, root window {:#x}", display_name, screen_num, root);

        if conn.extension_information(damage::X11_EXTENSION_NAME)?.is_none() {
            return Err(TransportError::MissingExtension("DAMAGE"));
        }
        let version = conn.damage_query_version(1, 1)?.reply()?;
        debug!("DAMAGE {}.{}", version.major_version, version.minor_version);

        let transport = Self {
            conn: Arc::new(conn),
            screen_num,
            root,
            damage: RefCell::new(HashMap::new()),
        };
        transport.select_input(root, ROOT_EVENT_MASK)?;
        transport.conn.flush()?;

        Ok(transport)
    }

    /// Shared handle for the async event stream
    pub fn connection(&self) -> Arc<RustConnection> {
        self.conn.clone()
    }

    /// Root size in pixels
    pub fn screen_size(&self) -> (u32, u32) {
        let screen = &self.conn.setup().roots[self.screen_num];
        (screen.width_in_pixels.into(), screen.height_in_pixels.into())
    }

    /// Bits per pixel and scanline pad for a drawable depth
    fn pixmap_format(&self, depth: u8) -> (u8, u8) {
        self.conn
            .setup()
            .pixmap_formats
            .iter()
            .find(|format| format.depth == depth)
            .map(|format| (format.bits_per_pixel, format.scanline_pad))
            .unwrap_or((32, 32))
    }
}

impl DisplayTransport for X11Transport {
    fn root(&self) -> WindowId {
        self.root
    }

    fn window_attributes(&self, window: WindowId) -> Result<WindowAttributes, TransportError> {
        let attrs_cookie = self.conn.get_window_attributes(window)?;
        let geometry_cookie = self.conn.get_geometry(window)?;
        let attrs = attrs_cookie.reply()?;
        let geometry = geometry_cookie.reply()?;

        Ok(WindowAttributes {
            geometry: Rect::new(
                geometry.x.into(),
                geometry.y.into(),
                geometry.width.into(),
                geometry.height.into(),
            ),
            viewable: attrs.map_state == MapState::VIEWABLE,
            class: if attrs.class == xproto::WindowClass::INPUT_ONLY {
                WindowClass::InputOnly
            } else {
                WindowClass::InputOutput
            },
            override_redirect: attrs.override_redirect,
            event_mask: EventMask::from_bits_truncate(u32::from(attrs.all_event_masks)),
        })
    }

    fn query_children(&self, window: WindowId) -> Result<Vec<WindowId>, TransportError> {
        Ok(self.conn.query_tree(window)?.reply()?.children)
    }

    fn fetch_name(&self, window: WindowId) -> Result<Option<String>, TransportError> {
        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, 256)?
            .reply()?;
        if reply.value.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&reply.value).into_owned()))
    }

    fn transient_for(&self, window: WindowId) -> Result<Option<WindowId>, TransportError> {
        let reply = self
            .conn
            .get_property(false, window, AtomEnum::WM_TRANSIENT_FOR, AtomEnum::WINDOW, 0, 1)?
            .reply()?;
        Ok(reply
            .value32()
            .and_then(|mut values| values.next())
            .filter(|&owner| owner != NONE))
    }

    fn get_image(&self, window: WindowId, area: Rect) -> Result<Image, TransportError> {
        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                window,
                clamp_i16(area.x),
                clamp_i16(area.y),
                clamp_u16(area.width),
                clamp_u16(area.height),
                !0,
            )?
            .reply()?;

        let (bits_per_pixel, scanline_pad) = self.pixmap_format(reply.depth);
        let pad = scanline_pad.max(8) as usize;
        let row_bits = area.width as usize * bits_per_pixel as usize;
        let stride = row_bits.div_ceil(pad) * pad / 8;
        trace!(
            "Read {}x{} from {:#x}: depth {}, {} bpp, stride {}",
            area.width, area.height, window, reply.depth, bits_per_pixel, stride
        );

        Ok(Image {
            width: area.width,
            height: area.height,
            bytes_per_pixel: bits_per_pixel / 8,
            stride,
            data: reply.data,
        })
    }

    fn select_input(&self, window: WindowId, mask: EventMask) -> Result<(), TransportError> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(xproto::EventMask::from(mask.bits())),
        )?;
        Ok(())
    }

    fn watch_damage(&self, window: WindowId) -> Result<(), TransportError> {
        let mut damage = self.damage.borrow_mut();
        if damage.contains_key(&window) {
            return Ok(());
        }
        let id = self.conn.generate_id()?;
        self.conn.damage_create(id, window, ReportLevel::RAW_RECTANGLES)?;
        damage.insert(window, id);
        trace!("Watching damage on {:#x}", window);
        Ok(())
    }

    fn forget_window(&self, window: WindowId) {
        // The server frees damage objects together with their drawable
        self.damage.borrow_mut().remove(&window);
    }

    fn set_input_focus(&self, window: WindowId) -> Result<(), TransportError> {
        self.conn.set_input_focus(InputFocus::PARENT, window, CURRENT_TIME)?;
        Ok(())
    }

    fn send_event(&self, event: &SyntheticEvent) -> Result<(), TransportError> {
        let mask = xproto::EventMask::from(event.mask().bits());
        self.conn.send_event(true, event.window(), mask, encode_event(event))?;
        self.conn.flush()?;
        Ok(())
    }

    fn grab_server(&self) -> Result<(), TransportError> {
        self.conn.grab_server()?;
        Ok(())
    }

    fn ungrab_server(&self) -> Result<(), TransportError> {
        self.conn.ungrab_server()?;
        self.conn.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), TransportError> {
        self.conn.flush()?;
        Ok(())
    }
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

/// Wire encoding of a synthetic event
fn encode_event(event: &SyntheticEvent) -> [u8; 32] {
    match *event {
        SyntheticEvent::Motion(p) => MotionNotifyEvent {
            response_type: xproto::MOTION_NOTIFY_EVENT,
            detail: Motion::NORMAL,
            sequence: 0,
            time: p.time,
            root: p.root,
            event: p.window,
            child: NONE,
            root_x: clamp_i16(p.root_x),
            root_y: clamp_i16(p.root_y),
            event_x: clamp_i16(p.x),
            event_y: clamp_i16(p.y),
            state: key_but_mask(p.state),
            same_screen: true,
        }
        .into(),
        SyntheticEvent::Button { pointer: p, button, pressed } => ButtonPressEvent {
            response_type: if pressed {
                xproto::BUTTON_PRESS_EVENT
            } else {
                xproto::BUTTON_RELEASE_EVENT
            },
            detail: button,
            sequence: 0,
            time: p.time,
            root: p.root,
            event: p.window,
            child: NONE,
            root_x: clamp_i16(p.root_x),
            root_y: clamp_i16(p.root_y),
            event_x: clamp_i16(p.x),
            event_y: clamp_i16(p.y),
            state: key_but_mask(p.state),
            same_screen: true,
        }
        .into(),
        SyntheticEvent::Key { pointer: p, keycode, pressed } => KeyPressEvent {
            response_type: if pressed {
                xproto::KEY_PRESS_EVENT
            } else {
                xproto::KEY_RELEASE_EVENT
            },
            detail: keycode,
            sequence: 0,
            time: p.time,
            root: p.root,
            event: p.window,
            child: NONE,
            root_x: clamp_i16(p.root_x),
            root_y: clamp_i16(p.root_y),
            event_x: clamp_i16(p.x),
            event_y: clamp_i16(p.y),
            state: key_but_mask(p.state),
            same_screen: true,
        }
        .into(),
        SyntheticEvent::Crossing { pointer: p, kind, detail, child } => EnterNotifyEvent {
            response_type: match kind {
                CrossingKind::Enter => xproto::ENTER_NOTIFY_EVENT,
                CrossingKind::Leave => xproto::LEAVE_NOTIFY_EVENT,
            },
            detail: NotifyDetail::from(detail as u8),
            sequence: 0,
            time: p.time,
            root: p.root,
            event: p.window,
            child: child.unwrap_or(NONE),
            root_x: clamp_i16(p.root_x),
            root_y: clamp_i16(p.root_y),
            event_x: clamp_i16(p.x),
            event_y: clamp_i16(p.y),
            state: key_but_mask(p.state),
            mode: NotifyMode::NORMAL,
            same_screen_focus: SAME_SCREEN_FOCUS,
        }
        .into(),
    }
}

fn key_but_mask(state: ButtonState) -> KeyButMask {
    KeyButMask::from(state.bits())
}

fn button_state(mask: KeyButMask) -> ButtonState {
    ButtonState::from_bits_truncate(u16::from(mask))
}

/// Translate an event from the mirrored display
pub fn translate_display_event(event: Event) -> DisplayEvent {
    match event {
        Event::CreateNotify(e) => DisplayEvent::Created {
            window: e.window,
            parent: e.parent,
            geometry: Rect::new(e.x.into(), e.y.into(), e.width.into(), e.height.into()),
        },
        Event::DestroyNotify(e) => DisplayEvent::Destroyed { window: e.window },
        Event::MapNotify(e) => DisplayEvent::Mapped { window: e.window },
        Event::UnmapNotify(e) => DisplayEvent::Unmapped { window: e.window },
        Event::ConfigureNotify(e) => DisplayEvent::Configured {
            window: e.window,
            geometry: Rect::new(e.x.into(), e.y.into(), e.width.into(), e.height.into()),
            above: (e.above_sibling != NONE).then_some(e.above_sibling),
        },
        Event::ReparentNotify(e) => DisplayEvent::Reparented {
            window: e.window,
            parent: e.parent,
            x: e.x.into(),
            y: e.y.into(),
        },
        Event::Expose(e) => DisplayEvent::Exposed { window: e.window },
        Event::DamageNotify(e) => DisplayEvent::Damaged {
            window: e.drawable,
            area: Rect::new(
                e.area.x.into(),
                e.area.y.into(),
                e.area.width.into(),
                e.area.height.into(),
            ),
        },
        Event::FocusIn(e) => DisplayEvent::FocusIn { window: e.event },
        Event::FocusOut(e) => DisplayEvent::FocusOut { window: e.event },
        Event::Error(e) => DisplayEvent::ProtocolError {
            // Requests against windows destroyed in the meantime
            benign: matches!(
                e.error_kind,
                ErrorKind::Window | ErrorKind::Drawable | ErrorKind::Match | ErrorKind::DamageBadDamage
            ),
            message: format!("{:?}", e),
        },
        _ => DisplayEvent::Other,
    }
}

/// Translate an event from the preview window's connection
pub fn translate_surface_event(event: Event) -> SurfaceEvent {
    match event {
        Event::MotionNotify(e) => SurfaceEvent::Motion {
            x: e.event_x.into(),
            y: e.event_y.into(),
            state: button_state(e.state),
        },
        Event::ButtonPress(e) | Event::ButtonRelease(e) => SurfaceEvent::Button {
            x: e.event_x.into(),
            y: e.event_y.into(),
            button: e.detail,
            pressed: e.response_type & 0x7f == xproto::BUTTON_PRESS_EVENT,
            state: button_state(e.state),
        },
        Event::KeyPress(e) | Event::KeyRelease(e) => SurfaceEvent::Key {
            keycode: e.detail,
            pressed: e.response_type & 0x7f == xproto::KEY_PRESS_EVENT,
            state: button_state(e.state),
        },
        Event::ConfigureNotify(e) => SurfaceEvent::Resized {
            width: e.width.into(),
            height: e.height.into(),
        },
        Event::DestroyNotify(_) => SurfaceEvent::Closed,
        _ => SurfaceEvent::Other,
    }
}
