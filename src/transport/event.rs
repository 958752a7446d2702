//! Event types crossing the transport seam
//!
//! Incoming X traffic is translated once into [`DisplayEvent`] (mirrored
//! display) or [`SurfaceEvent`] (preview window) so the dispatch code never
//! matches on raw protocol structs. Outgoing input is expressed as
//! [`SyntheticEvent`].

use serde::{Deserialize, Serialize};

use super::{ButtonState, EventMask, WindowId};
use crate::shared::Rect;

/// Enter or Leave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrossingKind {
    Enter,
    Leave,
}

impl CrossingKind {
    pub fn flipped(self) -> Self {
        match self {
            CrossingKind::Enter => CrossingKind::Leave,
            CrossingKind::Leave => CrossingKind::Enter,
        }
    }
}

/// Crossing detail (wire values of `NotifyDetail`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CrossingDetail {
    Ancestor = 0,
    Virtual = 1,
    Inferior = 2,
    Nonlinear = 3,
    NonlinearVirtual = 4,
}

/// Fields common to every pointer-positioned event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    /// Event window
    pub window: WindowId,
    pub root: WindowId,
    /// Milliseconds, server-timestamp compatible
    pub time: u32,
    /// Window-local position
    pub x: i32,
    pub y: i32,
    /// Root-relative position
    pub root_x: i32,
    pub root_y: i32,
    pub state: ButtonState,
}

/// Synthesized input delivered to a single window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticEvent {
    Motion(PointerEvent),
    Button {
        pointer: PointerEvent,
        button: u8,
        pressed: bool,
    },
    Key {
        pointer: PointerEvent,
        keycode: u8,
        pressed: bool,
    },
    Crossing {
        pointer: PointerEvent,
        kind: CrossingKind,
        detail: CrossingDetail,
        child: Option<WindowId>,
    },
}

impl SyntheticEvent {
    pub fn pointer(&self) -> &PointerEvent {
        match self {
            SyntheticEvent::Motion(pointer)
            | SyntheticEvent::Button { pointer, .. }
            | SyntheticEvent::Key { pointer, .. }
            | SyntheticEvent::Crossing { pointer, .. } => pointer,
        }
    }

    /// Target window
    pub fn window(&self) -> WindowId {
        self.pointer().window
    }

    /// Selection a client must hold on the target to receive this event
    pub fn mask(&self) -> EventMask {
        match self {
            SyntheticEvent::Motion(_) => EventMask::POINTER_MOTION,
            SyntheticEvent::Button { pressed: true, .. } => EventMask::BUTTON_PRESS,
            SyntheticEvent::Button { pressed: false, .. } => EventMask::BUTTON_RELEASE,
            SyntheticEvent::Key { pressed: true, .. } => EventMask::KEY_PRESS,
            SyntheticEvent::Key { pressed: false, .. } => EventMask::KEY_RELEASE,
            SyntheticEvent::Crossing { kind: CrossingKind::Enter, .. } => EventMask::ENTER_WINDOW,
            SyntheticEvent::Crossing { kind: CrossingKind::Leave, .. } => EventMask::LEAVE_WINDOW,
        }
    }
}

/// Notification from the mirrored display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Created {
        window: WindowId,
        parent: WindowId,
        geometry: Rect,
    },
    Destroyed {
        window: WindowId,
    },
    Mapped {
        window: WindowId,
    },
    Unmapped {
        window: WindowId,
    },
    Configured {
        window: WindowId,
        geometry: Rect,
        /// Sibling this window is now stacked directly on top of
        above: Option<WindowId>,
    },
    /// `x`/`y` are relative to the new parent
    Reparented {
        window: WindowId,
        parent: WindowId,
        x: i32,
        y: i32,
    },
    Exposed {
        window: WindowId,
    },
    Damaged {
        window: WindowId,
        area: Rect,
    },
    FocusIn {
        window: WindowId,
    },
    FocusOut {
        window: WindowId,
    },
    /// Asynchronous protocol error; `benign` marks destroyed-window races
    ProtocolError {
        benign: bool,
        message: String,
    },
    Other,
}

/// Input and structure events from the preview window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    Motion {
        x: i32,
        y: i32,
        state: ButtonState,
    },
    Button {
        x: i32,
        y: i32,
        button: u8,
        pressed: bool,
        state: ButtonState,
    },
    Key {
        keycode: u8,
        pressed: bool,
        state: ButtonState,
    },
    Resized {
        width: u32,
        height: u32,
    },
    Closed,
    Other,
}
