//! Input replay: synthetic events aimed at one mirrored window

use std::time::Instant;

use super::crossing::CrossingNotice;
use super::registry::WindowRegistry;
use crate::transport::{
    ButtonState, DisplayTransport, PointerEvent, SyntheticEvent, TransportError, WindowId,
};

/// Builds and sends synthetic input with root-relative coordinates and
/// monotonic millisecond timestamps
pub struct InputReplay {
    root: WindowId,
    epoch: Instant,
}

impl InputReplay {
    pub fn new(root: WindowId) -> Self {
        Self {
            root,
            epoch: Instant::now(),
        }
    }

    /// Milliseconds since start, wrapping like server time
    pub fn timestamp(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    /// Pointer fields for a position local to `window`
    pub fn pointer(
        &self,
        registry: &WindowRegistry,
        window: WindowId,
        x: i32,
        y: i32,
        state: ButtonState,
    ) -> PointerEvent {
        let (offset_x, offset_y) = registry.root_offset(window);
        PointerEvent {
            window,
            root: self.root,
            time: self.timestamp(),
            x,
            y,
            root_x: x + offset_x,
            root_y: y + offset_y,
            state,
        }
    }

    pub fn send_motion<T: DisplayTransport + ?Sized>(
        &self,
        transport: &T,
        registry: &WindowRegistry,
        window: WindowId,
        x: i32,
        y: i32,
        state: ButtonState,
    ) -> Result<(), TransportError> {
        let pointer = self.pointer(registry, window, x, y, state);
        transport.send_event(&SyntheticEvent::Motion(pointer))
    }

    /// `state` is the button state before this press or release
    #[allow(clippy::too_many_arguments)]
    pub fn send_button<T: DisplayTransport + ?Sized>(
        &self,
        transport: &T,
        registry: &WindowRegistry,
        window: WindowId,
        x: i32,
        y: i32,
        button: u8,
        pressed: bool,
        state: ButtonState,
    ) -> Result<(), TransportError> {
        let pointer = self.pointer(registry, window, x, y, state);
        transport.send_event(&SyntheticEvent::Button { pointer, button, pressed })
    }

    /// Key events carry a fixed position inside the window
    pub fn send_key<T: DisplayTransport + ?Sized>(
        &self,
        transport: &T,
        registry: &WindowRegistry,
        window: WindowId,
        keycode: u8,
        pressed: bool,
        state: ButtonState,
    ) -> Result<(), TransportError> {
        let pointer = self.pointer(registry, window, 1, 1, state);
        transport.send_event(&SyntheticEvent::Key { pointer, keycode, pressed })
    }

    /// Deliver one crossing; the pointer position is given in root coordinates
    /// and translated into the event window's space
    pub fn send_crossing<T: DisplayTransport + ?Sized>(
        &self,
        transport: &T,
        registry: &WindowRegistry,
        notice: &CrossingNotice,
        root_x: i32,
        root_y: i32,
        state: ButtonState,
    ) -> Result<(), TransportError> {
        let (offset_x, offset_y) = registry.root_offset(notice.window);
        let pointer = self.pointer(
            registry,
            notice.window,
            root_x - offset_x,
            root_y - offset_y,
            state,
        );
        transport.send_event(&SyntheticEvent::Crossing {
            pointer,
            kind: notice.kind,
            detail: notice.detail,
            child: notice.child,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::crossing::PointerFocus;
    use crate::mirror::hierarchy::refresh_from_root;
    use crate::shared::Rect;
    use crate::transport::fake::FakeDisplay;
    use crate::transport::{CrossingDetail, CrossingKind};

    const ROOT: WindowId = 0x100;

    /// root -> P(100,50) -> B(10,20)
    fn setup() -> (FakeDisplay, WindowRegistry, InputReplay) {
        let display = FakeDisplay::new(ROOT, 1920, 1080);
        display.add_window(ROOT, 0x10, Rect::new(100, 50, 400, 300));
        display.add_window(0x10, 0x11, Rect::new(10, 20, 100, 100));
        let mut registry = WindowRegistry::new(ROOT);
        refresh_from_root(&mut registry, &display).unwrap();
        (display, registry, InputReplay::new(ROOT))
    }

    #[test]
    fn test_motion_gets_root_relative_coordinates() {
        let (display, registry, replay) = setup();

        replay
            .send_motion(&display, &registry, 0x11, 5, 6, ButtonState::empty())
            .unwrap();

        let sent = display.sent.borrow();
        let SyntheticEvent::Motion(pointer) = sent[0] else {
            panic!("Wrong event type");
        };
        assert_eq!(pointer.window, 0x11);
        assert_eq!(pointer.root, ROOT);
        assert_eq!((pointer.x, pointer.y), (5, 6));
        assert_eq!((pointer.root_x, pointer.root_y), (115, 76));
    }

    #[test]
    fn test_button_carries_pre_press_state() {
        let (display, registry, replay) = setup();
        let state = ButtonState::SHIFT;

        replay
            .send_button(&display, &registry, 0x10, 1, 2, 1, true, state)
            .unwrap();

        match display.sent.borrow()[0] {
            SyntheticEvent::Button { pointer, button, pressed } => {
                assert_eq!(button, 1);
                assert!(pressed);
                assert_eq!(pointer.state, ButtonState::SHIFT);
                assert_eq!((pointer.root_x, pointer.root_y), (101, 52));
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_key_events_use_fixed_position() {
        let (display, registry, replay) = setup();

        replay
            .send_key(&display, &registry, 0x11, 38, false, ButtonState::empty())
            .unwrap();

        match display.sent.borrow()[0] {
            SyntheticEvent::Key { pointer, keycode, pressed } => {
                assert_eq!(keycode, 38);
                assert!(!pressed);
                assert_eq!((pointer.x, pointer.y), (1, 1));
                assert_eq!((pointer.root_x, pointer.root_y), (111, 71));
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_crossings_are_local_to_each_event_window() {
        let (display, registry, replay) = setup();
        let mut focus = PointerFocus::new();

        // Pointer at (5, 5) inside B
        for notice in focus.transition(&registry, Some(0x11)) {
            replay
                .send_crossing(&display, &registry, &notice, 115, 75, ButtonState::empty())
                .unwrap();
        }

        let sent = display.sent.borrow();
        assert_eq!(sent.len(), 2);
        match sent[0] {
            SyntheticEvent::Crossing { pointer, kind, detail, child } => {
                assert_eq!(pointer.window, 0x10);
                assert_eq!((kind, detail, child), (CrossingKind::Enter, CrossingDetail::Virtual, Some(0x11)));
                assert_eq!((pointer.x, pointer.y), (15, 25));
            }
            other => panic!("Wrong event type: {:?}", other),
        }
        match sent[1] {
            SyntheticEvent::Crossing { pointer, kind, detail, child } => {
                assert_eq!(pointer.window, 0x11);
                assert_eq!((kind, detail, child), (CrossingKind::Enter, CrossingDetail::Ancestor, None));
                assert_eq!((pointer.x, pointer.y), (5, 5));
                assert_eq!((pointer.root_x, pointer.root_y), (115, 75));
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_timestamps_do_not_go_backwards() {
        let replay = InputReplay::new(ROOT);
        let first = replay.timestamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(replay.timestamp() >= first);
    }
}
