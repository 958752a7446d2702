//! Event dispatch against the shadow tree
//!
//! A [`Session`] owns the registry and both focus handles and turns display
//! notifications, pointer rays and VR actions into tree updates and
//! synthetic input. It does no I/O of its own: the transport and texture
//! sink are passed in, which keeps it drivable from tests.

use glam::Mat4;
use tracing::{debug, info, trace, warn};

use crate::mirror::hierarchy::refresh_from_root;
use crate::mirror::hit::{self, Ray};
use crate::mirror::placement::{centering_origin, desktop_transform, place_relative};
use crate::mirror::texture::{release_texture, update_window};
use crate::mirror::{
    InputReplay, MirrorError, PointerFocus, UpdateOutcome, WindowNode, WindowRegistry,
};
use crate::render::TextureSink;
use crate::shared::Rect;
use crate::transport::{
    ButtonState, DisplayEvent, DisplayTransport, EventMask, TransportError, WindowId,
};
use crate::vr::VrAction;

/// Effect of one event on a mirrored window, for the overlay bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Updated {
        window: WindowId,
        outcome: UpdateOutcome,
    },
    /// Unmapped or gone
    Closed(WindowId),
}

pub struct Session {
    registry: WindowRegistry,
    pointer: PointerFocus,
    keyboard: Option<WindowId>,
    replay: InputReplay,
    buttons: ButtonState,
    stack_spacing: f32,
    /// Last pointer position in root coordinates
    pointer_root: (i32, i32),
}

impl Session {
    pub fn new(root: WindowId, stack_spacing: f32) -> Self {
        Self {
            registry: WindowRegistry::new(root),
            pointer: PointerFocus::new(),
            keyboard: None,
            replay: InputReplay::new(root),
            buttons: ButtonState::empty(),
            stack_spacing,
            pointer_root: (0, 0),
        }
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    pub fn mouse_focus(&self) -> Option<WindowId> {
        self.pointer.window()
    }

    pub fn keyboard_focus(&self) -> Option<WindowId> {
        self.keyboard
    }

    pub fn buttons(&self) -> ButtonState {
        self.buttons
    }

    /// Initial sync: centre the desktop, walk the tree and texture every
    /// top-level. Keyboard focus goes to the topmost mapped one.
    pub fn start<T, S>(
        &mut self,
        transport: &T,
        sink: &mut S,
        screen: (u32, u32),
    ) -> Result<Vec<Change>, MirrorError>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        self.registry.set_desktop_origin(centering_origin(screen.0, screen.1));
        refresh_from_root(&mut self.registry, transport)?;

        let top_levels: Vec<WindowId> = self.registry.top_levels().map(|n| n.id).collect();
        let mut changes = Vec::new();
        for &window in &top_levels {
            changes.extend(self.update(transport, sink, window, Rect::default()));
        }
        info!("Mirroring {} top-level windows", top_levels.len());

        if let Some(window) = self.topmost_mapped() {
            self.set_keyboard_focus(transport, window);
        }
        Ok(changes)
    }

    /// Apply one notification from the mirrored display
    pub fn handle_display_event<T, S>(
        &mut self,
        transport: &T,
        sink: &mut S,
        event: DisplayEvent,
    ) -> Vec<Change>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        match event {
            DisplayEvent::Created { window, parent, geometry } => {
                trace!("Create {:#x} in {:#x} at {:?}", window, parent, geometry);
                self.restructure(transport, sink)
            }
            DisplayEvent::Configured { window, geometry, above } => {
                trace!("Configure {:#x} {:?} above {:?}", window, geometry, above);
                if let Some(node) = self.registry.get_mut(window) {
                    node.geometry = geometry;
                }
                let changes = self.restructure(transport, sink);
                self.place(transport, window, above);
                changes
            }
            DisplayEvent::Reparented { window, parent, x, y } => {
                trace!("Reparent {:#x} to {:#x} at {},{}", window, parent, x, y);
                if let Some(node) = self.registry.get_mut(window) {
                    node.geometry.x = x;
                    node.geometry.y = y;
                }
                let changes = self.restructure(transport, sink);
                self.place(transport, window, None);
                changes
            }
            DisplayEvent::Mapped { window } => {
                let mut changes = self.restructure(transport, sink);
                changes.extend(self.expose(transport, sink, window));
                changes
            }
            DisplayEvent::Exposed { window } => self.expose(transport, sink, window),
            DisplayEvent::Unmapped { window } => self.unmapped(transport, sink, window),
            DisplayEvent::Destroyed { window } => {
                let removed = self.registry.forget(window);
                self.drop_nodes(transport, sink, removed)
            }
            DisplayEvent::Damaged { window, area } => {
                if !self.registry.contains(window) {
                    return Vec::new();
                }
                self.update(transport, sink, window, area).into_iter().collect()
            }
            DisplayEvent::FocusIn { window } => {
                trace!("Focus in {:#x}", window);
                Vec::new()
            }
            DisplayEvent::FocusOut { window } => {
                trace!("Focus out {:#x}", window);
                Vec::new()
            }
            DisplayEvent::ProtocolError { benign, message } => {
                if benign {
                    trace!("Ignoring X error: {}", message);
                } else {
                    warn!("X error: {}", message);
                }
                Vec::new()
            }
            DisplayEvent::Other => Vec::new(),
        }
    }

    /// Pointer moved along `ray`; a miss leaves every window
    pub fn pointer_moved<T: DisplayTransport + ?Sized>(&mut self, transport: &T, ray: &Ray) {
        match hit::hit_test(&self.registry, ray, EventMask::POINTER_MOTION) {
            Some(hit) => {
                self.set_mouse_focus(transport, Some(hit.window), hit.x, hit.y);
                self.send_motion(transport, hit.window, hit.x, hit.y);
            }
            None => self.set_mouse_focus(transport, None, 0, 0),
        }
    }

    /// Button pressed or released with the pointer along `ray`.
    ///
    /// The hit window takes keyboard focus. Returns the window that got the
    /// event.
    pub fn pointer_button<T: DisplayTransport + ?Sized>(
        &mut self,
        transport: &T,
        ray: &Ray,
        button: u8,
        pressed: bool,
    ) -> Option<WindowId> {
        let mask = if pressed {
            EventMask::BUTTON_PRESS
        } else {
            EventMask::BUTTON_RELEASE
        };
        let Some(hit) = hit::hit_test(&self.registry, ray, mask) else {
            trace!("Button {} missed every window", button);
            return None;
        };
        self.set_keyboard_focus(transport, hit.window);
        self.send_button(transport, hit.window, hit.x, hit.y, button, pressed);
        Some(hit.window)
    }

    /// Forward a key to the keyboard focus window
    pub fn key<T: DisplayTransport + ?Sized>(
        &mut self,
        transport: &T,
        keycode: u8,
        pressed: bool,
        state: ButtonState,
    ) {
        let Some(window) = self.keyboard else {
            return;
        };
        let result = self
            .replay
            .send_key(transport, &self.registry, window, keycode, pressed, state);
        log_send(result, "key", window);
    }

    /// Apply one hand action through the same paths as mouse input
    pub fn apply_vr_action<T: DisplayTransport + ?Sized>(&mut self, transport: &T, action: VrAction) {
        match action {
            VrAction::MouseFocus { target, x, y } => self.set_mouse_focus(transport, target, x, y),
            VrAction::KeyboardFocus(window) => self.set_keyboard_focus(transport, window),
            VrAction::Button { window, x, y, button, pressed } => {
                self.send_button(transport, window, x, y, button, pressed)
            }
            VrAction::Motion { window, x, y } => self.send_motion(transport, window, x, y),
            VrAction::MoveFrame { frame, transform } => {
                if let Some(node) = self.registry.get_mut(frame) {
                    node.transform = transform;
                }
            }
        }
    }

    /// Move mouse focus, delivering the crossings in between.
    ///
    /// `(x, y)` is local to `target`; without a target the last known root
    /// position is used.
    pub fn set_mouse_focus<T: DisplayTransport + ?Sized>(
        &mut self,
        transport: &T,
        target: Option<WindowId>,
        x: i32,
        y: i32,
    ) {
        if let Some(window) = target {
            let (offset_x, offset_y) = self.registry.root_offset(window);
            self.pointer_root = (offset_x + x, offset_y + y);
        }
        let (root_x, root_y) = self.pointer_root;
        for notice in self.pointer.transition(&self.registry, target) {
            let result = self.replay.send_crossing(
                transport,
                &self.registry,
                &notice,
                root_x,
                root_y,
                self.buttons,
            );
            log_send(result, "crossing", notice.window);
        }
    }

    pub fn set_keyboard_focus<T: DisplayTransport + ?Sized>(&mut self, transport: &T, window: WindowId) {
        if self.keyboard == Some(window) {
            return;
        }
        debug!("Keyboard focus {:#x}", window);
        self.keyboard = Some(window);
        if let Err(e) = transport.set_input_focus(window) {
            debug!("Failed to focus {:#x}: {}", window, e);
        }
    }

    /// Forget every window, releasing their textures
    pub fn shutdown<S: TextureSink + ?Sized>(&mut self, sink: &mut S) -> Vec<WindowId> {
        self.pointer.reset();
        self.keyboard = None;
        let removed = self.registry.clear();
        let mut closed = Vec::with_capacity(removed.len());
        for node in removed {
            if let Some(texture) = node.texture {
                sink.release(texture.handle);
            }
            closed.push(node.id);
        }
        closed
    }

    fn update<T, S>(&mut self, transport: &T, sink: &mut S, window: WindowId, damage: Rect) -> Option<Change>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        match update_window(&mut self.registry, transport, sink, window, damage) {
            Ok(outcome) => Some(Change::Updated { window, outcome }),
            Err(e) => {
                debug!("Skipping update of {:#x}: {}", window, e);
                None
            }
        }
    }

    fn expose<T, S>(&mut self, transport: &T, sink: &mut S, window: WindowId) -> Vec<Change>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        if !self.registry.contains(window) {
            return Vec::new();
        }
        if let Err(e) = transport.watch_damage(window) {
            debug!("No damage watch on {:#x}: {}", window, e);
        }
        self.update(transport, sink, window, Rect::default())
            .into_iter()
            .collect()
    }

    /// Re-walk the tree after a structural change and clean up whatever fell out
    fn restructure<T, S>(&mut self, transport: &T, sink: &mut S) -> Vec<Change>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        let mut changes = match refresh_from_root(&mut self.registry, transport) {
            Ok(pruned) => self.drop_nodes(transport, sink, pruned),
            Err(e) => {
                warn!("Hierarchy refresh failed: {}", e);
                Vec::new()
            }
        };
        // Only top-levels are textured
        for (window, texture) in self.registry.take_stray_textures() {
            debug!("{:#x} left the top level, releasing its texture", window);
            sink.release(texture.handle);
            changes.push(Change::Closed(window));
        }
        changes
    }

    /// Stack `window` on its transient owner, else on the sibling below it.
    /// A top-level with neither goes back to its desktop position.
    fn place<T: DisplayTransport + ?Sized>(&mut self, transport: &T, window: WindowId, above: Option<WindowId>) {
        let owner = transport.transient_for(window).unwrap_or_else(|e| {
            debug!("No transient hint on {:#x}: {}", window, e);
            None
        });
        let placed = owner.is_some_and(|owner| place_relative(&mut self.registry, window, owner, self.stack_spacing))
            || above.is_some_and(|above| place_relative(&mut self.registry, window, above, self.stack_spacing));
        if placed {
            trace!("Placed {:#x} relative to {:?}/{:?}", window, owner, above);
            return;
        }

        let origin = Mat4::from_translation(self.registry.desktop_origin());
        if let Some(node) = self.registry.get_mut(window).filter(|n| n.is_top_level()) {
            node.transform = origin * desktop_transform(node.geometry.x, node.geometry.y);
        }
    }

    fn unmapped<T, S>(&mut self, transport: &T, sink: &mut S, window: WindowId) -> Vec<Change>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        if !self.registry.contains(window) {
            return Vec::new();
        }
        release_texture(&mut self.registry, sink, window);

        if self.pointer.window().is_some_and(|w| self.within(w, window)) {
            self.pointer.reset();
        }
        if self.keyboard.is_some_and(|w| self.within(w, window)) {
            self.keyboard = None;
        }
        if let Some(next) = self.topmost_mapped() {
            self.set_keyboard_focus(transport, next);
        }
        vec![Change::Closed(window)]
    }

    fn drop_nodes<T, S>(&mut self, transport: &T, sink: &mut S, removed: Vec<WindowNode>) -> Vec<Change>
    where
        T: DisplayTransport + ?Sized,
        S: TextureSink + ?Sized,
    {
        let mut changes = Vec::with_capacity(removed.len());
        for node in removed {
            if let Some(texture) = node.texture {
                sink.release(texture.handle);
            }
            transport.forget_window(node.id);
            if self.pointer.window() == Some(node.id) {
                self.pointer.reset();
            }
            if self.keyboard == Some(node.id) {
                self.keyboard = None;
            }
            trace!("Dropped {:#x}", node.id);
            changes.push(Change::Closed(node.id));
        }
        changes
    }

    /// `window` is `ancestor` or below it
    fn within(&self, window: WindowId, ancestor: WindowId) -> bool {
        window == ancestor || self.registry.is_ancestor(ancestor, window)
    }

    fn topmost_mapped(&self) -> Option<WindowId> {
        self.registry
            .top_levels()
            .filter(|n| n.mapped)
            .last()
            .map(|n| n.id)
    }

    fn send_motion<T: DisplayTransport + ?Sized>(&mut self, transport: &T, window: WindowId, x: i32, y: i32) {
        let result = self
            .replay
            .send_motion(transport, &self.registry, window, x, y, self.buttons);
        log_send(result, "motion", window);
    }

    /// Events carry the state from before the change
    fn send_button<T: DisplayTransport + ?Sized>(
        &mut self,
        transport: &T,
        window: WindowId,
        x: i32,
        y: i32,
        button: u8,
        pressed: bool,
    ) {
        let result = self.replay.send_button(
            transport,
            &self.registry,
            window,
            x,
            y,
            button,
            pressed,
            self.buttons,
        );
        log_send(result, "button", window);
        self.buttons.apply(button, pressed);
    }
}

fn log_send(result: Result<(), TransportError>, what: &str, window: WindowId) {
    if let Err(e) = result {
        debug!("Failed to send {} to {:#x}: {}", what, window, e);
    }
}
