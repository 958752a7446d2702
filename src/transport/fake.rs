//! In-memory display used by unit tests

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};

use super::{
    DisplayTransport, EventMask, Image, SyntheticEvent, TransportError, WindowAttributes,
    WindowClass, WindowId,
};
use crate::shared::Rect;

/// Selection a typical toolkit client makes on its windows
pub const CLIENT_MASK: EventMask = EventMask::KEY_PRESS
    .union(EventMask::KEY_RELEASE)
    .union(EventMask::BUTTON_PRESS)
    .union(EventMask::BUTTON_RELEASE)
    .union(EventMask::ENTER_WINDOW)
    .union(EventMask::LEAVE_WINDOW)
    .union(EventMask::POINTER_MOTION)
    .union(EventMask::EXPOSURE);

/// Native pixel every fake window is filled with (B, G, R, X)
pub const FAKE_PIXEL: [u8; 4] = [10, 20, 30, 0];

pub struct FakeWindow {
    pub parent: Option<WindowId>,
    pub attributes: WindowAttributes,
    pub children: Vec<WindowId>,
    pub name: Option<String>,
    pub transient_for: Option<WindowId>,
}

pub struct FakeDisplay {
    root: WindowId,
    windows: RefCell<HashMap<WindowId, FakeWindow>>,
    failing: RefCell<HashSet<WindowId>>,
    bytes_per_pixel: Cell<u8>,
    grabs: Cell<i32>,
    pub image_reads: RefCell<Vec<(WindowId, Rect)>>,
    pub sent: RefCell<Vec<SyntheticEvent>>,
    pub selections: RefCell<HashMap<WindowId, EventMask>>,
    pub damage_watches: RefCell<Vec<WindowId>>,
    pub focus: Cell<Option<WindowId>>,
}

impl FakeDisplay {
    pub fn new(root: WindowId, width: u32, height: u32) -> Self {
        let mut windows = HashMap::new();
        windows.insert(
            root,
            FakeWindow {
                parent: None,
                attributes: WindowAttributes {
                    geometry: Rect::full(width, height),
                    viewable: true,
                    class: WindowClass::InputOutput,
                    override_redirect: false,
                    event_mask: EventMask::SUBSTRUCTURE_NOTIFY,
                },
                children: Vec::new(),
                name: None,
                transient_for: None,
            },
        );

        Self {
            root,
            windows: RefCell::new(windows),
            failing: RefCell::new(HashSet::new()),
            bytes_per_pixel: Cell::new(4),
            grabs: Cell::new(0),
            image_reads: RefCell::new(Vec::new()),
            sent: RefCell::new(Vec::new()),
            selections: RefCell::new(HashMap::new()),
            damage_watches: RefCell::new(Vec::new()),
            focus: Cell::new(None),
        }
    }

    /// Create a viewable InputOutput window stacked on top of its siblings
    pub fn add_window(&self, parent: WindowId, window: WindowId, geometry: Rect) {
        let mut windows = self.windows.borrow_mut();
        windows.insert(
            window,
            FakeWindow {
                parent: Some(parent),
                attributes: WindowAttributes {
                    geometry,
                    viewable: true,
                    class: WindowClass::InputOutput,
                    override_redirect: false,
                    event_mask: CLIENT_MASK,
                },
                children: Vec::new(),
                name: Some(format!("window {:#x}", window)),
                transient_for: None,
            },
        );
        if let Some(parent) = windows.get_mut(&parent) {
            parent.children.push(window);
        }
    }

    pub fn with_window<R>(&self, window: WindowId, f: impl FnOnce(&mut FakeWindow) -> R) -> R {
        let mut windows = self.windows.borrow_mut();
        let entry = windows.get_mut(&window).expect("fake window exists");
        f(entry)
    }

    pub fn set_viewable(&self, window: WindowId, viewable: bool) {
        self.with_window(window, |w| w.attributes.viewable = viewable);
    }

    pub fn set_geometry(&self, window: WindowId, geometry: Rect) {
        self.with_window(window, |w| w.attributes.geometry = geometry);
    }

    pub fn set_event_mask(&self, window: WindowId, mask: EventMask) {
        self.with_window(window, |w| w.attributes.event_mask = mask);
    }

    pub fn set_class(&self, window: WindowId, class: WindowClass) {
        self.with_window(window, |w| w.attributes.class = class);
    }

    /// Move a window under a new parent, on top of its new siblings
    pub fn reparent(&self, window: WindowId, parent: WindowId) {
        let mut windows = self.windows.borrow_mut();
        let old = windows.get(&window).and_then(|w| w.parent);
        if let Some(old) = old.and_then(|old| windows.get_mut(&old)) {
            old.children.retain(|&c| c != window);
        }
        if let Some(new) = windows.get_mut(&parent) {
            new.children.push(window);
        }
        if let Some(w) = windows.get_mut(&window) {
            w.parent = Some(parent);
        }
    }

    /// Destroy a window and its subtree
    pub fn destroy(&self, window: WindowId) {
        let mut windows = self.windows.borrow_mut();
        let parent = windows.get(&window).and_then(|w| w.parent);
        if let Some(parent) = parent.and_then(|p| windows.get_mut(&p)) {
            parent.children.retain(|&c| c != window);
        }
        let mut pending = vec![window];
        while let Some(id) = pending.pop() {
            if let Some(w) = windows.remove(&id) {
                pending.extend(w.children);
            }
        }
    }

    /// Make every query against `window` fail as if it had just been destroyed
    pub fn fail(&self, window: WindowId) {
        self.failing.borrow_mut().insert(window);
    }

    pub fn set_bytes_per_pixel(&self, bytes: u8) {
        self.bytes_per_pixel.set(bytes);
    }

    pub fn grab_depth(&self) -> i32 {
        self.grabs.get()
    }

    fn lookup<R>(&self, window: WindowId, f: impl FnOnce(&FakeWindow) -> R) -> Result<R, TransportError> {
        if self.failing.borrow().contains(&window) {
            return Err(TransportError::UnknownWindow(window));
        }
        self.windows
            .borrow()
            .get(&window)
            .map(f)
            .ok_or(TransportError::UnknownWindow(window))
    }
}

impl DisplayTransport for FakeDisplay {
    fn root(&self) -> WindowId {
        self.root
    }

    fn window_attributes(&self, window: WindowId) -> Result<WindowAttributes, TransportError> {
        self.lookup(window, |w| w.attributes)
    }

    fn query_children(&self, window: WindowId) -> Result<Vec<WindowId>, TransportError> {
        self.lookup(window, |w| w.children.clone())
    }

    fn fetch_name(&self, window: WindowId) -> Result<Option<String>, TransportError> {
        self.lookup(window, |w| w.name.clone())
    }

    fn transient_for(&self, window: WindowId) -> Result<Option<WindowId>, TransportError> {
        self.lookup(window, |w| w.transient_for)
    }

    fn get_image(&self, window: WindowId, area: Rect) -> Result<Image, TransportError> {
        self.lookup(window, |_| ())?;
        self.image_reads.borrow_mut().push((window, area));

        let bpp = self.bytes_per_pixel.get() as usize;
        let stride = (area.width as usize * bpp).div_ceil(4) * 4;
        let mut data = vec![0u8; stride * area.height as usize];
        for row in data.chunks_mut(stride) {
            for pixel in row[..area.width as usize * bpp].chunks_mut(bpp) {
                pixel.copy_from_slice(&FAKE_PIXEL[..bpp]);
            }
        }

        Ok(Image {
            width: area.width,
            height: area.height,
            bytes_per_pixel: bpp as u8,
            stride,
            data,
        })
    }

    fn select_input(&self, window: WindowId, mask: EventMask) -> Result<(), TransportError> {
        self.lookup(window, |_| ())?;
        self.selections.borrow_mut().insert(window, mask);
        Ok(())
    }

    fn watch_damage(&self, window: WindowId) -> Result<(), TransportError> {
        self.lookup(window, |_| ())?;
        let mut watches = self.damage_watches.borrow_mut();
        if !watches.contains(&window) {
            watches.push(window);
        }
        Ok(())
    }

    fn forget_window(&self, window: WindowId) {
        self.damage_watches.borrow_mut().retain(|&w| w != window);
    }

    fn set_input_focus(&self, window: WindowId) -> Result<(), TransportError> {
        self.focus.set(Some(window));
        Ok(())
    }

    fn send_event(&self, event: &SyntheticEvent) -> Result<(), TransportError> {
        self.sent.borrow_mut().push(*event);
        Ok(())
    }

    fn grab_server(&self) -> Result<(), TransportError> {
        self.grabs.set(self.grabs.get() + 1);
        Ok(())
    }

    fn ungrab_server(&self) -> Result<(), TransportError> {
        self.grabs.set(self.grabs.get() - 1);
        Ok(())
    }

    fn flush(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
