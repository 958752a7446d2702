//! Shadow state for one X window

use glam::Mat4;

use crate::render::TextureHandle;
use crate::shared::Rect;
use crate::transport::{EventMask, WindowClass, WindowId};

/// Texture currently holding a window's pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTexture {
    pub handle: TextureHandle,
    /// Size the texture was allocated at
    pub width: u32,
    pub height: u32,
}

/// Mirror of a live X window
///
/// Hierarchy fields (`parent`, `children`, `depth`) are owned by
/// [`WindowRegistry`](super::WindowRegistry) and only readable from outside.
#[derive(Debug, Clone)]
pub struct WindowNode {
    pub id: WindowId,
    pub(super) parent: Option<WindowId>,
    /// Stacking order, bottom-most first
    pub(super) children: Vec<WindowId>,
    /// `Some(0)` for the root, `None` while detached from the root's tree
    pub(super) depth: Option<u32>,
    /// Position relative to the parent and size, desktop pixels
    pub geometry: Rect,
    /// Viewable according to the server
    pub mapped: bool,
    pub class: WindowClass,
    /// Union of all clients' selections; decides who gets synthetic input
    pub event_mask: EventMask,
    pub name: Option<String>,
    /// Placement of the window plane in the scene (top-levels only)
    pub transform: Mat4,
    /// Present only while mapped and top-level
    pub texture: Option<WindowTexture>,
}

impl WindowNode {
    pub fn new(id: WindowId) -> Self {
        Self {
            id,
            parent: None,
            children: Vec::new(),
            depth: None,
            geometry: Rect::default(),
            mapped: false,
            class: WindowClass::InputOutput,
            event_mask: EventMask::empty(),
            name: None,
            transform: Mat4::IDENTITY,
            texture: None,
        }
    }

    pub fn parent(&self) -> Option<WindowId> {
        self.parent
    }

    pub fn children(&self) -> &[WindowId] {
        &self.children
    }

    pub fn depth(&self) -> Option<u32> {
        self.depth
    }

    /// Direct child of the root: placed and textured on its own
    pub fn is_top_level(&self) -> bool {
        self.depth == Some(1)
    }
}
