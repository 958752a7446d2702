//! Rendering collaborator
//!
//! The mirror core only needs to allocate, fill and release textures; the
//! [`TextureSink`] trait is that contract. [`SceneRenderer`] implements it
//! with OpenGL and draws the window planes, [`GlContext`] owns the GLX side.

pub mod fps;
pub mod gl_context;
pub mod renderer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::Rect;

pub use fps::FpsCounter;
pub use gl_context::GlContext;
pub use renderer::{CursorShadow, SceneRenderer, SceneView};

/// Opaque texture name, shared by the 3D path and the overlay bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureHandle(pub u32);

/// Byte layout of uploaded pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("texture allocation failed for {width}x{height}")]
    Allocation { width: u32, height: u32 },

    #[error("texture {0:?} is not allocated")]
    UnknownTexture(TextureHandle),

    #[error("pixel buffer holds {actual} bytes, {expected} needed")]
    ShortBuffer { expected: usize, actual: usize },
}

/// Texture allocation and upload
pub trait TextureSink {
    /// Allocate an uninitialized `width` x `height` texture
    fn allocate(&mut self, width: u32, height: u32) -> Result<TextureHandle, RenderError>;

    /// Replace `region` of a texture with tightly packed top-left-origin pixels
    fn upload(
        &mut self,
        texture: TextureHandle,
        region: Rect,
        format: PixelFormat,
        pixels: &[u8],
    ) -> Result<(), RenderError>;

    fn release(&mut self, texture: TextureHandle);
}
