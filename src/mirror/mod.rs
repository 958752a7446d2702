//! Mirror core
//!
//! Shadow tree of the X server's windows plus the logic that keeps it in
//! sync ([`hierarchy`], [`texture`]) and routes input back into it
//! ([`hit`], [`crossing`], [`replay`]).

pub mod crossing;
pub mod hierarchy;
pub mod hit;
pub mod node;
pub mod placement;
pub mod registry;
pub mod replay;
pub mod texture;

use thiserror::Error;

use crate::render::RenderError;
use crate::transport::{TransportError, WindowId};

pub use crossing::{CrossingNotice, MouseFocus, PointerFocus};
pub use hit::{Hit, Ray};
pub use node::{WindowNode, WindowTexture};
pub use registry::WindowRegistry;
pub use replay::InputReplay;
pub use texture::UpdateOutcome;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("window {0:#x} is not mirrored")]
    UnknownWindow(WindowId),

    #[error("unsupported pixel size of {0} bytes")]
    UnsupportedPixels(u8),
}
