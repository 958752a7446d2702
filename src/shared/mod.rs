//! Types shared by the mirror core, the renderer and the transports

pub mod geometry;

pub use geometry::Rect;
