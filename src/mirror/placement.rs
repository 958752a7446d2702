//! Scene placement of top-level windows
//!
//! Windows start out laid flat on the desktop plane at their desktop
//! position. A window that is configured relative to another one (its
//! transient owner, or the sibling it is stacked on) is re-placed in that
//! window's plane, offset by the desktop delta and pulled slightly forward.

use glam::{Mat4, Vec3};

use super::node::WindowNode;
use super::registry::WindowRegistry;
use crate::transport::WindowId;

/// Plane transform for desktop position (x, y): the plane's origin is the
/// window's top-left corner and desktop y grows downwards
pub fn desktop_transform(x: i32, y: i32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x as f32, -(y as f32), 0.0))
}

/// Desktop origin that centres a `width` x `height` screen on the scene origin
pub fn centering_origin(width: u32, height: u32) -> Vec3 {
    Vec3::new(-(width as f32) * 0.5, height as f32 * 0.5, 0.0)
}

/// Place `window` in `anchor`'s plane.
///
/// Both must be top-levels and the anchor must be mapped. `spacing` moves the
/// window along the anchor's back axis so it is drawn (and hit) in front.
pub fn place_relative(
    registry: &mut WindowRegistry,
    window: WindowId,
    anchor: WindowId,
    spacing: f32,
) -> bool {
    if window == anchor {
        return false;
    }
    let (Some(node), Some(base)) = (registry.get(window), registry.get(anchor)) else {
        return false;
    };
    if !node.is_top_level() || !base.is_top_level() || !base.mapped {
        return false;
    }

    let dx = (node.geometry.x - base.geometry.x) as f32;
    let dy = (node.geometry.y - base.geometry.y) as f32;
    let frame = base.transform;
    let right = frame.x_axis.truncate();
    let up = frame.y_axis.truncate();
    let back = frame.z_axis.truncate();

    let mut transform = frame;
    transform.w_axis += (right * dx - up * dy + back * spacing).extend(0.0);
    if let Some(node) = registry.get_mut(window) {
        node.transform = transform;
    }
    true
}

/// Centre of a window in overlay space: desktop pixels divided by
/// `pixels_per_meter`, at a fixed depth
pub fn overlay_position(node: &WindowNode, offset: (i32, i32), pixels_per_meter: f32, depth: f32) -> Vec3 {
    let center_x = offset.0 as f32 + node.geometry.width as f32 * 0.5;
    let center_y = offset.1 as f32 + node.geometry.height as f32 * 0.5;
    Vec3::new(center_x / pixels_per_meter, center_y / pixels_per_meter, depth)
}
