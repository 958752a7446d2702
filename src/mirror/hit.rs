//! Pointer ray hit-testing
//!
//! Every mapped top-level is a quad in its own plane: local x runs over
//! `[0, width)` and local y over `(-height, 0]`, so the window-space row is
//! `v = -y`. Bounds include the origin and exclude the far edges.

use glam::{Mat4, Vec2, Vec3};

use super::registry::WindowRegistry;
use crate::transport::{EventMask, WindowId};

/// Pointer ray in scene coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit length
    pub direction: Vec3,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }
}

/// Where a pointer landed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    /// Window that should receive the event
    pub window: WindowId,
    /// Top-level whose plane was hit
    pub frame: WindowId,
    /// Position local to `window`
    pub x: i32,
    pub y: i32,
    /// Position on the frame's plane in frame pixels
    pub frame_x: f32,
    pub frame_y: f32,
    /// Scene distance from the ray origin (or probe point)
    pub distance: f32,
    /// Frame transform the coordinates were computed with
    pub transform: Mat4,
}

/// Nearest mapped top-level hit by `ray`, resolved to the window selecting `mask`
pub fn hit_test(registry: &WindowRegistry, ray: &Ray, mask: EventMask) -> Option<Hit> {
    let mut best: Option<(f32, WindowId, Vec2, Mat4)> = None;
    for frame in registry.top_levels().filter(|n| n.mapped) {
        let Some((distance, point)) = intersect(&frame.transform, ray) else {
            continue;
        };
        if !in_bounds(point, frame.geometry.width, frame.geometry.height) {
            continue;
        }
        if best.is_none_or(|(nearest, ..)| distance < nearest) {
            best = Some((distance, frame.id, point, frame.transform));
        }
    }

    let (distance, frame, point, transform) = best?;
    resolve(registry, frame, point, distance, transform, mask)
}

/// Frame whose plane passes closest to `position`, within `radius`.
///
/// Used for VR hands, which point by proximity rather than by ray.
pub fn nearest(
    registry: &WindowRegistry,
    position: Vec3,
    radius: f32,
    mask: EventMask,
) -> Option<Hit> {
    let mut best: Option<(f32, WindowId, Vec2, Mat4)> = None;
    for frame in registry.top_levels().filter(|n| n.mapped) {
        let local = frame.transform.inverse().transform_point3(position);
        let point = Vec2::new(local.x, -local.y);
        let distance = local.z.abs();
        if distance > radius || !in_bounds(point, frame.geometry.width, frame.geometry.height) {
            continue;
        }
        if best.is_none_or(|(nearest, ..)| distance < nearest) {
            best = Some((distance, frame.id, point, frame.transform));
        }
    }

    let (distance, frame, point, transform) = best?;
    resolve(registry, frame, point, distance, transform, mask)
}

/// Ray/plane intersection in the frame's local space.
///
/// Returns the scene distance and the window-space point `(u, v)`.
fn intersect(transform: &Mat4, ray: &Ray) -> Option<(f32, Vec2)> {
    let inverse = transform.inverse();
    let origin = inverse.transform_point3(ray.origin);
    let direction = inverse.transform_vector3(ray.direction);
    if direction.z.abs() < f32::EPSILON {
        return None;
    }
    let s = -origin.z / direction.z;
    if s <= 0.0 {
        return None;
    }

    let local = origin + direction * s;
    let distance = transform.transform_point3(local).distance(ray.origin);
    Some((distance, Vec2::new(local.x, -local.y)))
}

fn in_bounds(point: Vec2, width: u32, height: u32) -> bool {
    point.x >= 0.0 && point.y >= 0.0 && point.x < width as f32 && point.y < height as f32
}

/// Descend to the deepest mapped child under the point, then climb back to
/// the first window that selects `mask`. An empty mask accepts any window.
fn resolve(
    registry: &WindowRegistry,
    frame: WindowId,
    point: Vec2,
    distance: f32,
    transform: Mat4,
    mask: EventMask,
) -> Option<Hit> {
    let mut window = frame;
    let (mut x, mut y) = (point.x.floor() as i32, point.y.floor() as i32);

    'descend: loop {
        // Topmost sibling first
        for &child in registry.children(window).iter().rev() {
            let Some(node) = registry.get(child) else {
                continue;
            };
            if node.mapped && node.geometry.contains(x, y) {
                x -= node.geometry.x;
                y -= node.geometry.y;
                window = child;
                continue 'descend;
            }
        }
        break;
    }

    while window != frame && !mask.is_empty() {
        let node = registry.get(window)?;
        if node.event_mask.intersects(mask) {
            break;
        }
        x += node.geometry.x;
        y += node.geometry.y;
        window = node.parent()?;
    }

    Some(Hit {
        window,
        frame,
        x,
        y,
        frame_x: point.x,
        frame_y: point.y,
        distance,
        transform,
    })
}
