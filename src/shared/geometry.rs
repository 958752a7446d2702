//! Desktop pixel geometry
//!
//! Rectangles are expressed in window-local pixel space: `x`/`y` may be
//! negative (a damage report can hang off the window's left/top edge), the
//! extent is always unsigned. Bounds are inclusive of the origin and exclusive
//! of `x + width` / `y + height`.

use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole `width` x `height` surface
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// An empty rectangle carries no area (used for "recheck attributes only")
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Whether a point lies inside (inclusive origin, exclusive extent)
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && (x as i64) < self.right() && y >= self.y && (y as i64) < self.bottom()
    }

    /// Clip against a `width` x `height` surface anchored at the origin.
    ///
    /// Returns `None` when nothing of the rectangle survives.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.is_empty() {
            return None;
        }
        if self.x as i64 >= width as i64
            || self.y as i64 >= height as i64
            || self.right() <= 0
            || self.bottom() <= 0
        {
            return None;
        }

        let x0 = self.x.max(0) as i64;
        let y0 = self.y.max(0) as i64;
        let x1 = self.right().min(width as i64);
        let y1 = self.bottom().min(height as i64);

        Some(Rect::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}
