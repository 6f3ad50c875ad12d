//! Raster Surfaces
//!
//! A surface is a linear COLORREF pixel array: either a window's client
//! bitmap or an off-screen memory bitmap. All drawing clips here.

use crate::win32k::{ColorRef, Rect};

/// A raster target.
pub struct Surface {
    width: i32,
    height: i32,
    pixels: Vec<ColorRef>,
}

impl Surface {
    pub fn new(width: i32, height: i32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            pixels: vec![0; (width * height) as usize],
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: i32, y: i32) -> Option<ColorRef> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[(y * self.width + x) as usize])
    }

    #[inline]
    pub fn set(&mut self, x: i32, y: i32, color: ColorRef) {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return;
        }
        self.pixels[(y * self.width + x) as usize] = color;
    }

    /// Fill a rectangle, clipped to the surface.
    pub fn fill(&mut self, rect: &Rect, color: ColorRef) {
        let clipped = rect.intersect(&self.bounds());
        if clipped.is_empty() {
            return;
        }
        for y in clipped.top..clipped.bottom {
            let row = (y * self.width) as usize;
            self.pixels[row + clipped.left as usize..row + clipped.right as usize].fill(color);
        }
    }

    /// Fill everything.
    pub fn clear(&mut self, color: ColorRef) {
        self.pixels.fill(color);
    }
}
