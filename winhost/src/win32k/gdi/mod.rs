//! GDI
//!
//! Device contexts, the GDI object table and the raster primitives:
//!
//! - **surface** - linear pixel arrays behind windows and bitmaps
//! - **dc** - device contexts and object selection
//! - **draw** - filled rectangles, lines, pixels
//! - **font** - the embedded 8x8 fixed-pitch glyph set
//!
//! GDI handles live in their own table, separate from kernel handles.
//! Stock objects occupy the first slots and are interned before first
//! use.

pub mod dc;
pub mod draw;
pub mod font;
pub mod surface;

use crate::win32k::{rgb, ColorRef, HgdiObj, Point};
use spin::RwLock;
use std::sync::{Arc, Mutex};
use self::surface::Surface;

// Stock object indices.
pub const WHITE_BRUSH: i32 = 0;
pub const LTGRAY_BRUSH: i32 = 1;
pub const GRAY_BRUSH: i32 = 2;
pub const DKGRAY_BRUSH: i32 = 3;
pub const BLACK_BRUSH: i32 = 4;
pub const NULL_BRUSH: i32 = 5;
pub const WHITE_PEN: i32 = 6;
pub const BLACK_PEN: i32 = 7;
pub const NULL_PEN: i32 = 8;
pub const SYSTEM_FONT: i32 = 13;
const STOCK_COUNT: i32 = 14;

// Pen styles.
pub const PS_SOLID: u32 = 0;
pub const PS_NULL: u32 = 5;

// Background modes.
pub const TRANSPARENT: i32 = 1;
pub const OPAQUE: i32 = 2;

/// A pen: line color and width.
#[derive(Debug, Clone, Copy)]
pub struct Pen {
    pub style: u32,
    pub width: i32,
    pub color: ColorRef,
}

/// A solid brush; `null` brushes paint nothing.
#[derive(Debug, Clone, Copy)]
pub struct Brush {
    pub color: ColorRef,
    pub null: bool,
}

/// A font selection: the embedded 8x8 set at an integer scale.
#[derive(Debug, Clone, Copy)]
pub struct FontSel {
    pub scale: i32,
}

/// Device-context state: selected objects by slot, colors, background
/// mode and the current position.
pub struct DcState {
    pub target: Arc<Mutex<Surface>>,
    pub pen: HgdiObj,
    pub brush: HgdiObj,
    pub font: HgdiObj,
    pub bitmap: HgdiObj,
    pub text_color: ColorRef,
    pub bk_color: ColorRef,
    pub bk_mode: i32,
    pub pos: Point,
}

/// Everything a GDI handle can name.
pub enum GdiObject {
    Pen(Pen),
    Brush(Brush),
    Font(FontSel),
    Bitmap(Arc<Mutex<Surface>>),
    Dc(Arc<Mutex<DcState>>),
}

impl Clone for GdiObject {
    fn clone(&self) -> Self {
        match self {
            GdiObject::Pen(p) => GdiObject::Pen(*p),
            GdiObject::Brush(b) => GdiObject::Brush(*b),
            GdiObject::Font(f) => GdiObject::Font(*f),
            GdiObject::Bitmap(s) => GdiObject::Bitmap(s.clone()),
            GdiObject::Dc(d) => GdiObject::Dc(d.clone()),
        }
    }
}

// The object table, pre-seeded with the stock set.
static OBJECTS: spin::Lazy<RwLock<Vec<Option<GdiObject>>>> = spin::Lazy::new(|| {
    let solid = |color| Some(GdiObject::Brush(Brush { color, null: false }));
    let pen = |color| {
        Some(GdiObject::Pen(Pen {
            style: PS_SOLID,
            width: 1,
            color,
        }))
    };
    let table: Vec<Option<GdiObject>> = vec![
        solid(rgb(255, 255, 255)),                      // WHITE_BRUSH
        solid(rgb(192, 192, 192)),                      // LTGRAY_BRUSH
        solid(rgb(128, 128, 128)),                      // GRAY_BRUSH
        solid(rgb(64, 64, 64)),                         // DKGRAY_BRUSH
        solid(rgb(0, 0, 0)),                            // BLACK_BRUSH
        Some(GdiObject::Brush(Brush {
            color: 0,
            null: true,
        })),                                            // NULL_BRUSH
        pen(rgb(255, 255, 255)),                        // WHITE_PEN
        pen(rgb(0, 0, 0)),                              // BLACK_PEN
        Some(GdiObject::Pen(Pen {
            style: PS_NULL,
            width: 0,
            color: 0,
        })),                                            // NULL_PEN
        None,                                           // 9 (unused)
        Some(GdiObject::Font(FontSel { scale: 1 })),    // OEM_FIXED_FONT
        Some(GdiObject::Font(FontSel { scale: 1 })),    // ANSI_FIXED_FONT
        None,                                           // 12 (unused)
        Some(GdiObject::Font(FontSel { scale: 1 })),    // SYSTEM_FONT
    ];
    debug_assert_eq!(table.len(), STOCK_COUNT as usize);
    RwLock::new(table)
});

/// Insert an object, returning its handle.
pub(crate) fn insert_object(obj: GdiObject) -> HgdiObj {
    let mut objects = OBJECTS.write();
    for (i, slot) in objects.iter_mut().enumerate().skip(STOCK_COUNT as usize) {
        if slot.is_none() {
            *slot = Some(obj);
            return i + 1;
        }
    }
    objects.push(Some(obj));
    objects.len()
}

/// Resolve a handle.
pub(crate) fn get_object(handle: HgdiObj) -> Option<GdiObject> {
    if handle == 0 {
        return None;
    }
    OBJECTS.read().get(handle - 1).cloned().flatten()
}

/// Drop a non-stock object.
pub(crate) fn remove_object(handle: HgdiObj) -> bool {
    if handle == 0 || handle <= STOCK_COUNT as usize {
        return false;
    }
    let mut objects = OBJECTS.write();
    match objects.get_mut(handle - 1) {
        Some(slot @ Some(_)) => {
            *slot = None;
            true
        }
        _ => false,
    }
}

/// GetStockObject - pre-interned pens, brushes and fonts.
pub unsafe extern "win64" fn GetStockObject(index: i32) -> HgdiObj {
    if !(0..STOCK_COUNT).contains(&index) {
        return 0;
    }
    match OBJECTS.read().get(index as usize) {
        Some(Some(_)) => (index + 1) as HgdiObj,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_objects_interned() {
        unsafe {
            let white = GetStockObject(WHITE_BRUSH);
            assert_ne!(white, 0);
            assert!(matches!(get_object(white), Some(GdiObject::Brush(_))));
            let pen = GetStockObject(BLACK_PEN);
            assert!(matches!(get_object(pen), Some(GdiObject::Pen(_))));
            assert_eq!(GetStockObject(99), 0);
        }
    }

    #[test]
    fn test_stock_objects_not_deletable() {
        unsafe {
            let white = GetStockObject(WHITE_BRUSH);
            assert!(!remove_object(white));
            assert!(get_object(white).is_some());
        }
    }
}
