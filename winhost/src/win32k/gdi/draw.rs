//! Drawing Primitives
//!
//! Filled rectangles, horizontal/vertical fast-path lines, Bresenham for
//! everything else, and single pixels. All primitives clip against the
//! target surface.

use super::dc::{current_brush, current_pen, dc_of};
use super::{get_object, GdiObject, PS_NULL};
use crate::abi::{Bool, FALSE, TRUE};
use crate::win32k::{ColorRef, Hdc, HgdiObj, Point, Rect};

/// FillRect - fill with an explicit brush, ignoring the DC selection.
pub unsafe extern "win64" fn FillRect(hdc: Hdc, rect: *const Rect, brush: HgdiObj) -> i32 {
    if rect.is_null() {
        return 0;
    }
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return 0,
    };
    let brush = match get_object(brush) {
        Some(GdiObject::Brush(b)) => b,
        _ => return 0,
    };
    if brush.null {
        return 1;
    }
    let dc = dc.lock().unwrap();
    dc.target.lock().unwrap().fill(&*rect, brush.color);
    1
}

/// Rectangle - outline with the current pen, interior with the current
/// brush.
pub unsafe extern "win64" fn Rectangle(hdc: Hdc, left: i32, top: i32, right: i32, bottom: i32) -> Bool {
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return FALSE,
    };
    let dc = dc.lock().unwrap();
    let pen = current_pen(&dc);
    let brush = current_brush(&dc);
    let mut surface = dc.target.lock().unwrap();

    if !brush.null {
        surface.fill(
            &Rect::new(left + 1, top + 1, right - 1, bottom - 1),
            brush.color,
        );
    }
    if pen.style != PS_NULL {
        surface.fill(&Rect::new(left, top, right, top + 1), pen.color);
        surface.fill(&Rect::new(left, bottom - 1, right, bottom), pen.color);
        surface.fill(&Rect::new(left, top, left + 1, bottom), pen.color);
        surface.fill(&Rect::new(right - 1, top, right, bottom), pen.color);
    }
    TRUE
}

/// MoveToEx - set the current position, optionally reporting the old
/// one.
pub unsafe extern "win64" fn MoveToEx(hdc: Hdc, x: i32, y: i32, old: *mut Point) -> Bool {
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return FALSE,
    };
    let mut dc = dc.lock().unwrap();
    if !old.is_null() {
        *old = dc.pos;
    }
    dc.pos = Point::new(x, y);
    TRUE
}

/// LineTo - draw from the current position (inclusive) to the target
/// (exclusive), then move the current position there.
pub unsafe extern "win64" fn LineTo(hdc: Hdc, x: i32, y: i32) -> Bool {
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return FALSE,
    };
    let mut dc = dc.lock().unwrap();
    let pen = current_pen(&dc);
    let from = dc.pos;
    let to = Point::new(x, y);
    if pen.style != PS_NULL {
        let mut surface = dc.target.lock().unwrap();
        if from.y == to.y {
            // Horizontal fast path.
            let (a, b) = if from.x <= to.x {
                (from.x, to.x)
            } else {
                (to.x + 1, from.x + 1)
            };
            surface.fill(&Rect::new(a, from.y, b, from.y + 1), pen.color);
        } else if from.x == to.x {
            // Vertical fast path.
            let (a, b) = if from.y <= to.y {
                (from.y, to.y)
            } else {
                (to.y + 1, from.y + 1)
            };
            surface.fill(&Rect::new(from.x, a, from.x + 1, b), pen.color);
        } else {
            // Bresenham.
            let (mut x0, mut y0) = (from.x, from.y);
            let dx = (to.x - x0).abs();
            let dy = -(to.y - y0).abs();
            let sx = if x0 < to.x { 1 } else { -1 };
            let sy = if y0 < to.y { 1 } else { -1 };
            let mut err = dx + dy;
            // The end point is excluded, matching the fast paths.
            while !(x0 == to.x && y0 == to.y) {
                surface.set(x0, y0, pen.color);
                let e2 = 2 * err;
                if e2 >= dy {
                    err += dy;
                    x0 += sx;
                }
                if e2 <= dx {
                    err += dx;
                    y0 += sy;
                }
            }
        }
    }
    dc.pos = to;
    TRUE
}

/// SetPixel - returns the color actually stored.
pub unsafe extern "win64" fn SetPixel(hdc: Hdc, x: i32, y: i32, color: ColorRef) -> ColorRef {
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return super::dc::CLR_INVALID,
    };
    let dc = dc.lock().unwrap();
    let mut surface = dc.target.lock().unwrap();
    surface.set(x, y, color);
    surface.get(x, y).unwrap_or(super::dc::CLR_INVALID)
}

/// GetPixel - CLR_INVALID outside the surface.
pub unsafe extern "win64" fn GetPixel(hdc: Hdc, x: i32, y: i32) -> ColorRef {
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return super::dc::CLR_INVALID,
    };
    let dc = dc.lock().unwrap();
    let color = dc.target.lock().unwrap().get(x, y);
    color.unwrap_or(super::dc::CLR_INVALID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::win32k::gdi::dc::{
        CreateCompatibleBitmap, CreateCompatibleDC, CreateSolidBrush, DeleteDC, DeleteObject,
        SelectObject,
    };
    use crate::win32k::rgb;

    unsafe fn memory_dc(w: i32, h: i32) -> (Hdc, HgdiObj) {
        let hdc = CreateCompatibleDC(0);
        let bmp = CreateCompatibleBitmap(hdc, w, h);
        SelectObject(hdc, bmp);
        (hdc, bmp)
    }

    #[test]
    fn test_fill_rect_with_brush() {
        unsafe {
            let (hdc, bmp) = memory_dc(8, 8);
            let red = CreateSolidBrush(rgb(255, 0, 0));
            let r = Rect::new(2, 2, 6, 6);
            assert_eq!(FillRect(hdc, &r, red), 1);
            assert_eq!(GetPixel(hdc, 2, 2), rgb(255, 0, 0));
            assert_eq!(GetPixel(hdc, 5, 5), rgb(255, 0, 0));
            assert_eq!(GetPixel(hdc, 6, 6), 0);
            DeleteObject(red);
            DeleteObject(bmp);
            DeleteDC(hdc);
        }
    }

    #[test]
    fn test_horizontal_and_diagonal_lines() {
        unsafe {
            let (hdc, bmp) = memory_dc(10, 10);
            MoveToEx(hdc, 0, 0, std::ptr::null_mut());
            LineTo(hdc, 9, 0);
            // Pen default is stock black; black on black surface is
            // invisible, so draw with a colored pen.
            let pen = super::super::dc::CreatePen(super::super::PS_SOLID, 1, rgb(0, 255, 0));
            SelectObject(hdc, pen);
            MoveToEx(hdc, 0, 0, std::ptr::null_mut());
            LineTo(hdc, 9, 9);
            for i in 0..9 {
                assert_eq!(GetPixel(hdc, i, i), rgb(0, 255, 0), "diagonal at {i}");
            }
            DeleteObject(pen);
            DeleteObject(bmp);
            DeleteDC(hdc);
        }
    }

    #[test]
    fn test_set_pixel_round_trip() {
        unsafe {
            let (hdc, bmp) = memory_dc(4, 4);
            assert_eq!(SetPixel(hdc, 1, 1, rgb(9, 8, 7)), rgb(9, 8, 7));
            assert_eq!(GetPixel(hdc, 1, 1), rgb(9, 8, 7));
            assert_eq!(GetPixel(hdc, 100, 100), super::super::dc::CLR_INVALID);
            DeleteObject(bmp);
            DeleteDC(hdc);
        }
    }
}
