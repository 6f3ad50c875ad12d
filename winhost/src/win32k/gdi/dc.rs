//! Device Contexts
//!
//! A DC carries the selected pen/brush/font/bitmap, text colors and the
//! current position, and targets either a window's client bitmap or an
//! off-screen memory bitmap. DCs are owned by the thread that acquired
//! them; cross-thread use is not supported.

use super::surface::Surface;
use super::{
    get_object, insert_object, remove_object, Brush, DcState, FontSel, GdiObject, Pen, OPAQUE,
    PS_SOLID,
};
use crate::abi::{Bool, FALSE, TRUE};
use crate::win32k::user::window;
use crate::win32k::{rgb, ColorRef, Hdc, HgdiObj, Hwnd, Point};
use std::sync::{Arc, Mutex, OnceLock};

/// `SetTextColor` / `SetBkColor` failure sentinel (CLR_INVALID).
pub const CLR_INVALID: ColorRef = 0xFFFF_FFFF;

// The screen surface behind GetDC(0).
static SCREEN: OnceLock<Arc<Mutex<Surface>>> = OnceLock::new();

fn screen_surface() -> Arc<Mutex<Surface>> {
    SCREEN
        .get_or_init(|| Arc::new(Mutex::new(Surface::new(640, 480))))
        .clone()
}

/// Create a DC drawing onto `target` with default selections.
pub(crate) fn create_dc_on(target: Arc<Mutex<Surface>>) -> Hdc {
    insert_object(GdiObject::Dc(Arc::new(Mutex::new(DcState {
        target,
        pen: unsafe { super::GetStockObject(super::BLACK_PEN) },
        brush: unsafe { super::GetStockObject(super::WHITE_BRUSH) },
        font: unsafe { super::GetStockObject(super::SYSTEM_FONT) },
        bitmap: 0,
        text_color: rgb(0, 0, 0),
        bk_color: rgb(255, 255, 255),
        bk_mode: OPAQUE,
        pos: Point::default(),
    }))))
}

/// The DC state behind a handle.
pub(crate) fn dc_of(hdc: Hdc) -> Option<Arc<Mutex<DcState>>> {
    match get_object(hdc) {
        Some(GdiObject::Dc(dc)) => Some(dc),
        _ => None,
    }
}

// ============================================================================
// Acquisition / release
// ============================================================================

/// GetDC - a context on the window's client bitmap (or the screen for a
/// null window).
pub unsafe extern "win64" fn GetDC(hwnd: Hwnd) -> Hdc {
    let target = if hwnd == 0 {
        screen_surface()
    } else {
        match window::window_of(hwnd) {
            Some(w) => w.surface.clone(),
            None => return 0,
        }
    };
    create_dc_on(target)
}

/// ReleaseDC - drop a context acquired with `GetDC`.
pub unsafe extern "win64" fn ReleaseDC(_hwnd: Hwnd, hdc: Hdc) -> i32 {
    i32::from(remove_object(hdc))
}

/// CreateCompatibleDC - a memory context with a 1x1 default bitmap.
pub unsafe extern "win64" fn CreateCompatibleDC(_hdc: Hdc) -> Hdc {
    create_dc_on(Arc::new(Mutex::new(Surface::new(1, 1))))
}

/// DeleteDC - drop a memory context.
pub unsafe extern "win64" fn DeleteDC(hdc: Hdc) -> Bool {
    if remove_object(hdc) {
        TRUE
    } else {
        FALSE
    }
}

/// CreateCompatibleBitmap - an off-screen bitmap sized for a memory DC.
pub unsafe extern "win64" fn CreateCompatibleBitmap(_hdc: Hdc, width: i32, height: i32) -> HgdiObj {
    insert_object(GdiObject::Bitmap(Arc::new(Mutex::new(Surface::new(
        width, height,
    )))))
}

/// CreateSolidBrush - a brush painting one color.
pub unsafe extern "win64" fn CreateSolidBrush(color: ColorRef) -> HgdiObj {
    insert_object(GdiObject::Brush(Brush { color, null: false }))
}

/// CreatePen - a pen with style, width and color.
pub unsafe extern "win64" fn CreatePen(style: u32, width: i32, color: ColorRef) -> HgdiObj {
    insert_object(GdiObject::Pen(Pen {
        style,
        width: width.max(1),
        color,
    }))
}

/// DeleteObject - drop a pen/brush/font/bitmap. Stock objects survive.
pub unsafe extern "win64" fn DeleteObject(obj: HgdiObj) -> Bool {
    if remove_object(obj) {
        TRUE
    } else {
        FALSE
    }
}

// ============================================================================
// Selection and attributes
// ============================================================================

/// SelectObject - install an object into its slot, returning the
/// previous occupant. Selecting a bitmap retargets the DC.
pub unsafe extern "win64" fn SelectObject(hdc: Hdc, obj: HgdiObj) -> HgdiObj {
    let dc = match dc_of(hdc) {
        Some(d) => d,
        None => return 0,
    };
    let incoming = match get_object(obj) {
        Some(o) => o,
        None => return 0,
    };
    let mut dc = dc.lock().unwrap();
    match incoming {
        GdiObject::Pen(_) => std::mem::replace(&mut dc.pen, obj),
        GdiObject::Brush(_) => std::mem::replace(&mut dc.brush, obj),
        GdiObject::Font(_) => std::mem::replace(&mut dc.font, obj),
        GdiObject::Bitmap(surface) => {
            dc.target = surface;
            std::mem::replace(&mut dc.bitmap, obj)
        }
        GdiObject::Dc(_) => 0,
    }
}

/// SetTextColor - returns the previous color.
pub unsafe extern "win64" fn SetTextColor(hdc: Hdc, color: ColorRef) -> ColorRef {
    match dc_of(hdc) {
        Some(dc) => {
            let mut dc = dc.lock().unwrap();
            std::mem::replace(&mut dc.text_color, color)
        }
        None => CLR_INVALID,
    }
}

/// SetBkColor - returns the previous background color.
pub unsafe extern "win64" fn SetBkColor(hdc: Hdc, color: ColorRef) -> ColorRef {
    match dc_of(hdc) {
        Some(dc) => {
            let mut dc = dc.lock().unwrap();
            std::mem::replace(&mut dc.bk_color, color)
        }
        None => CLR_INVALID,
    }
}

/// SetBkMode - TRANSPARENT or OPAQUE; returns the previous mode.
pub unsafe extern "win64" fn SetBkMode(hdc: Hdc, mode: i32) -> i32 {
    if mode != super::TRANSPARENT && mode != OPAQUE {
        return 0;
    }
    match dc_of(hdc) {
        Some(dc) => {
            let mut dc = dc.lock().unwrap();
            std::mem::replace(&mut dc.bk_mode, mode)
        }
        None => 0,
    }
}

/// Current pen of a DC, defaulting to solid black.
pub(crate) fn current_pen(dc: &DcState) -> Pen {
    match get_object(dc.pen) {
        Some(GdiObject::Pen(p)) => p,
        _ => Pen {
            style: PS_SOLID,
            width: 1,
            color: 0,
        },
    }
}

/// Current brush of a DC, defaulting to null.
pub(crate) fn current_brush(dc: &DcState) -> Brush {
    match get_object(dc.brush) {
        Some(GdiObject::Brush(b)) => b,
        _ => Brush {
            color: 0,
            null: true,
        },
    }
}

/// Current font of a DC.
pub(crate) fn current_font(dc: &DcState) -> FontSel {
    match get_object(dc.font) {
        Some(GdiObject::Font(f)) => f,
        _ => FontSel { scale: 1 },
    }
}
