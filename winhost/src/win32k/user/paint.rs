//! Window Painting
//!
//! A window accumulates an invalid region. Repaint happens between
//! `BeginPaint` and `EndPaint`: `BeginPaint` atomically hands out a
//! device context for the invalid region and clears it; `EndPaint`
//! releases the context. Outside a paint pair the window is not painted.

use super::message::WM_PAINT;
use super::window::{window_of, Window};
use crate::abi::{Bool, FALSE, TRUE};
use crate::status::{self, ERROR_INVALID_PARAMETER, ERROR_INVALID_WINDOW_HANDLE};
use crate::win32k::gdi::{self, dc};
use crate::win32k::{Hdc, Hwnd, Rect};

/// PAINTSTRUCT layout.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct PaintStruct {
    pub hdc: Hdc,
    pub fErase: Bool,
    pub rcPaint: Rect,
    pub fRestore: Bool,
    pub fIncUpdate: Bool,
    pub rgbReserved: [u8; 32],
}

/// Union `rect` (or the whole client area) into the invalid region.
pub(crate) fn invalidate(window: &Window, rect: Option<Rect>) {
    let client = {
        let r = window.rect.lock().unwrap();
        Rect::new(0, 0, r.width(), r.height())
    };
    let add = rect.map_or(client, |r| r.intersect(&client));
    if add.is_empty() {
        return;
    }
    let mut invalid = window.invalid.lock().unwrap();
    *invalid = Some(invalid.map_or(add, |cur| cur.union(&add)));
}

/// InvalidateRect - mark part of the client area as needing paint. A
/// null rectangle invalidates everything.
pub unsafe extern "win64" fn InvalidateRect(hwnd: Hwnd, rect: *const Rect, _erase: Bool) -> Bool {
    match window_of(hwnd) {
        Some(w) => {
            invalidate(&w, if rect.is_null() { None } else { Some(*rect) });
            TRUE
        }
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            FALSE
        }
    }
}

/// UpdateWindow - deliver WM_PAINT synchronously if anything is invalid.
pub unsafe extern "win64" fn UpdateWindow(hwnd: Hwnd) -> Bool {
    let window = match window_of(hwnd) {
        Some(w) => w,
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            return FALSE;
        }
    };
    let pending = window.invalid.lock().unwrap().is_some();
    if pending {
        (window.wndproc)(hwnd, WM_PAINT, 0, 0);
    }
    TRUE
}

/// BeginPaint - atomically take the invalid region and hand out a DC for
/// the window's client bitmap. The background is erased with the class
/// brush when one is set.
pub unsafe extern "win64" fn BeginPaint(hwnd: Hwnd, out: *mut PaintStruct) -> Hdc {
    if out.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return 0;
    }
    let window = match window_of(hwnd) {
        Some(w) => w,
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            return 0;
        }
    };
    let taken = window.invalid.lock().unwrap().take();
    let paint_rect = taken.unwrap_or_default();
    let hdc = dc::create_dc_on(window.surface.clone());

    let mut erased = FALSE;
    if !paint_rect.is_empty() {
        if let Some(gdi::GdiObject::Brush(brush)) = gdi::get_object(window.background) {
            if !brush.null {
                window.surface.lock().unwrap().fill(&paint_rect, brush.color);
                erased = TRUE;
            }
        }
    }

    *out = PaintStruct {
        hdc,
        fErase: erased,
        rcPaint: paint_rect,
        fRestore: FALSE,
        fIncUpdate: FALSE,
        rgbReserved: [0; 32],
    };
    hdc
}

/// EndPaint - release the paint DC.
pub unsafe extern "win64" fn EndPaint(hwnd: Hwnd, ps: *const PaintStruct) -> Bool {
    if ps.is_null() || window_of(hwnd).is_none() {
        return FALSE;
    }
    dc::ReleaseDC(hwnd, (*ps).hdc);
    TRUE
}

/// ValidateRect - drop the invalid region without painting.
pub unsafe extern "win64" fn ValidateRect(hwnd: Hwnd, _rect: *const Rect) -> Bool {
    match window_of(hwnd) {
        Some(w) => {
            *w.invalid.lock().unwrap() = None;
            TRUE
        }
        None => FALSE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{LParam, LResult, WParam};
    use crate::win32k::user::class::{RegisterClassA, WndClassA};
    use crate::win32k::user::window::{CreateWindowExA, DefWindowProcA, DestroyWindow};
    use std::ffi::CString;
    use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

    static PAINTS: AtomicU32 = AtomicU32::new(0);
    static LAST_LEFT: AtomicI32 = AtomicI32::new(-1);
    static LAST_RIGHT: AtomicI32 = AtomicI32::new(-1);

    unsafe extern "win64" fn painting_proc(
        hwnd: Hwnd,
        msg: u32,
        w: WParam,
        l: LParam,
    ) -> LResult {
        if msg == WM_PAINT {
            PAINTS.fetch_add(1, Ordering::SeqCst);
            let mut ps = PaintStruct::default();
            let hdc = BeginPaint(hwnd, &mut ps);
            assert_ne!(hdc, 0);
            LAST_LEFT.store(ps.rcPaint.left, Ordering::SeqCst);
            LAST_RIGHT.store(ps.rcPaint.right, Ordering::SeqCst);
            EndPaint(hwnd, &ps);
            return 0;
        }
        DefWindowProcA(hwnd, msg, w, l)
    }

    fn make_window() -> Hwnd {
        let name = CString::new("PaintClass").unwrap();
        let wc = WndClassA {
            style: 0,
            lpfnWndProc: Some(painting_proc),
            cbClsExtra: 0,
            cbWndExtra: 0,
            hInstance: std::ptr::null_mut(),
            hIcon: std::ptr::null_mut(),
            hCursor: std::ptr::null_mut(),
            hbrBackground: 0,
            lpszMenuName: std::ptr::null(),
            lpszClassName: name.as_ptr(),
        };
        unsafe {
            RegisterClassA(&wc);
            CreateWindowExA(
                0,
                name.as_ptr(),
                std::ptr::null(),
                0,
                0,
                0,
                100,
                80,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        }
    }

    #[test]
    fn test_invalidate_update_paints_exactly_once() {
        let hwnd = make_window();
        assert_ne!(hwnd, 0);
        unsafe {
            let before = PAINTS.load(Ordering::SeqCst);
            let r = Rect::new(10, 10, 30, 20);
            assert_eq!(InvalidateRect(hwnd, &r, FALSE), TRUE);
            assert_eq!(UpdateWindow(hwnd), TRUE);
            assert_eq!(PAINTS.load(Ordering::SeqCst), before + 1);
            // The paint rectangle covered the requested one.
            assert!(LAST_LEFT.load(Ordering::SeqCst) <= 10);
            assert!(LAST_RIGHT.load(Ordering::SeqCst) >= 30);

            // Region was cleared by BeginPaint: a second update is a
            // no-op.
            assert_eq!(UpdateWindow(hwnd), TRUE);
            assert_eq!(PAINTS.load(Ordering::SeqCst), before + 1);
            DestroyWindow(hwnd);
        }
    }

    #[test]
    fn test_invalid_regions_accumulate() {
        let hwnd = make_window();
        unsafe {
            InvalidateRect(hwnd, &Rect::new(0, 0, 10, 10), FALSE);
            InvalidateRect(hwnd, &Rect::new(50, 50, 60, 60), FALSE);
            UpdateWindow(hwnd);
            assert!(LAST_LEFT.load(Ordering::SeqCst) <= 0);
            assert!(LAST_RIGHT.load(Ordering::SeqCst) >= 60);
            DestroyWindow(hwnd);
        }
    }
}
