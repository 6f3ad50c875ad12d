//! Windows
//!
//! Window objects: class reference, parent/child links, rectangle, style
//! bits, user data and the paint-invalid region. `CreateWindowExA` runs
//! the window procedure's creation message synchronously before
//! returning; the procedure may reject the window.

use crate::abi::{Bool, Dword, LParam, LResult, WParam, FALSE, TRUE};
use crate::ke::thread::current_tid;
use crate::status::{self, ERROR_INVALID_PARAMETER, ERROR_INVALID_WINDOW_HANDLE};
use crate::win32k::gdi::surface::Surface;
use crate::win32k::user::class::{self, WndProc};
use crate::win32k::user::message::{self, WM_CREATE, WM_DESTROY, WM_KILLFOCUS, WM_SETFOCUS};
use crate::win32k::{Hwnd, Rect};
use spin::RwLock;
use std::os::raw::{c_char, c_void};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};

// Style bits.
pub const WS_OVERLAPPED: Dword = 0x0000_0000;
pub const WS_CHILD: Dword = 0x4000_0000;
pub const WS_VISIBLE: Dword = 0x1000_0000;

/// `CreateWindowExA` position/size wildcard.
pub const CW_USEDEFAULT: i32 = 0x8000_0000_u32 as i32;

const DEFAULT_WIDTH: i32 = 640;
const DEFAULT_HEIGHT: i32 = 480;

/// A window. Shared behind `Arc`; mutable pieces carry their own locks.
pub struct Window {
    pub hwnd: Hwnd,
    pub class_name: String,
    pub wndproc: WndProc,
    pub style: Dword,
    pub parent: Hwnd,
    pub owner_tid: u32,
    pub background: crate::win32k::HgdiObj,
    pub children: Mutex<Vec<Hwnd>>,
    pub rect: Mutex<Rect>,
    pub user_data: AtomicIsize,
    /// Client-area raster target shared with GDI.
    pub surface: Arc<Mutex<Surface>>,
    /// Paint-invalid region, atomically taken by `BeginPaint`.
    pub invalid: Mutex<Option<Rect>>,
}

static WINDOWS: spin::Lazy<RwLock<Vec<Option<Arc<Window>>>>> =
    spin::Lazy::new(|| RwLock::new(Vec::new()));

/// Resolve a window handle.
pub fn window_of(hwnd: Hwnd) -> Option<Arc<Window>> {
    if hwnd == 0 {
        return None;
    }
    WINDOWS.read().get(hwnd - 1).cloned().flatten()
}

fn insert_window(make: impl FnOnce(Hwnd) -> Window) -> Arc<Window> {
    let mut windows = WINDOWS.write();
    let index = windows.iter().position(Option::is_none).unwrap_or_else(|| {
        windows.push(None);
        windows.len() - 1
    });
    let arc = Arc::new(make(index + 1));
    windows[index] = Some(arc.clone());
    arc
}

fn remove_window(hwnd: Hwnd) {
    let mut windows = WINDOWS.write();
    if let Some(slot) = windows.get_mut(hwnd - 1) {
        *slot = None;
    }
}

// ============================================================================
// Creation / destruction
// ============================================================================

/// CreateWindowExA - allocate a window of a registered class and deliver
/// WM_CREATE synchronously. A procedure returning -1 rejects the window.
pub unsafe extern "win64" fn CreateWindowExA(
    _ex_style: Dword,
    class_name: *const c_char,
    _window_name: *const c_char,
    style: Dword,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: Hwnd,
    _menu: *mut c_void,
    _instance: *mut c_void,
    _param: *mut c_void,
) -> Hwnd {
    let class_name = match crate::abi::cstr_arg(class_name) {
        Some(n) => n,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return 0;
        }
    };
    let entry = match class::find_class(class_name) {
        Some(e) => e,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return 0;
        }
    };
    // Make sure this thread has a queue before any message traffic.
    let _ = message::current_queue();

    let x = if x == CW_USEDEFAULT { 0 } else { x };
    let y = if y == CW_USEDEFAULT { 0 } else { y };
    let width = if width == CW_USEDEFAULT || width <= 0 {
        DEFAULT_WIDTH
    } else {
        width
    };
    let height = if height == CW_USEDEFAULT || height <= 0 {
        DEFAULT_HEIGHT
    } else {
        height
    };

    let window = insert_window(|hwnd| Window {
        hwnd,
        class_name: class_name.to_string(),
        wndproc: entry.wndproc,
        style,
        parent,
        owner_tid: current_tid(),
        background: entry.background,
        children: Mutex::new(Vec::new()),
        rect: Mutex::new(Rect::new(x, y, x + width, y + height)),
        user_data: AtomicIsize::new(0),
        surface: Arc::new(Mutex::new(Surface::new(width, height))),
        invalid: Mutex::new(None),
    });
    let hwnd = window.hwnd;
    if let Some(parent_window) = window_of(parent) {
        parent_window.children.lock().unwrap().push(hwnd);
    }

    // Synchronous creation message; the procedure may reject.
    if (entry.wndproc)(hwnd, WM_CREATE, 0, 0) == -1 {
        remove_window(hwnd);
        log::debug!("[USER] window {hwnd} rejected at WM_CREATE");
        return 0;
    }

    if style & WS_VISIBLE != 0 {
        super::paint::invalidate(&window, None);
    }
    log::debug!("[USER] window {hwnd} created ({class_name:?}, {width}x{height})");
    hwnd
}

/// DestroyWindow - children first, then WM_DESTROY, then the table slot.
pub unsafe extern "win64" fn DestroyWindow(hwnd: Hwnd) -> Bool {
    let window = match window_of(hwnd) {
        Some(w) => w,
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            return FALSE;
        }
    };
    let children: Vec<Hwnd> = window.children.lock().unwrap().drain(..).collect();
    for child in children {
        DestroyWindow(child);
    }
    (window.wndproc)(hwnd, WM_DESTROY, 0, 0);
    if let Some(parent) = window_of(window.parent) {
        parent.children.lock().unwrap().retain(|&c| c != hwnd);
    }
    remove_window(hwnd);
    log::debug!("[USER] window {hwnd} destroyed");
    TRUE
}

/// ShowWindow - only the invalidation side effect matters here.
pub unsafe extern "win64" fn ShowWindow(hwnd: Hwnd, _cmd_show: i32) -> Bool {
    match window_of(hwnd) {
        Some(w) => {
            super::paint::invalidate(&w, None);
            TRUE
        }
        None => FALSE,
    }
}

/// DefWindowProcA - the default disposition for unhandled messages.
pub unsafe extern "win64" fn DefWindowProcA(
    hwnd: Hwnd,
    message: u32,
    _wparam: WParam,
    _lparam: LParam,
) -> LResult {
    match message {
        message::WM_CLOSE => {
            DestroyWindow(hwnd);
            0
        }
        message::WM_PAINT => {
            // Validate: nothing to draw by default.
            if let Some(w) = window_of(hwnd) {
                *w.invalid.lock().unwrap() = None;
            }
            0
        }
        message::WM_ERASEBKGND => 1,
        _ => 0,
    }
}

// ============================================================================
// Geometry and user data
// ============================================================================

/// GetClientRect - client area in client coordinates (origin zero).
pub unsafe extern "win64" fn GetClientRect(hwnd: Hwnd, out: *mut Rect) -> Bool {
    if out.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    match window_of(hwnd) {
        Some(w) => {
            let r = *w.rect.lock().unwrap();
            *out = Rect::new(0, 0, r.width(), r.height());
            TRUE
        }
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            FALSE
        }
    }
}

/// `GetWindowLongPtrA` index for the user-data slot.
pub const GWLP_USERDATA: i32 = -21;

/// SetWindowLongPtrA - only the user-data slot is writable here.
pub unsafe extern "win64" fn SetWindowLongPtrA(hwnd: Hwnd, index: i32, value: isize) -> isize {
    if index != GWLP_USERDATA {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return 0;
    }
    match window_of(hwnd) {
        Some(w) => w.user_data.swap(value, Ordering::AcqRel),
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            0
        }
    }
}

/// GetWindowLongPtrA - read the user-data slot.
pub unsafe extern "win64" fn GetWindowLongPtrA(hwnd: Hwnd, index: i32) -> isize {
    if index != GWLP_USERDATA {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return 0;
    }
    match window_of(hwnd) {
        Some(w) => w.user_data.load(Ordering::Acquire),
        None => {
            status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
            0
        }
    }
}

// ============================================================================
// Focus
// ============================================================================

/// SetFocus - one focus window per thread; the previous and new windows
/// get lose/gain messages.
pub unsafe extern "win64" fn SetFocus(hwnd: Hwnd) -> Hwnd {
    if hwnd != 0 && window_of(hwnd).is_none() {
        status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
        return 0;
    }
    let queue = message::current_queue();
    let previous = {
        let mut inner = queue.inner.lock().unwrap();
        std::mem::replace(&mut inner.focus, hwnd)
    };
    if previous != 0 && previous != hwnd {
        if let Some(w) = window_of(previous) {
            (w.wndproc)(previous, WM_KILLFOCUS, hwnd, 0);
        }
    }
    if hwnd != 0 && previous != hwnd {
        if let Some(w) = window_of(hwnd) {
            (w.wndproc)(hwnd, WM_SETFOCUS, previous, 0);
        }
    }
    previous
}

/// GetFocus - the calling thread's focus window.
pub unsafe extern "win64" fn GetFocus() -> Hwnd {
    let queue = message::current_queue();
    let inner = queue.inner.lock().unwrap();
    inner.focus
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::win32k::user::class::{RegisterClassA, WndClassA};
    use std::ffi::CString;
    use std::sync::atomic::AtomicU32;

    static CREATE_COUNT: AtomicU32 = AtomicU32::new(0);
    static DESTROY_COUNT: AtomicU32 = AtomicU32::new(0);

    unsafe extern "win64" fn counting_proc(
        hwnd: Hwnd,
        msg: u32,
        w: WParam,
        l: LParam,
    ) -> LResult {
        match msg {
            WM_CREATE => {
                CREATE_COUNT.fetch_add(1, Ordering::SeqCst);
                0
            }
            WM_DESTROY => {
                DESTROY_COUNT.fetch_add(1, Ordering::SeqCst);
                0
            }
            _ => DefWindowProcA(hwnd, msg, w, l),
        }
    }

    unsafe extern "win64" fn rejecting_proc(
        _hwnd: Hwnd,
        msg: u32,
        _w: WParam,
        _l: LParam,
    ) -> LResult {
        if msg == WM_CREATE {
            -1
        } else {
            0
        }
    }

    fn register(name: &str, proc_: WndProc) -> CString {
        let cname = CString::new(name).unwrap();
        let wc = WndClassA {
            style: 0,
            lpfnWndProc: Some(proc_),
            cbClsExtra: 0,
            cbWndExtra: 0,
            hInstance: std::ptr::null_mut(),
            hIcon: std::ptr::null_mut(),
            hCursor: std::ptr::null_mut(),
            hbrBackground: 0,
            lpszMenuName: std::ptr::null(),
            lpszClassName: cname.as_ptr(),
        };
        unsafe {
            assert_ne!(RegisterClassA(&wc), 0);
        }
        cname
    }

    #[test]
    fn test_create_destroy_exactly_once_in_order() {
        let name = register("LifecycleClass", counting_proc);
        unsafe {
            let hwnd = CreateWindowExA(
                0,
                name.as_ptr(),
                std::ptr::null(),
                0,
                0,
                0,
                100,
                100,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );
            assert_ne!(hwnd, 0);
            assert_eq!(CREATE_COUNT.load(Ordering::SeqCst), 1);
            assert_eq!(DESTROY_COUNT.load(Ordering::SeqCst), 0);
            assert_eq!(DestroyWindow(hwnd), TRUE);
            assert_eq!(DESTROY_COUNT.load(Ordering::SeqCst), 1);
            assert!(window_of(hwnd).is_none());
        }
    }

    #[test]
    fn test_rejected_creation_returns_null() {
        let name = register("RejectingClass", rejecting_proc);
        unsafe {
            let hwnd = CreateWindowExA(
                0,
                name.as_ptr(),
                std::ptr::null(),
                0,
                0,
                0,
                10,
                10,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );
            assert_eq!(hwnd, 0);
        }
    }

    #[test]
    fn test_client_rect_origin_zero() {
        let name = register("RectClass", counting_proc);
        unsafe {
            let hwnd = CreateWindowExA(
                0,
                name.as_ptr(),
                std::ptr::null(),
                0,
                50,
                60,
                200,
                100,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );
            let mut rect = Rect::default();
            assert_eq!(GetClientRect(hwnd, &mut rect), TRUE);
            assert_eq!(rect, Rect::new(0, 0, 200, 100));
            DestroyWindow(hwnd);
        }
    }

    #[test]
    fn test_focus_messages() {
        std::thread::spawn(|| {
            let name = register("FocusClass", counting_proc);
            unsafe {
                let a = CreateWindowExA(
                    0,
                    name.as_ptr(),
                    std::ptr::null(),
                    0,
                    0,
                    0,
                    10,
                    10,
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                );
                let b = CreateWindowExA(
                    0,
                    name.as_ptr(),
                    std::ptr::null(),
                    0,
                    0,
                    0,
                    10,
                    10,
                    0,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                );
                assert_eq!(SetFocus(a), 0);
                assert_eq!(GetFocus(), a);
                assert_eq!(SetFocus(b), a);
                assert_eq!(GetFocus(), b);
                DestroyWindow(a);
                DestroyWindow(b);
            }
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_user_data_round_trip() {
        let name = register("UserDataClass", counting_proc);
        unsafe {
            let hwnd = CreateWindowExA(
                0,
                name.as_ptr(),
                std::ptr::null(),
                0,
                0,
                0,
                10,
                10,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            );
            assert_eq!(SetWindowLongPtrA(hwnd, GWLP_USERDATA, 1234), 0);
            assert_eq!(GetWindowLongPtrA(hwnd, GWLP_USERDATA), 1234);
            DestroyWindow(hwnd);
        }
    }
}
