//! Window Classes
//!
//! A class is registered by name and carries the window procedure plus
//! per-class defaults. The registry is write-once, read-many: only
//! `RegisterClassA` takes the write lock.

use crate::abi::{Dword, LParam, LResult, WParam, Word};
use crate::status::{self, ERROR_CLASS_ALREADY_EXISTS, ERROR_INVALID_PARAMETER};
use crate::win32k::{HgdiObj, Hwnd};
use spin::RwLock;
use std::collections::HashMap;
use std::os::raw::{c_char, c_void};
use std::sync::atomic::{AtomicU16, Ordering};

/// Window procedure, Microsoft x64 convention.
pub type WndProc = unsafe extern "win64" fn(Hwnd, u32, WParam, LParam) -> LResult;

/// WNDCLASSA layout.
#[repr(C)]
pub struct WndClassA {
    pub style: Dword,
    pub lpfnWndProc: Option<WndProc>,
    pub cbClsExtra: i32,
    pub cbWndExtra: i32,
    pub hInstance: *mut c_void,
    pub hIcon: *mut c_void,
    pub hCursor: *mut c_void,
    pub hbrBackground: HgdiObj,
    pub lpszMenuName: *const c_char,
    pub lpszClassName: *const c_char,
}

/// Registered class state.
#[derive(Clone)]
pub struct ClassEntry {
    pub atom: Word,
    pub wndproc: WndProc,
    pub class_extra: i32,
    pub window_extra: i32,
    pub background: HgdiObj,
}

static CLASSES: spin::Lazy<RwLock<HashMap<String, ClassEntry>>> =
    spin::Lazy::new(|| RwLock::new(HashMap::new()));
static NEXT_ATOM: AtomicU16 = AtomicU16::new(0xC000);

/// Look up a registered class.
pub fn find_class(name: &str) -> Option<ClassEntry> {
    CLASSES.read().get(name).cloned()
}

/// RegisterClassA - register a window class; duplicate names are
/// rejected.
pub unsafe extern "win64" fn RegisterClassA(class: *const WndClassA) -> Word {
    if class.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return 0;
    }
    let class = &*class;
    let name = match crate::abi::cstr_arg(class.lpszClassName) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return 0;
        }
    };
    let wndproc = match class.lpfnWndProc {
        Some(p) => p,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return 0;
        }
    };
    let mut classes = CLASSES.write();
    if classes.contains_key(&name) {
        status::set_last_error(ERROR_CLASS_ALREADY_EXISTS);
        return 0;
    }
    let atom = NEXT_ATOM.fetch_add(1, Ordering::Relaxed);
    classes.insert(
        name.clone(),
        ClassEntry {
            atom,
            wndproc,
            class_extra: class.cbClsExtra,
            window_extra: class.cbWndExtra,
            background: class.hbrBackground,
        },
    );
    log::debug!("[USER] class {name:?} registered as atom {atom:#x}");
    atom
}
