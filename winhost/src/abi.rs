//! Guest ABI Scalar Types
//!
//! The Windows type vocabulary used by every exported entry point. These
//! are plain aliases, not newtypes: the guest sees raw integers and
//! pointers, and the shims are the only code that touches them.
//!
//! Entry points are declared `extern "win64"` so the compiler emits the
//! Microsoft x64 convention (four register arguments, caller-reserved
//! 32-byte shadow area) regardless of the host's native C convention.

use std::ffi::CStr;
use std::os::raw::c_char;

/// 32-bit Windows BOOL. Zero is failure, anything else is success.
pub type Bool = i32;
/// BOOL true value.
pub const TRUE: Bool = 1;
/// BOOL false value.
pub const FALSE: Bool = 0;

/// 32-bit unsigned (DWORD).
pub type Dword = u32;
/// 16-bit unsigned (WORD).
pub type Word = u16;

/// Pointer-sized unsigned message argument (WPARAM).
pub type WParam = usize;
/// Pointer-sized signed message argument (LPARAM).
pub type LParam = isize;
/// Pointer-sized signed window-procedure result (LRESULT).
pub type LResult = isize;

/// Opaque pointer-sized handle.
///
/// Table-backed handles are small positive integers; pseudo-handles live
/// far outside that range and never enter the table.
pub type Handle = usize;

/// The reserved "invalid" handle sentinel.
pub const INVALID_HANDLE_VALUE: Handle = usize::MAX;

/// Structured 32-bit result code (severity, facility, code).
pub type HResult = i32;

/// Read a NUL-terminated guest string argument.
///
/// Returns `None` for a null pointer or non-UTF-8 bytes; the caller turns
/// that into its contractual failure channel.
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated buffer readable by the
/// host.
pub unsafe fn cstr_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Copy `src` into a guest buffer of `cap` bytes, always NUL-terminated.
///
/// Returns the number of bytes copied, excluding the terminator. Truncates
/// silently like the APIs it backs.
///
/// # Safety
/// `dst` must be valid for writes of `cap` bytes.
pub unsafe fn copy_out_cstr(src: &str, dst: *mut c_char, cap: usize) -> usize {
    if dst.is_null() || cap == 0 {
        return 0;
    }
    let n = src.len().min(cap - 1);
    std::ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, n);
    *dst.add(n) = 0;
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_char;

    #[test]
    fn test_cstr_arg_null() {
        unsafe {
            assert_eq!(cstr_arg(std::ptr::null()), None);
        }
    }

    #[test]
    fn test_copy_out_truncates() {
        let mut buf = [0 as c_char; 4];
        let n = unsafe { copy_out_cstr("hello", buf.as_mut_ptr(), buf.len()) };
        assert_eq!(n, 3);
        assert_eq!(buf[3], 0);
    }
}
