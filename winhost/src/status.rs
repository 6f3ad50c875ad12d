//! Status Codes and the Host Error Taxonomy
//!
//! Inside the host, failures travel as [`HostError`] until they reach the
//! component that owns cleanup. At the guest ABI boundary every function
//! reports through its contractual channel instead:
//!
//! - boolean-valued calls store a per-thread last-error code
//! - HRESULT-valued calls encode severity, facility and code
//! - handle-returning calls return a sentinel and store a last-error
//! - direct-integer calls return a negative sentinel
//!
//! Nothing crosses the guest boundary as an unwind.

use crate::abi::{Dword, HResult};
use std::cell::Cell;
use thiserror::Error;

// ============================================================================
// Host error taxonomy
// ============================================================================

/// Internal failure categories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// Input bytes violate the format they claim to be.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// Valid input asking for something the host does not implement.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A table, pool or quota ran out.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    /// The named object does not exist.
    #[error("not found")]
    NotFound,
    /// The object already exists and the caller required otherwise.
    #[error("already exists")]
    AlreadyExists,
    /// The host denied access.
    #[error("permission denied")]
    PermissionDenied,
    /// The host I/O layer failed.
    #[error("i/o failed: {0}")]
    IoFailed(String),
    /// The caller broke a protocol rule (bad argument, bad sequence).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// A deadline expired.
    #[error("timed out")]
    TimedOut,
    /// Non-blocking operation would have blocked.
    #[error("would block")]
    WouldBlock,
    /// The object is not in a state that permits the operation.
    #[error("state invalid: {0}")]
    StateInvalid(String),
    /// The last strong reference was just dropped.
    #[error("last object released")]
    LastObjectReleased,
    /// A path the design says cannot be taken.
    #[error("unreachable: {0}")]
    Unreachable(String),
}

impl HostError {
    /// The Win32 last-error code this category reports at the boundary.
    pub fn win32_code(&self) -> Dword {
        match self {
            HostError::MalformedInput(_) => ERROR_BAD_FORMAT,
            HostError::Unsupported(_) => ERROR_NOT_SUPPORTED,
            HostError::ResourceExhausted(_) => ERROR_NOT_ENOUGH_MEMORY,
            HostError::NotFound => ERROR_FILE_NOT_FOUND,
            HostError::AlreadyExists => ERROR_ALREADY_EXISTS,
            HostError::PermissionDenied => ERROR_ACCESS_DENIED,
            HostError::IoFailed(_) => ERROR_GEN_FAILURE,
            HostError::ProtocolViolation(_) => ERROR_INVALID_PARAMETER,
            HostError::TimedOut => ERROR_TIMEOUT,
            HostError::WouldBlock => ERROR_IO_PENDING,
            HostError::StateInvalid(_) => ERROR_INVALID_FUNCTION,
            HostError::LastObjectReleased => ERROR_INVALID_HANDLE,
            HostError::Unreachable(_) => ERROR_GEN_FAILURE,
        }
    }
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => HostError::NotFound,
            ErrorKind::AlreadyExists => HostError::AlreadyExists,
            ErrorKind::PermissionDenied => HostError::PermissionDenied,
            ErrorKind::WouldBlock => HostError::WouldBlock,
            ErrorKind::TimedOut => HostError::TimedOut,
            _ => HostError::IoFailed(e.to_string()),
        }
    }
}

// ============================================================================
// Win32 error codes
// ============================================================================

pub const ERROR_SUCCESS: Dword = 0;
pub const ERROR_INVALID_FUNCTION: Dword = 1;
pub const ERROR_FILE_NOT_FOUND: Dword = 2;
pub const ERROR_PATH_NOT_FOUND: Dword = 3;
pub const ERROR_ACCESS_DENIED: Dword = 5;
pub const ERROR_INVALID_HANDLE: Dword = 6;
pub const ERROR_NOT_ENOUGH_MEMORY: Dword = 8;
pub const ERROR_BAD_FORMAT: Dword = 11;
pub const ERROR_NO_MORE_FILES: Dword = 18;
pub const ERROR_GEN_FAILURE: Dword = 31;
pub const ERROR_NOT_SUPPORTED: Dword = 50;
pub const ERROR_FILE_EXISTS: Dword = 80;
pub const ERROR_INVALID_PARAMETER: Dword = 87;
pub const ERROR_INSUFFICIENT_BUFFER: Dword = 122;
pub const ERROR_ALREADY_EXISTS: Dword = 183;
pub const ERROR_ENVVAR_NOT_FOUND: Dword = 203;
pub const ERROR_MORE_DATA: Dword = 234;
pub const ERROR_NOT_OWNER: Dword = 288;
pub const ERROR_TOO_MANY_POSTS: Dword = 298;
pub const ERROR_IO_PENDING: Dword = 997;
pub const ERROR_TIMEOUT: Dword = 1460;
pub const ERROR_NOT_ENOUGH_QUOTA: Dword = 1816;
pub const ERROR_INVALID_WINDOW_HANDLE: Dword = 1400;
pub const ERROR_CLASS_ALREADY_EXISTS: Dword = 1410;
pub const ERROR_DIR_NOT_EMPTY: Dword = 145;

// Wait outcomes
pub const WAIT_OBJECT_0: Dword = 0x0000_0000;
pub const WAIT_ABANDONED_0: Dword = 0x0000_0080;
pub const WAIT_TIMEOUT: Dword = 0x0000_0102;
pub const WAIT_FAILED: Dword = 0xFFFF_FFFF;

/// Infinite timeout sentinel.
pub const INFINITE: Dword = 0xFFFF_FFFF;

/// `GetExitCodeThread` result while the thread is running.
pub const STILL_ACTIVE: Dword = 259;

// ============================================================================
// HRESULTs
// ============================================================================

pub const S_OK: HResult = 0;
pub const S_FALSE: HResult = 1;
pub const E_NOTIMPL: HResult = 0x8000_4001_u32 as i32;
pub const E_NOINTERFACE: HResult = 0x8000_4002_u32 as i32;
pub const E_POINTER: HResult = 0x8000_4003_u32 as i32;
pub const E_FAIL: HResult = 0x8000_4005_u32 as i32;
pub const E_OUTOFMEMORY: HResult = 0x8007_000E_u32 as i32;
pub const E_INVALIDARG: HResult = 0x8007_0057_u32 as i32;
pub const CLASS_E_NOAGGREGATION: HResult = 0x8004_0110_u32 as i32;
pub const CLASS_E_CLASSNOTAVAILABLE: HResult = 0x8004_0111_u32 as i32;
pub const RPC_E_CHANGED_MODE: HResult = 0x8001_0106_u32 as i32;
pub const CO_E_NOTINITIALIZED: HResult = 0x8004_01F0_u32 as i32;

/// True when an HRESULT reports success (severity bit clear).
#[inline]
pub fn succeeded(hr: HResult) -> bool {
    hr >= 0
}

/// Wrap a Win32 error code in the Win32 HRESULT facility.
pub fn hresult_from_win32(code: Dword) -> HResult {
    if code == 0 {
        S_OK
    } else {
        ((code & 0xFFFF) | 0x8007_0000) as i32
    }
}

// ============================================================================
// Per-thread last error
// ============================================================================

thread_local! {
    static LAST_ERROR: Cell<Dword> = const { Cell::new(0) };
}

/// Store the calling thread's last-error value.
pub fn set_last_error(code: Dword) {
    LAST_ERROR.with(|e| e.set(code));
}

/// Read the calling thread's last-error value.
pub fn last_error() -> Dword {
    LAST_ERROR.with(|e| e.get())
}

/// Store the boundary code for a taxonomy error.
pub fn set_last_host_error(err: &HostError) {
    set_last_error(err.win32_code());
}

/// GetLastError - read the per-thread last-error value.
pub unsafe extern "win64" fn GetLastError() -> Dword {
    last_error()
}

/// SetLastError - store the per-thread last-error value.
pub unsafe extern "win64" fn SetLastError(code: Dword) {
    set_last_error(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_per_thread() {
        set_last_error(5);
        let other = std::thread::spawn(|| {
            set_last_error(87);
            last_error()
        })
        .join()
        .unwrap();
        assert_eq!(other, 87);
        assert_eq!(last_error(), 5);
    }

    #[test]
    fn test_hresult_from_win32() {
        assert_eq!(hresult_from_win32(0), S_OK);
        assert_eq!(hresult_from_win32(5) as u32, 0x8007_0005);
        assert!(!succeeded(hresult_from_win32(5)));
    }

    #[test]
    fn test_taxonomy_maps_to_win32() {
        assert_eq!(HostError::NotFound.win32_code(), ERROR_FILE_NOT_FOUND);
        assert_eq!(HostError::TimedOut.win32_code(), ERROR_TIMEOUT);
    }
}
