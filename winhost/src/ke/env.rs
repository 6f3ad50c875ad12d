//! Process Environment
//!
//! Copy-on-read access to the host environment with a per-process
//! override map. Guest writes never touch the host environment; deletes
//! are tombstoned so they shadow host values too.

use crate::abi::{Bool, Dword, FALSE, TRUE};
use crate::status::{self, ERROR_ENVVAR_NOT_FOUND, ERROR_INVALID_PARAMETER};
use spin::RwLock;
use std::collections::HashMap;
use std::os::raw::c_char;

// name -> Some(value) override, None tombstone.
static OVERRIDES: RwLock<Option<HashMap<String, Option<String>>>> = RwLock::new(None);

/// Read a variable through the override map.
pub fn get_var(name: &str) -> Option<String> {
    if let Some(map) = OVERRIDES.read().as_ref() {
        if let Some(entry) = map.get(name) {
            return entry.clone();
        }
    }
    std::env::var(name).ok()
}

/// Write or tombstone a variable in the override map.
pub fn set_var(name: &str, value: Option<&str>) {
    let mut guard = OVERRIDES.write();
    guard
        .get_or_insert_with(HashMap::new)
        .insert(name.to_string(), value.map(str::to_string));
}

/// GetEnvironmentVariableA - copy a value into the guest buffer.
///
/// Returns the copied length, or the required size (including the
/// terminator) when the buffer is too small, or 0 with
/// `ERROR_ENVVAR_NOT_FOUND`.
pub unsafe extern "win64" fn GetEnvironmentVariableA(
    name: *const c_char,
    buffer: *mut c_char,
    size: Dword,
) -> Dword {
    let name = match crate::abi::cstr_arg(name) {
        Some(n) => n,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return 0;
        }
    };
    let value = match get_var(name) {
        Some(v) => v,
        None => {
            status::set_last_error(ERROR_ENVVAR_NOT_FOUND);
            return 0;
        }
    };
    let needed = value.len() as Dword + 1;
    if buffer.is_null() || size < needed {
        return needed;
    }
    crate::abi::copy_out_cstr(&value, buffer, size as usize) as Dword
}

/// SetEnvironmentVariableA - set or delete (null value) a variable in the
/// per-process override map.
pub unsafe extern "win64" fn SetEnvironmentVariableA(
    name: *const c_char,
    value: *const c_char,
) -> Bool {
    let name = match crate::abi::cstr_arg(name) {
        Some(n) => n,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return FALSE;
        }
    };
    if value.is_null() {
        set_var(name, None);
        return TRUE;
    }
    match crate::abi::cstr_arg(value) {
        Some(v) => {
            set_var(name, Some(v));
            TRUE
        }
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            FALSE
        }
    }
}

// ============================================================================
// Command line
// ============================================================================

static COMMAND_LINE: std::sync::OnceLock<std::ffi::CString> = std::sync::OnceLock::new();

/// Record the guest-visible command line before entry runs.
pub fn set_command_line(line: &str) {
    let _ = COMMAND_LINE.set(std::ffi::CString::new(line).unwrap_or_default());
}

/// GetCommandLineA - the process command line, stable for the process
/// lifetime.
pub unsafe extern "win64" fn GetCommandLineA() -> *const c_char {
    COMMAND_LINE
        .get_or_init(|| std::ffi::CString::new("guest.exe").unwrap())
        .as_ptr()
}
