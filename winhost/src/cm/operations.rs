//! Registry Operations
//!
//! The guest-facing key/value API. Registry functions return their error
//! code directly (LSTATUS) rather than through the last-error channel.
//!
//! - `RegCreateKeyExA` - create or open, walking intermediate keys
//! - `RegOpenKeyExA` - open an existing key
//! - `RegSetValueExA` - write a typed value under the key's advisory lock
//! - `RegQueryValueExA` - read; undersized buffers get type+size only
//! - `RegDeleteKeyA` / `RegDeleteValueA` - remove leaves
//! - `RegCloseKey` - release the handle

use super::value::{self, RegType};
use super::{hive_dir, join_subkey, safe_component, write_lock, KeyObject};
use crate::abi::{Dword, Handle};
use crate::ob::{self, KernelObject, ObjectBody};
use crate::status::{
    ERROR_ACCESS_DENIED, ERROR_BAD_FORMAT, ERROR_DIR_NOT_EMPTY, ERROR_FILE_NOT_FOUND,
    ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, ERROR_MORE_DATA, ERROR_SUCCESS,
};
use std::os::raw::c_char;
use std::path::PathBuf;

/// `RegCreateKeyExA` disposition: the key did not exist before.
pub const REG_CREATED_NEW_KEY: Dword = 1;
/// `RegCreateKeyExA` disposition: an existing key was opened.
pub const REG_OPENED_EXISTING_KEY: Dword = 2;

/// LSTATUS: registry calls return the error code directly.
pub type LStatus = i32;

/// Resolve a key handle (hive pseudo-handle or table handle) to its host
/// directory.
fn key_dir(handle: Handle) -> Result<PathBuf, LStatus> {
    if let Some(dir) = hive_dir(handle) {
        return Ok(dir);
    }
    match ob::table().get(handle) {
        Ok(obj) => match &obj.body {
            ObjectBody::Key(k) => Ok(k.path.clone()),
            _ => Err(ERROR_INVALID_HANDLE as LStatus),
        },
        Err(_) => Err(ERROR_INVALID_HANDLE as LStatus),
    }
}

fn insert_key(path: PathBuf, access: Dword) -> Handle {
    ob::table().insert(KernelObject::new(ObjectBody::Key(KeyObject {
        path,
        access,
    })))
}

/// RegCreateKeyExA - create or open a key, creating intermediate keys as
/// needed; reports whether the leaf was created or opened.
pub unsafe extern "win64" fn RegCreateKeyExA(
    parent: Handle,
    subkey: *const c_char,
    _reserved: Dword,
    _class: *const c_char,
    _options: Dword,
    access: Dword,
    _security: *mut std::os::raw::c_void,
    out_key: *mut Handle,
    out_disposition: *mut Dword,
) -> LStatus {
    let subkey = match crate::abi::cstr_arg(subkey) {
        Some(s) => s,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if out_key.is_null() {
        return ERROR_INVALID_PARAMETER as LStatus;
    }
    let base = match key_dir(parent) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let path = match join_subkey(&base, subkey) {
        Ok(p) => p,
        Err(_) => return ERROR_INVALID_PARAMETER as LStatus,
    };
    let existed = path.is_dir();
    if let Err(e) = std::fs::create_dir_all(&path) {
        log::warn!("[CM] create {path:?} failed: {e}");
        return ERROR_ACCESS_DENIED as LStatus;
    }
    if !out_disposition.is_null() {
        *out_disposition = if existed {
            REG_OPENED_EXISTING_KEY
        } else {
            REG_CREATED_NEW_KEY
        };
    }
    *out_key = insert_key(path, access);
    ERROR_SUCCESS as LStatus
}

/// RegOpenKeyExA - open an existing key.
pub unsafe extern "win64" fn RegOpenKeyExA(
    parent: Handle,
    subkey: *const c_char,
    _options: Dword,
    access: Dword,
    out_key: *mut Handle,
) -> LStatus {
    let subkey = match crate::abi::cstr_arg(subkey) {
        Some(s) => s,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if out_key.is_null() {
        return ERROR_INVALID_PARAMETER as LStatus;
    }
    let base = match key_dir(parent) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let path = match join_subkey(&base, subkey) {
        Ok(p) => p,
        Err(_) => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if !path.is_dir() {
        return ERROR_FILE_NOT_FOUND as LStatus;
    }
    *out_key = insert_key(path, access);
    ERROR_SUCCESS as LStatus
}

/// RegSetValueExA - write a typed value. The write happens under the
/// key's advisory lock; concurrent readers are not excluded.
pub unsafe extern "win64" fn RegSetValueExA(
    key: Handle,
    name: *const c_char,
    _reserved: Dword,
    value_type: Dword,
    data: *const u8,
    data_len: Dword,
) -> LStatus {
    let name = match crate::abi::cstr_arg(name) {
        Some(n) => n,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if safe_component(name).is_err() {
        return ERROR_INVALID_PARAMETER as LStatus;
    }
    let ty = match RegType::from_u32(value_type) {
        Some(t) => t,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if data.is_null() && data_len != 0 {
        return ERROR_INVALID_PARAMETER as LStatus;
    }
    let dir = match key_dir(key) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let payload = if data_len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(data, data_len as usize)
    };
    let bytes = value::encode(ty, payload);

    let lock = write_lock(&dir);
    let _guard = lock.lock().unwrap();
    match std::fs::write(dir.join(name), bytes) {
        Ok(()) => ERROR_SUCCESS as LStatus,
        Err(e) => {
            log::warn!("[CM] set value {name:?} failed: {e}");
            ERROR_ACCESS_DENIED as LStatus
        }
    }
}

/// RegQueryValueExA - read a value. With a null or undersized buffer the
/// type and required size are reported and the buffer is left untouched.
pub unsafe extern "win64" fn RegQueryValueExA(
    key: Handle,
    name: *const c_char,
    _reserved: *mut Dword,
    out_type: *mut Dword,
    out_data: *mut u8,
    in_out_len: *mut Dword,
) -> LStatus {
    let name = match crate::abi::cstr_arg(name) {
        Some(n) => n,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    let dir = match key_dir(key) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let bytes = match std::fs::read(dir.join(name)) {
        Ok(b) => b,
        Err(_) => return ERROR_FILE_NOT_FOUND as LStatus,
    };
    let (ty, payload) = match value::decode(&bytes) {
        Ok(v) => v,
        Err(_) => return ERROR_BAD_FORMAT as LStatus,
    };
    if !out_type.is_null() {
        *out_type = ty as Dword;
    }
    if in_out_len.is_null() {
        return ERROR_SUCCESS as LStatus;
    }
    let capacity = *in_out_len as usize;
    *in_out_len = payload.len() as Dword;
    if out_data.is_null() {
        return ERROR_SUCCESS as LStatus;
    }
    if capacity < payload.len() {
        return ERROR_MORE_DATA as LStatus;
    }
    std::ptr::copy_nonoverlapping(payload.as_ptr(), out_data, payload.len());
    ERROR_SUCCESS as LStatus
}

/// RegDeleteValueA - remove one value file.
pub unsafe extern "win64" fn RegDeleteValueA(key: Handle, name: *const c_char) -> LStatus {
    let name = match crate::abi::cstr_arg(name) {
        Some(n) => n,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if safe_component(name).is_err() {
        return ERROR_INVALID_PARAMETER as LStatus;
    }
    let dir = match key_dir(key) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let lock = write_lock(&dir);
    let _guard = lock.lock().unwrap();
    match std::fs::remove_file(dir.join(name)) {
        Ok(()) => ERROR_SUCCESS as LStatus,
        Err(_) => ERROR_FILE_NOT_FOUND as LStatus,
    }
}

/// RegDeleteKeyA - remove a key that has no subkeys; its values go with
/// it.
pub unsafe extern "win64" fn RegDeleteKeyA(parent: Handle, subkey: *const c_char) -> LStatus {
    let subkey = match crate::abi::cstr_arg(subkey) {
        Some(s) => s,
        None => return ERROR_INVALID_PARAMETER as LStatus,
    };
    let base = match key_dir(parent) {
        Ok(d) => d,
        Err(e) => return e,
    };
    let path = match join_subkey(&base, subkey) {
        Ok(p) => p,
        Err(_) => return ERROR_INVALID_PARAMETER as LStatus,
    };
    if !path.is_dir() {
        return ERROR_FILE_NOT_FOUND as LStatus;
    }
    let has_subkeys = std::fs::read_dir(&path)
        .map(|r| r.flatten().any(|e| e.path().is_dir()))
        .unwrap_or(false);
    if has_subkeys {
        return ERROR_DIR_NOT_EMPTY as LStatus;
    }
    let lock = write_lock(&path);
    let _guard = lock.lock().unwrap();
    match std::fs::remove_dir_all(&path) {
        Ok(()) => ERROR_SUCCESS as LStatus,
        Err(_) => ERROR_ACCESS_DENIED as LStatus,
    }
}

/// RegCloseKey - release a key handle; hive pseudo-handles are never
/// closed.
pub unsafe extern "win64" fn RegCloseKey(key: Handle) -> LStatus {
    if hive_dir(key).is_some() {
        return ERROR_SUCCESS as LStatus;
    }
    match ob::table().get(key) {
        Ok(obj) if matches!(obj.body, ObjectBody::Key(_)) => {
            drop(obj);
            match ob::table().close(key) {
                Ok(()) => ERROR_SUCCESS as LStatus,
                Err(_) => ERROR_INVALID_HANDLE as LStatus,
            }
        }
        _ => ERROR_INVALID_HANDLE as LStatus,
    }
}
