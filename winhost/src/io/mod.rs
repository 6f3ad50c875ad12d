//! File I/O
//!
//! Open-by-path with creation-disposition semantics, synchronous
//! read/write honouring short transfers, pointer seeks, deletion,
//! directory create/remove and cursor-based directory enumeration.
//!
//! Guest paths use backslashes and may carry a drive prefix; both are
//! normalized away before touching the host filesystem. The standard
//! streams are pseudo-handles that resolve without entering the handle
//! table.

use crate::abi::{Bool, Dword, Handle, FALSE, INVALID_HANDLE_VALUE, TRUE};
use crate::ob::{self, KernelObject, ObjectBody};
use crate::status::{
    self, ERROR_ACCESS_DENIED, ERROR_ALREADY_EXISTS, ERROR_FILE_EXISTS, ERROR_FILE_NOT_FOUND,
    ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, ERROR_NO_MORE_FILES, HostError,
};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::raw::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

// ============================================================================
// Access, share and disposition constants
// ============================================================================

pub const GENERIC_READ: Dword = 0x8000_0000;
pub const GENERIC_WRITE: Dword = 0x4000_0000;

pub const FILE_SHARE_READ: Dword = 0x0000_0001;
pub const FILE_SHARE_WRITE: Dword = 0x0000_0002;
pub const FILE_SHARE_DELETE: Dword = 0x0000_0004;

pub const CREATE_NEW: Dword = 1;
pub const CREATE_ALWAYS: Dword = 2;
pub const OPEN_EXISTING: Dword = 3;
pub const OPEN_ALWAYS: Dword = 4;
pub const TRUNCATE_EXISTING: Dword = 5;

pub const FILE_BEGIN: Dword = 0;
pub const FILE_CURRENT: Dword = 1;
pub const FILE_END: Dword = 2;

pub const FILE_ATTRIBUTE_NORMAL: Dword = 0x0000_0080;
pub const FILE_ATTRIBUTE_DIRECTORY: Dword = 0x0000_0010;

pub const INVALID_SET_FILE_POINTER: Dword = 0xFFFF_FFFF;

// GetStdHandle selectors.
pub const STD_INPUT_HANDLE: Dword = -10i32 as Dword;
pub const STD_OUTPUT_HANDLE: Dword = -11i32 as Dword;
pub const STD_ERROR_HANDLE: Dword = -12i32 as Dword;

// Pseudo-handles for the standard streams: the selector value itself,
// sign-extended. They never enter the handle table.
pub const PSEUDO_STDIN: Handle = -10isize as Handle;
pub const PSEUDO_STDOUT: Handle = -11isize as Handle;
pub const PSEUDO_STDERR: Handle = -12isize as Handle;

/// Host fd behind a standard-stream pseudo-handle, if any.
fn std_stream_fd(handle: Handle) -> Option<i32> {
    match handle {
        PSEUDO_STDIN => Some(0),
        PSEUDO_STDOUT => Some(1),
        PSEUDO_STDERR => Some(2),
        _ => None,
    }
}

// ============================================================================
// Objects
// ============================================================================

/// An open file behind a handle.
pub struct FileObject {
    file: Mutex<File>,
    access: Dword,
    share: Dword,
}

impl FileObject {
    pub fn share_mode(&self) -> Dword {
        self.share
    }
}

/// One directory-enumeration result.
#[derive(Clone)]
pub struct FindEntry {
    pub name: String,
    pub attributes: Dword,
    pub size: u64,
    pub write_time: u64,
}

/// A directory-enumeration cursor behind a handle. The listing is
/// snapshotted when the cursor is created.
pub struct FindObject {
    entries: Mutex<(Vec<FindEntry>, usize)>,
}

// ============================================================================
// Path translation
// ============================================================================

/// Normalize a guest path: backslashes become separators and a drive
/// prefix is dropped.
pub fn guest_path(path: &str) -> PathBuf {
    let mut p = path.replace('\\', "/");
    let bytes = p.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        p.drain(..2);
    }
    if p.is_empty() {
        p.push('.');
    }
    PathBuf::from(p)
}

// ============================================================================
// Helpers
// ============================================================================

fn io_last_error(e: &HostError) -> Dword {
    match e {
        HostError::NotFound => ERROR_FILE_NOT_FOUND,
        HostError::AlreadyExists => ERROR_FILE_EXISTS,
        HostError::PermissionDenied => ERROR_ACCESS_DENIED,
        other => other.win32_code(),
    }
}

fn open_with_disposition(path: &Path, access: Dword, disposition: Dword) -> Result<File, HostError> {
    let mut opts = OpenOptions::new();
    opts.read(access & GENERIC_READ != 0);
    // Truncating dispositions imply a writable descriptor.
    opts.write(access & GENERIC_WRITE != 0 || matches!(disposition, CREATE_ALWAYS | TRUNCATE_EXISTING));
    match disposition {
        CREATE_NEW => {
            opts.write(true).create_new(true);
        }
        CREATE_ALWAYS => {
            opts.create(true).truncate(true);
        }
        OPEN_EXISTING => {}
        OPEN_ALWAYS => {
            opts.create(true);
        }
        TRUNCATE_EXISTING => {
            opts.truncate(true);
        }
        _ => {
            return Err(HostError::ProtocolViolation(format!(
                "creation disposition {disposition}"
            )))
        }
    }
    opts.open(path).map_err(HostError::from)
}

/// Windows FILETIME (100ns units since 1601) from a host timestamp.
fn filetime_from(system: std::time::SystemTime) -> u64 {
    const EPOCH_DELTA_SECS: u64 = 11_644_473_600;
    match system.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => (d.as_secs() + EPOCH_DELTA_SECS) * 10_000_000 + u64::from(d.subsec_nanos()) / 100,
        Err(_) => 0,
    }
}

// ============================================================================
// File API
// ============================================================================

/// CreateFileA - open or create a file per the creation disposition.
pub unsafe extern "win64" fn CreateFileA(
    path: *const c_char,
    access: Dword,
    share: Dword,
    _security: *mut c_void,
    disposition: Dword,
    _flags: Dword,
    _template: Handle,
) -> Handle {
    let path = match crate::abi::cstr_arg(path) {
        Some(p) => guest_path(p),
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return INVALID_HANDLE_VALUE;
        }
    };
    let existed = path.exists();
    match open_with_disposition(&path, access, disposition) {
        Ok(file) => {
            // CREATE_ALWAYS / OPEN_ALWAYS report whether they hit an
            // existing file through the last-error channel.
            if matches!(disposition, CREATE_ALWAYS | OPEN_ALWAYS) && existed {
                status::set_last_error(ERROR_ALREADY_EXISTS);
            } else {
                status::set_last_error(status::ERROR_SUCCESS);
            }
            let handle = ob::table().insert(KernelObject::new(ObjectBody::File(FileObject {
                file: Mutex::new(file),
                access,
                share,
            })));
            log::trace!("[IO] opened {path:?} as handle {handle}");
            handle
        }
        Err(e) => {
            status::set_last_error(io_last_error(&e));
            INVALID_HANDLE_VALUE
        }
    }
}

/// ReadFile - synchronous read at the current file pointer. Short reads
/// are reported, not retried.
pub unsafe extern "win64" fn ReadFile(
    handle: Handle,
    buffer: *mut c_void,
    to_read: Dword,
    out_read: *mut Dword,
    _overlapped: *mut c_void,
) -> Bool {
    if buffer.is_null() && to_read != 0 {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    if to_read == 0 {
        if !out_read.is_null() {
            *out_read = 0;
        }
        return TRUE;
    }
    if let Some(fd) = std_stream_fd(handle) {
        let n = libc::read(fd, buffer, to_read as usize);
        if n < 0 {
            status::set_last_error(status::ERROR_GEN_FAILURE);
            return FALSE;
        }
        if !out_read.is_null() {
            *out_read = n as Dword;
        }
        return TRUE;
    }
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return FALSE;
        }
    };
    match &obj.body {
        ObjectBody::File(f) => {
            let slice = std::slice::from_raw_parts_mut(buffer as *mut u8, to_read as usize);
            let mut file = f.file.lock().unwrap();
            match file.read(slice) {
                Ok(n) => {
                    if !out_read.is_null() {
                        *out_read = n as Dword;
                    }
                    TRUE
                }
                Err(e) => {
                    status::set_last_error(io_last_error(&HostError::from(e)));
                    FALSE
                }
            }
        }
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

/// WriteFile - synchronous write at the current file pointer.
pub unsafe extern "win64" fn WriteFile(
    handle: Handle,
    buffer: *const c_void,
    to_write: Dword,
    out_written: *mut Dword,
    _overlapped: *mut c_void,
) -> Bool {
    if buffer.is_null() && to_write != 0 {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    if to_write == 0 {
        if !out_written.is_null() {
            *out_written = 0;
        }
        return TRUE;
    }
    if let Some(fd) = std_stream_fd(handle) {
        let n = libc::write(fd, buffer, to_write as usize);
        if n < 0 {
            status::set_last_error(status::ERROR_GEN_FAILURE);
            return FALSE;
        }
        if !out_written.is_null() {
            *out_written = n as Dword;
        }
        return TRUE;
    }
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return FALSE;
        }
    };
    match &obj.body {
        ObjectBody::File(f) => {
            if f.access & GENERIC_WRITE == 0 {
                status::set_last_error(ERROR_ACCESS_DENIED);
                return FALSE;
            }
            let slice = std::slice::from_raw_parts(buffer as *const u8, to_write as usize);
            let mut file = f.file.lock().unwrap();
            match file.write(slice) {
                Ok(n) => {
                    if !out_written.is_null() {
                        *out_written = n as Dword;
                    }
                    TRUE
                }
                Err(e) => {
                    status::set_last_error(io_last_error(&HostError::from(e)));
                    FALSE
                }
            }
        }
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

/// SetFilePointer - seek relative to begin/current/end. Returns the low
/// 32 bits of the new position; the optional high word is updated in
/// place.
pub unsafe extern "win64" fn SetFilePointer(
    handle: Handle,
    distance_low: i32,
    distance_high: *mut i32,
    method: Dword,
) -> Dword {
    let distance = if distance_high.is_null() {
        i64::from(distance_low)
    } else {
        (i64::from(*distance_high) << 32) | i64::from(distance_low as u32)
    };
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return INVALID_SET_FILE_POINTER;
        }
    };
    let seek = match method {
        FILE_BEGIN => {
            if distance < 0 {
                status::set_last_error(ERROR_INVALID_PARAMETER);
                return INVALID_SET_FILE_POINTER;
            }
            SeekFrom::Start(distance as u64)
        }
        FILE_CURRENT => SeekFrom::Current(distance),
        FILE_END => SeekFrom::End(distance),
        _ => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return INVALID_SET_FILE_POINTER;
        }
    };
    match &obj.body {
        ObjectBody::File(f) => {
            let mut file = f.file.lock().unwrap();
            match file.seek(seek) {
                Ok(pos) => {
                    if !distance_high.is_null() {
                        *distance_high = (pos >> 32) as i32;
                    }
                    status::set_last_error(status::ERROR_SUCCESS);
                    pos as Dword
                }
                Err(_) => {
                    status::set_last_error(ERROR_INVALID_PARAMETER);
                    INVALID_SET_FILE_POINTER
                }
            }
        }
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            INVALID_SET_FILE_POINTER
        }
    }
}

/// GetFileSizeEx - 64-bit file size.
pub unsafe extern "win64" fn GetFileSizeEx(handle: Handle, out_size: *mut i64) -> Bool {
    if out_size.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return FALSE;
        }
    };
    match &obj.body {
        ObjectBody::File(f) => {
            let file = f.file.lock().unwrap();
            match file.metadata() {
                Ok(m) => {
                    *out_size = m.len() as i64;
                    TRUE
                }
                Err(e) => {
                    status::set_last_error(io_last_error(&HostError::from(e)));
                    FALSE
                }
            }
        }
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

/// GetFileSize - low 32 bits of the size, optional high word out.
pub unsafe extern "win64" fn GetFileSize(handle: Handle, out_high: *mut Dword) -> Dword {
    let mut size = 0i64;
    if GetFileSizeEx(handle, &mut size) == FALSE {
        return INVALID_SET_FILE_POINTER;
    }
    if !out_high.is_null() {
        *out_high = (size as u64 >> 32) as Dword;
    }
    size as Dword
}

/// DeleteFileA - remove a file by path.
pub unsafe extern "win64" fn DeleteFileA(path: *const c_char) -> Bool {
    let path = match crate::abi::cstr_arg(path) {
        Some(p) => guest_path(p),
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return FALSE;
        }
    };
    match std::fs::remove_file(&path) {
        Ok(()) => TRUE,
        Err(e) => {
            status::set_last_error(io_last_error(&HostError::from(e)));
            FALSE
        }
    }
}

/// CreateDirectoryA - create one directory level.
pub unsafe extern "win64" fn CreateDirectoryA(path: *const c_char, _security: *mut c_void) -> Bool {
    let path = match crate::abi::cstr_arg(path) {
        Some(p) => guest_path(p),
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return FALSE;
        }
    };
    match std::fs::create_dir(&path) {
        Ok(()) => TRUE,
        Err(e) => {
            status::set_last_error(io_last_error(&HostError::from(e)));
            FALSE
        }
    }
}

/// RemoveDirectoryA - remove one empty directory.
pub unsafe extern "win64" fn RemoveDirectoryA(path: *const c_char) -> Bool {
    let path = match crate::abi::cstr_arg(path) {
        Some(p) => guest_path(p),
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return FALSE;
        }
    };
    match std::fs::remove_dir(&path) {
        Ok(()) => TRUE,
        Err(e) => {
            status::set_last_error(io_last_error(&HostError::from(e)));
            FALSE
        }
    }
}

/// GetStdHandle - the pseudo-handle for a standard stream.
pub unsafe extern "win64" fn GetStdHandle(which: Dword) -> Handle {
    match which {
        STD_INPUT_HANDLE => PSEUDO_STDIN,
        STD_OUTPUT_HANDLE => PSEUDO_STDOUT,
        STD_ERROR_HANDLE => PSEUDO_STDERR,
        _ => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            INVALID_HANDLE_VALUE
        }
    }
}

// ============================================================================
// Directory enumeration
// ============================================================================

/// FILETIME layout.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct FileTime {
    pub dwLowDateTime: Dword,
    pub dwHighDateTime: Dword,
}

impl FileTime {
    fn from_ticks(ticks: u64) -> Self {
        Self {
            dwLowDateTime: ticks as Dword,
            dwHighDateTime: (ticks >> 32) as Dword,
        }
    }
}

/// WIN32_FIND_DATAA layout.
#[repr(C)]
pub struct Win32FindDataA {
    pub dwFileAttributes: Dword,
    pub ftCreationTime: FileTime,
    pub ftLastAccessTime: FileTime,
    pub ftLastWriteTime: FileTime,
    pub nFileSizeHigh: Dword,
    pub nFileSizeLow: Dword,
    pub dwReserved0: Dword,
    pub dwReserved1: Dword,
    pub cFileName: [c_char; 260],
    pub cAlternateFileName: [c_char; 14],
}

/// Fixed-pitch wildcard match: `*` any run, `?` any one character.
/// Case-insensitive like the filesystem it imitates.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b) && inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), name.as_bytes())
}

fn fill_find_data(entry: &FindEntry, data: &mut Win32FindDataA) {
    data.dwFileAttributes = entry.attributes;
    data.ftCreationTime = FileTime::from_ticks(entry.write_time);
    data.ftLastAccessTime = FileTime::from_ticks(entry.write_time);
    data.ftLastWriteTime = FileTime::from_ticks(entry.write_time);
    data.nFileSizeHigh = (entry.size >> 32) as Dword;
    data.nFileSizeLow = entry.size as Dword;
    data.dwReserved0 = 0;
    data.dwReserved1 = 0;
    unsafe {
        crate::abi::copy_out_cstr(&entry.name, data.cFileName.as_mut_ptr(), 260);
        data.cAlternateFileName[0] = 0;
    }
}

/// FindFirstFileA - snapshot a directory listing matched by a wildcard
/// pattern and hand back a cursor handle positioned past the first entry.
pub unsafe extern "win64" fn FindFirstFileA(
    pattern: *const c_char,
    out_data: *mut Win32FindDataA,
) -> Handle {
    let pattern = match crate::abi::cstr_arg(pattern) {
        Some(p) => p,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return INVALID_HANDLE_VALUE;
        }
    };
    if out_data.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return INVALID_HANDLE_VALUE;
    }
    let full = guest_path(pattern);
    let (dir, file_pattern) = match full.file_name() {
        Some(name) => (
            full.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            name.to_string_lossy().into_owned(),
        ),
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return INVALID_HANDLE_VALUE;
        }
    };

    let mut entries = Vec::new();
    let read = match std::fs::read_dir(&dir) {
        Ok(r) => r,
        Err(e) => {
            status::set_last_error(io_last_error(&HostError::from(e)));
            return INVALID_HANDLE_VALUE;
        }
    };
    for item in read.flatten() {
        let name = item.file_name().to_string_lossy().into_owned();
        if !wildcard_match(&file_pattern, &name) {
            continue;
        }
        let meta = match item.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        entries.push(FindEntry {
            name,
            attributes: if meta.is_dir() {
                FILE_ATTRIBUTE_DIRECTORY
            } else {
                FILE_ATTRIBUTE_NORMAL
            },
            size: meta.len(),
            write_time: meta.modified().map(filetime_from).unwrap_or(0),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    if entries.is_empty() {
        status::set_last_error(ERROR_FILE_NOT_FOUND);
        return INVALID_HANDLE_VALUE;
    }
    fill_find_data(&entries[0], &mut *out_data);
    ob::table().insert(KernelObject::new(ObjectBody::Find(FindObject {
        entries: Mutex::new((entries, 1)),
    })))
}

/// FindNextFileA - advance the cursor; `ERROR_NO_MORE_FILES` at the end.
pub unsafe extern "win64" fn FindNextFileA(handle: Handle, out_data: *mut Win32FindDataA) -> Bool {
    if out_data.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return FALSE;
        }
    };
    match &obj.body {
        ObjectBody::Find(f) => {
            let mut guard = f.entries.lock().unwrap();
            let (entries, pos) = &mut *guard;
            if *pos >= entries.len() {
                status::set_last_error(ERROR_NO_MORE_FILES);
                return FALSE;
            }
            fill_find_data(&entries[*pos], &mut *out_data);
            *pos += 1;
            TRUE
        }
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

/// FindClose - release the enumeration cursor.
pub unsafe extern "win64" fn FindClose(handle: Handle) -> Bool {
    match ob::table().get(handle) {
        Ok(obj) if matches!(obj.body, ObjectBody::Find(_)) => {
            drop(obj);
            crate::ob::CloseHandle(handle)
        }
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::os::raw::c_void;
    use std::path::{Path, PathBuf};
    use std::ptr;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("winhost-io-{}-{tag}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn c(path: &Path) -> CString {
        CString::new(path.to_str().unwrap()).unwrap()
    }

    #[test]
    fn test_guest_path_translation() {
        assert_eq!(guest_path("C:\\Temp\\a.txt"), PathBuf::from("/Temp/a.txt"));
        assert_eq!(guest_path("test.txt"), PathBuf::from("test.txt"));
        assert_eq!(guest_path("dir\\sub\\f"), PathBuf::from("dir/sub/f"));
    }

    #[test]
    fn test_file_round_trip_and_delete() {
        let dir = scratch_dir("roundtrip");
        let path = c(&dir.join("test.txt"));
        let payload = b"Hello from Win32 File I/O!\n";
        unsafe {
            let h = CreateFileA(
                path.as_ptr(),
                GENERIC_WRITE,
                0,
                ptr::null_mut(),
                CREATE_ALWAYS,
                0,
                0,
            );
            assert_ne!(h, INVALID_HANDLE_VALUE);
            let mut written = 0;
            assert_eq!(
                WriteFile(
                    h,
                    payload.as_ptr() as *const c_void,
                    payload.len() as Dword,
                    &mut written,
                    ptr::null_mut()
                ),
                TRUE
            );
            assert_eq!(written as usize, payload.len());
            assert_eq!(crate::ob::CloseHandle(h), TRUE);

            let h = CreateFileA(
                path.as_ptr(),
                GENERIC_READ,
                FILE_SHARE_READ,
                ptr::null_mut(),
                OPEN_EXISTING,
                0,
                0,
            );
            assert_ne!(h, INVALID_HANDLE_VALUE);
            let mut size = 0i64;
            assert_eq!(GetFileSizeEx(h, &mut size), TRUE);
            assert_eq!(size as usize, payload.len());

            let mut buf = [0u8; 64];
            let mut read = 0;
            assert_eq!(
                ReadFile(
                    h,
                    buf.as_mut_ptr() as *mut c_void,
                    buf.len() as Dword,
                    &mut read,
                    ptr::null_mut()
                ),
                TRUE
            );
            assert_eq!(&buf[..read as usize], payload);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);

            assert_eq!(DeleteFileA(path.as_ptr()), TRUE);
            let h = CreateFileA(
                path.as_ptr(),
                GENERIC_READ,
                0,
                ptr::null_mut(),
                OPEN_EXISTING,
                0,
                0,
            );
            assert_eq!(h, INVALID_HANDLE_VALUE);
            assert_eq!(status::last_error(), ERROR_FILE_NOT_FOUND);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_seek_from_all_bases() {
        let dir = scratch_dir("seek");
        let path = c(&dir.join("seek.bin"));
        unsafe {
            let h = CreateFileA(
                path.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                ptr::null_mut(),
                CREATE_ALWAYS,
                0,
                0,
            );
            let data = [0u8; 100];
            WriteFile(h, data.as_ptr() as *const c_void, 100, ptr::null_mut(), ptr::null_mut());

            assert_eq!(SetFilePointer(h, 10, ptr::null_mut(), FILE_BEGIN), 10);
            assert_eq!(SetFilePointer(h, 5, ptr::null_mut(), FILE_CURRENT), 15);
            assert_eq!(SetFilePointer(h, -20, ptr::null_mut(), FILE_END), 80);
            assert_eq!(
                SetFilePointer(h, 0, ptr::null_mut(), 99),
                INVALID_SET_FILE_POINTER
            );
            crate::ob::CloseHandle(h);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_create_new_requires_absence() {
        let dir = scratch_dir("createnew");
        let path = c(&dir.join("once.txt"));
        unsafe {
            let h = CreateFileA(
                path.as_ptr(),
                GENERIC_WRITE,
                0,
                ptr::null_mut(),
                CREATE_NEW,
                0,
                0,
            );
            assert_ne!(h, INVALID_HANDLE_VALUE);
            crate::ob::CloseHandle(h);
            let again = CreateFileA(
                path.as_ptr(),
                GENERIC_WRITE,
                0,
                ptr::null_mut(),
                CREATE_NEW,
                0,
                0,
            );
            assert_eq!(again, INVALID_HANDLE_VALUE);
            assert_eq!(status::last_error(), ERROR_FILE_EXISTS);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_wildcards() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("*.txt", "a.txt"));
        assert!(wildcard_match("A?.txt", "ab.TXT"));
        assert!(!wildcard_match("*.txt", "a.dat"));
    }

    #[test]
    fn test_directory_enumeration() {
        let dir = scratch_dir("enum");
        for name in ["a.txt", "b.txt", "c.dat"] {
            std::fs::write(dir.join(name), b"x").unwrap();
        }
        let pattern = c(&dir.join("*.txt"));
        unsafe {
            let mut data = std::mem::MaybeUninit::<Win32FindDataA>::zeroed().assume_init();
            let h = FindFirstFileA(pattern.as_ptr(), &mut data);
            assert_ne!(h, INVALID_HANDLE_VALUE);
            let first = crate::abi::cstr_arg(data.cFileName.as_ptr()).unwrap().to_string();
            assert_eq!(first, "a.txt");

            assert_eq!(FindNextFileA(h, &mut data), TRUE);
            let second = crate::abi::cstr_arg(data.cFileName.as_ptr()).unwrap().to_string();
            assert_eq!(second, "b.txt");

            assert_eq!(FindNextFileA(h, &mut data), FALSE);
            assert_eq!(status::last_error(), ERROR_NO_MORE_FILES);
            assert_eq!(FindClose(h), TRUE);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
