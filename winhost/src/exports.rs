//! Export Resolver
//!
//! Maps `(DLL name, symbol name-or-ordinal)` to the host function the
//! loader writes into the import address table. The table is populated
//! once at startup by each subsystem's registration phase and read-only
//! afterwards.
//!
//! Lookup is case-insensitive on the DLL name and case-sensitive on the
//! symbol name. Ordinals index a per-DLL table assigned in registration
//! order. A missing entry is a hard error to the loader.

use crate::abi::Handle;
use std::collections::HashMap;
use std::os::raw::{c_char, c_void};
use std::sync::OnceLock;

/// Coarse calling-shape tag carried for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigTag {
    /// Returns a handle; failure is a sentinel plus last-error.
    HandleReturn,
    /// Returns BOOL; failure stores a last-error.
    BoolReturn,
    /// Returns an HRESULT.
    HresultReturn,
    /// Returns a plain integer or pointer value.
    ValueReturn,
    /// Returns nothing (or never returns).
    NoReturn,
}

/// A resolvable host function.
#[derive(Debug, Clone, Copy)]
pub struct Export {
    pub address: usize,
    pub tag: SigTag,
}

/// An import identifier: UTF-8 name or ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportName<'a> {
    Name(&'a str),
    Ordinal(u16),
}

#[derive(Default)]
struct DllExports {
    by_name: HashMap<&'static str, Export>,
    by_ordinal: HashMap<u16, Export>,
    next_ordinal: u16,
}

/// The frozen registry.
pub struct ExportTable {
    dlls: HashMap<String, DllExports>,
    module_names: Vec<String>,
}

// Module pseudo-handles returned by GetModuleHandleA.
const MODULE_HANDLE_BASE: Handle = 0x4D00_0000;

impl ExportTable {
    fn new() -> Self {
        Self {
            dlls: HashMap::new(),
            module_names: Vec::new(),
        }
    }

    fn register(&mut self, dll: &str, name: &'static str, address: usize, tag: SigTag) {
        let key = dll.to_ascii_lowercase();
        if !self.module_names.contains(&key) {
            self.module_names.push(key.clone());
        }
        let dll_exports = self.dlls.entry(key).or_default();
        dll_exports.next_ordinal += 1;
        let export = Export { address, tag };
        dll_exports.by_name.insert(name, export);
        dll_exports.by_ordinal.insert(dll_exports.next_ordinal, export);
    }

    /// Resolve one import record.
    pub fn resolve(&self, dll: &str, import: &ImportName) -> Option<Export> {
        let dll_exports = self.dlls.get(&dll.to_ascii_lowercase())?;
        let export = match import {
            ImportName::Name(name) => dll_exports.by_name.get(*name).copied(),
            ImportName::Ordinal(ordinal) => dll_exports.by_ordinal.get(ordinal).copied(),
        };
        if let Some(e) = &export {
            log::trace!("[XPORT] {dll}!{import:?} -> {:#x} ({:?})", e.address, e.tag);
        }
        export
    }

    /// Pseudo-handle for a known DLL name.
    pub fn module_handle(&self, dll: &str) -> Option<Handle> {
        let key = dll.to_ascii_lowercase();
        self.module_names
            .iter()
            .position(|n| *n == key)
            .map(|i| MODULE_HANDLE_BASE + i)
    }

    fn module_name(&self, handle: Handle) -> Option<&str> {
        handle
            .checked_sub(MODULE_HANDLE_BASE)
            .and_then(|i| self.module_names.get(i))
            .map(String::as_str)
    }

    /// Number of registered symbols (diagnostics).
    pub fn len(&self) -> usize {
        self.dlls.values().map(|d| d.by_name.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static TABLE: OnceLock<ExportTable> = OnceLock::new();

/// The process-wide export table, built on first use.
pub fn table() -> &'static ExportTable {
    TABLE.get_or_init(|| {
        let mut t = ExportTable::new();
        register_kernel32(&mut t);
        register_advapi32(&mut t);
        register_user32(&mut t);
        register_gdi32(&mut t);
        register_ws2_32(&mut t);
        register_ole32(&mut t);
        register_d3d(&mut t);
        crate::com::register_class_factory(
            crate::d3d::device::CLSID_DEVICE,
            crate::d3d::device::device_class_factory,
        );
        log::debug!("[XPORT] export table frozen: {} symbols", t.len());
        t
    })
}

macro_rules! export {
    ($t:ident, $dll:literal, $tag:ident, $name:ident = $f:expr) => {
        $t.register($dll, stringify!($name), $f as usize, SigTag::$tag);
    };
}

fn register_kernel32(t: &mut ExportTable) {
    use crate::io;
    use crate::ke::{critsec, env, event, interlocked, mutex, semaphore, thread, time, tls, wait};

    export!(t, "kernel32.dll", BoolReturn, CloseHandle = crate::ob::CloseHandle);
    export!(t, "kernel32.dll", HandleReturn, CreateFileA = io::CreateFileA);
    export!(t, "kernel32.dll", BoolReturn, ReadFile = io::ReadFile);
    export!(t, "kernel32.dll", BoolReturn, WriteFile = io::WriteFile);
    export!(t, "kernel32.dll", ValueReturn, SetFilePointer = io::SetFilePointer);
    export!(t, "kernel32.dll", BoolReturn, GetFileSizeEx = io::GetFileSizeEx);
    export!(t, "kernel32.dll", ValueReturn, GetFileSize = io::GetFileSize);
    export!(t, "kernel32.dll", BoolReturn, DeleteFileA = io::DeleteFileA);
    export!(t, "kernel32.dll", BoolReturn, CreateDirectoryA = io::CreateDirectoryA);
    export!(t, "kernel32.dll", BoolReturn, RemoveDirectoryA = io::RemoveDirectoryA);
    export!(t, "kernel32.dll", HandleReturn, FindFirstFileA = io::FindFirstFileA);
    export!(t, "kernel32.dll", BoolReturn, FindNextFileA = io::FindNextFileA);
    export!(t, "kernel32.dll", BoolReturn, FindClose = io::FindClose);
    export!(t, "kernel32.dll", HandleReturn, GetStdHandle = io::GetStdHandle);

    export!(t, "kernel32.dll", ValueReturn, GetLastError = crate::status::GetLastError);
    export!(t, "kernel32.dll", NoReturn, SetLastError = crate::status::SetLastError);

    export!(t, "kernel32.dll", ValueReturn, VirtualAlloc = crate::mm::VirtualAlloc);
    export!(t, "kernel32.dll", BoolReturn, VirtualFree = crate::mm::VirtualFree);
    export!(t, "kernel32.dll", BoolReturn, VirtualProtect = crate::mm::VirtualProtect);

    export!(t, "kernel32.dll", HandleReturn, CreateThread = thread::CreateThread);
    export!(t, "kernel32.dll", ValueReturn, ResumeThread = thread::ResumeThread);
    export!(t, "kernel32.dll", BoolReturn, GetExitCodeThread = thread::GetExitCodeThread);
    export!(t, "kernel32.dll", ValueReturn, GetCurrentThreadId = thread::GetCurrentThreadId);
    export!(t, "kernel32.dll", NoReturn, ExitThread = thread::ExitThread);
    export!(t, "kernel32.dll", NoReturn, ExitProcess = thread::ExitProcess);

    export!(t, "kernel32.dll", NoReturn, Sleep = time::Sleep);
    export!(t, "kernel32.dll", ValueReturn, GetTickCount = time::GetTickCount);
    export!(t, "kernel32.dll", ValueReturn, GetTickCount64 = time::GetTickCount64);
    export!(t, "kernel32.dll", BoolReturn, QueryPerformanceCounter = time::QueryPerformanceCounter);
    export!(t, "kernel32.dll", BoolReturn, QueryPerformanceFrequency = time::QueryPerformanceFrequency);

    export!(t, "kernel32.dll", ValueReturn, GetEnvironmentVariableA = env::GetEnvironmentVariableA);
    export!(t, "kernel32.dll", BoolReturn, SetEnvironmentVariableA = env::SetEnvironmentVariableA);
    export!(t, "kernel32.dll", ValueReturn, GetCommandLineA = env::GetCommandLineA);

    export!(t, "kernel32.dll", ValueReturn, InterlockedIncrement = interlocked::InterlockedIncrement);
    export!(t, "kernel32.dll", ValueReturn, InterlockedDecrement = interlocked::InterlockedDecrement);
    export!(t, "kernel32.dll", ValueReturn, InterlockedExchange = interlocked::InterlockedExchange);
    export!(t, "kernel32.dll", ValueReturn, InterlockedExchangeAdd = interlocked::InterlockedExchangeAdd);
    export!(t, "kernel32.dll", ValueReturn, InterlockedCompareExchange = interlocked::InterlockedCompareExchange);
    export!(t, "kernel32.dll", ValueReturn, InterlockedIncrement64 = interlocked::InterlockedIncrement64);
    export!(t, "kernel32.dll", ValueReturn, InterlockedDecrement64 = interlocked::InterlockedDecrement64);
    export!(t, "kernel32.dll", ValueReturn, InterlockedExchange64 = interlocked::InterlockedExchange64);
    export!(t, "kernel32.dll", ValueReturn, InterlockedExchangeAdd64 = interlocked::InterlockedExchangeAdd64);
    export!(t, "kernel32.dll", ValueReturn, InterlockedCompareExchange64 = interlocked::InterlockedCompareExchange64);

    export!(t, "kernel32.dll", ValueReturn, TlsAlloc = tls::TlsAlloc);
    export!(t, "kernel32.dll", BoolReturn, TlsFree = tls::TlsFree);
    export!(t, "kernel32.dll", ValueReturn, TlsGetValue = tls::TlsGetValue);
    export!(t, "kernel32.dll", BoolReturn, TlsSetValue = tls::TlsSetValue);

    export!(t, "kernel32.dll", HandleReturn, CreateEventA = event::CreateEventA);
    export!(t, "kernel32.dll", BoolReturn, SetEvent = event::SetEvent);
    export!(t, "kernel32.dll", BoolReturn, ResetEvent = event::ResetEvent);
    export!(t, "kernel32.dll", HandleReturn, CreateMutexA = mutex::CreateMutexA);
    export!(t, "kernel32.dll", BoolReturn, ReleaseMutex = mutex::ReleaseMutex);
    export!(t, "kernel32.dll", HandleReturn, CreateSemaphoreA = semaphore::CreateSemaphoreA);
    export!(t, "kernel32.dll", BoolReturn, ReleaseSemaphore = semaphore::ReleaseSemaphore);
    export!(t, "kernel32.dll", ValueReturn, WaitForSingleObject = wait::WaitForSingleObject);
    export!(t, "kernel32.dll", ValueReturn, WaitForMultipleObjects = wait::WaitForMultipleObjects);

    export!(t, "kernel32.dll", NoReturn, InitializeCriticalSection = critsec::InitializeCriticalSection);
    export!(t, "kernel32.dll", NoReturn, EnterCriticalSection = critsec::EnterCriticalSection);
    export!(t, "kernel32.dll", BoolReturn, TryEnterCriticalSection = critsec::TryEnterCriticalSection);
    export!(t, "kernel32.dll", NoReturn, LeaveCriticalSection = critsec::LeaveCriticalSection);
    export!(t, "kernel32.dll", NoReturn, DeleteCriticalSection = critsec::DeleteCriticalSection);

    export!(t, "kernel32.dll", HandleReturn, GetModuleHandleA = GetModuleHandleA);
    export!(t, "kernel32.dll", ValueReturn, GetProcAddress = GetProcAddress);
}

fn register_advapi32(t: &mut ExportTable) {
    use crate::cm::operations as reg;
    export!(t, "advapi32.dll", ValueReturn, RegCreateKeyExA = reg::RegCreateKeyExA);
    export!(t, "advapi32.dll", ValueReturn, RegOpenKeyExA = reg::RegOpenKeyExA);
    export!(t, "advapi32.dll", ValueReturn, RegSetValueExA = reg::RegSetValueExA);
    export!(t, "advapi32.dll", ValueReturn, RegQueryValueExA = reg::RegQueryValueExA);
    export!(t, "advapi32.dll", ValueReturn, RegDeleteKeyA = reg::RegDeleteKeyA);
    export!(t, "advapi32.dll", ValueReturn, RegDeleteValueA = reg::RegDeleteValueA);
    export!(t, "advapi32.dll", ValueReturn, RegCloseKey = reg::RegCloseKey);
}

fn register_user32(t: &mut ExportTable) {
    use crate::win32k::user::{class, message, paint, timer, window};
    export!(t, "user32.dll", ValueReturn, RegisterClassA = class::RegisterClassA);
    export!(t, "user32.dll", HandleReturn, CreateWindowExA = window::CreateWindowExA);
    export!(t, "user32.dll", BoolReturn, DestroyWindow = window::DestroyWindow);
    export!(t, "user32.dll", BoolReturn, ShowWindow = window::ShowWindow);
    export!(t, "user32.dll", ValueReturn, DefWindowProcA = window::DefWindowProcA);
    export!(t, "user32.dll", BoolReturn, GetClientRect = window::GetClientRect);
    export!(t, "user32.dll", ValueReturn, SetWindowLongPtrA = window::SetWindowLongPtrA);
    export!(t, "user32.dll", ValueReturn, GetWindowLongPtrA = window::GetWindowLongPtrA);
    export!(t, "user32.dll", HandleReturn, SetFocus = window::SetFocus);
    export!(t, "user32.dll", HandleReturn, GetFocus = window::GetFocus);

    export!(t, "user32.dll", BoolReturn, GetMessageA = message::GetMessageA);
    export!(t, "user32.dll", BoolReturn, PeekMessageA = message::PeekMessageA);
    export!(t, "user32.dll", BoolReturn, PostMessageA = message::PostMessageA);
    export!(t, "user32.dll", NoReturn, PostQuitMessage = message::PostQuitMessage);
    export!(t, "user32.dll", BoolReturn, TranslateMessage = message::TranslateMessage);
    export!(t, "user32.dll", ValueReturn, DispatchMessageA = message::DispatchMessageA);

    export!(t, "user32.dll", ValueReturn, SetTimer = timer::SetTimer);
    export!(t, "user32.dll", BoolReturn, KillTimer = timer::KillTimer);

    export!(t, "user32.dll", BoolReturn, InvalidateRect = paint::InvalidateRect);
    export!(t, "user32.dll", BoolReturn, ValidateRect = paint::ValidateRect);
    export!(t, "user32.dll", BoolReturn, UpdateWindow = paint::UpdateWindow);
    export!(t, "user32.dll", HandleReturn, BeginPaint = paint::BeginPaint);
    export!(t, "user32.dll", BoolReturn, EndPaint = paint::EndPaint);

    export!(t, "user32.dll", HandleReturn, GetDC = crate::win32k::gdi::dc::GetDC);
    export!(t, "user32.dll", ValueReturn, ReleaseDC = crate::win32k::gdi::dc::ReleaseDC);
    export!(t, "user32.dll", ValueReturn, FillRect = crate::win32k::gdi::draw::FillRect);
    export!(t, "user32.dll", ValueReturn, DrawTextA = crate::win32k::gdi::font::DrawTextA);
}

fn register_gdi32(t: &mut ExportTable) {
    use crate::win32k::gdi::{self, dc, draw, font};
    export!(t, "gdi32.dll", HandleReturn, GetStockObject = gdi::GetStockObject);
    export!(t, "gdi32.dll", HandleReturn, CreateSolidBrush = dc::CreateSolidBrush);
    export!(t, "gdi32.dll", HandleReturn, CreatePen = dc::CreatePen);
    export!(t, "gdi32.dll", HandleReturn, CreateCompatibleDC = dc::CreateCompatibleDC);
    export!(t, "gdi32.dll", HandleReturn, CreateCompatibleBitmap = dc::CreateCompatibleBitmap);
    export!(t, "gdi32.dll", HandleReturn, SelectObject = dc::SelectObject);
    export!(t, "gdi32.dll", BoolReturn, DeleteObject = dc::DeleteObject);
    export!(t, "gdi32.dll", BoolReturn, DeleteDC = dc::DeleteDC);
    export!(t, "gdi32.dll", ValueReturn, SetTextColor = dc::SetTextColor);
    export!(t, "gdi32.dll", ValueReturn, SetBkColor = dc::SetBkColor);
    export!(t, "gdi32.dll", ValueReturn, SetBkMode = dc::SetBkMode);
    export!(t, "gdi32.dll", BoolReturn, Rectangle = draw::Rectangle);
    export!(t, "gdi32.dll", BoolReturn, MoveToEx = draw::MoveToEx);
    export!(t, "gdi32.dll", BoolReturn, LineTo = draw::LineTo);
    export!(t, "gdi32.dll", ValueReturn, SetPixel = draw::SetPixel);
    export!(t, "gdi32.dll", ValueReturn, GetPixel = draw::GetPixel);
    export!(t, "gdi32.dll", BoolReturn, TextOutA = font::TextOutA);
    export!(t, "gdi32.dll", BoolReturn, GetTextMetricsA = font::GetTextMetricsA);
}

fn register_ws2_32(t: &mut ExportTable) {
    use crate::net::{self, socket};
    export!(t, "ws2_32.dll", ValueReturn, WSAStartup = net::WSAStartup);
    export!(t, "ws2_32.dll", ValueReturn, WSACleanup = net::WSACleanup);
    export!(t, "ws2_32.dll", ValueReturn, WSAGetLastError = net::WSAGetLastError);
    export!(t, "ws2_32.dll", NoReturn, WSASetLastError = net::WSASetLastError);
    export!(t, "ws2_32.dll", HandleReturn, socket = socket::socket);
    export!(t, "ws2_32.dll", ValueReturn, bind = socket::bind);
    export!(t, "ws2_32.dll", ValueReturn, listen = socket::listen);
    export!(t, "ws2_32.dll", HandleReturn, accept = socket::accept);
    export!(t, "ws2_32.dll", ValueReturn, connect = socket::connect);
    export!(t, "ws2_32.dll", ValueReturn, send = socket::send);
    export!(t, "ws2_32.dll", ValueReturn, recv = socket::recv);
    export!(t, "ws2_32.dll", ValueReturn, sendto = socket::sendto);
    export!(t, "ws2_32.dll", ValueReturn, recvfrom = socket::recvfrom);
    export!(t, "ws2_32.dll", ValueReturn, closesocket = socket::closesocket);
    export!(t, "ws2_32.dll", ValueReturn, shutdown = socket::shutdown);
    export!(t, "ws2_32.dll", ValueReturn, ioctlsocket = socket::ioctlsocket);
    export!(t, "ws2_32.dll", ValueReturn, getaddrinfo = socket::getaddrinfo);
    export!(t, "ws2_32.dll", NoReturn, freeaddrinfo = socket::freeaddrinfo);
    export!(t, "ws2_32.dll", ValueReturn, gethostname = socket::gethostname);
    export!(t, "ws2_32.dll", ValueReturn, htons = net::htons);
    export!(t, "ws2_32.dll", ValueReturn, ntohs = net::ntohs);
    export!(t, "ws2_32.dll", ValueReturn, htonl = net::htonl);
    export!(t, "ws2_32.dll", ValueReturn, ntohl = net::ntohl);
}

fn register_ole32(t: &mut ExportTable) {
    use crate::com;
    export!(t, "ole32.dll", HresultReturn, CoInitializeEx = com::CoInitializeEx);
    export!(t, "ole32.dll", NoReturn, CoUninitialize = com::CoUninitialize);
    export!(t, "ole32.dll", HresultReturn, CoCreateInstance = com::CoCreateInstance);
    export!(t, "ole32.dll", ValueReturn, CoTaskMemAlloc = com::CoTaskMemAlloc);
    export!(t, "ole32.dll", NoReturn, CoTaskMemFree = com::CoTaskMemFree);
}

fn register_d3d(t: &mut ExportTable) {
    use crate::d3d::device;
    export!(t, "d3d11.dll", HresultReturn, D3D11CreateDevice = device::D3D11CreateDevice);
    export!(t, "d3d12.dll", HresultReturn, D3D12CreateDevice = device::D3D12CreateDevice);
}

// ============================================================================
// Module handle surface
// ============================================================================

/// GetModuleHandleA - pseudo-handle for an in-process DLL name. A null
/// name means the executable module itself.
pub unsafe extern "win64" fn GetModuleHandleA(name: *const c_char) -> Handle {
    if name.is_null() {
        return MODULE_HANDLE_BASE;
    }
    let name = match crate::abi::cstr_arg(name) {
        Some(n) => n,
        None => {
            crate::status::set_last_error(crate::status::ERROR_INVALID_PARAMETER);
            return 0;
        }
    };
    match table().module_handle(name) {
        Some(h) => h,
        None => {
            crate::status::set_last_error(crate::status::ERROR_FILE_NOT_FOUND);
            0
        }
    }
}

/// GetProcAddress - resolve a symbol (or ordinal, passed as a small
/// pointer value) from a module pseudo-handle.
pub unsafe extern "win64" fn GetProcAddress(module: Handle, name: *const c_char) -> *mut c_void {
    let t = table();
    let dll = match t.module_name(module) {
        Some(d) => d.to_string(),
        None => {
            crate::status::set_last_error(crate::status::ERROR_INVALID_HANDLE);
            return std::ptr::null_mut();
        }
    };
    let import = if (name as usize) < 0x1_0000 {
        ImportName::Ordinal(name as usize as u16)
    } else {
        match crate::abi::cstr_arg(name) {
            Some(n) => ImportName::Name(n),
            None => {
                crate::status::set_last_error(crate::status::ERROR_INVALID_PARAMETER);
                return std::ptr::null_mut();
            }
        }
    };
    match t.resolve(&dll, &import) {
        Some(export) => export.address as *mut c_void,
        None => {
            crate::status::set_last_error(crate::status::ERROR_FILE_NOT_FOUND);
            std::ptr::null_mut()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn test_dll_name_case_insensitive_symbol_case_sensitive() {
        let t = table();
        assert!(t.resolve("KERNEL32.DLL", &ImportName::Name("CreateFileA")).is_some());
        assert!(t.resolve("kernel32.dll", &ImportName::Name("CreateFileA")).is_some());
        assert!(t.resolve("kernel32.dll", &ImportName::Name("createfilea")).is_none());
        assert!(t.resolve("nosuch.dll", &ImportName::Name("CreateFileA")).is_none());
    }

    #[test]
    fn test_ordinals_resolve_to_same_address() {
        let t = table();
        // Ordinal 1 is the first kernel32 registration.
        let by_ordinal = t.resolve("kernel32.dll", &ImportName::Ordinal(1)).unwrap();
        let by_name = t.resolve("kernel32.dll", &ImportName::Name("CloseHandle")).unwrap();
        assert_eq!(by_ordinal.address, by_name.address);
        assert!(t.resolve("kernel32.dll", &ImportName::Ordinal(9999)).is_none());
    }

    #[test]
    fn test_every_registered_address_is_nonnull() {
        let t = table();
        for dll in ["kernel32.dll", "user32.dll", "gdi32.dll", "ws2_32.dll", "advapi32.dll", "ole32.dll", "d3d11.dll"] {
            let exports = t.dlls.get(dll).unwrap();
            for (name, export) in &exports.by_name {
                assert_ne!(export.address, 0, "{dll}!{name}");
            }
        }
    }

    #[test]
    fn test_get_proc_address_round_trip() {
        unsafe {
            let dll = CString::new("kernel32.dll").unwrap();
            let module = GetModuleHandleA(dll.as_ptr());
            assert_ne!(module, 0);
            let name = CString::new("GetTickCount").unwrap();
            let addr = GetProcAddress(module, name.as_ptr());
            assert_eq!(addr as usize, crate::ke::time::GetTickCount as usize);

            let missing = CString::new("NotARealExport").unwrap();
            assert!(GetProcAddress(module, missing.as_ptr()).is_null());
        }
    }
}
