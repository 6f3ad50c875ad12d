//! Cross-subsystem scenarios driven through the ABI surface, the way a
//! guest image would call it.

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::ptr;
use std::sync::atomic::Ordering;

use winhost::abi::{Dword, Handle, INVALID_HANDLE_VALUE, TRUE};
use winhost::status::{INFINITE, WAIT_OBJECT_0};

fn setup() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let scratch = std::env::temp_dir().join(format!("winhost-scn-{}", std::process::id()));
        std::env::set_var("WINHOST_REGISTRY_ROOT", &scratch);
        std::env::set_var("WINHOST_GPU", "0");
        winhost::init();
    });
}

#[test]
fn scenario_hello_writes_to_standard_output() {
    setup();
    unsafe {
        let stdout = winhost::io::GetStdHandle(winhost::io::STD_OUTPUT_HANDLE);
        assert_ne!(stdout, INVALID_HANDLE_VALUE);
        let line = b"Hello from Windows .exe on CITC OS!\n";
        let mut written = 0;
        assert_eq!(
            winhost::io::WriteFile(
                stdout,
                line.as_ptr() as *const c_void,
                line.len() as Dword,
                &mut written,
                ptr::null_mut()
            ),
            TRUE
        );
        assert_eq!(written as usize, line.len());
    }
}

// ============================================================================
// Mutex counter
// ============================================================================

struct MutexCounter {
    mutex: Handle,
    counter: u32,
}

unsafe extern "win64" fn counting_worker(arg: *mut c_void) -> Dword {
    let shared = arg as *mut MutexCounter;
    for _ in 0..1000 {
        assert_eq!(
            winhost::ke::wait::WaitForSingleObject((*shared).mutex, INFINITE),
            WAIT_OBJECT_0
        );
        (*shared).counter += 1;
        assert_eq!(winhost::ke::mutex::ReleaseMutex((*shared).mutex), TRUE);
    }
    0
}

#[test]
fn scenario_mutex_counter_converges() {
    setup();
    unsafe {
        let mutex = winhost::ke::mutex::CreateMutexA(ptr::null_mut(), 0, ptr::null());
        assert_ne!(mutex, 0);
        let mut shared = MutexCounter { mutex, counter: 0 };
        let arg = &mut shared as *mut MutexCounter as *mut c_void;
        let a = winhost::ke::thread::CreateThread(
            ptr::null_mut(),
            0,
            counting_worker as *mut c_void,
            arg,
            0,
            ptr::null_mut(),
        );
        let b = winhost::ke::thread::CreateThread(
            ptr::null_mut(),
            0,
            counting_worker as *mut c_void,
            arg,
            0,
            ptr::null_mut(),
        );
        assert_ne!(a, 0);
        assert_ne!(b, 0);

        let both = [a, b];
        assert_eq!(
            winhost::ke::wait::WaitForMultipleObjects(2, both.as_ptr(), TRUE, 30_000),
            WAIT_OBJECT_0
        );
        assert_eq!(shared.counter, 2000);

        winhost::ob::CloseHandle(a);
        winhost::ob::CloseHandle(b);
        winhost::ob::CloseHandle(mutex);
    }
}

// ============================================================================
// TCP loopback echo
// ============================================================================

#[repr(C)]
#[derive(Clone, Copy)]
struct SockAddrIn {
    sin_family: u16,
    sin_port: u16,
    sin_addr: u32,
    sin_zero: [u8; 8],
}

fn loopback(port: u16) -> SockAddrIn {
    SockAddrIn {
        sin_family: 2, // AF_INET
        sin_port: port.to_be(),
        sin_addr: u32::from_be_bytes([127, 0, 0, 1]).to_be(),
        sin_zero: [0; 8],
    }
}

unsafe extern "win64" fn echo_server(arg: *mut c_void) -> Dword {
    let listener = arg as Handle;
    let conn = winhost::net::socket::accept(listener, ptr::null_mut(), ptr::null_mut());
    if conn == winhost::net::socket::INVALID_SOCKET {
        return 1;
    }
    let mut buf = [0 as c_char; 4];
    if winhost::net::socket::recv(conn, buf.as_mut_ptr(), 4, 0) != 4 {
        return 2;
    }
    if winhost::net::socket::send(conn, buf.as_ptr(), 4, 0) != 4 {
        return 3;
    }
    winhost::net::socket::closesocket(conn);
    0
}

#[test]
fn scenario_tcp_loopback_echo() {
    setup();
    unsafe {
        winhost::net::WSAStartup(0x0202, ptr::null_mut());

        let server = winhost::net::socket::socket(2, 1, 0);
        let addr = loopback(19997);
        assert_eq!(
            winhost::net::socket::bind(server, &addr as *const _ as *const c_void, 16),
            0
        );
        assert_eq!(winhost::net::socket::listen(server, 1), 0);

        let thread = winhost::ke::thread::CreateThread(
            ptr::null_mut(),
            0,
            echo_server as *mut c_void,
            server as *mut c_void,
            0,
            ptr::null_mut(),
        );

        let client = winhost::net::socket::socket(2, 1, 0);
        assert_eq!(
            winhost::net::socket::connect(client, &addr as *const _ as *const c_void, 16),
            0
        );
        let ping = CString::new("PING").unwrap();
        assert_eq!(winhost::net::socket::send(client, ping.as_ptr(), 4, 0), 4);
        let mut echo = [0 as c_char; 4];
        assert_eq!(winhost::net::socket::recv(client, echo.as_mut_ptr(), 4, 0), 4);
        assert_eq!(
            std::slice::from_raw_parts(echo.as_ptr() as *const u8, 4),
            b"PING"
        );

        // The server thread finished cleanly within the deadline.
        assert_eq!(
            winhost::ke::wait::WaitForSingleObject(thread, 5000),
            WAIT_OBJECT_0
        );
        let mut code = 99;
        winhost::ke::thread::GetExitCodeThread(thread, &mut code);
        assert_eq!(code, 0);

        winhost::net::socket::closesocket(client);
        winhost::net::socket::closesocket(server);
        winhost::ob::CloseHandle(thread);
        winhost::net::WSACleanup();
    }
}

// ============================================================================
// Registry round trip
// ============================================================================

#[test]
fn scenario_registry_round_trip() {
    setup();
    unsafe {
        use winhost::cm::operations::*;
        use winhost::cm::{RegType, HKEY_LOCAL_MACHINE};

        let subkey = CString::new("SOFTWARE\\CitcTest").unwrap();
        let mut key: Handle = 0;
        assert_eq!(
            RegCreateKeyExA(
                HKEY_LOCAL_MACHINE,
                subkey.as_ptr(),
                0,
                ptr::null(),
                0,
                0,
                ptr::null_mut(),
                &mut key,
                ptr::null_mut()
            ),
            0
        );

        let str_name = CString::new("TestStr").unwrap();
        let payload = b"Hello Registry!\0";
        assert_eq!(
            RegSetValueExA(
                key,
                str_name.as_ptr(),
                0,
                RegType::Sz as Dword,
                payload.as_ptr(),
                payload.len() as Dword
            ),
            0
        );
        let dword_name = CString::new("TestDword").unwrap();
        assert_eq!(
            RegSetValueExA(
                key,
                dword_name.as_ptr(),
                0,
                RegType::Dword as Dword,
                42u32.to_le_bytes().as_ptr(),
                4
            ),
            0
        );

        let mut ty = 0;
        let mut buf = [0u8; 64];
        let mut len = buf.len() as Dword;
        assert_eq!(
            RegQueryValueExA(key, str_name.as_ptr(), ptr::null_mut(), &mut ty, buf.as_mut_ptr(), &mut len),
            0
        );
        assert_eq!(ty, RegType::Sz as Dword);
        assert_eq!(&buf[..len as usize], payload);

        let mut dword = [0u8; 4];
        let mut len = 4;
        assert_eq!(
            RegQueryValueExA(key, dword_name.as_ptr(), ptr::null_mut(), &mut ty, dword.as_mut_ptr(), &mut len),
            0
        );
        assert_eq!(ty, RegType::Dword as Dword);
        assert_eq!(u32::from_le_bytes(dword), 42);

        assert_eq!(RegCloseKey(key), 0);
    }
}

// ============================================================================
// Interlocked invariant
// ============================================================================

static SHARED: std::sync::atomic::AtomicI32 = std::sync::atomic::AtomicI32::new(0);

unsafe extern "win64" fn interlocked_worker(_arg: *mut c_void) -> Dword {
    for _ in 0..1000 {
        winhost::ke::interlocked::InterlockedIncrement(SHARED.as_ptr());
    }
    0
}

#[test]
fn scenario_interlocked_counter_converges() {
    setup();
    SHARED.store(0, Ordering::SeqCst);
    unsafe {
        let mut threads = [0 as Handle; 4];
        for t in threads.iter_mut() {
            *t = winhost::ke::thread::CreateThread(
                ptr::null_mut(),
                0,
                interlocked_worker as *mut c_void,
                ptr::null_mut(),
                0,
                ptr::null_mut(),
            );
            assert_ne!(*t, 0);
        }
        assert_eq!(
            winhost::ke::wait::WaitForMultipleObjects(4, threads.as_ptr(), TRUE, 30_000),
            WAIT_OBJECT_0
        );
        assert_eq!(SHARED.load(Ordering::SeqCst), 4000);
        for t in threads {
            winhost::ob::CloseHandle(t);
        }
    }
}
