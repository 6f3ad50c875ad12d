//! Socket Operations
//!
//! Stream and datagram sockets over host descriptors, name resolution
//! returning a caller-freed linked list, and blocking-mode control.

use super::{
    claim_activation_fd, set_wsa_error, started, wsa_from_errno, SOCKET_ERROR, WSAEFAULT,
    WSAEINVAL, WSAENOTSOCK, WSAHOST_NOT_FOUND, WSANOTINITIALISED,
};
use crate::abi::{Dword, Handle, INVALID_HANDLE_VALUE};
use crate::ob::{self, KernelObject, ObjectBody};
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicBool, Ordering};

/// `socket()` failure sentinel (INVALID_SOCKET).
pub const INVALID_SOCKET: Handle = INVALID_HANDLE_VALUE;

/// `ioctlsocket` selector for blocking-mode control.
pub const FIONBIO: Dword = 0x8004_667E;

pub const SD_RECEIVE: c_int = 0;
pub const SD_SEND: c_int = 1;
pub const SD_BOTH: c_int = 2;

/// A socket behind a handle: host descriptor plus the bookkeeping the
/// Windows API exposes.
pub struct SocketObject {
    fd: c_int,
    pub family: c_int,
    pub socktype: c_int,
    blocking: AtomicBool,
    /// Pre-bound listener inherited through socket activation; bind and
    /// listen are already done.
    adopted: bool,
}

impl SocketObject {
    pub fn fd(&self) -> c_int {
        self.fd
    }
}

impl Drop for SocketObject {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn fail_errno() -> i32 {
    let errno = unsafe { *libc::__errno_location() };
    set_wsa_error(wsa_from_errno(errno));
    SOCKET_ERROR
}

fn socket_of(handle: Handle) -> Option<std::sync::Arc<KernelObject>> {
    let obj = ob::table().get(handle).ok()?;
    matches!(obj.body, ObjectBody::Socket(_)).then_some(obj)
}

/// Run `f` on the socket behind `handle`, with the startup and handle
/// checks every operation shares.
unsafe fn with_socket(handle: Handle, f: impl FnOnce(&SocketObject) -> i32) -> i32 {
    if !started() {
        set_wsa_error(WSANOTINITIALISED);
        return SOCKET_ERROR;
    }
    match socket_of(handle) {
        Some(obj) => match &obj.body {
            ObjectBody::Socket(s) => f(s),
            _ => unreachable!(),
        },
        None => {
            set_wsa_error(WSAENOTSOCK);
            SOCKET_ERROR
        }
    }
}

// ============================================================================
// Creation and teardown
// ============================================================================

/// socket - create a socket, adopting an inherited listener when one of
/// the right family and type is waiting.
pub unsafe extern "win64" fn socket(family: c_int, socktype: c_int, protocol: c_int) -> Handle {
    if !started() {
        set_wsa_error(WSANOTINITIALISED);
        return INVALID_SOCKET;
    }
    if let Some(fd) = claim_activation_fd(family, socktype) {
        log::debug!("[NET] adopting inherited listener fd {fd}");
        return ob::table().insert(KernelObject::new(ObjectBody::Socket(SocketObject {
            fd,
            family,
            socktype,
            blocking: AtomicBool::new(true),
            adopted: true,
        })));
    }
    let fd = libc::socket(family, socktype, protocol);
    if fd < 0 {
        fail_errno();
        return INVALID_SOCKET;
    }
    ob::table().insert(KernelObject::new(ObjectBody::Socket(SocketObject {
        fd,
        family,
        socktype,
        blocking: AtomicBool::new(true),
        adopted: false,
    })))
}

/// closesocket - release the handle and the descriptor behind it.
pub unsafe extern "win64" fn closesocket(handle: Handle) -> i32 {
    match socket_of(handle) {
        Some(obj) => {
            drop(obj);
            match ob::table().close(handle) {
                Ok(()) => 0,
                Err(_) => {
                    set_wsa_error(WSAENOTSOCK);
                    SOCKET_ERROR
                }
            }
        }
        None => {
            set_wsa_error(WSAENOTSOCK);
            SOCKET_ERROR
        }
    }
}

/// shutdown - half or full close of a connected socket.
pub unsafe extern "win64" fn shutdown(handle: Handle, how: c_int) -> i32 {
    let host_how = match how {
        SD_RECEIVE => libc::SHUT_RD,
        SD_SEND => libc::SHUT_WR,
        SD_BOTH => libc::SHUT_RDWR,
        _ => {
            set_wsa_error(WSAEINVAL);
            return SOCKET_ERROR;
        }
    };
    with_socket(handle, |s| {
        if libc::shutdown(s.fd, host_how) == 0 {
            0
        } else {
            fail_errno()
        }
    })
}

// ============================================================================
// Binding and connection
// ============================================================================

/// bind - the Windows-layout sockaddr is passed through byte-for-byte.
/// No-op on adopted listeners, which arrive already bound.
pub unsafe extern "win64" fn bind(handle: Handle, addr: *const c_void, addr_len: c_int) -> i32 {
    if addr.is_null() {
        set_wsa_error(WSAEFAULT);
        return SOCKET_ERROR;
    }
    with_socket(handle, |s| {
        if s.adopted {
            return 0;
        }
        if libc::bind(s.fd, addr as *const libc::sockaddr, addr_len as libc::socklen_t) == 0 {
            0
        } else {
            fail_errno()
        }
    })
}

/// listen - no-op on adopted listeners.
pub unsafe extern "win64" fn listen(handle: Handle, backlog: c_int) -> i32 {
    with_socket(handle, |s| {
        if s.adopted {
            return 0;
        }
        if libc::listen(s.fd, backlog) == 0 {
            0
        } else {
            fail_errno()
        }
    })
}

/// accept - returns a new socket handle for the connection.
pub unsafe extern "win64" fn accept(
    handle: Handle,
    addr: *mut c_void,
    addr_len: *mut c_int,
) -> Handle {
    if !started() {
        set_wsa_error(WSANOTINITIALISED);
        return INVALID_SOCKET;
    }
    let obj = match socket_of(handle) {
        Some(o) => o,
        None => {
            set_wsa_error(WSAENOTSOCK);
            return INVALID_SOCKET;
        }
    };
    let s = match &obj.body {
        ObjectBody::Socket(s) => s,
        _ => unreachable!(),
    };
    let mut host_len: libc::socklen_t = if addr_len.is_null() {
        0
    } else {
        *addr_len as libc::socklen_t
    };
    let fd = libc::accept(
        s.fd,
        addr as *mut libc::sockaddr,
        if addr_len.is_null() {
            std::ptr::null_mut()
        } else {
            &mut host_len
        },
    );
    if fd < 0 {
        fail_errno();
        return INVALID_SOCKET;
    }
    if !addr_len.is_null() {
        *addr_len = host_len as c_int;
    }
    ob::table().insert(KernelObject::new(ObjectBody::Socket(SocketObject {
        fd,
        family: s.family,
        socktype: s.socktype,
        blocking: AtomicBool::new(true),
        adopted: false,
    })))
}

/// connect - byte-for-byte sockaddr passthrough.
pub unsafe extern "win64" fn connect(handle: Handle, addr: *const c_void, addr_len: c_int) -> i32 {
    if addr.is_null() {
        set_wsa_error(WSAEFAULT);
        return SOCKET_ERROR;
    }
    with_socket(handle, |s| {
        if libc::connect(s.fd, addr as *const libc::sockaddr, addr_len as libc::socklen_t) == 0 {
            0
        } else {
            fail_errno()
        }
    })
}

// ============================================================================
// Data transfer
// ============================================================================

/// send - returns bytes sent or SOCKET_ERROR.
pub unsafe extern "win64" fn send(
    handle: Handle,
    buffer: *const c_char,
    length: c_int,
    flags: c_int,
) -> i32 {
    with_socket(handle, |s| {
        let n = libc::send(s.fd, buffer as *const c_void, length as usize, flags);
        if n < 0 {
            fail_errno()
        } else {
            n as i32
        }
    })
}

/// recv - returns bytes received, 0 at orderly shutdown, or SOCKET_ERROR.
pub unsafe extern "win64" fn recv(
    handle: Handle,
    buffer: *mut c_char,
    length: c_int,
    flags: c_int,
) -> i32 {
    with_socket(handle, |s| {
        let n = libc::recv(s.fd, buffer as *mut c_void, length as usize, flags);
        if n < 0 {
            fail_errno()
        } else {
            n as i32
        }
    })
}

/// sendto - datagram send with explicit destination.
pub unsafe extern "win64" fn sendto(
    handle: Handle,
    buffer: *const c_char,
    length: c_int,
    flags: c_int,
    addr: *const c_void,
    addr_len: c_int,
) -> i32 {
    with_socket(handle, |s| {
        let n = libc::sendto(
            s.fd,
            buffer as *const c_void,
            length as usize,
            flags,
            addr as *const libc::sockaddr,
            addr_len as libc::socklen_t,
        );
        if n < 0 {
            fail_errno()
        } else {
            n as i32
        }
    })
}

/// recvfrom - datagram receive reporting the peer address.
pub unsafe extern "win64" fn recvfrom(
    handle: Handle,
    buffer: *mut c_char,
    length: c_int,
    flags: c_int,
    addr: *mut c_void,
    addr_len: *mut c_int,
) -> i32 {
    with_socket(handle, |s| {
        let mut host_len: libc::socklen_t = if addr_len.is_null() {
            0
        } else {
            *addr_len as libc::socklen_t
        };
        let n = libc::recvfrom(
            s.fd,
            buffer as *mut c_void,
            length as usize,
            flags,
            addr as *mut libc::sockaddr,
            if addr_len.is_null() {
                std::ptr::null_mut()
            } else {
                &mut host_len
            },
        );
        if n < 0 {
            fail_errno()
        } else {
            if !addr_len.is_null() {
                *addr_len = host_len as c_int;
            }
            n as i32
        }
    })
}

/// ioctlsocket - FIONBIO toggles blocking mode.
pub unsafe extern "win64" fn ioctlsocket(handle: Handle, command: Dword, argument: *mut Dword) -> i32 {
    if command != FIONBIO {
        set_wsa_error(WSAEINVAL);
        return SOCKET_ERROR;
    }
    if argument.is_null() {
        set_wsa_error(WSAEFAULT);
        return SOCKET_ERROR;
    }
    let nonblocking = *argument != 0;
    with_socket(handle, |s| {
        let flags = libc::fcntl(s.fd, libc::F_GETFL);
        if flags < 0 {
            return fail_errno();
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        if libc::fcntl(s.fd, libc::F_SETFL, flags) < 0 {
            return fail_errno();
        }
        s.blocking.store(!nonblocking, Ordering::Release);
        0
    })
}

// ============================================================================
// Name resolution
// ============================================================================

/// ADDRINFOA, Windows layout (canonical name precedes the address).
#[repr(C)]
pub struct AddrInfoA {
    pub ai_flags: c_int,
    pub ai_family: c_int,
    pub ai_socktype: c_int,
    pub ai_protocol: c_int,
    pub ai_addrlen: usize,
    pub ai_canonname: *mut c_char,
    pub ai_addr: *mut c_void,
    pub ai_next: *mut AddrInfoA,
}

/// getaddrinfo - resolve a node/service pair into a linked list of
/// address records the caller must free with [`freeaddrinfo`].
pub unsafe extern "win64" fn getaddrinfo(
    node: *const c_char,
    service: *const c_char,
    hints: *const AddrInfoA,
    out: *mut *mut AddrInfoA,
) -> i32 {
    if out.is_null() {
        return WSAEFAULT;
    }
    *out = std::ptr::null_mut();

    let mut host_hints: libc::addrinfo = std::mem::zeroed();
    if !hints.is_null() {
        host_hints.ai_flags = (*hints).ai_flags;
        host_hints.ai_family = (*hints).ai_family;
        host_hints.ai_socktype = (*hints).ai_socktype;
        host_hints.ai_protocol = (*hints).ai_protocol;
    }
    let mut host_list: *mut libc::addrinfo = std::ptr::null_mut();
    let rc = libc::getaddrinfo(
        node,
        service,
        if hints.is_null() {
            std::ptr::null()
        } else {
            &host_hints
        },
        &mut host_list,
    );
    if rc != 0 {
        return WSAHOST_NOT_FOUND;
    }

    // Rebuild as guest-layout records with owned allocations.
    let mut head: *mut AddrInfoA = std::ptr::null_mut();
    let mut tail: *mut AddrInfoA = std::ptr::null_mut();
    let mut cursor = host_list;
    while !cursor.is_null() {
        let h = &*cursor;
        let addr = if h.ai_addr.is_null() || h.ai_addrlen == 0 {
            std::ptr::null_mut()
        } else {
            let bytes =
                std::slice::from_raw_parts(h.ai_addr as *const u8, h.ai_addrlen as usize).to_vec();
            Box::into_raw(bytes.into_boxed_slice()) as *mut c_void
        };
        let node = Box::into_raw(Box::new(AddrInfoA {
            ai_flags: h.ai_flags,
            ai_family: h.ai_family,
            ai_socktype: h.ai_socktype,
            ai_protocol: h.ai_protocol,
            ai_addrlen: h.ai_addrlen as usize,
            ai_canonname: std::ptr::null_mut(),
            ai_addr: addr,
            ai_next: std::ptr::null_mut(),
        }));
        if head.is_null() {
            head = node;
        } else {
            (*tail).ai_next = node;
        }
        tail = node;
        cursor = h.ai_next;
    }
    libc::freeaddrinfo(host_list);
    *out = head;
    0
}

/// freeaddrinfo - release a list returned by [`getaddrinfo`].
pub unsafe extern "win64" fn freeaddrinfo(list: *mut AddrInfoA) {
    let mut cursor = list;
    while !cursor.is_null() {
        let boxed = Box::from_raw(cursor);
        if !boxed.ai_addr.is_null() {
            drop(Box::from_raw(std::slice::from_raw_parts_mut(
                boxed.ai_addr as *mut u8,
                boxed.ai_addrlen,
            )));
        }
        cursor = boxed.ai_next;
    }
}

/// gethostname - the host's node name.
pub unsafe extern "win64" fn gethostname(buffer: *mut c_char, length: c_int) -> i32 {
    if buffer.is_null() || length <= 0 {
        set_wsa_error(WSAEFAULT);
        return SOCKET_ERROR;
    }
    if libc::gethostname(buffer, length as usize) == 0 {
        0
    } else {
        fail_errno()
    }
}
