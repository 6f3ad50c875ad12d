//! Thread Objects
//!
//! Guest threads are real host threads. Each carries a guest thread id,
//! a dispatcher that signals on exit (so thread handles are waitable and
//! stay signaled), and an exit code readable afterwards.
//!
//! Exit bookkeeping runs exactly once per thread, whether the start
//! routine returns or the guest calls `ExitThread`: the exit code is
//! published, owned mutexes are marked abandoned, the guest TLS block is
//! torn down and joiners are woken.

use crate::abi::{Bool, Dword, Handle, FALSE};
use crate::ke::dispatcher::{DispatchState, Dispatcher};
use crate::ke::mutex;
use crate::ob::{self, KernelObject, ObjectBody};
use crate::status::{self, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, STILL_ACTIVE};
use std::cell::RefCell;
use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// `CreateThread` flag: start suspended until `ResumeThread`.
pub const CREATE_SUSPENDED: Dword = 0x0000_0004;

/// Guest start routine, Microsoft x64 convention.
pub type ThreadStart = unsafe extern "win64" fn(*mut c_void) -> Dword;

/// A thread behind a handle.
pub struct ThreadObject {
    pub dispatcher: Dispatcher,
    tid: u32,
    exit_code: AtomicU32,
    exited: AtomicBool,
    gate: Mutex<bool>,
    gate_cond: Condvar,
}

impl ThreadObject {
    fn new(tid: u32, suspended: bool) -> Self {
        Self {
            dispatcher: Dispatcher::new(DispatchState::Thread { exited: false }),
            tid,
            exit_code: AtomicU32::new(STILL_ACTIVE),
            exited: AtomicBool::new(false),
            gate: Mutex::new(suspended),
            gate_cond: Condvar::new(),
        }
    }

    pub fn tid(&self) -> u32 {
        self.tid
    }

    /// Exit code, `None` while the thread is still running.
    pub fn exit_code(&self) -> Option<Dword> {
        self.exited
            .load(Ordering::Acquire)
            .then(|| self.exit_code.load(Ordering::Acquire))
    }

    fn wait_gate(&self) {
        let mut held = self.gate.lock().unwrap();
        while *held {
            held = self.gate_cond.wait(held).unwrap();
        }
    }

    fn open_gate(&self) -> bool {
        let mut held = self.gate.lock().unwrap();
        let was = *held;
        *held = false;
        self.gate_cond.notify_all();
        was
    }

    /// Publish the exit and wake joiners. Idempotent.
    fn mark_exited(&self, code: Dword) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        self.exit_code.store(code, Ordering::Release);
        mutex::abandon_owned_by(self.tid);
        self.dispatcher.signal(|st| {
            if let DispatchState::Thread { exited } = st {
                *exited = true;
            }
        });
        log::trace!("[KE] thread {} exited with code {}", self.tid, code);
    }
}

// ============================================================================
// Thread identity
// ============================================================================

// Guest thread ids are multiples of 4, like the ABI they imitate.
static NEXT_TID: AtomicU32 = AtomicU32::new(0x1000);

thread_local! {
    static CURRENT: RefCell<(u32, Option<Arc<KernelObject>>)> = RefCell::new((0, None));
}

/// The calling thread's guest thread id, assigned on first use.
pub fn current_tid() -> u32 {
    CURRENT.with(|c| {
        let mut c = c.borrow_mut();
        if c.0 == 0 {
            c.0 = NEXT_TID.fetch_add(4, Ordering::Relaxed);
        }
        c.0
    })
}

fn set_current(tid: u32, obj: Arc<KernelObject>) {
    CURRENT.with(|c| *c.borrow_mut() = (tid, Some(obj)));
}

fn take_current_object() -> Option<Arc<KernelObject>> {
    CURRENT.with(|c| c.borrow_mut().1.take())
}

// ============================================================================
// ABI surface
// ============================================================================

/// CreateThread - spawn a guest thread.
///
/// The new thread initializes its own guest TLS block before the start
/// routine runs and tears it down afterwards. With `CREATE_SUSPENDED`
/// the start routine does not run until `ResumeThread`.
pub unsafe extern "win64" fn CreateThread(
    _security: *mut c_void,
    _stack_size: usize,
    start: *mut c_void,
    parameter: *mut c_void,
    flags: Dword,
    out_tid: *mut Dword,
) -> Handle {
    if start.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return 0;
    }
    let tid = NEXT_TID.fetch_add(4, Ordering::Relaxed);
    let suspended = flags & CREATE_SUSPENDED != 0;
    let obj = Arc::new(KernelObject::new(ObjectBody::Thread(ThreadObject::new(
        tid, suspended,
    ))));
    let handle = ob::table().insert_arc(obj.clone());
    if !out_tid.is_null() {
        *out_tid = tid;
    }

    let start: ThreadStart = std::mem::transmute(start);
    let param_bits = parameter as usize;
    let spawned = obj.clone();
    std::thread::Builder::new()
        .name(format!("guest-{tid:#x}"))
        .spawn(move || {
            let thread = match &spawned.body {
                ObjectBody::Thread(t) => t,
                _ => unreachable!(),
            };
            set_current(tid, spawned.clone());
            thread.wait_gate();
            crate::ldr::attach_thread_tls();
            let code = start(param_bits as *mut c_void);
            crate::ldr::detach_thread_tls();
            thread.mark_exited(code);
        })
        .expect("host thread spawn");

    log::debug!("[KE] thread {tid:#x} created, handle {handle}");
    handle
}

/// ResumeThread - open the suspension gate. Returns the previous suspend
/// count (0 or 1 in this host).
pub unsafe extern "win64" fn ResumeThread(handle: Handle) -> Dword {
    match ob::table().get(handle) {
        Ok(obj) => match &obj.body {
            ObjectBody::Thread(t) => Dword::from(t.open_gate()),
            _ => {
                status::set_last_error(ERROR_INVALID_HANDLE);
                Dword::MAX
            }
        },
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            Dword::MAX
        }
    }
}

/// GetExitCodeThread - `STILL_ACTIVE` until the thread exits.
pub unsafe extern "win64" fn GetExitCodeThread(handle: Handle, out_code: *mut Dword) -> Bool {
    if out_code.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    match ob::table().get(handle) {
        Ok(obj) => match &obj.body {
            ObjectBody::Thread(t) => {
                *out_code = t.exit_code().unwrap_or(STILL_ACTIVE);
                crate::abi::TRUE
            }
            _ => {
                status::set_last_error(ERROR_INVALID_HANDLE);
                FALSE
            }
        },
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

/// GetCurrentThreadId - the guest id of the calling thread.
pub unsafe extern "win64" fn GetCurrentThreadId() -> Dword {
    current_tid()
}

/// ExitThread - terminate the calling thread with `code`.
///
/// Bookkeeping runs here because control never returns to the spawn
/// wrapper; the host thread then exits through the platform primitive,
/// which is the sanctioned way to unwind nothing at all.
pub unsafe extern "win64" fn ExitThread(code: Dword) -> ! {
    crate::ldr::detach_thread_tls();
    if let Some(obj) = take_current_object() {
        if let ObjectBody::Thread(t) = &obj.body {
            t.mark_exited(code);
        }
        drop(obj);
        libc::pthread_exit(std::ptr::null_mut());
    }
    // Main thread: thread exit is process exit.
    std::process::exit(code as i32);
}

/// ExitProcess - terminate the process with the guest's exit code. The
/// host releases every handle and mapping on the way out.
pub unsafe extern "win64" fn ExitProcess(code: Dword) -> ! {
    log::debug!("[KE] ExitProcess({code})");
    std::process::exit(code as i32);
}
