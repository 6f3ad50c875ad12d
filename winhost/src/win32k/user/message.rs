//! Message Queue and Dispatch
//!
//! Each thread owns one FIFO message queue; cross-thread posting takes
//! the queue's own mutex. Queue depth is bounded: a full queue fails the
//! post with a quota error and the sender retries.
//!
//! The dispatch contract:
//! 1. retrieval returns the oldest message, blocking until one arrives,
//!    or returns the quit sentinel once the quit flag is set and the
//!    queue has drained;
//! 2. translation synthesises a character message from a raw key
//!    message as a pure function of the input;
//! 3. dispatch calls the target window's procedure and treats its return
//!    value as opaque.

use crate::abi::{Bool, Dword, LParam, LResult, WParam, FALSE, TRUE};
use crate::ke::thread::current_tid;
use crate::status::{self, ERROR_INVALID_WINDOW_HANDLE, ERROR_NOT_ENOUGH_QUOTA};
use crate::win32k::{Hwnd, Point};
use spin::Mutex as SpinMutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

// ============================================================================
// Window messages
// ============================================================================

pub const WM_NULL: u32 = 0x0000;
pub const WM_CREATE: u32 = 0x0001;
pub const WM_DESTROY: u32 = 0x0002;
pub const WM_SIZE: u32 = 0x0005;
pub const WM_SETFOCUS: u32 = 0x0007;
pub const WM_KILLFOCUS: u32 = 0x0008;
pub const WM_PAINT: u32 = 0x000F;
pub const WM_CLOSE: u32 = 0x0010;
pub const WM_QUIT: u32 = 0x0012;
pub const WM_ERASEBKGND: u32 = 0x0014;
pub const WM_SHOWWINDOW: u32 = 0x0018;
pub const WM_KEYDOWN: u32 = 0x0100;
pub const WM_KEYUP: u32 = 0x0101;
pub const WM_CHAR: u32 = 0x0102;
pub const WM_TIMER: u32 = 0x0113;
pub const WM_COMMAND: u32 = 0x0111;
pub const WM_USER: u32 = 0x0400;

/// PeekMessage: remove the message from the queue.
pub const PM_REMOVE: Dword = 0x0001;
/// PeekMessage: leave the message queued.
pub const PM_NOREMOVE: Dword = 0x0000;

/// Most messages a queue holds before posts start failing.
pub const MAX_QUEUE_SIZE: usize = 256;

/// MSG layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Msg {
    pub hwnd: Hwnd,
    pub message: u32,
    pub wParam: WParam,
    pub lParam: LParam,
    pub time: Dword,
    pub pt: Point,
}

/// Timer callback, Microsoft x64 convention.
pub type TimerProc = unsafe extern "win64" fn(Hwnd, u32, usize, Dword);

/// One armed timer, owned by its thread's queue.
pub(crate) struct TimerEntry {
    pub hwnd: Hwnd,
    pub id: usize,
    pub period_ms: u32,
    pub due: Instant,
    pub callback: Option<TimerProc>,
}

// ============================================================================
// Per-thread queue
// ============================================================================

pub(crate) struct QueueInner {
    msgs: VecDeque<Msg>,
    quit: Option<i32>,
    pub timers: Vec<TimerEntry>,
    pub focus: Hwnd,
}

/// A thread's message queue. Owned by its thread; cross-thread posting
/// locks `inner`.
pub struct MsgQueue {
    pub(crate) inner: Mutex<QueueInner>,
    cond: Condvar,
    pub tid: u32,
}

impl MsgQueue {
    fn new(tid: u32) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                msgs: VecDeque::new(),
                quit: None,
                timers: Vec::new(),
                focus: 0,
            }),
            cond: Condvar::new(),
            tid,
        }
    }

    /// Enqueue; fails when the queue is at its bound.
    pub fn post(&self, msg: Msg) -> Result<(), ()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.msgs.len() >= MAX_QUEUE_SIZE {
            return Err(());
        }
        inner.msgs.push_back(msg);
        self.cond.notify_all();
        Ok(())
    }

    pub fn post_quit(&self, code: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.quit = Some(code);
        self.cond.notify_all();
    }

    pub(crate) fn notify(&self) {
        self.cond.notify_all();
    }

    /// Move due timers into the queue as WM_TIMER messages. One pending
    /// WM_TIMER per (window, id) at a time.
    fn pump_timers(inner: &mut QueueInner, now: Instant) {
        for i in 0..inner.timers.len() {
            if inner.timers[i].due > now || inner.msgs.len() >= MAX_QUEUE_SIZE {
                continue;
            }
            let (hwnd, id, cb) = {
                let t = &inner.timers[i];
                (t.hwnd, t.id, t.callback)
            };
            let already_pending = inner
                .msgs
                .iter()
                .any(|m| m.message == WM_TIMER && m.hwnd == hwnd && m.wParam == id);
            if !already_pending {
                inner.msgs.push_back(Msg {
                    hwnd,
                    message: WM_TIMER,
                    wParam: id,
                    lParam: cb.map_or(0, |f| f as usize as LParam),
                    time: unsafe { crate::ke::time::GetTickCount() },
                    pt: Point::default(),
                });
            }
            let t = &mut inner.timers[i];
            let period = std::time::Duration::from_millis(u64::from(t.period_ms.max(1)));
            while t.due <= now {
                t.due += period;
            }
        }
    }

    fn matches(msg: &Msg, hwnd: Hwnd, min: u32, max: u32) -> bool {
        (hwnd == 0 || msg.hwnd == hwnd) && (max == 0 || (msg.message >= min && msg.message <= max))
    }

    /// Retrieve the oldest matching message. `block` waits for arrival
    /// or the quit flag; non-blocking returns `None` when dry.
    pub fn get(&self, hwnd: Hwnd, min: u32, max: u32, block: bool, remove: bool) -> Option<Msg> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            Self::pump_timers(&mut inner, Instant::now());
            if let Some(pos) = inner
                .msgs
                .iter()
                .position(|m| Self::matches(m, hwnd, min, max))
            {
                let msg = if remove {
                    inner.msgs.remove(pos).unwrap()
                } else {
                    inner.msgs[pos]
                };
                return Some(msg);
            }
            if let Some(code) = inner.quit {
                return Some(Msg {
                    hwnd: 0,
                    message: WM_QUIT,
                    wParam: code as WParam,
                    lParam: 0,
                    time: unsafe { crate::ke::time::GetTickCount() },
                    pt: Point::default(),
                });
            }
            if !block {
                return None;
            }
            let next_due = inner.timers.iter().map(|t| t.due).min();
            match next_due {
                Some(due) => {
                    let now = Instant::now();
                    let wait = if due > now {
                        due - now
                    } else {
                        std::time::Duration::ZERO
                    };
                    let (g, _) = self.cond.wait_timeout(inner, wait).unwrap();
                    inner = g;
                }
                None => inner = self.cond.wait(inner).unwrap(),
            }
        }
    }
}

static QUEUES: spin::Lazy<SpinMutex<HashMap<u32, Arc<MsgQueue>>>> =
    spin::Lazy::new(|| SpinMutex::new(HashMap::new()));

/// The calling thread's queue, created on first use.
pub fn current_queue() -> Arc<MsgQueue> {
    let tid = current_tid();
    QUEUES
        .lock()
        .entry(tid)
        .or_insert_with(|| Arc::new(MsgQueue::new(tid)))
        .clone()
}

/// Another thread's queue, if it has one.
pub fn queue_of(tid: u32) -> Option<Arc<MsgQueue>> {
    QUEUES.lock().get(&tid).cloned()
}

// ============================================================================
// ABI surface
// ============================================================================

/// GetMessageA - blocking retrieval; returns 0 once WM_QUIT arrives.
pub unsafe extern "win64" fn GetMessageA(
    out: *mut Msg,
    hwnd: Hwnd,
    filter_min: u32,
    filter_max: u32,
) -> Bool {
    if out.is_null() {
        status::set_last_error(status::ERROR_INVALID_PARAMETER);
        return -1;
    }
    let queue = current_queue();
    let msg = queue
        .get(hwnd, filter_min, filter_max, true, true)
        .expect("blocking retrieval always yields");
    *out = msg;
    if msg.message == WM_QUIT {
        FALSE
    } else {
        TRUE
    }
}

/// PeekMessageA - non-blocking retrieval.
pub unsafe extern "win64" fn PeekMessageA(
    out: *mut Msg,
    hwnd: Hwnd,
    filter_min: u32,
    filter_max: u32,
    remove: Dword,
) -> Bool {
    if out.is_null() {
        status::set_last_error(status::ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let queue = current_queue();
    match queue.get(hwnd, filter_min, filter_max, false, remove & PM_REMOVE != 0) {
        Some(msg) => {
            *out = msg;
            TRUE
        }
        None => FALSE,
    }
}

/// PostMessageA - queue a message to the window's owning thread. Fails
/// with a quota error when the queue is full.
pub unsafe extern "win64" fn PostMessageA(
    hwnd: Hwnd,
    message: u32,
    wparam: WParam,
    lparam: LParam,
) -> Bool {
    let queue = if hwnd == 0 {
        current_queue()
    } else {
        match super::window::window_of(hwnd).and_then(|w| queue_of(w.owner_tid)) {
            Some(q) => q,
            None => {
                status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
                return FALSE;
            }
        }
    };
    let msg = Msg {
        hwnd,
        message,
        wParam: wparam,
        lParam: lparam,
        time: crate::ke::time::GetTickCount(),
        pt: Point::default(),
    };
    match queue.post(msg) {
        Ok(()) => TRUE,
        Err(()) => {
            status::set_last_error(ERROR_NOT_ENOUGH_QUOTA);
            FALSE
        }
    }
}

/// PostQuitMessage - raise the quit flag on the calling thread's queue.
pub unsafe extern "win64" fn PostQuitMessage(exit_code: i32) {
    current_queue().post_quit(exit_code);
}

/// TranslateMessage - synthesise WM_CHAR from WM_KEYDOWN for printable
/// keys. Pure in the input; posting is the only side effect.
pub unsafe extern "win64" fn TranslateMessage(msg: *const Msg) -> Bool {
    if msg.is_null() {
        return FALSE;
    }
    let msg = &*msg;
    if msg.message != WM_KEYDOWN {
        return FALSE;
    }
    let ch = match msg.wParam as u32 {
        vk @ 0x30..=0x39 => vk,         // '0'..'9'
        vk @ 0x41..=0x5A => vk | 0x20,  // 'a'..'z'
        0x20 => 0x20,                   // space
        0x0D => 0x0D,                   // return
        _ => return FALSE,
    };
    let _ = current_queue().post(Msg {
        hwnd: msg.hwnd,
        message: WM_CHAR,
        wParam: ch as WParam,
        lParam: msg.lParam,
        time: msg.time,
        pt: msg.pt,
    });
    TRUE
}

/// DispatchMessageA - deliver to the target window procedure. WM_TIMER
/// with a callback dispatches to the callback instead.
pub unsafe extern "win64" fn DispatchMessageA(msg: *const Msg) -> LResult {
    if msg.is_null() {
        return 0;
    }
    let msg = &*msg;
    if msg.message == WM_TIMER && msg.lParam != 0 {
        let callback: TimerProc = std::mem::transmute(msg.lParam as usize);
        callback(msg.hwnd, WM_TIMER, msg.wParam, msg.time);
        return 0;
    }
    match super::window::window_of(msg.hwnd) {
        Some(w) => (w.wndproc)(msg.hwnd, msg.message, msg.wParam, msg.lParam),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_then_get_fifo() {
        let q = current_queue();
        for i in 0..3 {
            q.post(Msg {
                hwnd: 0,
                message: WM_USER + i,
                ..Default::default()
            })
            .unwrap();
        }
        for i in 0..3 {
            let m = q.get(0, WM_USER, WM_USER + 10, false, true).unwrap();
            assert_eq!(m.message, WM_USER + i);
        }
        assert!(q.get(0, WM_USER, WM_USER + 10, false, true).is_none());
    }

    #[test]
    fn test_quit_sentinel_after_drain() {
        // Run on a dedicated thread so this queue is untouched by other
        // tests.
        std::thread::spawn(|| {
            let q = current_queue();
            q.post(Msg {
                message: WM_USER,
                ..Default::default()
            })
            .unwrap();
            q.post_quit(5);
            let first = q.get(0, 0, 0, true, true).unwrap();
            assert_eq!(first.message, WM_USER);
            let second = q.get(0, 0, 0, true, true).unwrap();
            assert_eq!(second.message, WM_QUIT);
            assert_eq!(second.wParam, 5);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_bounded_queue_fails_posts() {
        std::thread::spawn(|| {
            let q = current_queue();
            for _ in 0..MAX_QUEUE_SIZE {
                q.post(Msg {
                    message: WM_USER,
                    ..Default::default()
                })
                .unwrap();
            }
            assert!(q
                .post(Msg {
                    message: WM_USER,
                    ..Default::default()
                })
                .is_err());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_translate_is_pure_key_to_char() {
        std::thread::spawn(|| unsafe {
            let key = Msg {
                message: WM_KEYDOWN,
                wParam: 0x41, // 'A'
                ..Default::default()
            };
            assert_eq!(TranslateMessage(&key), TRUE);
            let q = current_queue();
            let ch = q.get(0, WM_CHAR, WM_CHAR, false, true).unwrap();
            assert_eq!(ch.wParam as u32, u32::from(b'a'));

            let other = Msg {
                message: WM_KEYUP,
                wParam: 0x41,
                ..Default::default()
            };
            assert_eq!(TranslateMessage(&other), FALSE);
        })
        .join()
        .unwrap();
    }
}
