//! Window Timers
//!
//! A timer is `(window, id, period, callback-or-null)`. When due, a
//! WM_TIMER message is posted to the owning thread's queue; a null
//! callback leaves dispatch to the window procedure. Killing a timer
//! prevents further posting but already-queued messages survive.

use super::message::{self, TimerEntry, TimerProc};
use super::window::window_of;
use crate::abi::{Bool, Dword, FALSE, TRUE};
use crate::status::{self, ERROR_INVALID_WINDOW_HANDLE};
use crate::win32k::Hwnd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Shortest accepted period, matching the ABI minimum.
pub const USER_TIMER_MINIMUM: Dword = 10;

static NEXT_FREE_ID: AtomicUsize = AtomicUsize::new(1);

/// SetTimer - arm (or re-arm) a timer on the owning thread's queue.
/// Returns the timer id, or 0 on failure.
pub unsafe extern "win64" fn SetTimer(
    hwnd: Hwnd,
    id: usize,
    period_ms: Dword,
    callback: Option<TimerProc>,
) -> usize {
    let queue = if hwnd == 0 {
        message::current_queue()
    } else {
        match window_of(hwnd).and_then(|w| message::queue_of(w.owner_tid)) {
            Some(q) => q,
            None => {
                status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
                return 0;
            }
        }
    };
    let id = if hwnd == 0 && id == 0 {
        NEXT_FREE_ID.fetch_add(1, Ordering::Relaxed)
    } else {
        id
    };
    let period_ms = period_ms.max(USER_TIMER_MINIMUM);
    let entry = TimerEntry {
        hwnd,
        id,
        period_ms,
        due: Instant::now() + Duration::from_millis(u64::from(period_ms)),
        callback,
    };
    {
        let mut inner = queue.inner.lock().unwrap();
        // Re-arming an existing (window, id) replaces it.
        inner.timers.retain(|t| !(t.hwnd == hwnd && t.id == id));
        inner.timers.push(entry);
    }
    // Wake a blocked retrieval so it recomputes its deadline.
    queue.notify();
    log::trace!("[USER] timer {id} armed on window {hwnd} every {period_ms}ms");
    id
}

/// KillTimer - disarm; messages already in the queue are not removed.
pub unsafe extern "win64" fn KillTimer(hwnd: Hwnd, id: usize) -> Bool {
    let queue = if hwnd == 0 {
        message::current_queue()
    } else {
        match window_of(hwnd).and_then(|w| message::queue_of(w.owner_tid)) {
            Some(q) => q,
            None => {
                status::set_last_error(ERROR_INVALID_WINDOW_HANDLE);
                return FALSE;
            }
        }
    };
    let mut inner = queue.inner.lock().unwrap();
    let before = inner.timers.len();
    inner.timers.retain(|t| !(t.hwnd == hwnd && t.id == id));
    if inner.timers.len() == before {
        FALSE
    } else {
        TRUE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::win32k::user::message::{GetMessageA, Msg, WM_TIMER};

    #[test]
    fn test_timer_message_posted_when_due() {
        std::thread::spawn(|| unsafe {
            let id = SetTimer(0, 0, 20, None);
            assert_ne!(id, 0);
            let mut msg = Msg::default();
            let start = Instant::now();
            assert_eq!(GetMessageA(&mut msg, 0, WM_TIMER, WM_TIMER), crate::abi::TRUE);
            assert_eq!(msg.message, WM_TIMER);
            assert_eq!(msg.wParam, id);
            assert!(start.elapsed() >= Duration::from_millis(15));
            assert_eq!(KillTimer(0, id), TRUE);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_killed_timer_stops_posting() {
        std::thread::spawn(|| unsafe {
            let id = SetTimer(0, 0, 20, None);
            let mut msg = Msg::default();
            GetMessageA(&mut msg, 0, WM_TIMER, WM_TIMER);
            assert_eq!(KillTimer(0, id), TRUE);
            // Drain anything already queued, then verify silence.
            let q = message::current_queue();
            while q.get(0, WM_TIMER, WM_TIMER, false, true).is_some() {}
            std::thread::sleep(Duration::from_millis(60));
            assert!(q.get(0, WM_TIMER, WM_TIMER, false, true).is_none());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_kill_unknown_timer_fails() {
        std::thread::spawn(|| unsafe {
            assert_eq!(KillTimer(0, 987654), FALSE);
        })
        .join()
        .unwrap();
    }
}
