//! Dispatcher Objects
//!
//! The signal/wait core shared by events, mutexes, semaphores and thread
//! objects. Every waitable object embeds a [`Dispatcher`]: its signal
//! state plus a FIFO queue of waiters, all guarded by one internal mutex
//! so state transitions and wake decisions are totally ordered per object.
//!
//! # Wake protocol
//!
//! A blocked thread parks on its own [`WaitToken`] (a condvar-backed
//! cell). Signaling walks the wait queue from the front:
//!
//! - a wait-any waiter receives a **direct handoff**: the signal is
//!   consumed on its behalf under the object lock, so an auto-reset event
//!   releases exactly one waiter and a mutex transfers ownership without
//!   a race window;
//! - a wait-all waiter is told to **re-evaluate**: it re-acquires every
//!   object lock in handle-value order and either consumes all signals
//!   atomically or goes back to sleep.
//!
//! Lock order is dispatcher → token; the park phase holds no dispatcher
//! lock, so signalers never block on a sleeping thread.

use crate::abi::Handle;
use crate::status::HostError;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Signal state of a waitable object.
pub enum DispatchState {
    Event { manual: bool, signaled: bool },
    Mutex { owner: Option<u32>, recursion: u32, abandoned: bool },
    Semaphore { count: u32, max: u32 },
    Thread { exited: bool },
}

impl DispatchState {
    /// Would `try_consume` succeed for `tid`, without mutating anything?
    fn can_consume(&self, tid: u32) -> bool {
        match self {
            DispatchState::Event { signaled, .. } => *signaled,
            DispatchState::Mutex { owner, .. } => owner.is_none() || *owner == Some(tid),
            DispatchState::Semaphore { count, .. } => *count > 0,
            DispatchState::Thread { exited } => *exited,
        }
    }

    /// Consume one signal on behalf of `tid`.
    ///
    /// Returns `Some(abandoned)` on success. Auto-reset events and
    /// semaphores decrement; mutexes take or recurse ownership;
    /// manual-reset events and exited threads are left signaled.
    fn try_consume(&mut self, tid: u32) -> Option<bool> {
        match self {
            DispatchState::Event { manual, signaled } => {
                if !*signaled {
                    return None;
                }
                if !*manual {
                    *signaled = false;
                }
                Some(false)
            }
            DispatchState::Mutex {
                owner,
                recursion,
                abandoned,
            } => match owner {
                None => {
                    *owner = Some(tid);
                    *recursion = 1;
                    Some(std::mem::take(abandoned))
                }
                Some(t) if *t == tid => {
                    *recursion += 1;
                    Some(false)
                }
                Some(_) => None,
            },
            DispatchState::Semaphore { count, .. } => {
                if *count == 0 {
                    return None;
                }
                *count -= 1;
                Some(false)
            }
            DispatchState::Thread { exited } => exited.then_some(false),
        }
    }

    /// Undo a `try_consume` that turned out to be superfluous because a
    /// concurrent direct handoff already satisfied the wait.
    fn restore(&mut self, tid: u32) {
        match self {
            DispatchState::Event { manual, signaled } => {
                if !*manual {
                    *signaled = true;
                }
            }
            DispatchState::Mutex {
                owner, recursion, ..
            } => {
                if *owner == Some(tid) {
                    *recursion -= 1;
                    if *recursion == 0 {
                        *owner = None;
                    }
                }
            }
            DispatchState::Semaphore { count, .. } => *count += 1,
            DispatchState::Thread { .. } => {}
        }
    }
}

// ============================================================================
// Wait tokens
// ============================================================================

/// Why a parked thread was woken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WakeReason {
    /// A signal was consumed on the waiter's behalf at array slot `index`.
    Granted { index: usize, abandoned: bool },
    /// Wait-all candidate: re-evaluate the whole handle set.
    Recheck,
}

/// Per-wait parking spot. One token is shared across every object the
/// wait covers; the first wake reason wins.
struct WaitToken {
    reason: Mutex<Option<WakeReason>>,
    cond: Condvar,
}

impl WaitToken {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reason: Mutex::new(None),
            cond: Condvar::new(),
        })
    }

    /// Record a wake reason unless one landed already.
    fn wake(&self, reason: WakeReason) {
        let mut slot = self.reason.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.cond.notify_all();
    }

    /// Park until a reason arrives or the deadline passes.
    fn park(&self, deadline: Option<Instant>) -> Option<WakeReason> {
        let mut slot = self.reason.lock().unwrap();
        loop {
            if let Some(r) = *slot {
                return Some(r);
            }
            match deadline {
                None => slot = self.cond.wait(slot).unwrap(),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return None;
                    }
                    let (s, _) = self.cond.wait_timeout(slot, d - now).unwrap();
                    slot = s;
                }
            }
        }
    }

    /// Take whatever reason landed (used after a timeout race).
    fn take(&self) -> Option<WakeReason> {
        *self.reason.lock().unwrap()
    }
}

/// Queue entry: `(thread, wake-token)`; the deadline is enforced by the
/// sleeping side.
struct Waiter {
    tid: u32,
    wait_all: bool,
    index: usize,
    token: Arc<WaitToken>,
}

// ============================================================================
// Dispatcher
// ============================================================================

struct DispatchInner {
    state: DispatchState,
    waiters: VecDeque<Waiter>,
}

/// The embedded signal/wait head of a waitable object.
pub struct Dispatcher {
    inner: Mutex<DispatchInner>,
}

impl Dispatcher {
    pub fn new(state: DispatchState) -> Self {
        Self {
            inner: Mutex::new(DispatchInner {
                state,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Run `f` on the signal state, then hand out whatever the new state
    /// allows. This is the single entry point for set/release/exit.
    pub fn signal<R>(&self, f: impl FnOnce(&mut DispatchState) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        let r = f(&mut inner.state);
        Self::deliver(&mut inner);
        r
    }

    /// Inspect the signal state without waking anyone.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut DispatchState) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner.state)
    }

    /// Walk the queue front-to-back handing out consumable signals.
    fn deliver(inner: &mut DispatchInner) {
        let mut i = 0;
        while i < inner.waiters.len() {
            let w = &inner.waiters[i];
            if !inner.state.can_consume(w.tid) {
                // Nothing left to hand out; later waiters cannot fare
                // better (consumability does not depend on the thread for
                // parked waiters).
                break;
            }
            if w.wait_all {
                // Do not consume: the waiter re-evaluates its whole set.
                w.token.wake(WakeReason::Recheck);
                i += 1;
            } else {
                let abandoned = inner
                    .state
                    .try_consume(w.tid)
                    .expect("can_consume checked above");
                let w = inner.waiters.remove(i).unwrap();
                w.token.wake(WakeReason::Granted {
                    index: w.index,
                    abandoned,
                });
            }
        }
    }

    fn remove_token(inner: &mut DispatchInner, token: &Arc<WaitToken>) {
        inner
            .waiters
            .retain(|w| !Arc::ptr_eq(&w.token, token));
    }
}

// ============================================================================
// Wait operations
// ============================================================================

/// Outcome of a wait, pre-ABI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Signaled; `index` is the slot in the caller's handle array.
    Signaled { index: usize, abandoned: bool },
    TimedOut,
    Failed(HostError),
}

fn deadline_from_ms(timeout_ms: u32) -> Option<Instant> {
    if timeout_ms == crate::status::INFINITE {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(u64::from(timeout_ms)))
    }
}

/// Block until one of the dispatchers signals or the deadline expires.
///
/// Objects are examined in caller order; registration and the missed-
/// signal check happen under each object's lock so no set is lost between
/// the two.
pub fn wait_any(dispatchers: &[&Dispatcher], tid: u32, timeout_ms: u32) -> WaitOutcome {
    let deadline = deadline_from_ms(timeout_ms);
    let token = WaitToken::new();

    // Single pass: consume immediately where possible, otherwise enqueue.
    // Registration and the missed-signal check share each object's lock,
    // so a set between them cannot be lost.
    for (index, d) in dispatchers.iter().enumerate() {
        let mut inner = d.inner.lock().unwrap();
        if let Some(abandoned) = inner.state.try_consume(tid) {
            drop(inner);
            for prior in &dispatchers[..index] {
                let mut pi = prior.inner.lock().unwrap();
                Dispatcher::remove_token(&mut pi, &token);
            }
            // An already-registered object may have granted concurrently;
            // honor the earlier grant and give this consume back.
            if let Some(WakeReason::Granted {
                index: early,
                abandoned: early_ab,
            }) = token.take()
            {
                let mut inner = dispatchers[index].inner.lock().unwrap();
                inner.state.restore(tid);
                Dispatcher::deliver(&mut inner);
                drop(inner);
                return WaitOutcome::Signaled {
                    index: early,
                    abandoned: early_ab,
                };
            }
            return WaitOutcome::Signaled { index, abandoned };
        }
        inner.waiters.push_back(Waiter {
            tid,
            wait_all: false,
            index,
            token: token.clone(),
        });
    }

    let reason = token.park(deadline);
    // Deregister everywhere first; a grant may still land until we do.
    for d in dispatchers {
        let mut inner = d.inner.lock().unwrap();
        Dispatcher::remove_token(&mut inner, &token);
    }
    match reason.or_else(|| token.take()) {
        Some(WakeReason::Granted { index, abandoned }) => {
            WaitOutcome::Signaled { index, abandoned }
        }
        Some(WakeReason::Recheck) => WaitOutcome::Failed(HostError::Unreachable(
            "recheck delivered to wait-any".into(),
        )),
        None => WaitOutcome::TimedOut,
    }
}

/// Block until every dispatcher is simultaneously signaled, consuming all
/// signals atomically, or until the deadline expires.
///
/// `order` carries the handle values: object locks are acquired in
/// ascending handle order to rule out lock-order inversion between
/// concurrent wait-all calls.
pub fn wait_all(
    dispatchers: &[&Dispatcher],
    order: &[Handle],
    tid: u32,
    timeout_ms: u32,
) -> WaitOutcome {
    debug_assert_eq!(dispatchers.len(), order.len());
    let deadline = deadline_from_ms(timeout_ms);

    // Ascending handle order; duplicate handles cannot be consumed twice
    // in one atomic step.
    let mut by_handle: Vec<usize> = (0..dispatchers.len()).collect();
    by_handle.sort_by_key(|&i| order[i]);
    if by_handle.windows(2).any(|w| order[w[0]] == order[w[1]]) {
        return WaitOutcome::Failed(HostError::ProtocolViolation(
            "duplicate handle in wait-all".into(),
        ));
    }

    loop {
        let mut guards: Vec<MutexGuard<'_, DispatchInner>> = Vec::with_capacity(by_handle.len());
        for &i in &by_handle {
            guards.push(dispatchers[i].inner.lock().unwrap());
        }

        if guards.iter().all(|g| g.state.can_consume(tid)) {
            let mut abandoned = false;
            for g in guards.iter_mut() {
                abandoned |= g.state.try_consume(tid).expect("checked above");
            }
            return WaitOutcome::Signaled {
                index: 0,
                abandoned,
            };
        }

        let token = WaitToken::new();
        for g in guards.iter_mut() {
            g.waiters.push_back(Waiter {
                tid,
                wait_all: true,
                index: 0,
                token: token.clone(),
            });
        }
        drop(guards);

        let reason = token.park(deadline);
        for d in dispatchers {
            let mut inner = d.inner.lock().unwrap();
            Dispatcher::remove_token(&mut inner, &token);
        }
        match reason {
            Some(WakeReason::Recheck) => continue,
            Some(WakeReason::Granted { .. }) => {
                return WaitOutcome::Failed(HostError::Unreachable(
                    "grant delivered to wait-all".into(),
                ))
            }
            None => return WaitOutcome::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::{Duration, Instant};

    fn auto_event(signaled: bool) -> Dispatcher {
        Dispatcher::new(DispatchState::Event {
            manual: false,
            signaled,
        })
    }

    #[test]
    fn test_wait_already_signaled() {
        let d = auto_event(true);
        let out = wait_any(&[&d], 1, 0);
        assert_eq!(
            out,
            WaitOutcome::Signaled {
                index: 0,
                abandoned: false
            }
        );
        // Auto-reset consumed the signal.
        assert_eq!(wait_any(&[&d], 1, 0), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_auto_reset_releases_exactly_one() {
        let d = Arc::new(auto_event(false));
        let released = Arc::new(AtomicU32::new(0));
        let mut joins = Vec::new();
        for tid in 0..4u32 {
            let d = d.clone();
            let released = released.clone();
            joins.push(thread::spawn(move || {
                if let WaitOutcome::Signaled { .. } = wait_any(&[&d], tid + 10, 1000) {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        thread::sleep(Duration::from_millis(100));
        d.signal(|st| {
            if let DispatchState::Event { signaled, .. } = st {
                *signaled = true;
            }
        });
        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_reset_releases_all() {
        let d = Arc::new(Dispatcher::new(DispatchState::Event {
            manual: true,
            signaled: false,
        }));
        let released = Arc::new(AtomicU32::new(0));
        let mut joins = Vec::new();
        for tid in 0..4u32 {
            let d = d.clone();
            let released = released.clone();
            joins.push(thread::spawn(move || {
                if let WaitOutcome::Signaled { .. } = wait_any(&[&d], tid + 10, 2000) {
                    released.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        thread::sleep(Duration::from_millis(100));
        d.signal(|st| {
            if let DispatchState::Event { signaled, .. } = st {
                *signaled = true;
            }
        });
        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 4);
        // Still signaled afterwards.
        assert!(matches!(
            wait_any(&[&d], 99, 0),
            WaitOutcome::Signaled { .. }
        ));
    }

    #[test]
    fn test_wait_any_timeout() {
        let d = auto_event(false);
        let start = Instant::now();
        assert_eq!(wait_any(&[&d], 1, 50), WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_all_needs_every_object() {
        let a = Arc::new(auto_event(true));
        let b = Arc::new(auto_event(false));
        {
            let ds = [&*a, &*b];
            assert_eq!(wait_all(&ds, &[1, 2], 7, 0), WaitOutcome::TimedOut);
        }
        // The partial check must not have consumed `a`.
        assert!(a.with_state(|st| st.can_consume(7)));

        let (a2, b2) = (a.clone(), b.clone());
        let j = thread::spawn(move || {
            let ds = [&*a2, &*b2];
            wait_all(&ds, &[1, 2], 7, 2000)
        });
        thread::sleep(Duration::from_millis(50));
        b.signal(|st| {
            if let DispatchState::Event { signaled, .. } = st {
                *signaled = true;
            }
        });
        assert!(matches!(j.join().unwrap(), WaitOutcome::Signaled { .. }));
    }

    #[test]
    fn test_wait_all_rejects_duplicates() {
        let a = auto_event(true);
        let ds = [&a, &a];
        assert!(matches!(
            wait_all(&ds, &[3, 3], 1, 0),
            WaitOutcome::Failed(HostError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_fifo_handoff_order() {
        let d = Arc::new(auto_event(false));
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut joins = Vec::new();
        for tid in 0..3u32 {
            let d = d.clone();
            let order = order.clone();
            joins.push(thread::spawn(move || {
                // Stagger queue entry so FIFO position is deterministic.
                thread::sleep(Duration::from_millis(50 * u64::from(tid) + 10));
                let _ = wait_any(&[&d], tid + 1, 5000);
                order.lock().unwrap().push(tid);
            }));
        }
        thread::sleep(Duration::from_millis(250));
        for _ in 0..3 {
            d.signal(|st| {
                if let DispatchState::Event { signaled, .. } = st {
                    *signaled = true;
                }
            });
            thread::sleep(Duration::from_millis(50));
        }
        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }
}
