//! Critical Sections
//!
//! A recursive in-process mutex that lives in guest-owned memory and
//! never touches the handle table. The uncontended path is a single
//! compare-exchange; contention spins briefly, then yields.

use crate::abi::{Bool, FALSE, TRUE};
use crate::ke::thread::current_tid;
use std::sync::atomic::{AtomicU32, Ordering};

/// In-memory layout of a guest CRITICAL_SECTION (40 bytes on x64; the
/// tail is reserved).
#[repr(C)]
pub struct CriticalSection {
    owner: AtomicU32,
    recursion: AtomicU32,
    _reserved: [u32; 8],
}

const SPINS_BEFORE_YIELD: u32 = 64;

impl CriticalSection {
    fn init(&self) {
        self.owner.store(0, Ordering::Release);
        self.recursion.store(0, Ordering::Release);
    }

    fn enter(&self) {
        let tid = current_tid();
        if self.owner.load(Ordering::Relaxed) == tid {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut spins = 0;
        loop {
            match self
                .owner
                .compare_exchange(0, tid, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => {
                    self.recursion.store(1, Ordering::Relaxed);
                    return;
                }
                Err(_) => {
                    spins += 1;
                    if spins < SPINS_BEFORE_YIELD {
                        std::hint::spin_loop();
                    } else {
                        spins = 0;
                        std::thread::yield_now();
                    }
                }
            }
        }
    }

    fn try_enter(&self) -> bool {
        let tid = current_tid();
        if self.owner.load(Ordering::Relaxed) == tid {
            self.recursion.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        if self
            .owner
            .compare_exchange(0, tid, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.recursion.store(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn leave(&self) {
        // Releasing an unowned section is a caller contract violation;
        // leave the section untouched rather than corrupt it.
        if self.owner.load(Ordering::Relaxed) != current_tid() {
            return;
        }
        if self.recursion.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(0, Ordering::Release);
        }
    }
}

/// InitializeCriticalSection - prepare guest-owned memory as a section.
pub unsafe extern "win64" fn InitializeCriticalSection(cs: *mut CriticalSection) {
    if !cs.is_null() {
        (*cs).init();
    }
}

/// EnterCriticalSection - acquire, recursively for the owner.
pub unsafe extern "win64" fn EnterCriticalSection(cs: *mut CriticalSection) {
    if !cs.is_null() {
        (*cs).enter();
    }
}

/// TryEnterCriticalSection - acquire without blocking.
pub unsafe extern "win64" fn TryEnterCriticalSection(cs: *mut CriticalSection) -> Bool {
    if cs.is_null() {
        return FALSE;
    }
    if (*cs).try_enter() {
        TRUE
    } else {
        FALSE
    }
}

/// LeaveCriticalSection - release one recursion level.
pub unsafe extern "win64" fn LeaveCriticalSection(cs: *mut CriticalSection) {
    if !cs.is_null() {
        (*cs).leave();
    }
}

/// DeleteCriticalSection - return the memory to an inert state.
pub unsafe extern "win64" fn DeleteCriticalSection(cs: *mut CriticalSection) {
    if !cs.is_null() {
        (*cs).init();
    }
}
