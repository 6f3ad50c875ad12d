//! Thread-Local Storage
//!
//! A bounded pool of TLS indices shared by the process; each thread has
//! its own vector of pointer-sized cells. Freeing an index returns it to
//! the pool; a later allocation may hand the same index out again with
//! cells reading as null on threads that never wrote it since.

use crate::abi::{Bool, Dword, FALSE, TRUE};
use crate::status::{self, ERROR_INVALID_PARAMETER, ERROR_SUCCESS};
use spin::Mutex as SpinMutex;
use std::cell::RefCell;
use std::os::raw::c_void;

/// Pool size, matching the ABI's per-process slot maximum.
pub const TLS_SLOT_COUNT: usize = 1088;

/// `TlsAlloc` failure sentinel.
pub const TLS_OUT_OF_INDEXES: Dword = 0xFFFF_FFFF;

const BITMAP_WORDS: usize = TLS_SLOT_COUNT / 64;

// One bit per index, set = allocated.
static POOL: SpinMutex<[u64; BITMAP_WORDS]> = SpinMutex::new([0; BITMAP_WORDS]);

thread_local! {
    static SLOTS: RefCell<Vec<*mut c_void>> = const { RefCell::new(Vec::new()) };
}

/// Allocate the lowest free index.
pub fn alloc() -> Option<u32> {
    let mut pool = POOL.lock();
    for (word_idx, word) in pool.iter_mut().enumerate() {
        if *word != u64::MAX {
            let bit = word.trailing_ones() as usize;
            *word |= 1 << bit;
            return Some((word_idx * 64 + bit) as u32);
        }
    }
    None
}

/// Return an index to the pool.
pub fn free(index: u32) -> bool {
    let index = index as usize;
    if index >= TLS_SLOT_COUNT {
        return false;
    }
    let mut pool = POOL.lock();
    let mask = 1u64 << (index % 64);
    if pool[index / 64] & mask == 0 {
        return false;
    }
    pool[index / 64] &= !mask;
    true
}

/// Read the calling thread's cell.
pub fn get(index: u32) -> *mut c_void {
    SLOTS.with(|s| {
        s.borrow()
            .get(index as usize)
            .copied()
            .unwrap_or(std::ptr::null_mut())
    })
}

/// Write the calling thread's cell.
pub fn set(index: u32, value: *mut c_void) -> bool {
    let index = index as usize;
    if index >= TLS_SLOT_COUNT {
        return false;
    }
    SLOTS.with(|s| {
        let mut slots = s.borrow_mut();
        if slots.len() <= index {
            slots.resize(index + 1, std::ptr::null_mut());
        }
        slots[index] = value;
    });
    true
}

/// TlsAlloc - allocate an index from the pool.
pub unsafe extern "win64" fn TlsAlloc() -> Dword {
    match alloc() {
        Some(i) => i,
        None => {
            status::set_last_error(crate::status::ERROR_NOT_ENOUGH_MEMORY);
            TLS_OUT_OF_INDEXES
        }
    }
}

/// TlsFree - return an index to the pool.
pub unsafe extern "win64" fn TlsFree(index: Dword) -> Bool {
    if free(index) {
        TRUE
    } else {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        FALSE
    }
}

/// TlsGetValue - read the calling thread's cell. Null is a legal stored
/// value, so success also clears the last error.
pub unsafe extern "win64" fn TlsGetValue(index: Dword) -> *mut c_void {
    if index as usize >= TLS_SLOT_COUNT {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return std::ptr::null_mut();
    }
    status::set_last_error(ERROR_SUCCESS);
    get(index)
}

/// TlsSetValue - write the calling thread's cell.
pub unsafe extern "win64" fn TlsSetValue(index: Dword, value: *mut c_void) -> Bool {
    if set(index, value) {
        TRUE
    } else {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        FALSE
    }
}
