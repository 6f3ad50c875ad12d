//! Interlocked Operations
//!
//! Single-word atomic arithmetic on guest memory, sequentially
//! consistent. The guest passes plain pointers; alignment is its
//! contract.

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// InterlockedIncrement - returns the new value.
pub unsafe extern "win64" fn InterlockedIncrement(target: *mut i32) -> i32 {
    (*(target as *const AtomicI32)).fetch_add(1, Ordering::SeqCst) + 1
}

/// InterlockedDecrement - returns the new value.
pub unsafe extern "win64" fn InterlockedDecrement(target: *mut i32) -> i32 {
    (*(target as *const AtomicI32)).fetch_sub(1, Ordering::SeqCst) - 1
}

/// InterlockedExchangeAdd - returns the previous value.
pub unsafe extern "win64" fn InterlockedExchangeAdd(target: *mut i32, value: i32) -> i32 {
    (*(target as *const AtomicI32)).fetch_add(value, Ordering::SeqCst)
}

/// InterlockedExchange - returns the previous value.
pub unsafe extern "win64" fn InterlockedExchange(target: *mut i32, value: i32) -> i32 {
    (*(target as *const AtomicI32)).swap(value, Ordering::SeqCst)
}

/// InterlockedCompareExchange - returns the previous value; stores only
/// on match.
pub unsafe extern "win64" fn InterlockedCompareExchange(
    target: *mut i32,
    exchange: i32,
    comparand: i32,
) -> i32 {
    match (*(target as *const AtomicI32)).compare_exchange(
        comparand,
        exchange,
        Ordering::SeqCst,
        Ordering::SeqCst,
    ) {
        Ok(prev) | Err(prev) => prev,
    }
}

/// InterlockedIncrement64 - returns the new value.
pub unsafe extern "win64" fn InterlockedIncrement64(target: *mut i64) -> i64 {
    (*(target as *const AtomicI64)).fetch_add(1, Ordering::SeqCst) + 1
}

/// InterlockedDecrement64 - returns the new value.
pub unsafe extern "win64" fn InterlockedDecrement64(target: *mut i64) -> i64 {
    (*(target as *const AtomicI64)).fetch_sub(1, Ordering::SeqCst) - 1
}

/// InterlockedExchangeAdd64 - returns the previous value.
pub unsafe extern "win64" fn InterlockedExchangeAdd64(target: *mut i64, value: i64) -> i64 {
    (*(target as *const AtomicI64)).fetch_add(value, Ordering::SeqCst)
}

/// InterlockedExchange64 - returns the previous value.
pub unsafe extern "win64" fn InterlockedExchange64(target: *mut i64, value: i64) -> i64 {
    (*(target as *const AtomicI64)).swap(value, Ordering::SeqCst)
}

/// InterlockedCompareExchange64 - returns the previous value.
pub unsafe extern "win64" fn InterlockedCompareExchange64(
    target: *mut i64,
    exchange: i64,
    comparand: i64,
) -> i64 {
    match (*(target as *const AtomicI64)).compare_exchange(
        comparand,
        exchange,
        Ordering::SeqCst,
        Ordering::SeqCst,
    ) {
        Ok(prev) | Err(prev) => prev,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_exchange_semantics() {
        let mut v: i32 = 5;
        unsafe {
            assert_eq!(InterlockedCompareExchange(&mut v, 9, 4), 5);
            assert_eq!(v, 5);
            assert_eq!(InterlockedCompareExchange(&mut v, 9, 5), 5);
            assert_eq!(v, 9);
        }
    }

    #[test]
    fn test_lock_free_increments_converge() {
        const THREADS: usize = 4;
        const ITERS: usize = 10_000;
        static COUNTER: AtomicI64 = AtomicI64::new(0);
        COUNTER.store(0, Ordering::SeqCst);

        let mut joins = Vec::new();
        for _ in 0..THREADS {
            joins.push(std::thread::spawn(|| {
                let p = COUNTER.as_ptr();
                for _ in 0..ITERS {
                    unsafe {
                        InterlockedIncrement64(p);
                    }
                }
            }));
        }
        for j in joins {
            j.join().unwrap();
        }
        assert_eq!(COUNTER.load(Ordering::SeqCst), (THREADS * ITERS) as i64);
    }

    #[test]
    fn test_exchange_returns_previous() {
        let mut v: i32 = 1;
        unsafe {
            assert_eq!(InterlockedExchange(&mut v, 2), 1);
            assert_eq!(InterlockedExchangeAdd(&mut v, 3), 2);
            assert_eq!(v, 5);
        }
    }
}
