//! Time Services
//!
//! A coarse millisecond tick counter and a high-resolution performance
//! counter, both monotonic from process start, plus `Sleep`.

use crate::abi::{Bool, Dword, TRUE};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

fn epoch() -> Instant {
    *EPOCH.get_or_init(Instant::now)
}

/// Nanoseconds since the first time query.
fn monotonic_nanos() -> u128 {
    epoch().elapsed().as_nanos()
}

/// GetTickCount - monotonic milliseconds, truncated to 32 bits like the
/// ABI it models.
pub unsafe extern "win64" fn GetTickCount() -> Dword {
    (monotonic_nanos() / 1_000_000) as Dword
}

/// GetTickCount64 - monotonic milliseconds without wraparound.
pub unsafe extern "win64" fn GetTickCount64() -> u64 {
    (monotonic_nanos() / 1_000_000) as u64
}

/// QueryPerformanceCounter - high-resolution monotonic counter.
pub unsafe extern "win64" fn QueryPerformanceCounter(out: *mut i64) -> Bool {
    if out.is_null() {
        crate::status::set_last_error(crate::status::ERROR_INVALID_PARAMETER);
        return crate::abi::FALSE;
    }
    *out = monotonic_nanos() as i64;
    TRUE
}

/// QueryPerformanceFrequency - counts per second of the performance
/// counter (nanosecond ticks).
pub unsafe extern "win64" fn QueryPerformanceFrequency(out: *mut i64) -> Bool {
    if out.is_null() {
        crate::status::set_last_error(crate::status::ERROR_INVALID_PARAMETER);
        return crate::abi::FALSE;
    }
    *out = 1_000_000_000;
    TRUE
}

/// Sleep - block the calling thread for at least `ms` milliseconds. Zero
/// yields the rest of the time slice.
pub unsafe extern "win64" fn Sleep(ms: Dword) {
    if ms == 0 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
