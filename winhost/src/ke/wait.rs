//! Wait API
//!
//! The guest-facing wait entry points over the dispatcher core. A wait
//! may name any waitable handle (event, mutex, semaphore, thread);
//! anything else fails without blocking.

use crate::abi::{Bool, Dword, Handle, FALSE};
use crate::ke::dispatcher::{self, Dispatcher, WaitOutcome};
use crate::ke::thread::current_tid;
use crate::ob::{self, KernelObject};
use crate::status::{
    self, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, WAIT_ABANDONED_0, WAIT_FAILED,
    WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use std::sync::Arc;

/// Most handles one `WaitForMultipleObjects` call may name.
pub const MAXIMUM_WAIT_OBJECTS: usize = 64;

fn outcome_to_dword(outcome: WaitOutcome) -> Dword {
    match outcome {
        WaitOutcome::Signaled { index, abandoned } => {
            let base = if abandoned { WAIT_ABANDONED_0 } else { WAIT_OBJECT_0 };
            base + index as Dword
        }
        WaitOutcome::TimedOut => WAIT_TIMEOUT,
        WaitOutcome::Failed(e) => {
            status::set_last_host_error(&e);
            WAIT_FAILED
        }
    }
}

fn resolve_waitables(handles: &[Handle]) -> Result<Vec<Arc<KernelObject>>, ()> {
    let mut objs = Vec::with_capacity(handles.len());
    for &h in handles {
        match ob::table().get(h) {
            Ok(obj) if obj.dispatcher().is_some() => objs.push(obj),
            _ => return Err(()),
        }
    }
    Ok(objs)
}

/// WaitForSingleObject - block until the object signals or the timeout
/// (milliseconds, `INFINITE` for none) expires.
pub unsafe extern "win64" fn WaitForSingleObject(handle: Handle, timeout_ms: Dword) -> Dword {
    let objs = match resolve_waitables(&[handle]) {
        Ok(o) => o,
        Err(()) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return WAIT_FAILED;
        }
    };
    let d = objs[0].dispatcher().expect("resolved as waitable");
    outcome_to_dword(dispatcher::wait_any(&[d], current_tid(), timeout_ms))
}

/// WaitForMultipleObjects - wait-any or wait-all over up to
/// `MAXIMUM_WAIT_OBJECTS` handles.
///
/// Wait-all observes the whole set atomically, taking object locks in
/// handle-value order.
pub unsafe extern "win64" fn WaitForMultipleObjects(
    count: Dword,
    handles: *const Handle,
    wait_all: Bool,
    timeout_ms: Dword,
) -> Dword {
    if handles.is_null() || count == 0 || count as usize > MAXIMUM_WAIT_OBJECTS {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return WAIT_FAILED;
    }
    let handles = std::slice::from_raw_parts(handles, count as usize);
    let objs = match resolve_waitables(handles) {
        Ok(o) => o,
        Err(()) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return WAIT_FAILED;
        }
    };
    let ds: Vec<&Dispatcher> = objs
        .iter()
        .map(|o| o.dispatcher().expect("resolved as waitable"))
        .collect();
    let tid = current_tid();
    let outcome = if wait_all != FALSE {
        dispatcher::wait_all(&ds, handles, tid, timeout_ms)
    } else {
        dispatcher::wait_any(&ds, tid, timeout_ms)
    };
    outcome_to_dword(outcome)
}
