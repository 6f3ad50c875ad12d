//! Mutex Objects
//!
//! Recursive, owner-tracked mutexes behind handles. Acquisition happens
//! through the wait path; release checks ownership. A mutex whose owner
//! exits without releasing is marked abandoned and the next acquirer is
//! told so.

use crate::abi::{Bool, Handle, FALSE, TRUE};
use crate::ke::dispatcher::{DispatchState, Dispatcher};
use crate::ke::thread::current_tid;
use crate::ob::{self, KernelObject, ObjectBody};
use crate::status::{self, ERROR_INVALID_HANDLE, ERROR_NOT_OWNER};
use spin::Mutex as SpinMutex;
use std::os::raw::{c_char, c_void};
use std::sync::{Arc, Weak};

/// A mutex behind a handle.
pub struct MutexObject {
    pub dispatcher: Dispatcher,
}

impl MutexObject {
    pub fn new(owner: Option<u32>) -> Self {
        Self {
            dispatcher: Dispatcher::new(DispatchState::Mutex {
                owner,
                recursion: u32::from(owner.is_some()),
                abandoned: false,
            }),
        }
    }

    /// Release one recursion level held by `tid`.
    pub fn release(&self, tid: u32) -> Result<(), ()> {
        self.dispatcher.signal(|st| {
            if let DispatchState::Mutex {
                owner, recursion, ..
            } = st
            {
                if *owner != Some(tid) {
                    return Err(());
                }
                *recursion -= 1;
                if *recursion == 0 {
                    *owner = None;
                }
                Ok(())
            } else {
                Err(())
            }
        })
    }
}

// All live mutexes, swept at thread exit to mark abandonment.
static REGISTRY: SpinMutex<Vec<Weak<KernelObject>>> = SpinMutex::new(Vec::new());

/// Mark every mutex owned by `tid` abandoned and wake its waiters.
/// Called by the thread exit path.
pub(crate) fn abandon_owned_by(tid: u32) {
    let mut registry = REGISTRY.lock();
    registry.retain(|w| w.strong_count() > 0);
    let live: Vec<Arc<KernelObject>> = registry.iter().filter_map(Weak::upgrade).collect();
    drop(registry);

    for obj in live {
        if let ObjectBody::Mutex(m) = &obj.body {
            m.dispatcher.signal(|st| {
                if let DispatchState::Mutex {
                    owner,
                    recursion,
                    abandoned,
                } = st
                {
                    if *owner == Some(tid) {
                        *owner = None;
                        *recursion = 0;
                        *abandoned = true;
                        log::debug!("[KE] mutex abandoned by thread {tid}");
                    }
                }
            });
        }
    }
}

/// CreateMutexA - create a mutex, optionally owned by the caller.
pub unsafe extern "win64" fn CreateMutexA(
    _security: *mut c_void,
    initial_owner: Bool,
    _name: *const c_char,
) -> Handle {
    let owner = (initial_owner != FALSE).then(current_tid);
    let arc = Arc::new(KernelObject::new(ObjectBody::Mutex(MutexObject::new(owner))));
    REGISTRY.lock().push(Arc::downgrade(&arc));
    let handle = ob::table().insert_arc(arc);
    log::trace!("[KE] mutex created, handle {handle}");
    handle
}

/// ReleaseMutex - drop one recursion level; fails for non-owners without
/// touching the mutex.
pub unsafe extern "win64" fn ReleaseMutex(handle: Handle) -> Bool {
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return FALSE;
        }
    };
    match &obj.body {
        ObjectBody::Mutex(m) => match m.release(current_tid()) {
            Ok(()) => TRUE,
            Err(()) => {
                status::set_last_error(ERROR_NOT_OWNER);
                FALSE
            }
        },
        _ => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::wait::WaitForSingleObject;
    use crate::status::{WAIT_ABANDONED_0, WAIT_OBJECT_0, WAIT_TIMEOUT};
    use std::ptr;

    #[test]
    fn test_recursive_acquire_release() {
        unsafe {
            let h = CreateMutexA(ptr::null_mut(), FALSE, ptr::null());
            for _ in 0..3 {
                assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            }
            // Three releases required; the third frees the mutex.
            for _ in 0..3 {
                assert_eq!(ReleaseMutex(h), TRUE);
            }
            assert_eq!(ReleaseMutex(h), FALSE);
            assert_eq!(status::last_error(), ERROR_NOT_OWNER);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
    }

    #[test]
    fn test_other_thread_blocked_until_last_release() {
        unsafe {
            let h = CreateMutexA(ptr::null_mut(), TRUE, ptr::null());
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0); // recurse

            let blocked = std::thread::spawn(move || WaitForSingleObject(h, 50));
            assert_eq!(blocked.join().unwrap(), WAIT_TIMEOUT);

            assert_eq!(ReleaseMutex(h), TRUE);
            let still = std::thread::spawn(move || WaitForSingleObject(h, 50));
            assert_eq!(still.join().unwrap(), WAIT_TIMEOUT);

            assert_eq!(ReleaseMutex(h), TRUE);
            let now = std::thread::spawn(move || {
                let r = WaitForSingleObject(h, 1000);
                ReleaseMutex(h);
                r
            });
            assert_eq!(now.join().unwrap(), WAIT_OBJECT_0);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
    }

    #[test]
    fn test_abandonment_reported_once() {
        unsafe {
            let h = CreateMutexA(ptr::null_mut(), FALSE, ptr::null());
            let tid = std::thread::spawn(move || {
                assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
                current_tid()
                // Exits without releasing.
            })
            .join()
            .unwrap();
            abandon_owned_by(tid);
            assert_eq!(WaitForSingleObject(h, 1000), WAIT_ABANDONED_0);
            // Ownership transferred normally after the abandoned grab.
            assert_eq!(ReleaseMutex(h), TRUE);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(ReleaseMutex(h), TRUE);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
    }
}
