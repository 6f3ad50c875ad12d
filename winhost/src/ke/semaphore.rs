//! Semaphore Objects
//!
//! Counted dispatcher objects: each successful wait takes one unit,
//! release gives back up to the creation maximum.

use crate::abi::{Bool, Handle, FALSE, TRUE};
use crate::ke::dispatcher::{DispatchState, Dispatcher};
use crate::ob::{self, KernelObject, ObjectBody};
use crate::status::{self, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, ERROR_TOO_MANY_POSTS};
use std::os::raw::{c_char, c_void};

/// A semaphore behind a handle.
pub struct SemaphoreObject {
    pub dispatcher: Dispatcher,
}

impl SemaphoreObject {
    pub fn new(initial: u32, max: u32) -> Self {
        Self {
            dispatcher: Dispatcher::new(DispatchState::Semaphore {
                count: initial,
                max,
            }),
        }
    }

    /// Add `n` units, failing without change if the maximum would be
    /// exceeded. Returns the previous count.
    pub fn release(&self, n: u32) -> Result<u32, ()> {
        self.dispatcher.signal(|st| {
            if let DispatchState::Semaphore { count, max } = st {
                let prev = *count;
                match count.checked_add(n) {
                    Some(next) if next <= *max => {
                        *count = next;
                        Ok(prev)
                    }
                    _ => Err(()),
                }
            } else {
                Err(())
            }
        })
    }
}

/// CreateSemaphoreA - create a semaphore with an initial and maximum count.
pub unsafe extern "win64" fn CreateSemaphoreA(
    _security: *mut c_void,
    initial: i32,
    max: i32,
    _name: *const c_char,
) -> Handle {
    if max <= 0 || initial < 0 || initial > max {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return 0;
    }
    let sem = SemaphoreObject::new(initial as u32, max as u32);
    ob::table().insert(KernelObject::new(ObjectBody::Semaphore(sem)))
}

/// ReleaseSemaphore - return `count` units; optionally reports the
/// previous count.
pub unsafe extern "win64" fn ReleaseSemaphore(
    handle: Handle,
    count: i32,
    previous: *mut i32,
) -> Bool {
    if count <= 0 {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let obj = match ob::table().get(handle) {
        Ok(o) => o,
        Err(_) => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            return FALSE;
        }
    };
    match &obj.body {
        ObjectBody::Semaphore(s) => match s.release(count as u32) {
            Ok(prev) => {
                if !previous.is_null() {
                    *previous = prev as i32;
                }
                TRUE
            }
            Err(()) => {
                status::set_last_error(ERROR_TOO_MANY_POSTS);
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
    use crate::status::{WAIT_OBJECT_0, WAIT_TIMEOUT};
    use std::ptr;

    #[test]
    fn test_counted_waits() {
        unsafe {
            let h = CreateSemaphoreA(ptr::null_mut(), 2, 4, ptr::null());
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_TIMEOUT);

            let mut prev = -1;
            assert_eq!(ReleaseSemaphore(h, 3, &mut prev), TRUE);
            assert_eq!(prev, 0);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
    }

    #[test]
    fn test_release_past_max_rejected() {
        unsafe {
            let h = CreateSemaphoreA(ptr::null_mut(), 1, 2, ptr::null());
            assert_eq!(ReleaseSemaphore(h, 2, ptr::null_mut()), FALSE);
            assert_eq!(status::last_error(), ERROR_TOO_MANY_POSTS);
            // The failed release must not have changed the count.
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_TIMEOUT);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
    }

    #[test]
    fn test_bad_creation_parameters() {
        unsafe {
            assert_eq!(CreateSemaphoreA(ptr::null_mut(), 3, 2, ptr::null()), 0);
            assert_eq!(status::last_error(), ERROR_INVALID_PARAMETER);
        }
    }
}
