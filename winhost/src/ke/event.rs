//! Event Objects
//!
//! Two flavours, following the NT split:
//! - **manual reset**: stays signaled until reset; a set releases every
//!   current waiter.
//! - **auto reset**: a set releases exactly one waiter and the event is
//!   unsignaled afterwards (or stays signaled until the next wait when
//!   nobody is waiting).

use crate::abi::{Bool, Handle, FALSE, TRUE};
use crate::ke::dispatcher::{DispatchState, Dispatcher};
use crate::ob::{self, KernelObject, ObjectBody};
use crate::status::{self, ERROR_INVALID_HANDLE};
use std::os::raw::{c_char, c_void};

/// An event behind a handle.
pub struct EventObject {
    pub dispatcher: Dispatcher,
}

impl EventObject {
    pub fn new(manual: bool, signaled: bool) -> Self {
        Self {
            dispatcher: Dispatcher::new(DispatchState::Event { manual, signaled }),
        }
    }

    /// Signal the event, waking waiters per the reset policy.
    pub fn set(&self) {
        self.dispatcher.signal(|st| {
            if let DispatchState::Event { signaled, .. } = st {
                *signaled = true;
            }
        });
    }

    /// Unsignal the event. Never wakes anyone.
    pub fn reset(&self) {
        self.dispatcher.with_state(|st| {
            if let DispatchState::Event { signaled, .. } = st {
                *signaled = false;
            }
        });
    }
}

fn event_of(handle: Handle) -> Option<std::sync::Arc<KernelObject>> {
    let obj = ob::table().get(handle).ok()?;
    matches!(obj.body, ObjectBody::Event(_)).then_some(obj)
}

/// CreateEventA - create an event object.
///
/// The name argument is accepted and ignored; this host has no cross-
/// process namespace.
pub unsafe extern "win64" fn CreateEventA(
    _security: *mut c_void,
    manual_reset: Bool,
    initial_state: Bool,
    _name: *const c_char,
) -> Handle {
    let event = EventObject::new(manual_reset != FALSE, initial_state != FALSE);
    let handle = ob::table().insert(KernelObject::new(ObjectBody::Event(event)));
    log::trace!("[KE] event created, handle {handle}");
    handle
}

/// SetEvent - signal an event.
pub unsafe extern "win64" fn SetEvent(handle: Handle) -> Bool {
    match event_of(handle) {
        Some(obj) => {
            if let ObjectBody::Event(e) = &obj.body {
                e.set();
            }
            TRUE
        }
        None => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

/// ResetEvent - unsignal an event.
pub unsafe extern "win64" fn ResetEvent(handle: Handle) -> Bool {
    match event_of(handle) {
        Some(obj) => {
            if let ObjectBody::Event(e) = &obj.body {
                e.reset();
            }
            TRUE
        }
        None => {
            status::set_last_error(ERROR_INVALID_HANDLE);
            FALSE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::thread::current_tid;
    use crate::ke::wait::WaitForSingleObject;
    use crate::status::{WAIT_OBJECT_0, WAIT_TIMEOUT};
    use std::ptr;

    #[test]
    fn test_manual_event_stays_signaled() {
        unsafe {
            let h = CreateEventA(ptr::null_mut(), TRUE, FALSE, ptr::null());
            assert_eq!(WaitForSingleObject(h, 0), WAIT_TIMEOUT);
            assert_eq!(SetEvent(h), TRUE);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(ResetEvent(h), TRUE);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_TIMEOUT);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
    }

    #[test]
    fn test_auto_event_consumed_by_wait() {
        unsafe {
            let h = CreateEventA(ptr::null_mut(), FALSE, TRUE, ptr::null());
            assert_eq!(WaitForSingleObject(h, 0), WAIT_OBJECT_0);
            assert_eq!(WaitForSingleObject(h, 0), WAIT_TIMEOUT);
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
        }
        let _ = current_tid();
    }

    #[test]
    fn test_set_on_closed_handle_fails() {
        unsafe {
            let h = CreateEventA(ptr::null_mut(), FALSE, FALSE, ptr::null());
            assert_eq!(crate::ob::CloseHandle(h), TRUE);
            assert_eq!(SetEvent(h), FALSE);
            assert_eq!(status::last_error(), ERROR_INVALID_HANDLE);
        }
    }
}
