//! Object Manager
//!
//! One process-wide table maps handles (small positive integers) to
//! kernel objects. A handle owns exactly one strong reference to its
//! object; lookups hand out additional strong references for the duration
//! of each API call.
//!
//! # Locking
//!
//! The table is readers-writer locked: lookup takes the lock shared,
//! allocation and closure take it exclusive. Nothing blocks while the
//! lock is held.
//!
//! # Handle policy
//!
//! - The smallest free positive integer is allocated.
//! - `0` and the all-ones invalid sentinel are never produced.
//! - An integer is reused only after its previous referent has been
//!   destroyed; a slot whose object is still kept alive by waiters stays
//!   in a draining state until the last reference resolves.
//!
//! Pseudo-handles (standard streams, registry hive roots) resolve in
//! their owning subsystems without entering the table.

pub mod object;

pub use object::{KernelObject, ObjectBody};

use crate::abi::{Handle, INVALID_HANDLE_VALUE};
use crate::status::HostError;
use spin::RwLock;
use std::sync::{Arc, Weak};

/// One table slot.
enum Slot {
    /// Never used or fully recycled.
    Free,
    /// Live handle.
    Used(Arc<KernelObject>),
    /// Handle closed, but waiters still hold the object. The index may be
    /// reused once the weak reference is dead.
    Draining(Weak<KernelObject>),
}

impl Slot {
    fn reusable(&self) -> bool {
        match self {
            Slot::Free => true,
            Slot::Draining(w) => w.strong_count() == 0,
            Slot::Used(_) => false,
        }
    }
}

/// The process-wide handle table.
pub struct HandleTable {
    slots: RwLock<Vec<Slot>>,
}

impl HandleTable {
    const fn new() -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
        }
    }

    /// Insert an object and return its handle.
    pub fn insert(&self, object: KernelObject) -> Handle {
        let arc = Arc::new(object);
        self.insert_arc(arc)
    }

    /// Insert an already-shared object and return its handle.
    pub fn insert_arc(&self, arc: Arc<KernelObject>) -> Handle {
        let mut slots = self.slots.write();
        // Index 0 is never allocated; keep a permanent placeholder there.
        if slots.is_empty() {
            slots.push(Slot::Free);
        }
        for (i, slot) in slots.iter_mut().enumerate().skip(1) {
            if slot.reusable() {
                *slot = Slot::Used(arc);
                return i as Handle;
            }
        }
        slots.push(Slot::Used(arc));
        slots.len() - 1
    }

    /// Look up a handle, returning a fresh strong reference.
    pub fn get(&self, handle: Handle) -> Result<Arc<KernelObject>, HostError> {
        if handle == 0 || handle == INVALID_HANDLE_VALUE {
            return Err(HostError::NotFound);
        }
        let slots = self.slots.read();
        match slots.get(handle) {
            Some(Slot::Used(arc)) => Ok(arc.clone()),
            _ => Err(HostError::NotFound),
        }
    }

    /// Close a handle: drop the table's strong reference.
    ///
    /// Closing an unknown or already-closed handle fails with `NotFound`.
    /// If waiters still hold the object it is destroyed after the last
    /// waiter resolves, and the integer is not reused before then.
    pub fn close(&self, handle: Handle) -> Result<(), HostError> {
        if handle == 0 || handle == INVALID_HANDLE_VALUE {
            return Err(HostError::NotFound);
        }
        let mut slots = self.slots.write();
        match slots.get_mut(handle) {
            Some(slot @ Slot::Used(_)) => {
                let arc = match std::mem::replace(slot, Slot::Free) {
                    Slot::Used(arc) => arc,
                    _ => unreachable!(),
                };
                if Arc::strong_count(&arc) > 1 {
                    *slot = Slot::Draining(Arc::downgrade(&arc));
                }
                drop(slots);
                log::trace!("[OB] handle {handle} closed");
                Ok(())
            }
            _ => Err(HostError::NotFound),
        }
    }

    /// Number of live handles (diagnostics).
    pub fn live_count(&self) -> usize {
        self.slots
            .read()
            .iter()
            .filter(|s| matches!(s, Slot::Used(_)))
            .count()
    }
}

static TABLE: HandleTable = HandleTable::new();

/// The process-wide handle table.
pub fn table() -> &'static HandleTable {
    &TABLE
}

/// CloseHandle - release one reference through the table.
pub unsafe extern "win64" fn CloseHandle(handle: Handle) -> crate::abi::Bool {
    match TABLE.close(handle) {
        Ok(()) => crate::abi::TRUE,
        Err(_) => {
            crate::status::set_last_error(crate::status::ERROR_INVALID_HANDLE);
            crate::abi::FALSE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ke::event::EventObject;

    fn new_event() -> KernelObject {
        KernelObject::new(ObjectBody::Event(EventObject::new(false, false)))
    }

    #[test]
    fn test_smallest_free_integer() {
        let t = HandleTable::new();
        let a = t.insert(new_event());
        let b = t.insert(new_event());
        let c = t.insert(new_event());
        assert!(a >= 1 && b == a + 1 && c == b + 1);

        t.close(b).unwrap();
        let d = t.insert(new_event());
        assert_eq!(d, b);
    }

    #[test]
    fn test_double_close_fails() {
        let t = HandleTable::new();
        let h = t.insert(new_event());
        t.close(h).unwrap();
        assert_eq!(t.close(h), Err(HostError::NotFound));
    }

    #[test]
    fn test_no_reuse_while_referenced() {
        let t = HandleTable::new();
        let h = t.insert(new_event());
        let held = t.get(h).unwrap();
        t.close(h).unwrap();
        // The object is still alive through `held`; its index must not be
        // handed out again yet.
        let next = t.insert(new_event());
        assert_ne!(next, h);
        drop(held);
        let recycled = t.insert(new_event());
        assert_eq!(recycled, h);
    }

    #[test]
    fn test_invalid_sentinels_rejected() {
        let t = HandleTable::new();
        assert!(t.get(0).is_err());
        assert!(t.get(INVALID_HANDLE_VALUE).is_err());
    }
}
