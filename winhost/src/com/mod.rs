//! COM Runtime
//!
//! GUID identity, the IUnknown binary contract, per-thread apartment
//! initialization and the in-process class-factory registry.
//!
//! Every COM instance begins with a pointer to an immutable vtable whose
//! first three slots are QueryInterface, AddRef and Release. Reference
//! counts are atomic; the drop path runs only on the final release.
//! QueryInterface is reflexive, symmetric and transitive, and every
//! interface of an object shares one reference count (no aggregation).

use crate::abi::{Dword, HResult};
use crate::status::{
    CLASS_E_CLASSNOTAVAILABLE, CLASS_E_NOAGGREGATION, CO_E_NOTINITIALIZED, E_INVALIDARG,
    E_POINTER, RPC_E_CHANGED_MODE, S_FALSE, S_OK,
};
use spin::RwLock;
use std::cell::Cell;
use std::collections::HashMap;
use std::os::raw::c_void;

// ============================================================================
// GUID
// ============================================================================

/// GUID layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self {
            data1,
            data2,
            data3,
            data4,
        }
    }
}

/// IID_IUnknown.
pub const IID_IUNKNOWN: Guid = Guid::new(
    0x0000_0000,
    0x0000,
    0x0000,
    [0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46],
);

/// The first three vtable slots every COM interface starts with.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
}

/// Call AddRef through an interface pointer.
pub unsafe fn com_add_ref(p: *mut c_void) -> u32 {
    let vtbl = *(p as *mut *const IUnknownVtbl);
    ((*vtbl).add_ref)(p)
}

/// Call Release through an interface pointer.
pub unsafe fn com_release(p: *mut c_void) -> u32 {
    let vtbl = *(p as *mut *const IUnknownVtbl);
    ((*vtbl).release)(p)
}

/// Call QueryInterface through an interface pointer.
pub unsafe fn com_query(p: *mut c_void, iid: &Guid, out: *mut *mut c_void) -> HResult {
    let vtbl = *(p as *mut *const IUnknownVtbl);
    ((*vtbl).query_interface)(p, iid, out)
}

// ============================================================================
// Apartments
// ============================================================================

/// `CoInitializeEx` concurrency models.
pub const COINIT_MULTITHREADED: Dword = 0x0;
pub const COINIT_APARTMENTTHREADED: Dword = 0x2;

thread_local! {
    // (reference count, declared model)
    static APARTMENT: Cell<Option<(u32, Dword)>> = const { Cell::new(None) };
}

pub(crate) fn apartment_initialized() -> bool {
    APARTMENT.with(|a| a.get().is_some())
}

/// CoInitializeEx - reference-counted per thread. The first call fixes
/// the apartment model; a mismatched later call fails without touching
/// the count.
pub unsafe extern "win64" fn CoInitializeEx(_reserved: *mut c_void, model: Dword) -> HResult {
    APARTMENT.with(|a| match a.get() {
        None => {
            a.set(Some((1, model)));
            S_OK
        }
        Some((count, declared)) if declared == model => {
            a.set(Some((count + 1, declared)));
            S_FALSE
        }
        Some(_) => RPC_E_CHANGED_MODE,
    })
}

/// CoUninitialize - drop one apartment reference.
pub unsafe extern "win64" fn CoUninitialize() {
    APARTMENT.with(|a| match a.get() {
        Some((1, _)) => a.set(None),
        Some((count, model)) => a.set(Some((count - 1, model))),
        None => {}
    });
}

// ============================================================================
// Class factories
// ============================================================================

/// An in-process factory: yields an object satisfying the requested
/// interface.
pub type ClassFactory = unsafe fn(riid: &Guid, out: *mut *mut c_void) -> HResult;

static FACTORIES: spin::Lazy<RwLock<HashMap<Guid, ClassFactory>>> =
    spin::Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a class with the in-process registry. Registration happens
/// at startup; lookups after that take the lock shared.
pub fn register_class_factory(clsid: Guid, factory: ClassFactory) {
    FACTORIES.write().insert(clsid, factory);
}

/// CoCreateInstance - consult the class registry and construct.
pub unsafe extern "win64" fn CoCreateInstance(
    clsid: *const Guid,
    outer: *mut c_void,
    _context: Dword,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if clsid.is_null() || riid.is_null() {
        return E_INVALIDARG;
    }
    if out.is_null() {
        return E_POINTER;
    }
    *out = std::ptr::null_mut();
    if !outer.is_null() {
        return CLASS_E_NOAGGREGATION;
    }
    if !apartment_initialized() {
        return CO_E_NOTINITIALIZED;
    }
    let factory = match FACTORIES.read().get(&*clsid) {
        Some(f) => *f,
        None => return CLASS_E_CLASSNOTAVAILABLE,
    };
    factory(&*riid, out)
}

/// CoTaskMemAlloc - the COM allocator.
pub unsafe extern "win64" fn CoTaskMemAlloc(size: usize) -> *mut c_void {
    if size == 0 {
        return std::ptr::null_mut();
    }
    libc::malloc(size)
}

/// CoTaskMemFree - release CoTaskMemAlloc memory; null is fine.
pub unsafe extern "win64" fn CoTaskMemFree(p: *mut c_void) {
    if !p.is_null() {
        libc::free(p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{succeeded, E_NOINTERFACE};
    use std::sync::atomic::{AtomicU32, Ordering};

    // A two-interface test object: IUnknown plus a second IID sharing
    // the same refcount.
    const IID_SECOND: Guid = Guid::new(0x1111_2222, 0x3333, 0x4444, [5, 5, 5, 5, 5, 5, 5, 5]);
    const CLSID_TEST: Guid = Guid::new(0xAAAA_BBBB, 0xCCCC, 0xDDDD, [1, 2, 3, 4, 5, 6, 7, 8]);

    #[repr(C)]
    struct TestObj {
        vtbl: *const IUnknownVtbl,
        refs: AtomicU32,
    }

    unsafe extern "win64" fn qi(
        this: *mut c_void,
        iid: *const Guid,
        out: *mut *mut c_void,
    ) -> HResult {
        if out.is_null() {
            return E_POINTER;
        }
        let iid = &*iid;
        if *iid == IID_IUNKNOWN || *iid == IID_SECOND {
            addref(this);
            *out = this;
            S_OK
        } else {
            *out = std::ptr::null_mut();
            E_NOINTERFACE
        }
    }

    unsafe extern "win64" fn addref(this: *mut c_void) -> u32 {
        let obj = &*(this as *mut TestObj);
        obj.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    unsafe extern "win64" fn release(this: *mut c_void) -> u32 {
        let obj = &*(this as *mut TestObj);
        let remaining = obj.refs.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            drop(Box::from_raw(this as *mut TestObj));
        }
        remaining
    }

    static TEST_VTBL: IUnknownVtbl = IUnknownVtbl {
        query_interface: qi,
        add_ref: addref,
        release,
    };

    unsafe fn make_test_obj(riid: &Guid, out: *mut *mut c_void) -> HResult {
        let obj = Box::into_raw(Box::new(TestObj {
            vtbl: &TEST_VTBL,
            refs: AtomicU32::new(0),
        }));
        let hr = qi(obj as *mut c_void, riid, out);
        if !succeeded(hr) {
            drop(Box::from_raw(obj));
        }
        hr
    }

    #[test]
    fn test_query_interface_laws() {
        unsafe {
            let mut p: *mut c_void = std::ptr::null_mut();
            assert!(succeeded(make_test_obj(&IID_IUNKNOWN, &mut p)));

            // Reflexive.
            let mut again: *mut c_void = std::ptr::null_mut();
            assert!(succeeded(com_query(p, &IID_IUNKNOWN, &mut again)));
            assert_eq!(again, p);
            com_release(again);

            // Symmetric / transitive through the second interface.
            let mut second: *mut c_void = std::ptr::null_mut();
            assert!(succeeded(com_query(p, &IID_SECOND, &mut second)));
            let mut back: *mut c_void = std::ptr::null_mut();
            assert!(succeeded(com_query(second, &IID_IUNKNOWN, &mut back)));
            com_release(back);
            com_release(second);

            // Unknown IID refused with a null out-pointer.
            let mut none: *mut c_void = std::ptr::null_mut();
            let bogus = Guid::new(1, 2, 3, [0; 8]);
            assert_eq!(com_query(p, &bogus, &mut none), E_NOINTERFACE);
            assert!(none.is_null());

            assert_eq!(com_release(p), 0);
        }
    }

    #[test]
    fn test_refcount_shared_across_interfaces() {
        unsafe {
            let mut p: *mut c_void = std::ptr::null_mut();
            make_test_obj(&IID_IUNKNOWN, &mut p);
            let mut second: *mut c_void = std::ptr::null_mut();
            com_query(p, &IID_SECOND, &mut second);
            assert_eq!(com_add_ref(p), 3);
            assert_eq!(com_release(second), 2);
            assert_eq!(com_release(p), 1);
            assert_eq!(com_release(p), 0);
        }
    }

    #[test]
    fn test_apartment_model_fixed_by_first_call() {
        std::thread::spawn(|| unsafe {
            assert_eq!(
                CoInitializeEx(std::ptr::null_mut(), COINIT_APARTMENTTHREADED),
                S_OK
            );
            assert_eq!(
                CoInitializeEx(std::ptr::null_mut(), COINIT_APARTMENTTHREADED),
                S_FALSE
            );
            assert_eq!(
                CoInitializeEx(std::ptr::null_mut(), COINIT_MULTITHREADED),
                RPC_E_CHANGED_MODE
            );
            CoUninitialize();
            CoUninitialize();
            // Fully released: the model may change now.
            assert_eq!(
                CoInitializeEx(std::ptr::null_mut(), COINIT_MULTITHREADED),
                S_OK
            );
            CoUninitialize();
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_co_create_instance_paths() {
        std::thread::spawn(|| unsafe {
            let mut p: *mut c_void = std::ptr::null_mut();
            // Uninitialized apartment refused.
            assert_eq!(
                CoCreateInstance(&CLSID_TEST, std::ptr::null_mut(), 1, &IID_IUNKNOWN, &mut p),
                CO_E_NOTINITIALIZED
            );

            CoInitializeEx(std::ptr::null_mut(), COINIT_MULTITHREADED);
            assert_eq!(
                CoCreateInstance(&CLSID_TEST, std::ptr::null_mut(), 1, &IID_IUNKNOWN, &mut p),
                CLASS_E_CLASSNOTAVAILABLE
            );

            register_class_factory(CLSID_TEST, make_test_obj);
            assert!(succeeded(CoCreateInstance(
                &CLSID_TEST,
                std::ptr::null_mut(),
                1,
                &IID_IUNKNOWN,
                &mut p
            )));
            assert_eq!(com_release(p), 0);
            CoUninitialize();
        })
        .join()
        .unwrap();
    }
}
