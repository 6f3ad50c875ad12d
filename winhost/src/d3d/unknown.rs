//! COM Plumbing for Device Objects
//!
//! Every guest-visible D3D object is a heap allocation whose first word
//! points at a static vtable and whose second is an atomic refcount.
//! [`impl_com_unknown`] stamps out the three IUnknown slots for a
//! concrete object type; the per-type vtable structs add their method
//! slots after those three.

use std::sync::atomic::AtomicU32;

/// The leading fields of every COM-shaped object.
#[repr(C)]
pub(crate) struct ComHeader {
    pub vtbl: *const std::os::raw::c_void,
    pub refs: AtomicU32,
}

impl ComHeader {
    pub(crate) fn new(vtbl: *const std::os::raw::c_void) -> Self {
        Self {
            vtbl,
            refs: AtomicU32::new(1),
        }
    }
}

/// Generate QueryInterface/AddRef/Release for an object type whose
/// first field is a [`ComHeader`]. QueryInterface answers IUnknown and
/// the object's own IID with the same pointer, keeping the refcount
/// shared across interfaces.
macro_rules! impl_com_unknown {
    ($ty:ty, $iid:expr, $qi:ident, $addref:ident, $release:ident) => {
        pub(crate) unsafe extern "win64" fn $qi(
            this: *mut std::os::raw::c_void,
            iid: *const $crate::com::Guid,
            out: *mut *mut std::os::raw::c_void,
        ) -> $crate::abi::HResult {
            if out.is_null() {
                return $crate::status::E_POINTER;
            }
            if iid.is_null() {
                return $crate::status::E_INVALIDARG;
            }
            if *iid == $crate::com::IID_IUNKNOWN || *iid == $iid {
                $addref(this);
                *out = this;
                $crate::status::S_OK
            } else {
                *out = std::ptr::null_mut();
                $crate::status::E_NOINTERFACE
            }
        }

        pub(crate) unsafe extern "win64" fn $addref(this: *mut std::os::raw::c_void) -> u32 {
            let hdr = &*(this as *const $crate::d3d::unknown::ComHeader);
            hdr.refs.fetch_add(1, std::sync::atomic::Ordering::AcqRel) + 1
        }

        pub(crate) unsafe extern "win64" fn $release(this: *mut std::os::raw::c_void) -> u32 {
            let hdr = &*(this as *const $crate::d3d::unknown::ComHeader);
            let remaining = hdr.refs.fetch_sub(1, std::sync::atomic::Ordering::AcqRel) - 1;
            if remaining == 0 {
                drop(Box::from_raw(this as *mut $ty));
            }
            remaining
        }
    };
}

pub(crate) use impl_com_unknown;
