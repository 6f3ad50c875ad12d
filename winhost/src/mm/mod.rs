//! Virtual Memory
//!
//! Reserve/commit regions with page granularity over host anonymous
//! mappings. The host does not distinguish reserve from commit; both
//! arrive as one mapping and `MEM_RELEASE` returns the entire original
//! reservation, which is the contract the guest relies on.

use crate::abi::{Bool, Dword, FALSE, TRUE};
use crate::status::{self, ERROR_INVALID_PARAMETER, ERROR_NOT_ENOUGH_MEMORY};
use spin::Mutex as SpinMutex;
use std::collections::HashMap;
use std::os::raw::c_void;

pub const MEM_COMMIT: Dword = 0x0000_1000;
pub const MEM_RESERVE: Dword = 0x0000_2000;
pub const MEM_RELEASE: Dword = 0x0000_8000;

pub const PAGE_NOACCESS: Dword = 0x01;
pub const PAGE_READONLY: Dword = 0x02;
pub const PAGE_READWRITE: Dword = 0x04;
pub const PAGE_EXECUTE: Dword = 0x10;
pub const PAGE_EXECUTE_READ: Dword = 0x20;
pub const PAGE_EXECUTE_READWRITE: Dword = 0x40;

const PAGE_SIZE: usize = 4096;

/// A mapping's parameters, also usable behind a section handle.
pub struct SectionObject {
    pub base: usize,
    pub size: usize,
    pub protect: Dword,
}

// base -> (length, current protect) for every live reservation.
static REGIONS: spin::Lazy<SpinMutex<HashMap<usize, (usize, Dword)>>> =
    spin::Lazy::new(|| SpinMutex::new(HashMap::new()));

/// Host protection bits for a Windows page-protection constant.
pub fn prot_from_protect(protect: Dword) -> Option<i32> {
    Some(match protect {
        PAGE_NOACCESS => libc::PROT_NONE,
        PAGE_READONLY => libc::PROT_READ,
        PAGE_READWRITE => libc::PROT_READ | libc::PROT_WRITE,
        PAGE_EXECUTE => libc::PROT_EXEC,
        PAGE_EXECUTE_READ => libc::PROT_READ | libc::PROT_EXEC,
        PAGE_EXECUTE_READWRITE => libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        _ => return None,
    })
}

fn round_up(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Map `size` bytes anywhere with the given host protection.
pub fn map_anywhere(size: usize, prot: i32) -> Option<*mut u8> {
    let p = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            round_up(size),
            prot,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    (p != libc::MAP_FAILED).then_some(p as *mut u8)
}

/// Try to map `size` bytes exactly at `addr` without displacing anything
/// already there.
pub fn map_fixed(addr: usize, size: usize, prot: i32) -> Option<*mut u8> {
    let p = unsafe {
        libc::mmap(
            addr as *mut c_void,
            round_up(size),
            prot,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED_NOREPLACE,
            -1,
            0,
        )
    };
    if p == libc::MAP_FAILED || p as usize != addr {
        if p != libc::MAP_FAILED {
            unsafe { libc::munmap(p, round_up(size)) };
        }
        return None;
    }
    Some(p as *mut u8)
}

/// Unmap a region mapped by [`map_anywhere`] / [`map_fixed`].
pub fn unmap(base: *mut u8, size: usize) {
    unsafe {
        libc::munmap(base as *mut c_void, round_up(size));
    }
}

/// Change protection on a page-aligned subrange.
pub fn protect(base: *mut u8, size: usize, prot: i32) -> bool {
    unsafe { libc::mprotect(base as *mut c_void, round_up(size), prot) == 0 }
}

// ============================================================================
// ABI surface
// ============================================================================

/// VirtualAlloc - reserve and/or commit a region. A null base picks the
/// placement; a non-null base is honoured only if that range is free.
pub unsafe extern "win64" fn VirtualAlloc(
    address: *mut c_void,
    size: usize,
    alloc_type: Dword,
    protect_flags: Dword,
) -> *mut c_void {
    if size == 0 || alloc_type & (MEM_COMMIT | MEM_RESERVE) == 0 {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return std::ptr::null_mut();
    }
    let prot = match prot_from_protect(protect_flags) {
        Some(p) => p,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return std::ptr::null_mut();
        }
    };
    let mapped = if address.is_null() {
        map_anywhere(size, prot)
    } else {
        map_fixed(address as usize & !(PAGE_SIZE - 1), size, prot)
    };
    match mapped {
        Some(base) => {
            REGIONS
                .lock()
                .insert(base as usize, (round_up(size), protect_flags));
            log::trace!("[MM] allocated {size:#x} bytes at {base:p}");
            base as *mut c_void
        }
        None => {
            status::set_last_error(ERROR_NOT_ENOUGH_MEMORY);
            std::ptr::null_mut()
        }
    }
}

/// VirtualFree - `MEM_RELEASE` returns the entire original reservation;
/// the base must be the value `VirtualAlloc` returned and size must be 0.
pub unsafe extern "win64" fn VirtualFree(
    address: *mut c_void,
    size: usize,
    free_type: Dword,
) -> Bool {
    if free_type != MEM_RELEASE || size != 0 {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let removed = REGIONS.lock().remove(&(address as usize));
    match removed {
        Some((len, _)) => {
            unmap(address as *mut u8, len);
            TRUE
        }
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            FALSE
        }
    }
}

/// VirtualProtect - change protection on a committed range; reports the
/// region's previous protection.
pub unsafe extern "win64" fn VirtualProtect(
    address: *mut c_void,
    size: usize,
    new_protect: Dword,
    old_protect: *mut Dword,
) -> Bool {
    if old_protect.is_null() {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let prot = match prot_from_protect(new_protect) {
        Some(p) => p,
        None => {
            status::set_last_error(ERROR_INVALID_PARAMETER);
            return FALSE;
        }
    };
    let aligned = (address as usize) & !(PAGE_SIZE - 1);
    if !protect(aligned as *mut u8, size, prot) {
        status::set_last_error(ERROR_INVALID_PARAMETER);
        return FALSE;
    }
    let mut regions = REGIONS.lock();
    let mut previous = PAGE_READWRITE;
    for (&base, (len, cur)) in regions.iter_mut() {
        if aligned >= base && aligned < base + *len {
            previous = *cur;
            *cur = new_protect;
            break;
        }
    }
    *old_protect = previous;
    TRUE
}
