//! Resources and Views
//!
//! A resource is a buffer or a 2-D texture: a descriptor plus a linear
//! byte array. Views (RTV / SRV / DSV / CBV) reference a resource
//! without restricting how many views it has; pipeline bindings hold
//! views weakly.
//!
//! Every resource carries a non-owning back-reference to its device,
//! validated by the device generation counter before any operation that
//! touches data.

use super::device::DeviceCore;
use super::unknown::{impl_com_unknown, ComHeader};
use super::Format;
use crate::abi::HResult;
use crate::com::Guid;
use crate::status::{E_FAIL, E_INVALIDARG, E_POINTER, S_OK};
use spin::Mutex as SpinMutex;
use std::os::raw::c_void;
use std::sync::{Arc, Weak};

// ============================================================================
// Descriptors
// ============================================================================

/// Buffer creation descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc {
    pub byte_width: u32,
    pub bind_flags: u32,
}

/// 2-D texture creation descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Texture2dDesc {
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub bind_flags: u32,
}

/// Initial data for a creation call.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct SubresourceData {
    pub data: *const c_void,
    pub row_pitch: u32,
}

// ============================================================================
// Cores
// ============================================================================

/// What a resource is.
#[derive(Debug, Clone, Copy)]
pub enum ResourceKind {
    Buffer { len: usize },
    Texture2d { width: u32, height: u32, format: Format },
}

/// The shared body behind resource handles and views.
pub struct ResourceCore {
    pub kind: ResourceKind,
    pub bind_flags: u32,
    pub data: SpinMutex<Vec<u8>>,
    pub(crate) device: Weak<DeviceCore>,
    pub(crate) generation: u64,
}

impl ResourceCore {
    /// The parent device, if it is still the same device.
    pub(crate) fn device_ok(&self) -> bool {
        self.device
            .upgrade()
            .map(|d| d.generation() == self.generation)
            .unwrap_or(false)
    }

    pub fn byte_len(&self) -> usize {
        match self.kind {
            ResourceKind::Buffer { len } => len,
            ResourceKind::Texture2d { width, height, format } => {
                width as usize * height as usize * format.stride()
            }
        }
    }

    /// Texture geometry, `None` for buffers.
    pub fn texture_dims(&self) -> Option<(u32, u32, Format)> {
        match self.kind {
            ResourceKind::Texture2d { width, height, format } => Some((width, height, format)),
            ResourceKind::Buffer { .. } => None,
        }
    }
}

/// View flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    RenderTarget,
    ShaderResource,
    DepthStencil,
    ConstantBuffer,
}

/// A view: a flavoured reference to a resource.
pub struct ViewCore {
    pub kind: ViewKind,
    pub resource: Arc<ResourceCore>,
}

pub(crate) fn new_resource_core(
    device: &Arc<DeviceCore>,
    kind: ResourceKind,
    bind_flags: u32,
    initial: Option<&[u8]>,
) -> Arc<ResourceCore> {
    let core = ResourceCore {
        kind,
        bind_flags,
        data: SpinMutex::new(Vec::new()),
        device: Arc::downgrade(device),
        generation: device.generation(),
    };
    let len = core.byte_len();
    {
        let mut data = core.data.lock();
        *data = vec![0u8; len];
        if let Some(initial) = initial {
            let n = initial.len().min(len);
            data[..n].copy_from_slice(&initial[..n]);
        }
    }
    Arc::new(core)
}

// ============================================================================
// COM wrappers
// ============================================================================

pub const IID_RESOURCE: Guid = Guid::new(
    0xD3DE_0001,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01],
);

pub const IID_VIEW: Guid = Guid::new(
    0xD3DE_0002,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02],
);

/// Resource vtable: IUnknown plus map/unmap.
#[repr(C)]
pub struct ResourceVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub map: unsafe extern "win64" fn(*mut c_void, *mut *mut c_void) -> HResult,
    pub unmap: unsafe extern "win64" fn(*mut c_void),
}

/// A guest-visible resource.
#[repr(C)]
pub struct Resource {
    hdr: ComHeader,
    pub(crate) core: Arc<ResourceCore>,
}

impl_com_unknown!(Resource, IID_RESOURCE, resource_qi, resource_addref, resource_release);

/// Map - hand out a CPU pointer to the resource bytes. The guest owns
/// synchronization while mapped.
unsafe extern "win64" fn resource_map(this: *mut c_void, out: *mut *mut c_void) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    let resource = &*(this as *mut Resource);
    if !resource.core.device_ok() {
        return E_FAIL;
    }
    *out = resource.core.data.lock().as_mut_ptr() as *mut c_void;
    S_OK
}

unsafe extern "win64" fn resource_unmap(_this: *mut c_void) {}

static RESOURCE_VTBL: ResourceVtbl = ResourceVtbl {
    query_interface: resource_qi,
    add_ref: resource_addref,
    release: resource_release,
    map: resource_map,
    unmap: resource_unmap,
};

pub(crate) fn new_resource(core: Arc<ResourceCore>) -> *mut Resource {
    Box::into_raw(Box::new(Resource {
        hdr: ComHeader::new(&RESOURCE_VTBL as *const ResourceVtbl as *const c_void),
        core,
    }))
}

/// View vtable: IUnknown only; the flavour lives in the core.
#[repr(C)]
pub struct ViewVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
}

/// A guest-visible view.
#[repr(C)]
pub struct View {
    hdr: ComHeader,
    pub(crate) core: Arc<ViewCore>,
}

impl_com_unknown!(View, IID_VIEW, view_qi, view_addref, view_release);

static VIEW_VTBL: ViewVtbl = ViewVtbl {
    query_interface: view_qi,
    add_ref: view_addref,
    release: view_release,
};

pub(crate) fn new_view(core: ViewCore) -> *mut View {
    Box::into_raw(Box::new(View {
        hdr: ComHeader::new(&VIEW_VTBL as *const ViewVtbl as *const c_void),
        core: Arc::new(core),
    }))
}

/// Validate a view creation request against the resource's bind flags.
pub(crate) fn check_view(kind: ViewKind, resource: &ResourceCore) -> Result<(), HResult> {
    let required = match kind {
        ViewKind::RenderTarget => super::BIND_RENDER_TARGET,
        ViewKind::ShaderResource => super::BIND_SHADER_RESOURCE,
        ViewKind::DepthStencil => super::BIND_DEPTH_STENCIL,
        ViewKind::ConstantBuffer => super::BIND_CONSTANT_BUFFER,
    };
    if resource.bind_flags & required == 0 {
        return Err(E_INVALIDARG);
    }
    match kind {
        ViewKind::RenderTarget => {
            let ok = resource
                .texture_dims()
                .map(|(_, _, f)| f.is_color())
                .unwrap_or(false);
            if !ok {
                return Err(E_INVALIDARG);
            }
        }
        ViewKind::DepthStencil => {
            let ok = matches!(resource.texture_dims(), Some((_, _, Format::D32Float)));
            if !ok {
                return Err(E_INVALIDARG);
            }
        }
        ViewKind::ConstantBuffer => {
            if resource.texture_dims().is_some() {
                return Err(E_INVALIDARG);
            }
        }
        ViewKind::ShaderResource => {}
    }
    Ok(())
}
