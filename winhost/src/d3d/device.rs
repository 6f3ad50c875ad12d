//! Device and Immediate Context
//!
//! The device creates every other object and owns the core the rest of
//! the module leans on: the generation counter resources validate
//! against, and the optional GPU backend for the clear/readback path.
//! Resources keep the core alive through the queue/context objects that
//! hold it strongly; releasing the device retires the generation so
//! stale back-references fail instead of touching freed state.

use super::command::{
    bindops, new_command_allocator, new_command_list, new_command_queue, new_descriptor_heap,
    new_fence, CommandAllocator, DescriptorHeapDesc,
};
use super::pipeline::{
    new_input_layout, new_pipeline_state, InputElementDesc, InputLayoutCore, PipelineStateCore,
    PipelineStateDesc,
};
use super::raster::{self, Binding, DrawKind};
use super::resource::{
    check_view, new_resource, new_resource_core, new_view, BufferDesc, Resource, ResourceKind,
    SubresourceData, Texture2dDesc, View, ViewCore, ViewKind,
};
use super::unknown::ComHeader;
use super::{Format, Viewport};
use crate::abi::HResult;
use crate::com::{Guid, IID_IUNKNOWN};
use crate::status::{E_FAIL, E_INVALIDARG, E_NOINTERFACE, E_POINTER, HostError, S_OK};
use std::os::raw::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Device core
// ============================================================================

/// The shared body behind the device objects.
pub struct DeviceCore {
    generation: AtomicU64,
    #[cfg(feature = "gpu")]
    gpu: Option<Mutex<crate::gpu::GpuBackend>>,
}

impl DeviceCore {
    pub(crate) fn new(enable_gpu: bool) -> Arc<Self> {
        #[cfg(feature = "gpu")]
        let gpu = if enable_gpu {
            crate::gpu::GpuBackend::try_new().map(Mutex::new)
        } else {
            None
        };
        #[cfg(not(feature = "gpu"))]
        let _ = enable_gpu;
        Arc::new(Self {
            generation: AtomicU64::new(1),
            #[cfg(feature = "gpu")]
            gpu,
        })
    }

    /// The generation resources must match to use this device.
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidate every outstanding resource back-reference.
    fn retire(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Clear a render target, preferring the GPU backend when it is
    /// available; backend failure falls back to the software path
    /// silently.
    pub(crate) fn clear_render_target(
        &self,
        view: &ViewCore,
        color: [f32; 4],
    ) -> Result<(), HostError> {
        #[cfg(feature = "gpu")]
        if let Some(gpu) = &self.gpu {
            if let Some((width, height, format)) = view.resource.texture_dims() {
                if format.is_color() && view.kind == ViewKind::RenderTarget {
                    let mut backend = gpu.lock().unwrap();
                    match backend.clear_and_read_back(width, height, color) {
                        Ok(rgba) => {
                            let mut data = view.resource.data.lock();
                            if format == Format::R8G8B8A8Unorm {
                                data.copy_from_slice(&rgba);
                            } else {
                                for (dst, src) in
                                    data.chunks_exact_mut(4).zip(rgba.chunks_exact(4))
                                {
                                    dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
                                }
                            }
                            return Ok(());
                        }
                        Err(e) => {
                            log::debug!("[D3D] GPU clear unavailable, software path: {e}");
                        }
                    }
                }
            }
        }
        raster::clear_rtv(view, color)
    }
}

// ============================================================================
// Device object
// ============================================================================

pub const IID_DEVICE: Guid = Guid::new(
    0xD3DE_000A,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0A],
);

pub const IID_DEVICE_CONTEXT: Guid = Guid::new(
    0xD3DE_000B,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0B],
);

/// CLSID for `CoCreateInstance`-based device construction.
pub const CLSID_DEVICE: Guid = Guid::new(
    0xD3DE_00FF,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF],
);

#[repr(C)]
pub struct DeviceVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub create_buffer: unsafe extern "win64" fn(
        *mut c_void,
        *const BufferDesc,
        *const SubresourceData,
        *mut *mut c_void,
    ) -> HResult,
    pub create_texture2d: unsafe extern "win64" fn(
        *mut c_void,
        *const Texture2dDesc,
        *const SubresourceData,
        *mut *mut c_void,
    ) -> HResult,
    pub create_render_target_view:
        unsafe extern "win64" fn(*mut c_void, *mut c_void, *mut *mut c_void) -> HResult,
    pub create_shader_resource_view:
        unsafe extern "win64" fn(*mut c_void, *mut c_void, *mut *mut c_void) -> HResult,
    pub create_depth_stencil_view:
        unsafe extern "win64" fn(*mut c_void, *mut c_void, *mut *mut c_void) -> HResult,
    pub create_constant_buffer_view:
        unsafe extern "win64" fn(*mut c_void, *mut c_void, *mut *mut c_void) -> HResult,
    pub create_input_layout: unsafe extern "win64" fn(
        *mut c_void,
        *const InputElementDesc,
        u32,
        *mut *mut c_void,
    ) -> HResult,
    pub create_pipeline_state:
        unsafe extern "win64" fn(*mut c_void, *const PipelineStateDesc, *mut *mut c_void) -> HResult,
    pub create_command_queue:
        unsafe extern "win64" fn(*mut c_void, *mut *mut c_void) -> HResult,
    pub create_command_allocator:
        unsafe extern "win64" fn(*mut c_void, *mut *mut c_void) -> HResult,
    pub create_command_list:
        unsafe extern "win64" fn(*mut c_void, *mut c_void, *mut *mut c_void) -> HResult,
    pub create_fence: unsafe extern "win64" fn(*mut c_void, u64, *mut *mut c_void) -> HResult,
    pub create_descriptor_heap: unsafe extern "win64" fn(
        *mut c_void,
        *const DescriptorHeapDesc,
        *mut *mut c_void,
    ) -> HResult,
    pub get_immediate_context:
        unsafe extern "win64" fn(*mut c_void, *mut *mut c_void) -> HResult,
}

/// The guest-visible device.
#[repr(C)]
pub struct Device {
    hdr: ComHeader,
    pub(crate) core: Arc<DeviceCore>,
    context: *mut Context,
}

unsafe extern "win64" fn device_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    if iid.is_null() {
        return E_INVALIDARG;
    }
    if *iid == IID_IUNKNOWN || *iid == IID_DEVICE {
        device_addref(this);
        *out = this;
        S_OK
    } else {
        *out = std::ptr::null_mut();
        E_NOINTERFACE
    }
}

unsafe extern "win64" fn device_addref(this: *mut c_void) -> u32 {
    let hdr = &*(this as *const ComHeader);
    hdr.refs.fetch_add(1, Ordering::AcqRel) + 1
}

unsafe extern "win64" fn device_release(this: *mut c_void) -> u32 {
    let hdr = &*(this as *const ComHeader);
    let remaining = hdr.refs.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining == 0 {
        let device = Box::from_raw(this as *mut Device);
        // Resources first, then the device: stale back-references must
        // fail before the core goes away.
        device.core.retire();
        context_release(device.context as *mut c_void);
        log::debug!("[D3D] device destroyed");
    }
    remaining
}

unsafe fn device_of<'a>(this: *mut c_void) -> &'a Device {
    &*(this as *mut Device)
}

unsafe fn out_slot<'a>(out: *mut *mut c_void) -> Result<&'a mut *mut c_void, HResult> {
    if out.is_null() {
        return Err(E_POINTER);
    }
    *out = std::ptr::null_mut();
    Ok(&mut *out)
}

unsafe extern "win64" fn device_create_buffer(
    this: *mut c_void,
    desc: *const BufferDesc,
    initial: *const SubresourceData,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if desc.is_null() {
        return E_INVALIDARG;
    }
    let desc = &*desc;
    if desc.byte_width == 0 {
        return E_INVALIDARG;
    }
    let initial = initial.as_ref().and_then(|sd| {
        (!sd.data.is_null()).then(|| {
            std::slice::from_raw_parts(sd.data as *const u8, desc.byte_width as usize)
        })
    });
    let core = new_resource_core(
        &device_of(this).core,
        ResourceKind::Buffer {
            len: desc.byte_width as usize,
        },
        desc.bind_flags,
        initial,
    );
    *out = new_resource(core) as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_create_texture2d(
    this: *mut c_void,
    desc: *const Texture2dDesc,
    initial: *const SubresourceData,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if desc.is_null() {
        return E_INVALIDARG;
    }
    let desc = &*desc;
    let format = match Format::from_u32(desc.format) {
        Some(f) => f,
        None => return E_INVALIDARG,
    };
    if desc.width == 0 || desc.height == 0 {
        return E_INVALIDARG;
    }
    let byte_len = desc.width as usize * desc.height as usize * format.stride();
    let initial = initial.as_ref().and_then(|sd| {
        (!sd.data.is_null()).then(|| std::slice::from_raw_parts(sd.data as *const u8, byte_len))
    });
    let core = new_resource_core(
        &device_of(this).core,
        ResourceKind::Texture2d {
            width: desc.width,
            height: desc.height,
            format,
        },
        desc.bind_flags,
        initial,
    );
    *out = new_resource(core) as *mut c_void;
    S_OK
}

unsafe fn create_view_common(
    resource: *mut c_void,
    out: *mut *mut c_void,
    kind: ViewKind,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if resource.is_null() {
        return E_INVALIDARG;
    }
    let resource = &*(resource as *mut Resource);
    if !resource.core.device_ok() {
        return E_FAIL;
    }
    if let Err(hr) = check_view(kind, &resource.core) {
        return hr;
    }
    *out = new_view(ViewCore {
        kind,
        resource: resource.core.clone(),
    }) as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_create_rtv(
    _this: *mut c_void,
    resource: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    create_view_common(resource, out, ViewKind::RenderTarget)
}

unsafe extern "win64" fn device_create_srv(
    _this: *mut c_void,
    resource: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    create_view_common(resource, out, ViewKind::ShaderResource)
}

unsafe extern "win64" fn device_create_dsv(
    _this: *mut c_void,
    resource: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    create_view_common(resource, out, ViewKind::DepthStencil)
}

unsafe extern "win64" fn device_create_cbv(
    _this: *mut c_void,
    resource: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    create_view_common(resource, out, ViewKind::ConstantBuffer)
}

unsafe extern "win64" fn device_create_input_layout(
    _this: *mut c_void,
    elements: *const InputElementDesc,
    count: u32,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if elements.is_null() || count == 0 {
        return E_INVALIDARG;
    }
    let descs: Vec<&InputElementDesc> = (0..count as usize)
        .map(|i| &*elements.add(i))
        .collect();
    match InputLayoutCore::from_guest(&descs) {
        Ok(core) => {
            *out = new_input_layout(core) as *mut c_void;
            S_OK
        }
        Err(hr) => hr,
    }
}

unsafe extern "win64" fn device_create_pipeline_state(
    _this: *mut c_void,
    desc: *const PipelineStateDesc,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if desc.is_null() {
        return E_INVALIDARG;
    }
    match PipelineStateCore::from_guest(&*desc) {
        Ok(core) => {
            *out = new_pipeline_state(core) as *mut c_void;
            S_OK
        }
        Err(hr) => hr,
    }
}

unsafe extern "win64" fn device_create_command_queue(
    this: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    *out = new_command_queue(device_of(this).core.clone()) as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_create_command_allocator(
    _this: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    *out = new_command_allocator() as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_create_command_list(
    _this: *mut c_void,
    allocator: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if allocator.is_null() {
        return E_INVALIDARG;
    }
    let _ = allocator as *mut CommandAllocator;
    *out = new_command_list() as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_create_fence(
    _this: *mut c_void,
    initial: u64,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    *out = new_fence(initial) as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_create_descriptor_heap(
    _this: *mut c_void,
    desc: *const DescriptorHeapDesc,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    if desc.is_null() {
        return E_INVALIDARG;
    }
    if (*desc).capacity == 0 {
        return E_INVALIDARG;
    }
    *out = new_descriptor_heap(*desc) as *mut c_void;
    S_OK
}

unsafe extern "win64" fn device_get_immediate_context(
    this: *mut c_void,
    out: *mut *mut c_void,
) -> HResult {
    let out = match out_slot(out) {
        Ok(o) => o,
        Err(hr) => return hr,
    };
    let device = device_of(this);
    context_addref(device.context as *mut c_void);
    *out = device.context as *mut c_void;
    S_OK
}

static DEVICE_VTBL: DeviceVtbl = DeviceVtbl {
    query_interface: device_qi,
    add_ref: device_addref,
    release: device_release,
    create_buffer: device_create_buffer,
    create_texture2d: device_create_texture2d,
    create_render_target_view: device_create_rtv,
    create_shader_resource_view: device_create_srv,
    create_depth_stencil_view: device_create_dsv,
    create_constant_buffer_view: device_create_cbv,
    create_input_layout: device_create_input_layout,
    create_pipeline_state: device_create_pipeline_state,
    create_command_queue: device_create_command_queue,
    create_command_allocator: device_create_command_allocator,
    create_command_list: device_create_command_list,
    create_fence: device_create_fence,
    create_descriptor_heap: device_create_descriptor_heap,
    get_immediate_context: device_get_immediate_context,
};

// ============================================================================
// Immediate context
// ============================================================================

#[repr(C)]
pub struct ContextVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub set_pipeline_state: unsafe extern "win64" fn(*mut c_void, *mut c_void),
    pub set_input_layout: unsafe extern "win64" fn(*mut c_void, *mut c_void),
    pub set_vertex_buffer: unsafe extern "win64" fn(*mut c_void, *mut c_void, u32, u32),
    pub set_index_buffer: unsafe extern "win64" fn(*mut c_void, *mut c_void),
    pub set_constant_buffer: unsafe extern "win64" fn(*mut c_void, *mut c_void),
    pub set_render_targets: unsafe extern "win64" fn(*mut c_void, *mut c_void, *mut c_void),
    pub set_viewport: unsafe extern "win64" fn(*mut c_void, *const Viewport),
    pub set_scissor: unsafe extern "win64" fn(*mut c_void, i32, i32, i32, i32),
    pub clear_render_target_view: unsafe extern "win64" fn(*mut c_void, *mut c_void, *const f32),
    pub clear_depth_stencil_view: unsafe extern "win64" fn(*mut c_void, *mut c_void, f32),
    pub draw: unsafe extern "win64" fn(*mut c_void, u32, u32),
    pub draw_indexed: unsafe extern "win64" fn(*mut c_void, u32, u32, i32),
    pub flush: unsafe extern "win64" fn(*mut c_void),
}

/// The immediate context: the same binding surface as a command list,
/// executed on the spot.
#[repr(C)]
pub struct Context {
    hdr: ComHeader,
    device: Arc<DeviceCore>,
    binding: Mutex<Binding>,
}

unsafe extern "win64" fn context_qi(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    if iid.is_null() {
        return E_INVALIDARG;
    }
    if *iid == IID_IUNKNOWN || *iid == IID_DEVICE_CONTEXT {
        context_addref(this);
        *out = this;
        S_OK
    } else {
        *out = std::ptr::null_mut();
        E_NOINTERFACE
    }
}

unsafe extern "win64" fn context_addref(this: *mut c_void) -> u32 {
    let hdr = &*(this as *const ComHeader);
    hdr.refs.fetch_add(1, Ordering::AcqRel) + 1
}

unsafe extern "win64" fn context_release(this: *mut c_void) -> u32 {
    let hdr = &*(this as *const ComHeader);
    let remaining = hdr.refs.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining == 0 {
        drop(Box::from_raw(this as *mut Context));
    }
    remaining
}

unsafe fn context_binding<'a>(this: *mut c_void) -> std::sync::MutexGuard<'a, Binding> {
    (*(this as *mut Context)).binding.lock().unwrap()
}

unsafe extern "win64" fn ctx_set_pipeline_state(this: *mut c_void, pso: *mut c_void) {
    bindops::set_pipeline_state(&mut context_binding(this), pso);
}

unsafe extern "win64" fn ctx_set_input_layout(this: *mut c_void, layout: *mut c_void) {
    bindops::set_input_layout(&mut context_binding(this), layout);
}

unsafe extern "win64" fn ctx_set_vertex_buffer(
    this: *mut c_void,
    resource: *mut c_void,
    stride: u32,
    offset: u32,
) {
    bindops::set_vertex_buffer(&mut context_binding(this), resource, stride, offset);
}

unsafe extern "win64" fn ctx_set_index_buffer(this: *mut c_void, resource: *mut c_void) {
    bindops::set_index_buffer(&mut context_binding(this), resource);
}

unsafe extern "win64" fn ctx_set_constant_buffer(this: *mut c_void, resource: *mut c_void) {
    bindops::set_constant_buffer(&mut context_binding(this), resource);
}

unsafe extern "win64" fn ctx_set_render_targets(
    this: *mut c_void,
    rtv: *mut c_void,
    dsv: *mut c_void,
) {
    bindops::set_render_targets(&mut context_binding(this), rtv, dsv);
}

unsafe extern "win64" fn ctx_set_viewport(this: *mut c_void, viewport: *const Viewport) {
    bindops::set_viewport(&mut context_binding(this), viewport);
}

unsafe extern "win64" fn ctx_set_scissor(
    this: *mut c_void,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
) {
    bindops::set_scissor(&mut context_binding(this), left, top, right, bottom);
}

unsafe extern "win64" fn ctx_clear_rtv(this: *mut c_void, rtv: *mut c_void, color: *const f32) {
    if rtv.is_null() || color.is_null() {
        return;
    }
    let context = &*(this as *mut Context);
    let color = std::slice::from_raw_parts(color, 4);
    let view = (*(rtv as *mut View)).core.clone();
    if let Err(e) = context
        .device
        .clear_render_target(&view, [color[0], color[1], color[2], color[3]])
    {
        log::warn!("[D3D] clear failed: {e}");
    }
}

unsafe extern "win64" fn ctx_clear_dsv(this: *mut c_void, dsv: *mut c_void, depth: f32) {
    if dsv.is_null() {
        return;
    }
    let _ = this;
    let view = (*(dsv as *mut View)).core.clone();
    if let Err(e) = raster::clear_dsv(&view, depth) {
        log::warn!("[D3D] depth clear failed: {e}");
    }
}

unsafe extern "win64" fn ctx_draw(this: *mut c_void, vertex_count: u32, start_vertex: u32) {
    let binding = context_binding(this).clone();
    if let Err(e) = raster::draw(
        &binding,
        DrawKind::Linear {
            vertex_count,
            start_vertex,
        },
    ) {
        log::warn!("[D3D] draw failed: {e}");
    }
}

unsafe extern "win64" fn ctx_draw_indexed(
    this: *mut c_void,
    index_count: u32,
    start_index: u32,
    base_vertex: i32,
) {
    let binding = context_binding(this).clone();
    if let Err(e) = raster::draw(
        &binding,
        DrawKind::Indexed {
            index_count,
            start_index,
            base_vertex,
        },
    ) {
        log::warn!("[D3D] indexed draw failed: {e}");
    }
}

unsafe extern "win64" fn ctx_flush(_this: *mut c_void) {
    // Immediate execution leaves nothing to flush.
}

static CONTEXT_VTBL: ContextVtbl = ContextVtbl {
    query_interface: context_qi,
    add_ref: context_addref,
    release: context_release,
    set_pipeline_state: ctx_set_pipeline_state,
    set_input_layout: ctx_set_input_layout,
    set_vertex_buffer: ctx_set_vertex_buffer,
    set_index_buffer: ctx_set_index_buffer,
    set_constant_buffer: ctx_set_constant_buffer,
    set_render_targets: ctx_set_render_targets,
    set_viewport: ctx_set_viewport,
    set_scissor: ctx_set_scissor,
    clear_render_target_view: ctx_clear_rtv,
    clear_depth_stencil_view: ctx_clear_dsv,
    draw: ctx_draw,
    draw_indexed: ctx_draw_indexed,
    flush: ctx_flush,
};

// ============================================================================
// Creation entry points
// ============================================================================

fn gpu_enabled() -> bool {
    match std::env::var("WINHOST_GPU") {
        Ok(v) => !matches!(v.as_str(), "0" | "off" | "false"),
        Err(_) => true,
    }
}

unsafe fn make_device() -> *mut Device {
    let core = DeviceCore::new(gpu_enabled());
    let context = Box::into_raw(Box::new(Context {
        hdr: ComHeader::new(&CONTEXT_VTBL as *const ContextVtbl as *const c_void),
        device: core.clone(),
        binding: Mutex::new(Binding::default()),
    }));
    Box::into_raw(Box::new(Device {
        hdr: ComHeader::new(&DEVICE_VTBL as *const DeviceVtbl as *const c_void),
        core,
        context,
    }))
}

/// D3D11CreateDevice - create a device and its immediate context.
pub unsafe extern "win64" fn D3D11CreateDevice(
    _adapter: *mut c_void,
    _driver_type: u32,
    _flags: u32,
    out_device: *mut *mut c_void,
    out_context: *mut *mut c_void,
) -> HResult {
    if out_device.is_null() {
        return E_POINTER;
    }
    let device = make_device();
    *out_device = device as *mut c_void;
    if !out_context.is_null() {
        device_get_immediate_context(device as *mut c_void, out_context);
    }
    log::info!("[D3D] device created");
    S_OK
}

/// D3D12CreateDevice - the queue/list flavoured entry point over the
/// same device.
pub unsafe extern "win64" fn D3D12CreateDevice(
    _adapter: *mut c_void,
    _minimum_feature_level: u32,
    out_device: *mut *mut c_void,
) -> HResult {
    if out_device.is_null() {
        return E_POINTER;
    }
    *out_device = make_device() as *mut c_void;
    log::info!("[D3D] device created (queue surface)");
    S_OK
}

/// Factory for the class registry.
pub(crate) unsafe fn device_class_factory(riid: &Guid, out: *mut *mut c_void) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    let device = make_device();
    let hr = device_qi(device as *mut c_void, riid, out);
    if hr != S_OK {
        device_release(device as *mut c_void);
    }
    hr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d3d::command;
    use crate::d3d::{unpack_color, BIND_RENDER_TARGET};
    use std::ptr;

    unsafe fn vcall_device(dev: *mut c_void) -> &'static DeviceVtbl {
        &*(*(dev as *mut *const DeviceVtbl))
    }

    unsafe fn vcall_queue(q: *mut c_void) -> &'static command::CommandQueueVtbl {
        &*(*(q as *mut *const command::CommandQueueVtbl))
    }

    unsafe fn vcall_list(l: *mut c_void) -> &'static command::CommandListVtbl {
        &*(*(l as *mut *const command::CommandListVtbl))
    }

    unsafe fn vcall_fence(f: *mut c_void) -> &'static command::FenceVtbl {
        &*(*(f as *mut *const command::FenceVtbl))
    }

    unsafe fn vcall_resource(r: *mut c_void) -> &'static super::super::resource::ResourceVtbl {
        &*(*(r as *mut *const super::super::resource::ResourceVtbl))
    }

    #[test]
    fn test_clear_submit_readback_center_pixel() {
        unsafe {
            // The full queue-flavoured path: device, target, recorded
            // clear, ordered submission, fence synchronization, map.
            std::env::set_var("WINHOST_GPU", "0");
            let mut dev_ptr: *mut c_void = ptr::null_mut();
            assert_eq!(D3D12CreateDevice(ptr::null_mut(), 0, &mut dev_ptr), S_OK);
            let dv = vcall_device(dev_ptr);

            let desc = Texture2dDesc {
                width: 64,
                height: 64,
                format: Format::R8G8B8A8Unorm as u32,
                bind_flags: BIND_RENDER_TARGET,
            };
            let mut tex: *mut c_void = ptr::null_mut();
            assert_eq!(
                (dv.create_texture2d)(dev_ptr, &desc, ptr::null(), &mut tex),
                S_OK
            );
            let mut rtv: *mut c_void = ptr::null_mut();
            assert_eq!((dv.create_render_target_view)(dev_ptr, tex, &mut rtv), S_OK);

            let mut queue: *mut c_void = ptr::null_mut();
            assert_eq!((dv.create_command_queue)(dev_ptr, &mut queue), S_OK);
            let mut alloc: *mut c_void = ptr::null_mut();
            assert_eq!((dv.create_command_allocator)(dev_ptr, &mut alloc), S_OK);
            let mut list: *mut c_void = ptr::null_mut();
            assert_eq!((dv.create_command_list)(dev_ptr, alloc, &mut list), S_OK);

            let red = [1.0f32, 0.0, 0.0, 1.0];
            let lv = vcall_list(list);
            (lv.clear_render_target_view)(list, rtv, red.as_ptr());
            assert_eq!((lv.close)(list), S_OK);

            let qv = vcall_queue(queue);
            assert_eq!((qv.execute_command_lists)(queue, 1, &list), S_OK);

            let mut fence: *mut c_void = ptr::null_mut();
            assert_eq!((dv.create_fence)(dev_ptr, 0, &mut fence), S_OK);
            let fv = vcall_fence(fence);
            assert_eq!((qv.signal)(queue, fence, 1), S_OK);
            assert_eq!((fv.wait)(fence, 1), S_OK);
            assert_eq!((fv.get_completed_value)(fence), 1);

            let rv = vcall_resource(tex);
            let mut mapped: *mut c_void = ptr::null_mut();
            assert_eq!((rv.map)(tex, &mut mapped), S_OK);
            let pixels = std::slice::from_raw_parts(mapped as *const u8, 64 * 64 * 4);
            let center = (32 * 64 + 32) * 4;
            let rgba = unpack_color(
                Format::R8G8B8A8Unorm,
                [
                    pixels[center],
                    pixels[center + 1],
                    pixels[center + 2],
                    pixels[center + 3],
                ],
            );
            assert_eq!(rgba, [1.0, 0.0, 0.0, 1.0]);
            (rv.unmap)(tex);

            crate::com::com_release(fence);
            crate::com::com_release(list);
            crate::com::com_release(alloc);
            crate::com::com_release(queue);
            crate::com::com_release(rtv);
            crate::com::com_release(tex);
            crate::com::com_release(dev_ptr);
        }
    }

    #[test]
    fn test_executing_open_list_fails() {
        unsafe {
            std::env::set_var("WINHOST_GPU", "0");
            let mut dev_ptr: *mut c_void = ptr::null_mut();
            D3D12CreateDevice(ptr::null_mut(), 0, &mut dev_ptr);
            let dv = vcall_device(dev_ptr);
            let mut queue: *mut c_void = ptr::null_mut();
            (dv.create_command_queue)(dev_ptr, &mut queue);
            let mut alloc: *mut c_void = ptr::null_mut();
            (dv.create_command_allocator)(dev_ptr, &mut alloc);
            let mut list: *mut c_void = ptr::null_mut();
            (dv.create_command_list)(dev_ptr, alloc, &mut list);

            let qv = vcall_queue(queue);
            assert_eq!((qv.execute_command_lists)(queue, 1, &list), E_FAIL);

            crate::com::com_release(list);
            crate::com::com_release(alloc);
            crate::com::com_release(queue);
            crate::com::com_release(dev_ptr);
        }
    }

    #[test]
    fn test_resources_fail_after_device_release() {
        unsafe {
            std::env::set_var("WINHOST_GPU", "0");
            let mut dev_ptr: *mut c_void = ptr::null_mut();
            D3D12CreateDevice(ptr::null_mut(), 0, &mut dev_ptr);
            let dv = vcall_device(dev_ptr);
            let desc = Texture2dDesc {
                width: 4,
                height: 4,
                format: Format::R8G8B8A8Unorm as u32,
                bind_flags: BIND_RENDER_TARGET,
            };
            let mut tex: *mut c_void = ptr::null_mut();
            (dv.create_texture2d)(dev_ptr, &desc, ptr::null(), &mut tex);

            // Release the device while the resource lives on.
            crate::com::com_release(dev_ptr);

            let rv = vcall_resource(tex);
            let mut mapped: *mut c_void = ptr::null_mut();
            assert_eq!((rv.map)(tex, &mut mapped), E_FAIL);
            crate::com::com_release(tex);
        }
    }

    #[test]
    fn test_view_requires_matching_bind_flags() {
        unsafe {
            std::env::set_var("WINHOST_GPU", "0");
            let mut dev_ptr: *mut c_void = ptr::null_mut();
            D3D12CreateDevice(ptr::null_mut(), 0, &mut dev_ptr);
            let dv = vcall_device(dev_ptr);
            let desc = Texture2dDesc {
                width: 4,
                height: 4,
                format: Format::R8G8B8A8Unorm as u32,
                bind_flags: 0,
            };
            let mut tex: *mut c_void = ptr::null_mut();
            (dv.create_texture2d)(dev_ptr, &desc, ptr::null(), &mut tex);
            let mut rtv: *mut c_void = ptr::null_mut();
            assert_eq!(
                (dv.create_render_target_view)(dev_ptr, tex, &mut rtv),
                E_INVALIDARG
            );
            crate::com::com_release(tex);
            crate::com::com_release(dev_ptr);
        }
    }
}
