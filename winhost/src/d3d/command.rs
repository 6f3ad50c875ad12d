//! Command Recording and Submission
//!
//! Command lists are single-producer: state setters mutate the list's
//! current binding, and each draw captures that binding by value. A
//! queue executes closed lists in submission order under its own lock;
//! execution completes synchronously before `ExecuteCommandLists`
//! returns. Fences carry a monotonically increasing completed value and
//! can signal kernel events.

use super::device::DeviceCore;
use super::pipeline::{InputLayout, PipelineState};
use super::raster::{self, Binding, DrawKind};
use super::resource::{Resource, View};
use super::unknown::{impl_com_unknown, ComHeader};
use super::Viewport;
use crate::abi::{Handle, HResult};
use crate::com::Guid;
use crate::status::{E_FAIL, E_INVALIDARG, E_POINTER, S_OK};
use std::os::raw::c_void;
use std::sync::{Arc, Condvar, Mutex, Weak};

// ============================================================================
// Recorded commands
// ============================================================================

/// One recorded operation. Draws capture the whole binding by value.
pub(crate) enum Cmd {
    ClearRtv { view: Weak<super::resource::ViewCore>, color: [f32; 4] },
    ClearDsv { view: Weak<super::resource::ViewCore>, depth: f32 },
    Draw { binding: Binding, kind: DrawKind },
}

/// Replay a command stream. Clears route through the device so the GPU
/// backend can take them; draws run the software rasterizer.
pub(crate) fn execute_cmds(device: &Arc<DeviceCore>, cmds: &[Cmd]) -> HResult {
    for cmd in cmds {
        let result = match cmd {
            Cmd::ClearRtv { view, color } => match view.upgrade() {
                Some(view) => device.clear_render_target(&view, *color),
                None => Ok(()),
            },
            Cmd::ClearDsv { view, depth } => match view.upgrade() {
                Some(view) => raster::clear_dsv(&view, *depth),
                None => Ok(()),
            },
            Cmd::Draw { binding, kind } => raster::draw(binding, *kind),
        };
        if let Err(e) = result {
            log::warn!("[D3D] command execution failed: {e}");
            return E_FAIL;
        }
    }
    S_OK
}

// ============================================================================
// Command allocator
// ============================================================================

pub const IID_COMMAND_ALLOCATOR: Guid = Guid::new(
    0xD3DE_0005,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05],
);

#[repr(C)]
pub struct CommandAllocatorVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub reset: unsafe extern "win64" fn(*mut c_void) -> HResult,
}

/// Backing storage marker for recorded lists.
#[repr(C)]
pub struct CommandAllocator {
    hdr: ComHeader,
}

impl_com_unknown!(
    CommandAllocator,
    IID_COMMAND_ALLOCATOR,
    alloc_qi,
    alloc_addref,
    alloc_release
);

unsafe extern "win64" fn alloc_reset(_this: *mut c_void) -> HResult {
    S_OK
}

static ALLOCATOR_VTBL: CommandAllocatorVtbl = CommandAllocatorVtbl {
    query_interface: alloc_qi,
    add_ref: alloc_addref,
    release: alloc_release,
    reset: alloc_reset,
};

pub(crate) fn new_command_allocator() -> *mut CommandAllocator {
    Box::into_raw(Box::new(CommandAllocator {
        hdr: ComHeader::new(&ALLOCATOR_VTBL as *const CommandAllocatorVtbl as *const c_void),
    }))
}

// ============================================================================
// Command list
// ============================================================================

pub const IID_COMMAND_LIST: Guid = Guid::new(
    0xD3DE_0006,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x06],
);

pub(crate) struct ListState {
    pub binding: Binding,
    pub cmds: Vec<Cmd>,
    pub open: bool,
}

/// Shared state setters for command lists and the immediate context.
pub(crate) mod bindops {
    use super::*;

    pub unsafe fn set_pipeline_state(binding: &mut Binding, pso: *mut c_void) {
        binding.pso = (!pso.is_null()).then(|| (*(pso as *mut PipelineState)).core.clone());
    }

    pub unsafe fn set_input_layout(binding: &mut Binding, layout: *mut c_void) {
        binding.layout = (!layout.is_null()).then(|| (*(layout as *mut InputLayout)).core.clone());
    }

    pub unsafe fn set_vertex_buffer(
        binding: &mut Binding,
        resource: *mut c_void,
        stride: u32,
        offset: u32,
    ) {
        binding.vertex = (!resource.is_null()).then(|| {
            (
                Arc::downgrade(&(*(resource as *mut Resource)).core),
                stride,
                offset,
            )
        });
    }

    pub unsafe fn set_index_buffer(binding: &mut Binding, resource: *mut c_void) {
        binding.index =
            (!resource.is_null()).then(|| Arc::downgrade(&(*(resource as *mut Resource)).core));
    }

    pub unsafe fn set_constant_buffer(binding: &mut Binding, resource: *mut c_void) {
        binding.constants =
            (!resource.is_null()).then(|| Arc::downgrade(&(*(resource as *mut Resource)).core));
    }

    pub unsafe fn set_render_targets(binding: &mut Binding, rtv: *mut c_void, dsv: *mut c_void) {
        binding.rtv = (!rtv.is_null()).then(|| Arc::downgrade(&(*(rtv as *mut View)).core));
        binding.dsv = (!dsv.is_null()).then(|| Arc::downgrade(&(*(dsv as *mut View)).core));
    }

    pub unsafe fn set_viewport(binding: &mut Binding, viewport: *const Viewport) {
        if !viewport.is_null() {
            binding.viewport = *viewport;
        }
    }

    pub fn set_scissor(binding: &mut Binding, left: i32, top: i32, right: i32, bottom: i32) {
        binding.scissor = Some([left, top, right, bottom]);
    }
}

#[repr(C)]
pub struct CommandListVtbl {
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
    pub clear_render_target_view:
        unsafe extern "win64" fn(*mut c_void, *mut c_void, *const f32),
    pub clear_depth_stencil_view: unsafe extern "win64" fn(*mut c_void, *mut c_void, f32),
    pub draw: unsafe extern "win64" fn(*mut c_void, u32, u32),
    pub draw_indexed: unsafe extern "win64" fn(*mut c_void, u32, u32, i32),
    pub close: unsafe extern "win64" fn(*mut c_void) -> HResult,
    pub reset: unsafe extern "win64" fn(*mut c_void, *mut c_void) -> HResult,
}

/// A recorded command list.
#[repr(C)]
pub struct CommandList {
    hdr: ComHeader,
    pub(crate) state: Mutex<ListState>,
}

impl_com_unknown!(CommandList, IID_COMMAND_LIST, list_qi, list_addref, list_release);

unsafe fn list_state<'a>(this: *mut c_void) -> std::sync::MutexGuard<'a, ListState> {
    (*(this as *mut CommandList)).state.lock().unwrap()
}

unsafe extern "win64" fn list_set_pipeline_state(this: *mut c_void, pso: *mut c_void) {
    bindops::set_pipeline_state(&mut list_state(this).binding, pso);
}

unsafe extern "win64" fn list_set_input_layout(this: *mut c_void, layout: *mut c_void) {
    bindops::set_input_layout(&mut list_state(this).binding, layout);
}

unsafe extern "win64" fn list_set_vertex_buffer(
    this: *mut c_void,
    resource: *mut c_void,
    stride: u32,
    offset: u32,
) {
    bindops::set_vertex_buffer(&mut list_state(this).binding, resource, stride, offset);
}

unsafe extern "win64" fn list_set_index_buffer(this: *mut c_void, resource: *mut c_void) {
    bindops::set_index_buffer(&mut list_state(this).binding, resource);
}

unsafe extern "win64" fn list_set_constant_buffer(this: *mut c_void, resource: *mut c_void) {
    bindops::set_constant_buffer(&mut list_state(this).binding, resource);
}

unsafe extern "win64" fn list_set_render_targets(
    this: *mut c_void,
    rtv: *mut c_void,
    dsv: *mut c_void,
) {
    bindops::set_render_targets(&mut list_state(this).binding, rtv, dsv);
}

unsafe extern "win64" fn list_set_viewport(this: *mut c_void, viewport: *const Viewport) {
    bindops::set_viewport(&mut list_state(this).binding, viewport);
}

unsafe extern "win64" fn list_set_scissor(
    this: *mut c_void,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
) {
    bindops::set_scissor(&mut list_state(this).binding, left, top, right, bottom);
}

unsafe extern "win64" fn list_clear_rtv(this: *mut c_void, rtv: *mut c_void, color: *const f32) {
    if rtv.is_null() || color.is_null() {
        return;
    }
    let mut state = list_state(this);
    if !state.open {
        return;
    }
    let color = std::slice::from_raw_parts(color, 4);
    state.cmds.push(Cmd::ClearRtv {
        view: Arc::downgrade(&(*(rtv as *mut View)).core),
        color: [color[0], color[1], color[2], color[3]],
    });
}

unsafe extern "win64" fn list_clear_dsv(this: *mut c_void, dsv: *mut c_void, depth: f32) {
    if dsv.is_null() {
        return;
    }
    let mut state = list_state(this);
    if !state.open {
        return;
    }
    state.cmds.push(Cmd::ClearDsv {
        view: Arc::downgrade(&(*(dsv as *mut View)).core),
        depth,
    });
}

unsafe extern "win64" fn list_draw(this: *mut c_void, vertex_count: u32, start_vertex: u32) {
    let mut state = list_state(this);
    if !state.open {
        return;
    }
    let binding = state.binding.clone();
    state.cmds.push(Cmd::Draw {
        binding,
        kind: DrawKind::Linear {
            vertex_count,
            start_vertex,
        },
    });
}

unsafe extern "win64" fn list_draw_indexed(
    this: *mut c_void,
    index_count: u32,
    start_index: u32,
    base_vertex: i32,
) {
    let mut state = list_state(this);
    if !state.open {
        return;
    }
    let binding = state.binding.clone();
    state.cmds.push(Cmd::Draw {
        binding,
        kind: DrawKind::Indexed {
            index_count,
            start_index,
            base_vertex,
        },
    });
}

unsafe extern "win64" fn list_close(this: *mut c_void) -> HResult {
    let mut state = list_state(this);
    if !state.open {
        return E_FAIL;
    }
    state.open = false;
    S_OK
}

unsafe extern "win64" fn list_reset(this: *mut c_void, allocator: *mut c_void) -> HResult {
    if allocator.is_null() {
        return E_INVALIDARG;
    }
    let mut state = list_state(this);
    state.cmds.clear();
    state.binding = Binding::default();
    state.open = true;
    S_OK
}

static LIST_VTBL: CommandListVtbl = CommandListVtbl {
    query_interface: list_qi,
    add_ref: list_addref,
    release: list_release,
    set_pipeline_state: list_set_pipeline_state,
    set_input_layout: list_set_input_layout,
    set_vertex_buffer: list_set_vertex_buffer,
    set_index_buffer: list_set_index_buffer,
    set_constant_buffer: list_set_constant_buffer,
    set_render_targets: list_set_render_targets,
    set_viewport: list_set_viewport,
    set_scissor: list_set_scissor,
    clear_render_target_view: list_clear_rtv,
    clear_depth_stencil_view: list_clear_dsv,
    draw: list_draw,
    draw_indexed: list_draw_indexed,
    close: list_close,
    reset: list_reset,
};

pub(crate) fn new_command_list() -> *mut CommandList {
    Box::into_raw(Box::new(CommandList {
        hdr: ComHeader::new(&LIST_VTBL as *const CommandListVtbl as *const c_void),
        state: Mutex::new(ListState {
            binding: Binding::default(),
            cmds: Vec::new(),
            open: true,
        }),
    }))
}

// ============================================================================
// Fence
// ============================================================================

pub const IID_FENCE: Guid = Guid::new(
    0xD3DE_0007,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07],
);

#[repr(C)]
pub struct FenceVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub get_completed_value: unsafe extern "win64" fn(*mut c_void) -> u64,
    pub set_event_on_completion: unsafe extern "win64" fn(*mut c_void, u64, Handle) -> HResult,
    pub wait: unsafe extern "win64" fn(*mut c_void, u64) -> HResult,
}

struct FenceState {
    completed: u64,
    // (target value, event to set when reached)
    pending: Vec<(u64, Handle)>,
}

/// A timeline fence.
#[repr(C)]
pub struct Fence {
    hdr: ComHeader,
    state: Mutex<FenceState>,
    cond: Condvar,
}

impl_com_unknown!(Fence, IID_FENCE, fence_qi, fence_addref, fence_release);

impl Fence {
    /// Advance the completed value and fire whatever it satisfies.
    pub(crate) fn signal(&self, value: u64) {
        let mut state = self.state.lock().unwrap();
        if value > state.completed {
            state.completed = value;
        }
        let reached = state.completed;
        let mut fired = Vec::new();
        state.pending.retain(|&(target, event)| {
            if target <= reached {
                fired.push(event);
                false
            } else {
                true
            }
        });
        drop(state);
        self.cond.notify_all();
        for event in fired {
            unsafe {
                crate::ke::event::SetEvent(event);
            }
        }
    }
}

unsafe extern "win64" fn fence_completed(this: *mut c_void) -> u64 {
    let fence = &*(this as *mut Fence);
    fence.state.lock().unwrap().completed
}

unsafe extern "win64" fn fence_set_event(this: *mut c_void, value: u64, event: Handle) -> HResult {
    let fence = &*(this as *mut Fence);
    let mut state = fence.state.lock().unwrap();
    if state.completed >= value {
        drop(state);
        crate::ke::event::SetEvent(event);
    } else {
        state.pending.push((value, event));
    }
    S_OK
}

unsafe extern "win64" fn fence_wait(this: *mut c_void, value: u64) -> HResult {
    let fence = &*(this as *mut Fence);
    let mut state = fence.state.lock().unwrap();
    while state.completed < value {
        state = fence.cond.wait(state).unwrap();
    }
    S_OK
}

static FENCE_VTBL: FenceVtbl = FenceVtbl {
    query_interface: fence_qi,
    add_ref: fence_addref,
    release: fence_release,
    get_completed_value: fence_completed,
    set_event_on_completion: fence_set_event,
    wait: fence_wait,
};

pub(crate) fn new_fence(initial: u64) -> *mut Fence {
    Box::into_raw(Box::new(Fence {
        hdr: ComHeader::new(&FENCE_VTBL as *const FenceVtbl as *const c_void),
        state: Mutex::new(FenceState {
            completed: initial,
            pending: Vec::new(),
        }),
        cond: Condvar::new(),
    }))
}

// ============================================================================
// Command queue
// ============================================================================

pub const IID_COMMAND_QUEUE: Guid = Guid::new(
    0xD3DE_0008,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08],
);

#[repr(C)]
pub struct CommandQueueVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub execute_command_lists: unsafe extern "win64" fn(*mut c_void, u32, *const *mut c_void) -> HResult,
    pub signal: unsafe extern "win64" fn(*mut c_void, *mut c_void, u64) -> HResult,
}

/// A submission queue. Submission is ordered by the queue lock and
/// completes synchronously.
#[repr(C)]
pub struct CommandQueue {
    hdr: ComHeader,
    device: Arc<DeviceCore>,
    submit: Mutex<u64>,
}

impl_com_unknown!(CommandQueue, IID_COMMAND_QUEUE, queue_qi, queue_addref, queue_release);

unsafe extern "win64" fn queue_execute(
    this: *mut c_void,
    count: u32,
    lists: *const *mut c_void,
) -> HResult {
    if count != 0 && lists.is_null() {
        return E_POINTER;
    }
    let queue = &*(this as *mut CommandQueue);
    let mut submissions = queue.submit.lock().unwrap();
    for i in 0..count as usize {
        let list_ptr = *lists.add(i);
        if list_ptr.is_null() {
            return E_INVALIDARG;
        }
        let list = &*(list_ptr as *mut CommandList);
        let state = list.state.lock().unwrap();
        if state.open {
            return E_FAIL;
        }
        let hr = execute_cmds(&queue.device, &state.cmds);
        if hr != S_OK {
            return hr;
        }
    }
    *submissions += 1;
    S_OK
}

unsafe extern "win64" fn queue_signal(this: *mut c_void, fence: *mut c_void, value: u64) -> HResult {
    if fence.is_null() {
        return E_POINTER;
    }
    let queue = &*(this as *mut CommandQueue);
    // All prior submissions completed synchronously; the fence advances
    // immediately.
    let _ordered = queue.submit.lock().unwrap();
    (*(fence as *mut Fence)).signal(value);
    S_OK
}

static QUEUE_VTBL: CommandQueueVtbl = CommandQueueVtbl {
    query_interface: queue_qi,
    add_ref: queue_addref,
    release: queue_release,
    execute_command_lists: queue_execute,
    signal: queue_signal,
};

pub(crate) fn new_command_queue(device: Arc<DeviceCore>) -> *mut CommandQueue {
    Box::into_raw(Box::new(CommandQueue {
        hdr: ComHeader::new(&QUEUE_VTBL as *const CommandQueueVtbl as *const c_void),
        device,
        submit: Mutex::new(0),
    }))
}

// ============================================================================
// Descriptor heap
// ============================================================================

pub const IID_DESCRIPTOR_HEAP: Guid = Guid::new(
    0xD3DE_0009,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09],
);

/// Descriptor heap creation descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DescriptorHeapDesc {
    pub heap_type: u32,
    pub capacity: u32,
}

#[repr(C)]
pub struct DescriptorHeapVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub get_desc: unsafe extern "win64" fn(*mut c_void, *mut DescriptorHeapDesc) -> HResult,
}

/// Bookkeeping for a block of descriptors.
#[repr(C)]
pub struct DescriptorHeap {
    hdr: ComHeader,
    desc: DescriptorHeapDesc,
}

impl_com_unknown!(
    DescriptorHeap,
    IID_DESCRIPTOR_HEAP,
    heap_qi,
    heap_addref,
    heap_release
);

unsafe extern "win64" fn heap_get_desc(this: *mut c_void, out: *mut DescriptorHeapDesc) -> HResult {
    if out.is_null() {
        return E_POINTER;
    }
    *out = (*(this as *mut DescriptorHeap)).desc;
    S_OK
}

static HEAP_VTBL: DescriptorHeapVtbl = DescriptorHeapVtbl {
    query_interface: heap_qi,
    add_ref: heap_addref,
    release: heap_release,
    get_desc: heap_get_desc,
};

pub(crate) fn new_descriptor_heap(desc: DescriptorHeapDesc) -> *mut DescriptorHeap {
    Box::into_raw(Box::new(DescriptorHeap {
        hdr: ComHeader::new(&HEAP_VTBL as *const DescriptorHeapVtbl as *const c_void),
        desc,
    }))
}
