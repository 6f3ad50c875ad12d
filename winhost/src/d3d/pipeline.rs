//! Input Layouts and Pipeline State
//!
//! An input element names a semantic, a format, an offset and an input
//! slot; the rasterizer binds fixed-function meaning from the semantic
//! name and ignores semantics it does not know. Pipeline state is
//! immutable after creation.

use super::unknown::{impl_com_unknown, ComHeader};
use super::{CompareFunc, CullMode, Format};
use crate::abi::{Bool, HResult};
use crate::com::Guid;
use crate::status::E_INVALIDARG;
use std::os::raw::{c_char, c_void};
use std::sync::Arc;

// ============================================================================
// Input layout
// ============================================================================

/// Fixed-function attribute roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    Position,
    Color,
    TexCoord,
}

impl Semantic {
    /// Bind a semantic name; unknown names are ignored by the
    /// rasterizer.
    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("POSITION") {
            Some(Semantic::Position)
        } else if name.eq_ignore_ascii_case("COLOR") {
            Some(Semantic::Color)
        } else if name.eq_ignore_ascii_case("TEXCOORD") {
            Some(Semantic::TexCoord)
        } else {
            None
        }
    }
}

/// Guest-side input element descriptor.
#[repr(C)]
pub struct InputElementDesc {
    pub semantic_name: *const c_char,
    pub semantic_index: u32,
    pub format: u32,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
}

/// One bound element after validation.
#[derive(Debug, Clone)]
pub struct InputElement {
    pub semantic: Option<Semantic>,
    pub format: Format,
    pub offset: usize,
    pub slot: u32,
}

/// The validated layout shared by bindings.
pub struct InputLayoutCore {
    pub elements: Vec<InputElement>,
}

impl InputLayoutCore {
    pub(crate) fn from_guest(descs: &[&InputElementDesc]) -> Result<Self, HResult> {
        let mut elements = Vec::with_capacity(descs.len());
        for desc in descs {
            let format = Format::from_u32(desc.format).ok_or(E_INVALIDARG)?;
            let semantic = unsafe { crate::abi::cstr_arg(desc.semantic_name) }
                .and_then(Semantic::parse);
            elements.push(InputElement {
                semantic,
                format,
                offset: desc.aligned_byte_offset as usize,
                slot: desc.input_slot,
            });
        }
        Ok(Self { elements })
    }

    /// The element bound to a semantic, if any.
    pub fn find(&self, semantic: Semantic) -> Option<&InputElement> {
        self.elements
            .iter()
            .find(|e| e.semantic == Some(semantic))
    }
}

// ============================================================================
// Pipeline state
// ============================================================================

/// Guest-side pipeline state descriptor.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PipelineStateDesc {
    pub depth_enable: Bool,
    pub depth_write: Bool,
    pub depth_func: u32,
    pub cull_mode: u32,
    pub front_counter_clockwise: Bool,
    pub perspective_correct: Bool,
}

/// Immutable pipeline state.
pub struct PipelineStateCore {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub cull_mode: CullMode,
    pub front_ccw: bool,
    pub perspective_correct: bool,
}

impl Default for PipelineStateCore {
    fn default() -> Self {
        Self {
            depth_enable: false,
            depth_write: true,
            depth_func: CompareFunc::Less,
            cull_mode: CullMode::None,
            front_ccw: false,
            perspective_correct: true,
        }
    }
}

impl PipelineStateCore {
    pub(crate) fn from_guest(desc: &PipelineStateDesc) -> Result<Self, HResult> {
        Ok(Self {
            depth_enable: desc.depth_enable != 0,
            depth_write: desc.depth_write != 0,
            depth_func: CompareFunc::from_u32(desc.depth_func).ok_or(E_INVALIDARG)?,
            cull_mode: CullMode::from_u32(desc.cull_mode).ok_or(E_INVALIDARG)?,
            front_ccw: desc.front_counter_clockwise != 0,
            perspective_correct: desc.perspective_correct != 0,
        })
    }
}

// ============================================================================
// COM wrappers
// ============================================================================

pub const IID_INPUT_LAYOUT: Guid = Guid::new(
    0xD3DE_0003,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03],
);

pub const IID_PIPELINE_STATE: Guid = Guid::new(
    0xD3DE_0004,
    0x4B5A,
    0x11EE,
    [0x9C, 0x0E, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04],
);

/// IUnknown-only vtable shared by the two immutable object kinds.
#[repr(C)]
pub struct InertVtbl {
    pub query_interface:
        unsafe extern "win64" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult,
    pub add_ref: unsafe extern "win64" fn(*mut c_void) -> u32,
    pub release: unsafe extern "win64" fn(*mut c_void) -> u32,
}

/// A guest-visible input layout.
#[repr(C)]
pub struct InputLayout {
    hdr: ComHeader,
    pub(crate) core: Arc<InputLayoutCore>,
}

impl_com_unknown!(InputLayout, IID_INPUT_LAYOUT, layout_qi, layout_addref, layout_release);

static LAYOUT_VTBL: InertVtbl = InertVtbl {
    query_interface: layout_qi,
    add_ref: layout_addref,
    release: layout_release,
};

pub(crate) fn new_input_layout(core: InputLayoutCore) -> *mut InputLayout {
    Box::into_raw(Box::new(InputLayout {
        hdr: ComHeader::new(&LAYOUT_VTBL as *const InertVtbl as *const c_void),
        core: Arc::new(core),
    }))
}

/// A guest-visible pipeline state.
#[repr(C)]
pub struct PipelineState {
    hdr: ComHeader,
    pub(crate) core: Arc<PipelineStateCore>,
}

impl_com_unknown!(PipelineState, IID_PIPELINE_STATE, pso_qi, pso_addref, pso_release);

static PSO_VTBL: InertVtbl = InertVtbl {
    query_interface: pso_qi,
    add_ref: pso_addref,
    release: pso_release,
};

pub(crate) fn new_pipeline_state(core: PipelineStateCore) -> *mut PipelineState {
    Box::into_raw(Box::new(PipelineState {
        hdr: ComHeader::new(&PSO_VTBL as *const InertVtbl as *const c_void),
        core: Arc::new(core),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_binding() {
        assert_eq!(Semantic::parse("POSITION"), Some(Semantic::Position));
        assert_eq!(Semantic::parse("color"), Some(Semantic::Color));
        assert_eq!(Semantic::parse("BLENDWEIGHT"), None);
    }

    #[test]
    fn test_layout_ignores_unknown_semantics() {
        let name_pos = std::ffi::CString::new("POSITION").unwrap();
        let name_odd = std::ffi::CString::new("MYSTERY").unwrap();
        let descs = [
            InputElementDesc {
                semantic_name: name_pos.as_ptr(),
                semantic_index: 0,
                format: Format::R32G32B32Float as u32,
                input_slot: 0,
                aligned_byte_offset: 0,
            },
            InputElementDesc {
                semantic_name: name_odd.as_ptr(),
                semantic_index: 0,
                format: Format::R32G32Float as u32,
                input_slot: 0,
                aligned_byte_offset: 12,
            },
        ];
        let refs: Vec<&InputElementDesc> = descs.iter().collect();
        let layout = InputLayoutCore::from_guest(&refs).unwrap();
        assert_eq!(layout.elements.len(), 2);
        assert!(layout.find(Semantic::Position).is_some());
        assert!(layout.find(Semantic::Color).is_none());
        assert!(layout.elements[1].semantic.is_none());
    }

    #[test]
    fn test_pipeline_state_validation() {
        let mut desc = PipelineStateDesc {
            depth_enable: 1,
            depth_write: 1,
            depth_func: CompareFunc::Less as u32,
            cull_mode: CullMode::Back as u32,
            front_counter_clockwise: 0,
            perspective_correct: 1,
        };
        assert!(PipelineStateCore::from_guest(&desc).is_ok());
        desc.depth_func = 99;
        assert!(PipelineStateCore::from_guest(&desc).is_err());
    }
}
