//! Direct3D Device
//!
//! A Direct3D 11/12-flavoured device over one internal core: resources,
//! views, input layouts, immutable pipeline state, command lists with
//! per-queue ordered submission, fences, and a software rasterizer.
//! When the optional GPU backend is available the clear/readback path
//! can run on the hardware queue; drawing always renders through the
//! software path into the resource's linear pixel array.
//!
//! All guest-visible objects are COM-shaped: vtable first, atomic
//! refcount, `QueryInterface`/`AddRef`/`Release` in the first three
//! slots. Resources hold a non-owning back-reference to their device
//! validated by a generation counter; the device refcount graph keeps
//! the core alive while any resource lives.
//!
//! - **resource** - buffers, 2-D textures, RTV/SRV/DSV/CBV views, Map
//! - **pipeline** - input layouts and immutable pipeline state
//! - **raster** - edge-function triangle rasterization and clears
//! - **command** - queues, allocators, lists, fences, descriptor heaps
//! - **device** - the device/context objects and creation entry points

pub mod command;
pub mod device;
pub mod pipeline;
pub mod raster;
pub mod resource;
pub(crate) mod unknown;

use num_derive::FromPrimitive;

// ============================================================================
// Formats
// ============================================================================

/// The DXGI format subset the device accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum Format {
    /// Four 32-bit floats
    R32G32B32A32Float = 2,
    /// Three 32-bit floats
    R32G32B32Float = 6,
    /// Two 32-bit floats
    R32G32Float = 16,
    /// Packed 8-bit RGBA
    R8G8B8A8Unorm = 28,
    /// 32-bit float depth
    D32Float = 40,
    /// 32-bit unsigned index
    R32Uint = 42,
    /// Packed 8-bit BGRA
    B8G8R8A8Unorm = 87,
}

impl Format {
    pub fn from_u32(value: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(value)
    }

    /// Bytes per element.
    pub fn stride(self) -> usize {
        match self {
            Format::R32G32B32A32Float => 16,
            Format::R32G32B32Float => 12,
            Format::R32G32Float => 8,
            Format::R8G8B8A8Unorm | Format::D32Float | Format::R32Uint | Format::B8G8R8A8Unorm => 4,
        }
    }

    /// True for formats a render-target view may wrap.
    pub fn is_color(self) -> bool {
        matches!(self, Format::R8G8B8A8Unorm | Format::B8G8R8A8Unorm)
    }
}

/// Pack a normalized RGBA color into a color format's byte order.
pub fn pack_color(format: Format, rgba: [f32; 4]) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
    let [r, g, b, a] = [q(rgba[0]), q(rgba[1]), q(rgba[2]), q(rgba[3])];
    match format {
        Format::B8G8R8A8Unorm => [b, g, r, a],
        _ => [r, g, b, a],
    }
}

/// Unpack one pixel back into normalized RGBA.
pub fn unpack_color(format: Format, bytes: [u8; 4]) -> [f32; 4] {
    let n = |v: u8| f32::from(v) / 255.0;
    match format {
        Format::B8G8R8A8Unorm => [n(bytes[2]), n(bytes[1]), n(bytes[0]), n(bytes[3])],
        _ => [n(bytes[0]), n(bytes[1]), n(bytes[2]), n(bytes[3])],
    }
}

// ============================================================================
// Bind flags and comparisons
// ============================================================================

pub const BIND_VERTEX_BUFFER: u32 = 0x01;
pub const BIND_INDEX_BUFFER: u32 = 0x02;
pub const BIND_CONSTANT_BUFFER: u32 = 0x04;
pub const BIND_SHADER_RESOURCE: u32 = 0x08;
pub const BIND_RENDER_TARGET: u32 = 0x20;
pub const BIND_DEPTH_STENCIL: u32 = 0x40;

/// Depth comparison functions (D3D numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum CompareFunc {
    Never = 1,
    Less = 2,
    Equal = 3,
    LessEqual = 4,
    Greater = 5,
    NotEqual = 6,
    GreaterEqual = 7,
    Always = 8,
}

impl CompareFunc {
    pub fn from_u32(value: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(value)
    }

    /// Apply to (incoming, stored).
    pub fn passes(self, new: f32, stored: f32) -> bool {
        match self {
            CompareFunc::Never => false,
            CompareFunc::Less => new < stored,
            CompareFunc::Equal => new == stored,
            CompareFunc::LessEqual => new <= stored,
            CompareFunc::Greater => new > stored,
            CompareFunc::NotEqual => new != stored,
            CompareFunc::GreaterEqual => new >= stored,
            CompareFunc::Always => true,
        }
    }
}

/// Cull modes (D3D numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u32)]
pub enum CullMode {
    None = 1,
    Front = 2,
    Back = 3,
}

impl CullMode {
    pub fn from_u32(value: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(value)
    }
}

/// Viewport layout.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trip() {
        assert_eq!(Format::from_u32(28), Some(Format::R8G8B8A8Unorm));
        assert_eq!(Format::from_u32(9999), None);
        assert_eq!(Format::R32G32B32Float.stride(), 12);
    }

    #[test]
    fn test_pack_respects_channel_order() {
        let red = [1.0, 0.0, 0.0, 1.0];
        assert_eq!(pack_color(Format::R8G8B8A8Unorm, red), [255, 0, 0, 255]);
        assert_eq!(pack_color(Format::B8G8R8A8Unorm, red), [0, 0, 255, 255]);
        assert_eq!(
            unpack_color(Format::B8G8R8A8Unorm, [0, 0, 255, 255]),
            [1.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn test_compare_funcs() {
        assert!(CompareFunc::Less.passes(0.5, 1.0));
        assert!(!CompareFunc::Less.passes(1.0, 0.5));
        assert!(CompareFunc::Always.passes(9.0, 0.0));
        assert!(!CompareFunc::Never.passes(0.0, 9.0));
    }
}
