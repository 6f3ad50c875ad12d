//! Software Rasterizer
//!
//! Edge-function triangle rasterization with barycentric attribute
//! interpolation, optional perspective correction and an optional depth
//! test, plus the uniform clear. Renders into the linear pixel array of
//! the bound render target; channel order is fixed by the target's
//! format descriptor.

use super::pipeline::{InputLayoutCore, PipelineStateCore, Semantic};
use super::resource::{ResourceCore, ViewCore, ViewKind};
use super::{pack_color, CullMode, Viewport};
use crate::status::HostError;
use std::sync::{Arc, Weak};

/// Everything one draw call needs, captured by value at record time.
/// Resource and view bindings are weak; state objects are captured
/// strongly because they are immutable.
#[derive(Default, Clone)]
pub struct Binding {
    pub rtv: Option<Weak<ViewCore>>,
    pub dsv: Option<Weak<ViewCore>>,
    pub layout: Option<Arc<InputLayoutCore>>,
    pub vertex: Option<(Weak<ResourceCore>, u32, u32)>,
    pub index: Option<Weak<ResourceCore>>,
    pub constants: Option<Weak<ResourceCore>>,
    pub pso: Option<Arc<PipelineStateCore>>,
    pub viewport: Viewport,
    pub scissor: Option<[i32; 4]>,
}

/// What to draw.
#[derive(Debug, Clone, Copy)]
pub enum DrawKind {
    /// `vertex_count` vertices starting at `start_vertex`.
    Linear { vertex_count: u32, start_vertex: u32 },
    /// `index_count` indices starting at `start_index`, biased by
    /// `base_vertex`.
    Indexed {
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
    },
}

// ============================================================================
// Clears
// ============================================================================

/// Write a uniform color to every texel of a render target.
pub fn clear_rtv(view: &ViewCore, color: [f32; 4]) -> Result<(), HostError> {
    if view.kind != ViewKind::RenderTarget {
        return Err(HostError::ProtocolViolation("clear on non-RTV".into()));
    }
    if !view.resource.device_ok() {
        return Err(HostError::StateInvalid("render target outlived device".into()));
    }
    let (_, _, format) = view
        .resource
        .texture_dims()
        .ok_or_else(|| HostError::ProtocolViolation("RTV on buffer".into()))?;
    let texel = pack_color(format, color);
    let mut data = view.resource.data.lock();
    for chunk in data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&texel);
    }
    Ok(())
}

/// Write a uniform depth to every texel of a depth target.
pub fn clear_dsv(view: &ViewCore, depth: f32) -> Result<(), HostError> {
    if view.kind != ViewKind::DepthStencil {
        return Err(HostError::ProtocolViolation("clear on non-DSV".into()));
    }
    if !view.resource.device_ok() {
        return Err(HostError::StateInvalid("depth target outlived device".into()));
    }
    let mut data = view.resource.data.lock();
    for chunk in data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&depth.to_le_bytes());
    }
    Ok(())
}

// ============================================================================
// Vertex fetch
// ============================================================================

#[derive(Clone, Copy)]
struct Vertex {
    position: [f32; 4],
    color: [f32; 4],
    texcoord: [f32; 2],
}

fn read_floats(bytes: &[u8], offset: usize, count: usize) -> Option<Vec<f32>> {
    let end = offset.checked_add(count * 4)?;
    if end > bytes.len() {
        return None;
    }
    Some(
        bytes[offset..end]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn fetch_vertex(
    layout: &InputLayoutCore,
    data: &[u8],
    stride: usize,
    base_offset: usize,
    index: usize,
) -> Option<Vertex> {
    let vertex_base = base_offset + index * stride;
    let mut vertex = Vertex {
        position: [0.0, 0.0, 0.0, 1.0],
        color: [1.0, 1.0, 1.0, 1.0],
        texcoord: [0.0, 0.0],
    };
    for element in &layout.elements {
        let semantic = match element.semantic {
            Some(s) => s,
            None => continue,
        };
        let count = element.format.stride() / 4;
        let values = read_floats(data, vertex_base + element.offset, count)?;
        match semantic {
            Semantic::Position => {
                for (i, v) in values.iter().take(4).enumerate() {
                    vertex.position[i] = *v;
                }
                if values.len() < 4 {
                    vertex.position[3] = 1.0;
                }
            }
            Semantic::Color => {
                for (i, v) in values.iter().take(4).enumerate() {
                    vertex.color[i] = *v;
                }
            }
            Semantic::TexCoord => {
                for (i, v) in values.iter().take(2).enumerate() {
                    vertex.texcoord[i] = *v;
                }
            }
        }
    }
    Some(vertex)
}

/// Row-vector times row-major 4x4.
fn transform(v: [f32; 4], m: &[f32; 16]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (j, slot) in out.iter_mut().enumerate() {
        *slot = v[0] * m[j] + v[1] * m[4 + j] + v[2] * m[8 + j] + v[3] * m[12 + j];
    }
    out
}

const IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

fn wvp_matrix(binding: &Binding) -> [f32; 16] {
    let Some(constants) = binding.constants.as_ref().and_then(Weak::upgrade) else {
        return IDENTITY;
    };
    let data = constants.data.lock();
    match read_floats(&data, 0, 16) {
        Some(values) => {
            let mut m = [0.0f32; 16];
            m.copy_from_slice(&values);
            m
        }
        None => IDENTITY,
    }
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

// ============================================================================
// Draw
// ============================================================================

/// Rasterize one draw call into the bound targets.
pub fn draw(binding: &Binding, kind: DrawKind) -> Result<(), HostError> {
    let rtv = binding
        .rtv
        .as_ref()
        .and_then(Weak::upgrade)
        .ok_or_else(|| HostError::StateInvalid("no render target bound".into()))?;
    if rtv.kind != ViewKind::RenderTarget || !rtv.resource.device_ok() {
        return Err(HostError::StateInvalid("stale render target".into()));
    }
    let (rt_width, rt_height, rt_format) = rtv
        .resource
        .texture_dims()
        .ok_or_else(|| HostError::ProtocolViolation("RTV on buffer".into()))?;
    let layout = binding
        .layout
        .as_ref()
        .ok_or_else(|| HostError::StateInvalid("no input layout bound".into()))?;
    let (vertex_res, stride, vb_offset) = match &binding.vertex {
        Some((w, stride, offset)) => {
            let res = w
                .upgrade()
                .ok_or_else(|| HostError::StateInvalid("vertex buffer released".into()))?;
            (res, *stride as usize, *offset as usize)
        }
        None => return Err(HostError::StateInvalid("no vertex buffer bound".into())),
    };
    let default_state = PipelineStateCore::default();
    let state = binding.pso.as_deref().unwrap_or(&default_state);

    // Resolve indices up front.
    let indices: Vec<usize> = match kind {
        DrawKind::Linear {
            vertex_count,
            start_vertex,
        } => (0..vertex_count as usize)
            .map(|i| start_vertex as usize + i)
            .collect(),
        DrawKind::Indexed {
            index_count,
            start_index,
            base_vertex,
        } => {
            let index_res = binding
                .index
                .as_ref()
                .and_then(Weak::upgrade)
                .ok_or_else(|| HostError::StateInvalid("no index buffer bound".into()))?;
            let data = index_res.data.lock();
            let mut out = Vec::with_capacity(index_count as usize);
            for i in 0..index_count as usize {
                let at = (start_index as usize + i) * 4;
                if at + 4 > data.len() {
                    return Err(HostError::ProtocolViolation("index read past buffer".into()));
                }
                let raw = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
                let biased = raw as i64 + i64::from(base_vertex);
                if biased < 0 {
                    return Err(HostError::ProtocolViolation("negative vertex index".into()));
                }
                out.push(biased as usize);
            }
            out
        }
    };

    let wvp = wvp_matrix(binding);
    let vertex_data = vertex_res.data.lock().clone();

    let vp = binding.viewport;
    let vp_rect = [
        vp.x.floor() as i32,
        vp.y.floor() as i32,
        (vp.x + vp.width).ceil() as i32,
        (vp.y + vp.height).ceil() as i32,
    ];

    let dsv = if state.depth_enable {
        let view = binding
            .dsv
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| HostError::StateInvalid("depth test without depth target".into()))?;
        if view.kind != ViewKind::DepthStencil || !view.resource.device_ok() {
            return Err(HostError::StateInvalid("stale depth target".into()));
        }
        Some(view)
    } else {
        None
    };

    let mut color_data = rtv.resource.data.lock();

    for tri in indices.chunks_exact(3) {
        // 1. Transform by the current world-view-projection.
        let mut clip = [[0.0f32; 4]; 3];
        let mut attrs = [Vertex {
            position: [0.0; 4],
            color: [0.0; 4],
            texcoord: [0.0; 2],
        }; 3];
        let mut degenerate = false;
        for (slot, &vi) in tri.iter().enumerate() {
            let vertex = fetch_vertex(layout, &vertex_data, stride, vb_offset, vi)
                .ok_or_else(|| HostError::ProtocolViolation("vertex read past buffer".into()))?;
            let c = transform(vertex.position, &wvp);
            if c[3] <= 0.0 {
                degenerate = true;
            }
            clip[slot] = c;
            attrs[slot] = vertex;
        }
        if degenerate {
            continue;
        }

        // Project to screen space.
        let mut screen = [[0.0f32; 2]; 3];
        let mut depth = [0.0f32; 3];
        let mut inv_w = [0.0f32; 3];
        for i in 0..3 {
            let w = clip[i][3];
            let ndc = [clip[i][0] / w, clip[i][1] / w, clip[i][2] / w];
            screen[i] = [
                vp.x + (ndc[0] * 0.5 + 0.5) * vp.width,
                vp.y + (0.5 - ndc[1] * 0.5) * vp.height,
            ];
            depth[i] = vp.min_depth + ndc[2] * (vp.max_depth - vp.min_depth);
            inv_w[i] = 1.0 / w;
        }

        // 2. Edge functions; orientation decides facing.
        let area = edge(screen[0], screen[1], screen[2]);
        if area == 0.0 {
            continue;
        }
        let screen_cw = area > 0.0;
        let front = screen_cw != state.front_ccw;
        match state.cull_mode {
            CullMode::None => {}
            CullMode::Back if !front => continue,
            CullMode::Front if front => continue,
            _ => {}
        }

        // 3. Integer bounding box clipped to viewport and scissor.
        let min_x = screen.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min);
        let max_x = screen.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max);
        let min_y = screen.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min);
        let max_y = screen.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max);
        let mut x0 = (min_x.floor() as i32).max(vp_rect[0]).max(0);
        let mut y0 = (min_y.floor() as i32).max(vp_rect[1]).max(0);
        let mut x1 = (max_x.ceil() as i32).min(vp_rect[2]).min(rt_width as i32);
        let mut y1 = (max_y.ceil() as i32).min(vp_rect[3]).min(rt_height as i32);
        if let Some([sl, st, sr, sb]) = binding.scissor {
            x0 = x0.max(sl);
            y0 = y0.max(st);
            x1 = x1.min(sr);
            y1 = y1.min(sb);
        }

        // 4-7. Inside test, interpolate, depth, write.
        for py in y0..y1 {
            for px in x0..x1 {
                let p = [px as f32 + 0.5, py as f32 + 0.5];
                let e0 = edge(screen[1], screen[2], p);
                let e1 = edge(screen[2], screen[0], p);
                let e2 = edge(screen[0], screen[1], p);
                let inside = if screen_cw {
                    e0 >= 0.0 && e1 >= 0.0 && e2 >= 0.0
                } else {
                    e0 <= 0.0 && e1 <= 0.0 && e2 <= 0.0
                };
                if !inside {
                    continue;
                }
                let w0 = e0 / area;
                let w1 = e1 / area;
                let w2 = e2 / area;

                if let Some(dsv) = &dsv {
                    let z = w0 * depth[0] + w1 * depth[1] + w2 * depth[2];
                    let mut depth_data = dsv.resource.data.lock();
                    let at = (py as usize * rt_width as usize + px as usize) * 4;
                    if at + 4 > depth_data.len() {
                        continue;
                    }
                    let stored = f32::from_le_bytes([
                        depth_data[at],
                        depth_data[at + 1],
                        depth_data[at + 2],
                        depth_data[at + 3],
                    ]);
                    if !state.depth_func.passes(z, stored) {
                        continue;
                    }
                    if state.depth_write {
                        depth_data[at..at + 4].copy_from_slice(&z.to_le_bytes());
                    }
                }

                // 5. Barycentric attribute interpolation, optionally
                // perspective correct.
                let color = if state.perspective_correct {
                    let denom = w0 * inv_w[0] + w1 * inv_w[1] + w2 * inv_w[2];
                    let mut c = [0.0f32; 4];
                    for (ch, slot) in c.iter_mut().enumerate() {
                        *slot = (w0 * attrs[0].color[ch] * inv_w[0]
                            + w1 * attrs[1].color[ch] * inv_w[1]
                            + w2 * attrs[2].color[ch] * inv_w[2])
                            / denom;
                    }
                    c
                } else {
                    let mut c = [0.0f32; 4];
                    for (ch, slot) in c.iter_mut().enumerate() {
                        *slot = w0 * attrs[0].color[ch]
                            + w1 * attrs[1].color[ch]
                            + w2 * attrs[2].color[ch];
                    }
                    c
                };

                let texel = pack_color(rt_format, color);
                let at = (py as usize * rt_width as usize + px as usize) * 4;
                if at + 4 <= color_data.len() {
                    color_data[at..at + 4].copy_from_slice(&texel);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::d3d::device::DeviceCore;
    use crate::d3d::pipeline::{InputElement, InputLayoutCore};
    use crate::d3d::resource::{new_resource_core, ResourceKind};
    use crate::d3d::{
        unpack_color, CompareFunc, Format, BIND_DEPTH_STENCIL, BIND_RENDER_TARGET,
        BIND_VERTEX_BUFFER,
    };

    fn test_device() -> Arc<DeviceCore> {
        DeviceCore::new(false)
    }

    fn target(device: &Arc<DeviceCore>, w: u32, h: u32) -> Arc<ViewCore> {
        let resource = new_resource_core(
            device,
            ResourceKind::Texture2d {
                width: w,
                height: h,
                format: Format::R8G8B8A8Unorm,
            },
            BIND_RENDER_TARGET,
            None,
        );
        Arc::new(ViewCore {
            kind: ViewKind::RenderTarget,
            resource,
        })
    }

    fn depth_target(device: &Arc<DeviceCore>, w: u32, h: u32) -> Arc<ViewCore> {
        let resource = new_resource_core(
            device,
            ResourceKind::Texture2d {
                width: w,
                height: h,
                format: Format::D32Float,
            },
            BIND_DEPTH_STENCIL,
            None,
        );
        Arc::new(ViewCore {
            kind: ViewKind::DepthStencil,
            resource,
        })
    }

    fn pos_color_layout() -> Arc<InputLayoutCore> {
        Arc::new(InputLayoutCore {
            elements: vec![
                InputElement {
                    semantic: Some(Semantic::Position),
                    format: Format::R32G32B32Float,
                    offset: 0,
                    slot: 0,
                },
                InputElement {
                    semantic: Some(Semantic::Color),
                    format: Format::R32G32B32Float,
                    offset: 12,
                    slot: 0,
                },
            ],
        })
    }

    fn vertex_buffer(device: &Arc<DeviceCore>, vertices: &[[f32; 6]]) -> Arc<ResourceCore> {
        let mut bytes = Vec::new();
        for v in vertices {
            for f in v {
                bytes.extend_from_slice(&f.to_le_bytes());
            }
        }
        new_resource_core(
            device,
            ResourceKind::Buffer { len: bytes.len() },
            BIND_VERTEX_BUFFER,
            Some(&bytes),
        )
    }

    fn pixel(view: &ViewCore, w: u32, x: u32, y: u32) -> [f32; 4] {
        let data = view.resource.data.lock();
        let at = ((y * w + x) * 4) as usize;
        unpack_color(
            Format::R8G8B8A8Unorm,
            [data[at], data[at + 1], data[at + 2], data[at + 3]],
        )
    }

    fn binding_for(
        rtv: &Arc<ViewCore>,
        vb: &Arc<ResourceCore>,
        size: f32,
        pso: Option<Arc<PipelineStateCore>>,
    ) -> Binding {
        Binding {
            rtv: Some(Arc::downgrade(rtv)),
            layout: Some(pos_color_layout()),
            vertex: Some((Arc::downgrade(vb), 24, 0)),
            pso,
            viewport: Viewport {
                x: 0.0,
                y: 0.0,
                width: size,
                height: size,
                min_depth: 0.0,
                max_depth: 1.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_clear_writes_every_texel() {
        let device = test_device();
        let rtv = target(&device, 64, 64);
        clear_rtv(&rtv, [1.0, 0.0, 0.0, 1.0]).unwrap();
        for (x, y) in [(0, 0), (31, 31), (63, 63), (63, 0)] {
            assert_eq!(pixel(&rtv, 64, x, y), [1.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_barycentric_weights_sum_to_one() {
        let device = test_device();
        let rtv = target(&device, 1, 1);
        // Full-viewport triangle with the three primary colors.
        let vb = vertex_buffer(
            &device,
            &[
                [-1.0, -1.0, 0.0, 1.0, 0.0, 0.0],
                [3.0, -1.0, 0.0, 0.0, 1.0, 0.0],
                [-1.0, 3.0, 0.0, 0.0, 0.0, 1.0],
            ],
        );
        let binding = binding_for(&rtv, &vb, 1.0, None);
        draw(
            &binding,
            DrawKind::Linear {
                vertex_count: 3,
                start_vertex: 0,
            },
        )
        .unwrap();
        let c = pixel(&rtv, 1, 0, 0);
        let sum = c[0] + c[1] + c[2];
        assert!(
            (sum - 1.0).abs() < 0.02,
            "channel sum {sum} from {c:?} should be 1"
        );
    }

    #[test]
    fn test_depth_test_keeps_nearer_triangle() {
        let device = test_device();
        let rtv = target(&device, 16, 16);
        let dsv = depth_target(&device, 16, 16);
        clear_rtv(&rtv, [0.0, 0.0, 0.0, 1.0]).unwrap();
        clear_dsv(&dsv, 1.0).unwrap();

        let pso = Arc::new(PipelineStateCore {
            depth_enable: true,
            depth_write: true,
            depth_func: CompareFunc::Less,
            cull_mode: CullMode::None,
            front_ccw: false,
            perspective_correct: false,
        });
        let near = vertex_buffer(
            &device,
            &[
                [-1.0, -1.0, 0.5, 0.0, 1.0, 0.0],
                [3.0, -1.0, 0.5, 0.0, 1.0, 0.0],
                [-1.0, 3.0, 0.5, 0.0, 1.0, 0.0],
            ],
        );
        let far = vertex_buffer(
            &device,
            &[
                [-1.0, -1.0, 0.75, 1.0, 0.0, 0.0],
                [3.0, -1.0, 0.75, 1.0, 0.0, 0.0],
                [-1.0, 3.0, 0.75, 1.0, 0.0, 0.0],
            ],
        );
        let mut binding = binding_for(&rtv, &near, 16.0, Some(pso));
        binding.dsv = Some(Arc::downgrade(&dsv));
        draw(
            &binding,
            DrawKind::Linear {
                vertex_count: 3,
                start_vertex: 0,
            },
        )
        .unwrap();
        binding.vertex = Some((Arc::downgrade(&far), 24, 0));
        draw(
            &binding,
            DrawKind::Linear {
                vertex_count: 3,
                start_vertex: 0,
            },
        )
        .unwrap();

        // The nearer green triangle survives.
        assert_eq!(pixel(&rtv, 16, 8, 8), [0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_scissor_clips_pixels() {
        let device = test_device();
        let rtv = target(&device, 8, 8);
        clear_rtv(&rtv, [0.0, 0.0, 0.0, 0.0]).unwrap();
        let vb = vertex_buffer(
            &device,
            &[
                [-1.0, -1.0, 0.0, 1.0, 1.0, 1.0],
                [3.0, -1.0, 0.0, 1.0, 1.0, 1.0],
                [-1.0, 3.0, 0.0, 1.0, 1.0, 1.0],
            ],
        );
        let mut binding = binding_for(&rtv, &vb, 8.0, None);
        binding.scissor = Some([0, 0, 4, 8]);
        draw(
            &binding,
            DrawKind::Linear {
                vertex_count: 3,
                start_vertex: 0,
            },
        )
        .unwrap();
        assert_eq!(pixel(&rtv, 8, 2, 2)[0], 1.0);
        assert_eq!(pixel(&rtv, 8, 5, 2)[0], 0.0);
    }

    #[test]
    fn test_back_face_culling() {
        let device = test_device();
        let rtv = target(&device, 8, 8);
        clear_rtv(&rtv, [0.0, 0.0, 0.0, 0.0]).unwrap();
        let pso = Arc::new(PipelineStateCore {
            cull_mode: CullMode::Back,
            ..Default::default()
        });

        // Counter-clockwise on screen: a back face under the default
        // front-is-clockwise convention, so it is culled.
        let ccw = vertex_buffer(
            &device,
            &[
                [-1.0, -1.0, 0.0, 1.0, 1.0, 1.0],
                [3.0, -1.0, 0.0, 1.0, 1.0, 1.0],
                [-1.0, 3.0, 0.0, 1.0, 1.0, 1.0],
            ],
        );
        let binding = binding_for(&rtv, &ccw, 8.0, Some(pso.clone()));
        draw(
            &binding,
            DrawKind::Linear {
                vertex_count: 3,
                start_vertex: 0,
            },
        )
        .unwrap();
        assert_eq!(pixel(&rtv, 8, 2, 2)[0], 0.0, "culled triangle drew");

        // Opposite winding is front-facing and survives the same state.
        let cw = vertex_buffer(
            &device,
            &[
                [-1.0, -1.0, 0.0, 1.0, 1.0, 1.0],
                [-1.0, 3.0, 0.0, 1.0, 1.0, 1.0],
                [3.0, -1.0, 0.0, 1.0, 1.0, 1.0],
            ],
        );
        let binding = binding_for(&rtv, &cw, 8.0, Some(pso));
        draw(
            &binding,
            DrawKind::Linear {
                vertex_count: 3,
                start_vertex: 0,
            },
        )
        .unwrap();
        assert_eq!(pixel(&rtv, 8, 2, 2)[0], 1.0, "front face missing");
    }
}
