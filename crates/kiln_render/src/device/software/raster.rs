//! Triangle rasterizer for the indexed indirect draws.
//!
//! Vertices are pulled from the compacted index buffer exactly like the
//! vertex shader does. Triangles are clipped against the near and far planes
//! in clip space, then scan-converted at pixel centres with the top-left fill
//! rule, so shared edges are covered exactly once.

use glam::{Mat3, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use kiln_core::Result;
use kiln_scene::{IndirectIndexedCommand, decode_compacted_index, encode_visibility};

use super::SoftwareDevice;
use super::kernels::{Geometry, edge};
use super::memory::SoftImage;
use crate::command::{RasterDraw, RasterKind};

#[derive(Debug, Clone, Copy)]
struct ClipVertex {
    clip: Vec4,
    /// View-space normal.
    normal: Vec3,
}

impl ClipVertex {
    fn lerp(self, other: Self, t: f32) -> Self {
        Self {
            clip: self.clip.lerp(other.clip, t),
            normal: self.normal.lerp(other.normal, t),
        }
    }
}

/// Sutherland-Hodgman against `0 <= z <= w`.
fn clip_near_far(triangle: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut polygon = triangle.to_vec();
    let planes: [fn(Vec4) -> f32; 2] = [|c| c.z, |c| c.w - c.z];
    for distance in planes {
        if polygon.is_empty() {
            break;
        }
        let mut next = Vec::with_capacity(polygon.len() + 1);
        for i in 0..polygon.len() {
            let a = polygon[i];
            let b = polygon[(i + 1) % polygon.len()];
            let (da, db) = (distance(a.clip), distance(b.clip));
            if da >= 0.0 {
                next.push(a);
            }
            if (da >= 0.0) != (db >= 0.0) {
                next.push(a.lerp(b, da / (da - db)));
            }
        }
        polygon = next;
    }
    polygon
}

/// Top or left edge of a positively wound triangle in y-down screen space.
#[inline]
fn is_top_left(a: Vec2, b: Vec2) -> bool {
    (a.y == b.y && b.x > a.x) || b.y < a.y
}

/// Covered pixels of a screen-space triangle with their barycentrics.
pub(super) fn scan_triangle(
    screen: [Vec2; 3],
    width: u32,
    height: u32,
    mut visit: impl FnMut(UVec2, Vec3),
) {
    let mut p = screen;
    let mut area = edge(p[0], p[1], p[2]);
    let mut swapped = false;
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        p.swap(1, 2);
        area = -area;
        swapped = true;
    }

    let min = p[0].min(p[1]).min(p[2]).floor().max(Vec2::ZERO);
    let max = p[0].max(p[1]).max(p[2]).ceil().min(Vec2::new(width as f32, height as f32));
    let bias = [is_top_left(p[1], p[2]), is_top_left(p[2], p[0]), is_top_left(p[0], p[1])];

    for y in min.y as u32..max.y as u32 {
        for x in min.x as u32..max.x as u32 {
            let centre = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let w = [edge(p[1], p[2], centre), edge(p[2], p[0], centre), edge(p[0], p[1], centre)];
            let inside = w
                .iter()
                .zip(bias)
                .all(|(&wi, top_left)| wi > 0.0 || (wi == 0.0 && top_left));
            if !inside {
                continue;
            }
            let mut bary = Vec3::from(w) / area;
            if swapped {
                bary = Vec3::new(bary.x, bary.z, bary.y);
            }
            visit(UVec2::new(x, y), bary);
        }
    }
}

impl SoftwareDevice {
    pub(super) fn rasterize(&mut self, draw: &RasterDraw) -> Result<()> {
        let args = self
            .buffer(draw.draw_args)?
            .read::<IndirectIndexedCommand>(0)
            .unwrap_or_default();
        if args.instance_count == 0 || args.index_count < 3 {
            return Ok(());
        }

        let g = &draw.geometry;
        let geometry = Geometry {
            surviving: self.buffer(g.surviving)?,
            objects: self.buffer(g.objects)?,
            meshes: self.buffer(g.meshes)?,
            meshlets: self.buffer(g.meshlets)?,
            meshlet_vertices: self.buffer(g.meshlet_vertices)?,
            meshlet_triangles: self.buffer(g.meshlet_triangles)?,
            vertices: self.buffer(g.vertices)?,
        };
        let indices = self.buffer(draw.indices)?;
        let mut depth = self.image(draw.depth)?.clone();
        let mut color = match draw.color {
            Some(id) => Some(self.image(id)?.clone()),
            None => None,
        };
        let (width, height) = depth.extent(0);
        let view = Mat3::from_mat4(draw.params.view);

        for triangle in 0..args.index_count / 3 {
            let mut corners = [ClipVertex { clip: Vec4::ZERO, normal: Vec3::ZERO }; 3];
            let mut visibility = 0;
            let mut complete = true;
            for (k, corner) in corners.iter_mut().enumerate() {
                let at = args.first_index + triangle * 3 + k as u32;
                let fetched = indices.read::<u32>(at as usize).and_then(|value| {
                    let (slot, primitive, local) = decode_compacted_index(value);
                    let (object, mesh, meshlet) = geometry.resolve(slot)?;
                    let vertex = geometry.vertex(&mesh, &meshlet, local)?;
                    Some((slot, primitive, object, vertex))
                });
                let Some((slot, primitive, object, vertex)) = fetched else {
                    complete = false;
                    break;
                };
                if k == 0 {
                    visibility = encode_visibility(slot, primitive);
                }
                let world = object.transform * Vec3::from(vertex.position).extend(1.0);
                let normal = Mat3::from_mat4(object.normal_transform) * Vec3::from(vertex.normal);
                *corner = ClipVertex {
                    clip: draw.params.view_projection * world,
                    normal: view * normal.normalize_or_zero(),
                };
            }
            if !complete {
                continue;
            }

            let polygon = clip_near_far(corners);
            for i in 1..polygon.len().saturating_sub(1) {
                let fan = [polygon[0], polygon[i], polygon[i + 1]];
                raster_fan(draw, fan, visibility, width, height, &mut depth, color.as_mut());
            }
        }

        if draw.kind != RasterKind::Visibility {
            *self.image_mut(draw.depth)? = depth;
        }
        if let (Some(id), Some(image)) = (draw.color, color) {
            *self.image_mut(id)? = image;
        }
        Ok(())
    }
}

fn raster_fan(
    draw: &RasterDraw,
    fan: [ClipVertex; 3],
    visibility: u32,
    width: u32,
    height: u32,
    depth: &mut SoftImage,
    mut color: Option<&mut SoftImage>,
) {
    if fan.iter().any(|v| v.clip.w <= f32::EPSILON) {
        return;
    }
    let inv_w = fan.map(|v| 1.0 / v.clip.w);
    let ndc = [0, 1, 2].map(|k| fan[k].clip.xyz() * inv_w[k]);
    let screen = ndc.map(|n| {
        Vec2::new(
            (n.x * 0.5 + 0.5) * width as f32,
            (0.5 - n.y * 0.5) * height as f32,
        )
    });
    let layer = draw.depth_layer;

    scan_triangle(screen, width, height, |pixel, b| {
        let z = (ndc[0].z * b.x + ndc[1].z * b.y + ndc[2].z * b.z).clamp(0.0, 1.0);
        let stored = depth.load_f32(pixel.x, pixel.y, layer, 0);
        let pass = match draw.kind {
            RasterKind::PreDepth | RasterKind::Shadow => z < stored,
            RasterKind::Visibility => z == stored,
        };
        if !pass {
            return;
        }
        if draw.kind != RasterKind::Visibility {
            depth.store_f32(pixel.x, pixel.y, layer, 0, z);
        }
        let Some(target) = color.as_deref_mut() else {
            return;
        };
        match draw.kind {
            RasterKind::Visibility => target.store_u32(pixel.x, pixel.y, visibility),
            _ => {
                let weights = b * Vec3::from(inv_w);
                let weights = weights / (weights.x + weights.y + weights.z);
                let normal =
                    fan[0].normal * weights.x + fan[1].normal * weights.y + fan[2].normal * weights.z;
                target.store(pixel.x, pixel.y, 0, 0, normal.normalize_or_zero().extend(0.0));
            }
        }
    });
}
