//! CPU execution of the compute kernels.
//!
//! Each kernel walks the same thread grid the GPU would launch and applies the
//! same guards. Outputs are copied out, mutated, and written back so a kernel
//! can read one resource while writing another.

use bytemuck::Zeroable;
use glam::{Mat3, Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use kiln_core::math::{FrustumPlanes, OrthoBounds, div_round_up, max_axis_scale};
use kiln_core::{BufferId, ImageId, Result};
use kiln_scene::{
    GpuMaterial, GpuMesh, GpuMeshlet, GpuVertex, IndirectDispatchCommand, ObjectDrawData,
    decode_visibility, encode_compacted_index, unpack_triangle,
};

use super::memory::SoftBuffer;
use super::{GBufferShader, SoftwareDevice, StandardGBuffer, SurfaceInput};
use crate::command::{
    CULL_GROUP_SIZE, CompactParams, CullParams, GBufferParams, IndirectArgsParams, Kernel,
    MATERIAL_ARGS_GROUP_SIZE, MATERIAL_GROUP_SIZE, MaterialArgsParams, PrefixSumParams,
    SCREEN_TILE_SIZE, STATS_MESHLETS_TESTED, STATS_MESHLETS_VISIBLE, STATS_OBJECTS_TESTED,
    STATS_OBJECTS_VISIBLE, STATS_TRIANGLES_VISIBLE, ScreenParams,
};
use crate::pipeline::uniforms::{CULL_ORTHOGRAPHIC, FrameUniforms};

// ─── Thread Grids ──────────────────────────────────────────────────────────

/// Global invocation ids of a 1D dispatch.
fn threads_1d(groups: [u32; 3], size: u32) -> impl Iterator<Item = u32> {
    (0..groups[0]).flat_map(move |g| (0..size).map(move |l| g * size + l))
}

/// Global invocation ids of a 2D dispatch of square tiles.
fn threads_2d(groups: [u32; 3], tile: u32) -> impl Iterator<Item = UVec2> {
    let (w, h) = (groups[0] * tile, groups[1] * tile);
    (0..h).flat_map(move |y| (0..w).map(move |x| UVec2::new(x, y)))
}

/// Linear ids of a wrapped one-thread-per-group dispatch.
fn threads_wrapped(groups: [u32; 3]) -> impl Iterator<Item = u32> {
    (0..groups[1]).flat_map(move |y| (0..groups[0]).map(move |x| y * groups[0] + x))
}

/// `atomicAdd` on a `u32` slot, returning the previous value.
fn atomic_add(buffer: &mut SoftBuffer, index: usize, value: u32) -> u32 {
    let old = buffer.read::<u32>(index).unwrap_or(0);
    buffer.write(index, old.wrapping_add(value));
    old
}

// ─── Culling Tests ─────────────────────────────────────────────────────────

/// World-space bounding sphere test against the frame's culling volume.
fn sphere_visible(frame: &FrameUniforms, transform: &Mat4, center: Vec3, radius: f32) -> bool {
    let world = transform.transform_point3(center);
    let view = frame.view.transform_point3(world);
    let radius = radius * max_axis_scale(transform);

    if frame.culling_mode == CULL_ORTHOGRAPHIC {
        let b = frame.ortho_bounds;
        OrthoBounds {
            min: Vec2::new(b[0], b[1]),
            max: Vec2::new(b[2], b[3]),
        }
        .contains_sphere(view, radius)
    } else {
        let f = frame.frustum;
        FrustumPlanes {
            x: Vec2::new(f[0], f[1]),
            y: Vec2::new(f[2], f[3]),
        }
        .contains_sphere(view, radius)
    }
}

/// Resolves a visibility texel to its material index.
struct Classifier<'d> {
    surviving: &'d SoftBuffer,
    objects: &'d SoftBuffer,
    meshlets: &'d SoftBuffer,
    material_table: &'d SoftBuffer,
}

impl Classifier<'_> {
    fn classify(&self, texel: u32) -> Option<u32> {
        let (slot, _triangle) = decode_visibility(texel)?;
        let [object_id, meshlet_index] = self.surviving.read::<[u32; 2]>(slot as usize)?;
        let object = self.objects.read::<ObjectDrawData>(object_id as usize)?;
        let meshlet = self.meshlets.read::<GpuMeshlet>(meshlet_index as usize)?;
        self.material_table
            .read::<u32>((object.material_table_offset + meshlet.material_local_index) as usize)
    }
}

impl SoftwareDevice {
    pub(super) fn run_kernel(&mut self, kernel: &Kernel, groups: [u32; 3]) -> Result<()> {
        match *kernel {
            Kernel::CullObjects { params, frame, objects, meshes, mapping, mapping_count, stats } => {
                self.cull_objects(params, frame, objects, meshes, mapping, mapping_count, stats, groups)
            }
            Kernel::GenerateIndirectArgs { params, count, args } => {
                self.generate_indirect_args(params, count, args)
            }
            Kernel::CullMeshlets {
                params,
                frame,
                objects,
                meshes,
                meshlets,
                mapping,
                mapping_count,
                surviving,
                surviving_count,
                stats,
            } => self.cull_meshlets(
                params,
                [frame, objects, meshes, meshlets, mapping, mapping_count],
                [surviving, surviving_count, stats],
                groups,
            ),
            Kernel::CompactPrimitives {
                params,
                meshlets,
                meshlet_triangles,
                surviving,
                surviving_count,
                indices,
                draw,
            } => self.compact_primitives(
                params,
                [meshlets, meshlet_triangles, surviving, surviving_count],
                indices,
                draw,
                groups,
            ),
            Kernel::CountMaterials {
                params,
                visibility,
                surviving,
                objects,
                meshlets,
                material_table,
                material_count,
            } => self.count_materials(
                params,
                visibility,
                [surviving, objects, meshlets, material_table],
                material_count,
                groups,
            ),
            Kernel::PrefixSum { params, input, output } => self.prefix_sum(params, input, output),
            Kernel::CollectPixels {
                params,
                visibility,
                surviving,
                objects,
                meshlets,
                material_table,
                material_start,
                material_cursor,
                pixels,
            } => self.collect_pixels(
                params,
                visibility,
                [surviving, objects, meshlets, material_table, material_start],
                material_cursor,
                pixels,
                groups,
            ),
            Kernel::GenerateMaterialArgs { params, material_count, args } => {
                self.generate_material_args(params, material_count, args, groups)
            }
            Kernel::GenerateGBuffer { .. } => self.generate_gbuffer(kernel, groups),
            Kernel::Shade { .. } => self.shade(kernel, groups),
            Kernel::Skybox { params, frame, depth, radiance, output } => {
                self.skybox(params, frame, depth, radiance, output, groups)
            }
            Kernel::GtaoPrefilterDepth { params, depth, output } => {
                self.gtao_prefilter_depth(&params, depth, output, groups)
            }
            Kernel::GtaoDownsampleDepth { params, depth_mips } => {
                self.gtao_downsample_depth(&params, depth_mips, groups)
            }
            Kernel::GtaoMain { params, depth_mips, normals, ao_term, edges } => {
                self.gtao_main(&params, depth_mips, normals, ao_term, edges, groups)
            }
            Kernel::GtaoDenoise { params, ao_term, edges, output } => {
                self.gtao_denoise(&params, ao_term, edges, output, groups)
            }
        }
    }

    pub(super) fn frame_uniforms(&self, frame: BufferId) -> Result<FrameUniforms> {
        Ok(self
            .buffer(frame)?
            .read::<FrameUniforms>(0)
            .unwrap_or_else(FrameUniforms::zeroed))
    }

    // ========================================================================
    // Culling
    // ========================================================================

    fn cull_objects(
        &mut self,
        params: CullParams,
        frame: BufferId,
        objects: BufferId,
        meshes: BufferId,
        mapping: BufferId,
        mapping_count: BufferId,
        stats: BufferId,
        groups: [u32; 3],
    ) -> Result<()> {
        let frame_data = self.frame_uniforms(frame)?;
        let objects_buf = self.buffer(objects)?;
        let meshes_buf = self.buffer(meshes)?;
        let mut mapping_out = self.buffer(mapping)?.clone();
        let mut count_out = self.buffer(mapping_count)?.clone();
        let mut stats_out = self.buffer(stats)?.clone();
        let capacity = mapping_out.data.len() / 8;

        for id in threads_1d(groups, CULL_GROUP_SIZE) {
            if id >= params.item_count {
                continue;
            }
            let Some(object) = objects_buf.read::<ObjectDrawData>(id as usize) else {
                continue;
            };
            if params.collect_statistics != 0 {
                atomic_add(&mut stats_out, STATS_OBJECTS_TESTED, 1);
            }

            let sphere = Vec4::from(object.bounding_sphere);
            if !sphere_visible(&frame_data, &object.transform, sphere.xyz(), sphere.w) {
                continue;
            }
            let mesh = meshes_buf.read::<GpuMesh>(object.mesh_id as usize).unwrap_or_default();
            if params.collect_statistics != 0 {
                atomic_add(&mut stats_out, STATS_OBJECTS_VISIBLE, 1);
            }

            let base = atomic_add(&mut count_out, 0, mesh.meshlet_count);
            for local in 0..mesh.meshlet_count {
                let slot = (base + local) as usize;
                if slot < capacity {
                    mapping_out.write(slot, [object.object_id, local]);
                }
            }
        }

        *self.buffer_mut(mapping)? = mapping_out;
        *self.buffer_mut(mapping_count)? = count_out;
        *self.buffer_mut(stats)? = stats_out;
        Ok(())
    }

    fn generate_indirect_args(
        &mut self,
        params: IndirectArgsParams,
        count: BufferId,
        args: BufferId,
    ) -> Result<()> {
        let value = self.buffer(count)?.read::<u32>(params.count_index as usize).unwrap_or(0);
        let dims = if params.wrapped != 0 {
            kiln_core::math::wrapped_dispatch(value)
        } else {
            [div_round_up(value, params.group_size.max(1)), 1, 1]
        };
        let out = self.buffer_mut(args)?;
        for (i, d) in dims.into_iter().enumerate() {
            out.write(params.args_index as usize + i, d);
        }
        Ok(())
    }

    fn cull_meshlets(
        &mut self,
        params: CullParams,
        [frame, objects, meshes, meshlets, mapping, mapping_count]: [BufferId; 6],
        [surviving, surviving_count, stats]: [BufferId; 3],
        groups: [u32; 3],
    ) -> Result<()> {
        let frame_data = self.frame_uniforms(frame)?;
        let objects_buf = self.buffer(objects)?;
        let meshes_buf = self.buffer(meshes)?;
        let meshlets_buf = self.buffer(meshlets)?;
        let mapping_buf = self.buffer(mapping)?;
        let mapped = self.buffer(mapping_count)?.read::<u32>(0).unwrap_or(0);
        let mut surviving_out = self.buffer(surviving)?.clone();
        let mut count_out = self.buffer(surviving_count)?.clone();
        let mut stats_out = self.buffer(stats)?.clone();
        let capacity = surviving_out.data.len() / 8;

        for id in threads_1d(groups, CULL_GROUP_SIZE) {
            if id >= mapped {
                continue;
            }
            let Some([object_id, local]) = mapping_buf.read::<[u32; 2]>(id as usize) else {
                continue;
            };
            let Some(object) = objects_buf.read::<ObjectDrawData>(object_id as usize) else {
                continue;
            };
            let mesh = meshes_buf.read::<GpuMesh>(object.mesh_id as usize).unwrap_or_default();
            let meshlet_index = mesh.meshlet_start + local;
            let Some(meshlet) = meshlets_buf.read::<GpuMeshlet>(meshlet_index as usize) else {
                continue;
            };
            if params.collect_statistics != 0 {
                atomic_add(&mut stats_out, STATS_MESHLETS_TESTED, 1);
            }

            let center = Vec3::from(meshlet.center);
            if !sphere_visible(&frame_data, &object.transform, center, meshlet.radius) {
                continue;
            }
            if params.collect_statistics != 0 {
                atomic_add(&mut stats_out, STATS_MESHLETS_VISIBLE, 1);
                atomic_add(&mut stats_out, STATS_TRIANGLES_VISIBLE, meshlet.triangle_count);
            }

            let slot = atomic_add(&mut count_out, 0, 1) as usize;
            if slot < capacity {
                surviving_out.write(slot, [object_id, meshlet_index]);
            }
        }

        *self.buffer_mut(surviving)? = surviving_out;
        *self.buffer_mut(surviving_count)? = count_out;
        *self.buffer_mut(stats)? = stats_out;
        Ok(())
    }

    fn compact_primitives(
        &mut self,
        params: CompactParams,
        [meshlets, meshlet_triangles, surviving, surviving_count]: [BufferId; 4],
        indices: BufferId,
        draw: BufferId,
        groups: [u32; 3],
    ) -> Result<()> {
        let meshlets_buf = self.buffer(meshlets)?;
        let triangles_buf = self.buffer(meshlet_triangles)?;
        let surviving_buf = self.buffer(surviving)?;
        let survivors = self.buffer(surviving_count)?.read::<u32>(0).unwrap_or(0);
        let mut indices_out = self.buffer(indices)?.clone();
        let mut draw_out = self.buffer(draw)?.clone();

        for slot in threads_wrapped(groups) {
            if slot >= survivors {
                continue;
            }
            let Some([_, meshlet_index]) = surviving_buf.read::<[u32; 2]>(slot as usize) else {
                continue;
            };
            let Some(meshlet) = meshlets_buf.read::<GpuMeshlet>(meshlet_index as usize) else {
                continue;
            };

            let index_count = meshlet.triangle_count * 3;
            let base = atomic_add(&mut draw_out, 0, index_count);
            if base + index_count > params.index_capacity {
                // hand the range back so the draw never covers unwritten indices
                draw_out.write(0, base);
                continue;
            }
            for triangle in 0..meshlet.triangle_count {
                let word = triangles_buf
                    .read::<u32>((meshlet.triangle_offset + triangle) as usize)
                    .unwrap_or(0);
                for (corner, local) in unpack_triangle(word).into_iter().enumerate() {
                    let at = base + triangle * 3 + corner as u32;
                    indices_out.write(at as usize, encode_compacted_index(slot, triangle, local));
                }
            }
        }

        *self.buffer_mut(indices)? = indices_out;
        *self.buffer_mut(draw)? = draw_out;
        Ok(())
    }

    // ========================================================================
    // Material Sorting
    // ========================================================================

    fn count_materials(
        &mut self,
        params: ScreenParams,
        visibility: ImageId,
        [surviving, objects, meshlets, material_table]: [BufferId; 4],
        material_count: BufferId,
        groups: [u32; 3],
    ) -> Result<()> {
        let visibility_img = self.image(visibility)?;
        let classifier = Classifier {
            surviving: self.buffer(surviving)?,
            objects: self.buffer(objects)?,
            meshlets: self.buffer(meshlets)?,
            material_table: self.buffer(material_table)?,
        };
        let mut counts = self.buffer(material_count)?.clone();

        for p in threads_2d(groups, SCREEN_TILE_SIZE) {
            if p.x >= params.width || p.y >= params.height {
                continue;
            }
            let Some(material) = classifier.classify(visibility_img.load_u32(p.x, p.y)) else {
                continue;
            };
            if material < params.material_count {
                atomic_add(&mut counts, material as usize, 1);
            }
        }

        *self.buffer_mut(material_count)? = counts;
        Ok(())
    }

    fn prefix_sum(&mut self, params: PrefixSumParams, input: BufferId, output: BufferId) -> Result<()> {
        let values = self.buffer(input)?.to_vec::<u32>();
        let out = self.buffer_mut(output)?;
        let mut running = 0u32;
        for i in 0..params.count as usize {
            out.write(i, running);
            running = running.wrapping_add(values.get(i).copied().unwrap_or(0));
        }
        Ok(())
    }

    fn collect_pixels(
        &mut self,
        params: ScreenParams,
        visibility: ImageId,
        [surviving, objects, meshlets, material_table, material_start]: [BufferId; 5],
        material_cursor: BufferId,
        pixels: BufferId,
        groups: [u32; 3],
    ) -> Result<()> {
        let visibility_img = self.image(visibility)?;
        let classifier = Classifier {
            surviving: self.buffer(surviving)?,
            objects: self.buffer(objects)?,
            meshlets: self.buffer(meshlets)?,
            material_table: self.buffer(material_table)?,
        };
        let starts = self.buffer(material_start)?;
        let mut cursors = self.buffer(material_cursor)?.clone();
        let mut pixels_out = self.buffer(pixels)?.clone();

        for p in threads_2d(groups, SCREEN_TILE_SIZE) {
            if p.x >= params.width || p.y >= params.height {
                continue;
            }
            let Some(material) = classifier.classify(visibility_img.load_u32(p.x, p.y)) else {
                continue;
            };
            if material >= params.material_count {
                continue;
            }
            let start = starts.read::<u32>(material as usize).unwrap_or(0);
            let offset = atomic_add(&mut cursors, material as usize, 1);
            pixels_out.write((start + offset) as usize, [p.x, p.y]);
        }

        *self.buffer_mut(material_cursor)? = cursors;
        *self.buffer_mut(pixels)? = pixels_out;
        Ok(())
    }

    fn generate_material_args(
        &mut self,
        params: MaterialArgsParams,
        material_count: BufferId,
        args: BufferId,
        groups: [u32; 3],
    ) -> Result<()> {
        let counts = self.buffer(material_count)?.to_vec::<u32>();
        let out = self.buffer_mut(args)?;
        for i in threads_1d(groups, MATERIAL_ARGS_GROUP_SIZE) {
            if i >= params.material_count {
                continue;
            }
            let count = counts.get(i as usize).copied().unwrap_or(0);
            out.write(
                i as usize,
                IndirectDispatchCommand {
                    x: div_round_up(count, params.group_size.max(1)),
                    y: 1,
                    z: 1,
                },
            );
        }
        Ok(())
    }

    // ========================================================================
    // GBuffer
    // ========================================================================

    fn generate_gbuffer(&mut self, kernel: &Kernel, groups: [u32; 3]) -> Result<()> {
        let Kernel::GenerateGBuffer {
            params,
            pipeline,
            frame,
            material_count,
            material_start,
            pixels,
            visibility,
            surviving,
            objects,
            meshes,
            meshlets,
            meshlet_vertices,
            meshlet_triangles,
            vertices,
            materials,
            base_color,
            albedo,
            material,
            normal,
        } = *kernel
        else {
            return Ok(());
        };
        let GBufferParams { material_index, width, height, .. } = params;

        let shader: &dyn GBufferShader = match pipeline.and_then(|id| self.pipelines.get(id)) {
            Some(shader) => shader.as_ref(),
            None => &StandardGBuffer,
        };
        let frame_data = self.frame_uniforms(frame)?;
        let count = self.buffer(material_count)?.read::<u32>(material_index as usize).unwrap_or(0);
        let start = self.buffer(material_start)?.read::<u32>(material_index as usize).unwrap_or(0);
        let pixels_buf = self.buffer(pixels)?;
        let visibility_img = self.image(visibility)?;
        let geometry = Geometry {
            surviving: self.buffer(surviving)?,
            objects: self.buffer(objects)?,
            meshes: self.buffer(meshes)?,
            meshlets: self.buffer(meshlets)?,
            meshlet_vertices: self.buffer(meshlet_vertices)?,
            meshlet_triangles: self.buffer(meshlet_triangles)?,
            vertices: self.buffer(vertices)?,
        };
        let material_data = self
            .buffer(materials)?
            .read::<GpuMaterial>(material_index as usize)
            .unwrap_or_default();
        let texture = self.image(base_color)?;

        let mut albedo_out = self.image(albedo)?.clone();
        let mut material_out = self.image(material)?.clone();
        let mut normal_out = self.image(normal)?.clone();
        let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);

        for i in threads_1d(groups, MATERIAL_GROUP_SIZE) {
            if i >= count {
                continue;
            }
            let Some([x, y]) = pixels_buf.read::<[u32; 2]>((start + i) as usize) else {
                continue;
            };
            let Some((slot, triangle)) = decode_visibility(visibility_img.load_u32(x, y)) else {
                continue;
            };
            let Some(corners) = geometry.triangle(slot, triangle) else {
                continue;
            };

            let ndc = Vec2::new(
                (x as f32 + 0.5) / size.x * 2.0 - 1.0,
                1.0 - (y as f32 + 0.5) / size.y * 2.0,
            );
            let surface = corners.interpolate(&frame_data.view_projection, ndc);
            let input = SurfaceInput {
                pixel: UVec2::new(x, y),
                world_position: surface.position,
                normal: surface.normal,
                uv: surface.uv,
                material: material_data,
                base_color_sample: texture.sample(surface.uv, 0, 0.0, true),
            };
            let texels = shader.shade(&input);
            albedo_out.store(x, y, 0, 0, texels.albedo);
            material_out.store(x, y, 0, 0, texels.material);
            normal_out.store(x, y, 0, 0, texels.normal);
        }

        *self.image_mut(albedo)? = albedo_out;
        *self.image_mut(material)? = material_out;
        *self.image_mut(normal)? = normal_out;
        Ok(())
    }
}

// ============================================================================
// Vertex Fetch
// ============================================================================

/// Buffers a triangle is fetched from, given its surviving slot.
pub(super) struct Geometry<'d> {
    pub surviving: &'d SoftBuffer,
    pub objects: &'d SoftBuffer,
    pub meshes: &'d SoftBuffer,
    pub meshlets: &'d SoftBuffer,
    pub meshlet_vertices: &'d SoftBuffer,
    pub meshlet_triangles: &'d SoftBuffer,
    pub vertices: &'d SoftBuffer,
}

/// World-space corners of one triangle.
pub(super) struct TriangleCorners {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
    pub uvs: [Vec2; 3],
}

pub(super) struct Surface {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Geometry<'_> {
    /// Object and meshlet behind a surviving slot.
    pub fn resolve(&self, slot: u32) -> Option<(ObjectDrawData, GpuMesh, GpuMeshlet)> {
        let [object_id, meshlet_index] = self.surviving.read::<[u32; 2]>(slot as usize)?;
        let object = self.objects.read::<ObjectDrawData>(object_id as usize)?;
        let mesh = self.meshes.read::<GpuMesh>(object.mesh_id as usize)?;
        let meshlet = self.meshlets.read::<GpuMeshlet>(meshlet_index as usize)?;
        Some((object, mesh, meshlet))
    }

    /// Object-space vertex of a meshlet-local index.
    pub fn vertex(&self, mesh: &GpuMesh, meshlet: &GpuMeshlet, local: u32) -> Option<GpuVertex> {
        let index = self.meshlet_vertices.read::<u32>((meshlet.vertex_offset + local) as usize)?;
        self.vertices.read::<GpuVertex>((mesh.vertex_offset + index) as usize)
    }

    pub fn triangle(&self, slot: u32, triangle: u32) -> Option<TriangleCorners> {
        let (object, mesh, meshlet) = self.resolve(slot)?;
        let word = self
            .meshlet_triangles
            .read::<u32>((meshlet.triangle_offset + triangle) as usize)?;
        let normal_matrix = Mat3::from_mat4(object.normal_transform);

        let mut corners = TriangleCorners {
            positions: [Vec3::ZERO; 3],
            normals: [Vec3::ZERO; 3],
            uvs: [Vec2::ZERO; 3],
        };
        for (k, local) in unpack_triangle(word).into_iter().enumerate() {
            let v = self.vertex(&mesh, &meshlet, local)?;
            corners.positions[k] = object.transform.transform_point3(Vec3::from(v.position));
            corners.normals[k] = (normal_matrix * Vec3::from(v.normal)).normalize_or_zero();
            corners.uvs[k] = Vec2::new(v.u, v.v);
        }
        Some(corners)
    }
}

impl TriangleCorners {
    /// Perspective-correct attributes at an NDC position inside the projected triangle.
    pub fn interpolate(&self, view_projection: &Mat4, ndc: Vec2) -> Surface {
        let clip = self.positions.map(|p| *view_projection * p.extend(1.0));
        let inv_w = clip.map(|c| 1.0 / c.w.abs().max(1e-6).copysign(c.w));
        let screen = [0, 1, 2].map(|k| clip[k].xy() * inv_w[k]);

        let area = edge(screen[0], screen[1], screen[2]);
        let bary = if area.abs() > f32::EPSILON {
            Vec3::new(
                edge(screen[1], screen[2], ndc) / area,
                edge(screen[2], screen[0], ndc) / area,
                edge(screen[0], screen[1], ndc) / area,
            )
        } else {
            Vec3::new(1.0, 0.0, 0.0)
        };

        let weighted = bary * Vec3::from(inv_w);
        let sum = weighted.x + weighted.y + weighted.z;
        let b = if sum.abs() > f32::EPSILON { weighted / sum } else { bary };

        Surface {
            position: self.positions[0] * b.x + self.positions[1] * b.y + self.positions[2] * b.z,
            normal: (self.normals[0] * b.x + self.normals[1] * b.y + self.normals[2] * b.z)
                .normalize_or(Vec3::Z),
            uv: self.uvs[0] * b.x + self.uvs[1] * b.y + self.uvs[2] * b.z,
        }
    }
}

/// Signed parallelogram area of `(a, b, p)`.
#[inline]
pub(super) fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_dimensional_grids_cover_every_group() {
        let ids: Vec<u32> = threads_1d([2, 1, 1], 4).collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn wrapped_grids_linearize_rows() {
        let ids: Vec<u32> = threads_wrapped([3, 2, 1]).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn interpolation_recovers_corner_attributes() {
        let corners = TriangleCorners {
            positions: [Vec3::new(-1.0, -1.0, 0.5), Vec3::new(1.0, -1.0, 0.5), Vec3::new(-1.0, 1.0, 0.5)],
            normals: [Vec3::Z; 3],
            uvs: [Vec2::ZERO, Vec2::X, Vec2::Y],
        };
        let surface = corners.interpolate(&Mat4::IDENTITY, Vec2::new(1.0, -1.0));
        assert!((surface.uv - Vec2::X).length() < 1e-5);
        assert_eq!(surface.normal, Vec3::Z);
    }
}
