//! GPU Culling & Primitive Compaction
//!
//! Three passes shrink the scene down to one index buffer:
//!
//! 1. **Object Cull**: one thread per render object tests its world bounding
//!    sphere and appends one `[object_id, local_meshlet]` mapping entry per
//!    meshlet of every survivor.
//! 2. **Meshlet Cull**: one thread per mapping entry (indirect) tests the
//!    meshlet sphere and appends `[object_id, global_meshlet]` survivors.
//! 3. **Primitive Compaction**: one single-thread group per survivor
//!    (wrapped indirect) reserves `3 × triangle_count` indices and writes the
//!    packed `slot | triangle | vertex` words plus the indirect draw.
//!
//! Counters are transient and pooled, so every pass zeroes the counters it
//! appends to before dispatching.

use kiln_core::math::div_round_up;
use kiln_scene::IndirectIndexedCommand;

use super::{labels, SceneHandles};
use crate::command::{CULL_GROUP_SIZE, CompactParams, CullParams, Kernel, STATS_SLOT_COUNT};
use crate::device::{BufferDesc, BufferUsage};
use crate::graph::{Access, BufferHandle, GraphPass, PassBuilder, PassResources, RenderContext};

fn cull_params(item_count: u32, collect_statistics: bool) -> CullParams {
    CullParams {
        item_count,
        collect_statistics: u32::from(collect_statistics),
        _pad: [0; 2],
    }
}

// ============================================================================
// Object Cull
// ============================================================================

#[derive(Clone, Copy)]
pub struct ObjectCullPass {
    frame: BufferHandle,
    objects: BufferHandle,
    meshes: BufferHandle,
    mapping: BufferHandle,
    mapping_count: BufferHandle,
    stats: BufferHandle,
    object_count: u32,
    collect_statistics: bool,
}

impl ObjectCullPass {
    /// The mapping buffer holds one entry per scene meshlet, the worst case
    /// of every object surviving.
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        frame: BufferHandle,
        scene: &SceneHandles,
        object_count: u32,
        meshlet_count: u32,
        collect_statistics: bool,
    ) -> Self {
        builder.read_buffer(frame, Access::Uniform);
        builder.read_storage(scene.objects);
        builder.read_storage(scene.meshes);

        let mapping = builder.create_buffer(BufferDesc::storage::<[u32; 2]>(
            labels::MESHLET_MAPPING,
            meshlet_count,
        ));
        let mapping_count =
            builder.create_buffer(BufferDesc::storage::<u32>(labels::MESHLET_MAPPING_COUNT, 4));
        let stats = builder.create_buffer(BufferDesc::storage::<u32>(
            labels::CULL_STATISTICS,
            STATS_SLOT_COUNT as u32,
        ));
        for handle in [mapping, mapping_count, stats] {
            builder.write_storage(handle);
        }

        Self {
            frame,
            objects: scene.objects,
            meshes: scene.meshes,
            mapping,
            mapping_count,
            stats,
            object_count,
            collect_statistics,
        }
    }

    #[must_use]
    pub fn mapping(&self) -> BufferHandle {
        self.mapping
    }

    #[must_use]
    pub fn mapping_count(&self) -> BufferHandle {
        self.mapping_count
    }

    #[must_use]
    pub fn stats(&self) -> BufferHandle {
        self.stats
    }
}

impl<'a> GraphPass<'a> for ObjectCullPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let mapping_count = resources.buffer(self.mapping_count);
        let stats = resources.buffer(self.stats);
        ctx.clear_buffer(mapping_count);
        ctx.clear_buffer(stats);
        ctx.dispatch(
            Kernel::CullObjects {
                params: cull_params(self.object_count, self.collect_statistics),
                frame: resources.buffer(self.frame),
                objects: resources.buffer(self.objects),
                meshes: resources.buffer(self.meshes),
                mapping: resources.buffer(self.mapping),
                mapping_count,
                stats,
            },
            [div_round_up(self.object_count, CULL_GROUP_SIZE), 1, 1],
        );
    }
}

// ============================================================================
// Meshlet Cull
// ============================================================================

#[derive(Clone, Copy)]
pub struct MeshletCullPass {
    frame: BufferHandle,
    objects: BufferHandle,
    meshes: BufferHandle,
    meshlets: BufferHandle,
    mapping: BufferHandle,
    mapping_count: BufferHandle,
    args: BufferHandle,
    surviving: BufferHandle,
    surviving_count: BufferHandle,
    stats: BufferHandle,
    collect_statistics: bool,
}

impl MeshletCullPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        frame: BufferHandle,
        scene: &SceneHandles,
        objects: &ObjectCullPass,
        args: BufferHandle,
        meshlet_count: u32,
        collect_statistics: bool,
    ) -> Self {
        builder.read_buffer(frame, Access::Uniform);
        for handle in [scene.objects, scene.meshes, scene.meshlets, objects.mapping, objects.mapping_count] {
            builder.read_storage(handle);
        }
        builder.read_buffer(args, Access::IndirectArgs);

        let surviving = builder.create_buffer(BufferDesc::storage::<[u32; 2]>(
            labels::SURVIVING_MESHLETS,
            meshlet_count,
        ));
        let surviving_count =
            builder.create_buffer(BufferDesc::storage::<u32>(labels::SURVIVING_COUNT, 4));
        for handle in [surviving, surviving_count, objects.stats] {
            builder.write_storage(handle);
        }

        Self {
            frame,
            objects: scene.objects,
            meshes: scene.meshes,
            meshlets: scene.meshlets,
            mapping: objects.mapping,
            mapping_count: objects.mapping_count,
            args,
            surviving,
            surviving_count,
            stats: objects.stats,
            collect_statistics,
        }
    }

    #[must_use]
    pub fn surviving(&self) -> BufferHandle {
        self.surviving
    }

    #[must_use]
    pub fn surviving_count(&self) -> BufferHandle {
        self.surviving_count
    }

    #[must_use]
    pub fn stats(&self) -> BufferHandle {
        self.stats
    }
}

impl<'a> GraphPass<'a> for MeshletCullPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let surviving_count = resources.buffer(self.surviving_count);
        ctx.clear_buffer(surviving_count);
        ctx.dispatch_indirect(
            Kernel::CullMeshlets {
                // the thread guard reads the device-side mapping count
                params: cull_params(0, self.collect_statistics),
                frame: resources.buffer(self.frame),
                objects: resources.buffer(self.objects),
                meshes: resources.buffer(self.meshes),
                meshlets: resources.buffer(self.meshlets),
                mapping: resources.buffer(self.mapping),
                mapping_count: resources.buffer(self.mapping_count),
                surviving: resources.buffer(self.surviving),
                surviving_count,
                stats: resources.buffer(self.stats),
            },
            resources.buffer(self.args),
            0,
        );
    }
}

// ============================================================================
// Primitive Compaction
// ============================================================================

#[derive(Clone, Copy)]
pub struct CompactPass<'a> {
    meshlets: BufferHandle,
    meshlet_triangles: BufferHandle,
    surviving: BufferHandle,
    surviving_count: BufferHandle,
    args: BufferHandle,
    indices: BufferHandle,
    draw: BufferHandle,
    index_capacity: u32,
    initial_draw: &'a [u8],
}

impl<'a> CompactPass<'a> {
    /// The index buffer is sized for the scene's full index count.
    pub fn setup(
        builder: &mut PassBuilder<'_, 'a>,
        scene: &SceneHandles,
        meshlets: &MeshletCullPass,
        args: BufferHandle,
        index_count: u32,
    ) -> Self {
        for handle in [scene.meshlets, scene.meshlet_triangles, meshlets.surviving, meshlets.surviving_count] {
            builder.read_storage(handle);
        }
        builder.read_buffer(args, Access::IndirectArgs);

        let indices = builder.create_buffer(
            BufferDesc::storage::<u32>(labels::COMPACTED_INDICES, index_count)
                .with_usage(BufferUsage::INDEX),
        );
        let draw = builder.create_buffer(
            BufferDesc::storage::<IndirectIndexedCommand>(labels::DRAW_ARGS, 1)
                .with_usage(BufferUsage::INDIRECT),
        );
        builder.write_storage(indices);
        builder.write_storage(draw);

        Self {
            meshlets: scene.meshlets,
            meshlet_triangles: scene.meshlet_triangles,
            surviving: meshlets.surviving,
            surviving_count: meshlets.surviving_count,
            args,
            indices,
            draw,
            index_capacity: index_count,
            initial_draw: builder.alloc_pod(&IndirectIndexedCommand {
                index_count: 0,
                instance_count: 1,
                first_index: 0,
                base_vertex: 0,
                first_instance: 0,
            }),
        }
    }

    #[must_use]
    pub fn indices(&self) -> BufferHandle {
        self.indices
    }

    #[must_use]
    pub fn draw_args(&self) -> BufferHandle {
        self.draw
    }
}

impl<'a> GraphPass<'a> for CompactPass<'a> {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let draw = resources.buffer(self.draw);
        ctx.write_buffer(draw, 0, self.initial_draw);
        ctx.dispatch_indirect(
            Kernel::CompactPrimitives {
                params: CompactParams {
                    index_capacity: self.index_capacity,
                    _pad: [0; 3],
                },
                meshlets: resources.buffer(self.meshlets),
                meshlet_triangles: resources.buffer(self.meshlet_triangles),
                surviving: resources.buffer(self.surviving),
                surviving_count: resources.buffer(self.surviving_count),
                indices: resources.buffer(self.indices),
                draw,
            },
            resources.buffer(self.args),
            0,
        );
    }
}
