//! Material Sort
//!
//! Groups the visible pixels by material so the GBuffer can run one
//! coherent dispatch per material:
//!
//! ```text
//! visibility ──► Material Count ──► count[m]
//!                                      │
//!                               Prefix Sum ──► start[m]
//!                                                 │
//! visibility ──► Pixel Collect ──► pixels[start[m] + cursor[m]++] = (x, y)
//! ```
//!
//! Both screen kernels classify a texel the same way: decode the surviving
//! slot, then `material_table[object.material_table_offset +
//! meshlet.material_local_index]`. Background texels are skipped.
//!
//! Within one material, slot order follows atomic completion order and is
//! not stable across runs on hardware.

use kiln_core::math::div_round_up;

use super::{labels, SceneHandles};
use crate::command::{Kernel, SCREEN_TILE_SIZE, ScreenParams};
use crate::device::BufferDesc;
use crate::graph::{BufferHandle, GraphPass, ImageHandle, PassBuilder, PassResources, RenderContext};

fn screen_params(width: u32, height: u32, material_count: u32) -> ScreenParams {
    ScreenParams {
        width,
        height,
        material_count,
        _pad: 0,
    }
}

/// Groups of the 8×8-tiled screen kernels.
#[must_use]
pub fn screen_groups(width: u32, height: u32) -> [u32; 3] {
    [div_round_up(width, SCREEN_TILE_SIZE), div_round_up(height, SCREEN_TILE_SIZE), 1]
}

/// Classification inputs shared by both screen kernels.
#[derive(Debug, Clone, Copy)]
struct Classification {
    visibility: ImageHandle,
    surviving: BufferHandle,
    objects: BufferHandle,
    meshlets: BufferHandle,
    material_table: BufferHandle,
}

impl Classification {
    fn declare(
        builder: &mut PassBuilder<'_, '_>,
        visibility: ImageHandle,
        surviving: BufferHandle,
        scene: &SceneHandles,
    ) -> Self {
        builder.sample_image(visibility);
        for handle in [surviving, scene.objects, scene.meshlets, scene.material_table] {
            builder.read_storage(handle);
        }
        Self {
            visibility,
            surviving,
            objects: scene.objects,
            meshlets: scene.meshlets,
            material_table: scene.material_table,
        }
    }
}

// ============================================================================
// Material Count
// ============================================================================

#[derive(Clone, Copy)]
pub struct MaterialCountPass {
    inputs: Classification,
    material_count: BufferHandle,
    params: ScreenParams,
}

impl MaterialCountPass {
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        visibility: ImageHandle,
        surviving: BufferHandle,
        scene: &SceneHandles,
        materials: u32,
        (width, height): (u32, u32),
    ) -> Self {
        let inputs = Classification::declare(builder, visibility, surviving, scene);
        let material_count =
            builder.create_buffer(BufferDesc::storage::<u32>(labels::MATERIAL_COUNT, materials));
        builder.write_storage(material_count);
        Self {
            inputs,
            material_count,
            params: screen_params(width, height, materials),
        }
    }

    #[must_use]
    pub fn material_count(&self) -> BufferHandle {
        self.material_count
    }
}

impl<'a> GraphPass<'a> for MaterialCountPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let material_count = resources.buffer(self.material_count);
        ctx.clear_buffer(material_count);
        ctx.dispatch(
            Kernel::CountMaterials {
                params: self.params,
                visibility: resources.image(self.inputs.visibility),
                surviving: resources.buffer(self.inputs.surviving),
                objects: resources.buffer(self.inputs.objects),
                meshlets: resources.buffer(self.inputs.meshlets),
                material_table: resources.buffer(self.inputs.material_table),
                material_count,
            },
            screen_groups(self.params.width, self.params.height),
        );
    }
}

// ============================================================================
// Pixel Collect
// ============================================================================

#[derive(Clone, Copy)]
pub struct PixelCollectPass {
    inputs: Classification,
    material_start: BufferHandle,
    cursor: BufferHandle,
    pixels: BufferHandle,
    params: ScreenParams,
}

impl PixelCollectPass {
    /// `pixels` holds one `[x, y]` entry per screen pixel, the case where
    /// every pixel is covered.
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        visibility: ImageHandle,
        surviving: BufferHandle,
        scene: &SceneHandles,
        material_start: BufferHandle,
        materials: u32,
        (width, height): (u32, u32),
    ) -> Self {
        let inputs = Classification::declare(builder, visibility, surviving, scene);
        builder.read_storage(material_start);

        let cursor = builder.create_buffer(BufferDesc::storage::<u32>(labels::MATERIAL_CURSOR, materials));
        let pixels = builder.create_buffer(BufferDesc::storage::<[u32; 2]>(
            labels::PIXEL_COLLECTION,
            width.max(1) * height.max(1),
        ));
        builder.write_storage(cursor);
        builder.write_storage(pixels);

        Self {
            inputs,
            material_start,
            cursor,
            pixels,
            params: screen_params(width, height, materials),
        }
    }

    #[must_use]
    pub fn pixels(&self) -> BufferHandle {
        self.pixels
    }
}

impl<'a> GraphPass<'a> for PixelCollectPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let cursor = resources.buffer(self.cursor);
        ctx.clear_buffer(cursor);
        ctx.dispatch(
            Kernel::CollectPixels {
                params: self.params,
                visibility: resources.image(self.inputs.visibility),
                surviving: resources.buffer(self.inputs.surviving),
                objects: resources.buffer(self.inputs.objects),
                meshlets: resources.buffer(self.inputs.meshlets),
                material_table: resources.buffer(self.inputs.material_table),
                material_start: resources.buffer(self.material_start),
                material_cursor: cursor,
                pixels: resources.buffer(self.pixels),
            },
            screen_groups(self.params.width, self.params.height),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_groups_cover_partial_tiles() {
        assert_eq!(screen_groups(64, 64), [8, 8, 1]);
        assert_eq!(screen_groups(65, 1), [9, 1, 1]);
    }
}
