//! Indirect Argument Generation
//!
//! Wherever a CPU would size a dispatch, the pipeline instead turns a
//! device-side count into an `IndirectDispatchCommand`:
//!
//! - [`IndirectArgsPass`]: one count → one command, either
//!   `ceil(count / group_size)` groups or the *wrapped* one-thread-per-group
//!   layout that spreads counts beyond 65 535 groups across Y.
//! - [`MaterialArgsPass`]: one command per material from the histogram,
//!   `ceil(count[i] / 32)` groups. Empty materials get a valid zero-sized
//!   dispatch, never a skipped one.

use kiln_core::math::div_round_up;
use kiln_scene::IndirectDispatchCommand;

use super::labels;
use crate::command::{
    IndirectArgsParams, Kernel, MATERIAL_ARGS_GROUP_SIZE, MATERIAL_GROUP_SIZE, MaterialArgsParams,
};
use crate::device::{BufferDesc, BufferUsage};
use crate::graph::{Access, BufferHandle, GraphPass, PassBuilder, PassResources, RenderContext};

/// Byte stride between consecutive commands of an args buffer.
pub const DISPATCH_COMMAND_STRIDE: u64 = std::mem::size_of::<IndirectDispatchCommand>() as u64;

/// Sizing rule of an [`IndirectArgsPass`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchSizing {
    /// `ceil(count / group_size)` groups along X.
    Groups(u32),
    /// One single-thread group per item, wrapped across X and Y.
    Wrapped,
}

fn args_desc(label: &'static str, count: u32) -> BufferDesc {
    BufferDesc::storage::<IndirectDispatchCommand>(label, count).with_usage(BufferUsage::INDIRECT)
}

#[derive(Clone, Copy)]
pub struct IndirectArgsPass {
    count: BufferHandle,
    args: BufferHandle,
    params: IndirectArgsParams,
}

impl IndirectArgsPass {
    /// Reads `u32` slot 0 of `count` and creates the args buffer `label`.
    pub fn setup(
        builder: &mut PassBuilder<'_, '_>,
        label: &'static str,
        count: BufferHandle,
        sizing: DispatchSizing,
    ) -> Self {
        builder.read_storage(count);
        let args = builder.create_buffer(args_desc(label, 1));
        builder.write_storage(args);

        let (group_size, wrapped) = match sizing {
            DispatchSizing::Groups(size) => (size.max(1), 0),
            DispatchSizing::Wrapped => (1, 1),
        };
        Self {
            count,
            args,
            params: IndirectArgsParams {
                group_size,
                wrapped,
                count_index: 0,
                args_index: 0,
            },
        }
    }

    #[must_use]
    pub fn args(&self) -> BufferHandle {
        self.args
    }
}

impl<'a> GraphPass<'a> for IndirectArgsPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        ctx.dispatch(
            Kernel::GenerateIndirectArgs {
                params: self.params,
                count: resources.buffer(self.count),
                args: resources.buffer(self.args),
            },
            [1, 1, 1],
        );
    }
}

// ============================================================================
// Material Variant
// ============================================================================

#[derive(Clone, Copy)]
pub struct MaterialArgsPass {
    material_count: BufferHandle,
    args: BufferHandle,
    materials: u32,
}

impl MaterialArgsPass {
    pub fn setup(builder: &mut PassBuilder<'_, '_>, material_count: BufferHandle, materials: u32) -> Self {
        builder.read_storage(material_count);
        let args = builder.create_buffer(args_desc(labels::MATERIAL_ARGS, materials));
        builder.write_storage(args);
        Self {
            material_count,
            args,
            materials,
        }
    }

    #[must_use]
    pub fn args(&self) -> BufferHandle {
        self.args
    }
}

impl<'a> GraphPass<'a> for MaterialArgsPass {
    fn execute(&self, ctx: &mut RenderContext<'_, 'a>, resources: &PassResources<'_>) {
        let args = resources.buffer(self.args);
        ctx.clear_buffer(args);
        ctx.dispatch(
            Kernel::GenerateMaterialArgs {
                params: MaterialArgsParams {
                    material_count: self.materials,
                    group_size: MATERIAL_GROUP_SIZE,
                    _pad: [0; 2],
                },
                material_count: resources.buffer(self.material_count),
                args,
            },
            [div_round_up(self.materials, MATERIAL_ARGS_GROUP_SIZE).max(1), 1, 1],
        );
    }
}

/// Declares `args` as the indirect argument source of a pass.
pub fn read_args(builder: &mut PassBuilder<'_, '_>, args: BufferHandle) -> BufferHandle {
    builder.read_buffer(args, Access::IndirectArgs)
}
