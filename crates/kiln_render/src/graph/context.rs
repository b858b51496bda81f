//! Execution-side views handed to each pass.

use kiln_core::{BufferId, ImageId};

use super::resource::{BufferHandle, ImageHandle};
use crate::command::{ClearValue, CommandStream, GpuCommand, Kernel, PhysicalResource, RasterDraw};

/// Read-only handle → physical resource table for one compiled frame.
#[derive(Clone, Copy)]
pub struct PassResources<'r> {
    physical: &'r [Option<PhysicalResource>],
}

impl<'r> PassResources<'r> {
    pub(crate) fn new(physical: &'r [Option<PhysicalResource>]) -> Self {
        Self { physical }
    }

    /// Physical buffer behind `handle`. Passes may only resolve handles they declared.
    #[must_use]
    pub fn buffer(&self, handle: BufferHandle) -> BufferId {
        match self.physical.get(handle.index()).copied().flatten() {
            Some(PhysicalResource::Buffer(id)) => id,
            other => {
                debug_assert!(false, "buffer handle {handle:?} resolved to {other:?}");
                BufferId::default()
            }
        }
    }

    #[must_use]
    pub fn image(&self, handle: ImageHandle) -> ImageId {
        match self.physical.get(handle.index()).copied().flatten() {
            Some(PhysicalResource::Image(id)) => id,
            other => {
                debug_assert!(false, "image handle {handle:?} resolved to {other:?}");
                ImageId::default()
            }
        }
    }
}

/// Command recording surface of a pass.
pub struct RenderContext<'s, 'a> {
    stream: &'s mut CommandStream<'a>,
}

impl<'s, 'a> RenderContext<'s, 'a> {
    pub(crate) fn new(stream: &'s mut CommandStream<'a>) -> Self {
        Self { stream }
    }

    pub fn clear_buffer(&mut self, buffer: BufferId) {
        self.stream.push(GpuCommand::ClearBuffer { buffer });
    }

    /// `data` must outlive the frame; allocate it through `PassBuilder::alloc_bytes`.
    pub fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &'a [u8]) {
        self.stream.push(GpuCommand::WriteBuffer { buffer, offset, data });
    }

    pub fn clear_image(&mut self, image: ImageId, value: ClearValue) {
        self.stream.push(GpuCommand::ClearImage { image, value });
    }

    pub fn dispatch(&mut self, kernel: Kernel, groups: [u32; 3]) {
        self.stream.push(GpuCommand::Dispatch { kernel, groups });
    }

    pub fn dispatch_indirect(&mut self, kernel: Kernel, args: BufferId, offset: u64) {
        self.stream.push(GpuCommand::DispatchIndirect { kernel, args, offset });
    }

    pub fn draw(&mut self, draw: RasterDraw) {
        self.stream.push(GpuCommand::Draw(draw));
    }

    /// Schedules a host readback. This is the only point where a frame waits for the device.
    pub fn readback(&mut self, buffer: BufferId, offset: u64, size: u64, tag: u32) {
        self.stream.push(GpuCommand::Readback { buffer, offset, size, tag });
    }
}
