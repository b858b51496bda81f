//! Software Render Device
//!
//! A deterministic CPU executor of the command stream. Every kernel runs the
//! same algorithm as its WGSL counterpart, one invocation after another, so
//! atomics resolve in invocation order and results are reproducible. The
//! rasterizer samples pixel centres with the top-left fill rule.
//!
//! The device also checks the graph's barrier contract: touching a resource
//! that an earlier pass wrote, without a barrier on that resource in between,
//! fails the submission with [`KilnError::MissingBarrier`].

mod gtao;
mod kernels;
mod memory;
mod raster;
mod shading;

use std::sync::Arc;

use bytemuck::Pod;
use glam::{UVec2, Vec2, Vec3, Vec4};
use kiln_core::{BufferId, ImageId, KilnError, PipelineId, Result};
use kiln_scene::GpuMaterial;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use self::memory::{SoftBuffer, SoftImage};
use super::{BufferDesc, ImageDesc, ReadbackData, RenderDevice};
use crate::command::{ClearValue, CommandStream, GpuCommand, Kernel, PhysicalResource};
use crate::graph::Access;

// ============================================================================
// Material Shaders
// ============================================================================

/// Reconstructed surface at one pixel, handed to a material's GBuffer shader.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceInput {
    pub pixel: UVec2,
    pub world_position: Vec3,
    /// Interpolated world-space normal (normalized).
    pub normal: Vec3,
    pub uv: Vec2,
    pub material: GpuMaterial,
    /// Base color texture sampled at `uv`.
    pub base_color_sample: Vec4,
}

/// The three GBuffer texels a material writes for one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GBufferTexels {
    pub albedo: Vec4,
    pub material: Vec4,
    pub normal: Vec4,
}

/// CPU counterpart of a material's compiled GBuffer compute pipeline.
pub trait GBufferShader: Send + Sync {
    fn shade(&self, input: &SurfaceInput) -> GBufferTexels;
}

/// The built-in GBuffer program; every material without a usable pipeline gets it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardGBuffer;

impl GBufferShader for StandardGBuffer {
    fn shade(&self, input: &SurfaceInput) -> GBufferTexels {
        let m = &input.material;
        let albedo = Vec4::from(m.base_color) * input.base_color_sample;
        let emissive = Vec3::new(m.emissive[0], m.emissive[1], m.emissive[2]) * m.emissive[3];
        GBufferTexels {
            albedo,
            material: Vec4::new(m.params[0], m.params[1], emissive.x, emissive.y),
            normal: input.normal.extend(emissive.z),
        }
    }
}

// ============================================================================
// Device
// ============================================================================

/// One executed dispatch, for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchRecord {
    pub pass: &'static str,
    pub kernel: &'static str,
    pub groups: [u32; 3],
}

pub struct SoftwareDevice {
    buffers: SlotMap<BufferId, SoftBuffer>,
    images: SlotMap<ImageId, SoftImage>,
    pipelines: SlotMap<PipelineId, Arc<dyn GBufferShader>>,
    dispatch_log: Vec<DispatchRecord>,
    presented: Option<ImageId>,
    validate_barriers: bool,
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            dispatch_log: Vec::new(),
            presented: None,
            validate_barriers: true,
        }
    }

    /// Disables barrier contract checks (on by default).
    #[must_use]
    pub fn without_barrier_validation(mut self) -> Self {
        self.validate_barriers = false;
        self
    }

    /// Registers a material GBuffer program and returns its pipeline id.
    pub fn register_gbuffer_shader(&mut self, shader: Arc<dyn GBufferShader>) -> PipelineId {
        self.pipelines.insert(shader)
    }

    pub fn remove_pipeline(&mut self, id: PipelineId) {
        self.pipelines.remove(id);
    }

    /// Dispatches executed by the last submission, in order.
    #[must_use]
    pub fn dispatch_log(&self) -> &[DispatchRecord] {
        &self.dispatch_log
    }

    /// Image the last submission transitioned to [`Access::Present`], if any.
    #[must_use]
    pub fn presented_image(&self) -> Option<ImageId> {
        self.presented
    }

    // ─── Inspection ──────────────────────────────────────────────────────

    pub fn read_buffer(&self, id: BufferId) -> Result<Vec<u8>> {
        Ok(self.buffer(id)?.data.clone())
    }

    pub fn read_buffer_as<T: Pod>(&self, id: BufferId) -> Result<Vec<T>> {
        Ok(self.buffer(id)?.to_vec())
    }

    /// Texel of layer 0, mip 0 as floats (`R32Uint` texels are converted).
    pub fn read_texel(&self, id: ImageId, x: u32, y: u32) -> Result<Vec4> {
        Ok(self.image(id)?.load(x, y, 0, 0))
    }

    /// Raw `R32Uint` texel of layer 0, mip 0.
    pub fn read_texel_u32(&self, id: ImageId, x: u32, y: u32) -> Result<u32> {
        Ok(self.image(id)?.load_u32(x, y))
    }

    pub fn image_desc(&self, id: ImageId) -> Result<&ImageDesc> {
        Ok(&self.image(id)?.desc)
    }

    // ─── Internal Access ─────────────────────────────────────────────────

    fn buffer(&self, id: BufferId) -> Result<&SoftBuffer> {
        self.buffers
            .get(id)
            .ok_or_else(|| KilnError::UnknownBuffer(format!("{id:?}")))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut SoftBuffer> {
        self.buffers
            .get_mut(id)
            .ok_or_else(|| KilnError::UnknownBuffer(format!("{id:?}")))
    }

    fn image(&self, id: ImageId) -> Result<&SoftImage> {
        self.images
            .get(id)
            .ok_or_else(|| KilnError::UnknownImage(format!("{id:?}")))
    }

    fn image_mut(&mut self, id: ImageId) -> Result<&mut SoftImage> {
        self.images
            .get_mut(id)
            .ok_or_else(|| KilnError::UnknownImage(format!("{id:?}")))
    }

    fn label(&self, resource: PhysicalResource) -> String {
        match resource {
            PhysicalResource::Buffer(id) => self
                .buffers
                .get(id)
                .map_or_else(|| format!("{id:?}"), |b| b.label.to_owned()),
            PhysicalResource::Image(id) => self
                .images
                .get(id)
                .map_or_else(|| format!("{id:?}"), |i| i.desc.label.to_owned()),
        }
    }

    fn read_indirect_args(&self, args: BufferId, offset: u64) -> Result<[u32; 3]> {
        let buffer = self.buffer(args)?;
        let start = offset as usize;
        let bytes = buffer.data.get(start..start + 12).ok_or_else(|| KilnError::OutOfBounds {
            label: buffer.label.to_owned(),
            offset,
            size: 12,
            capacity: buffer.data.len() as u64,
        })?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn clear_image(&mut self, id: ImageId, value: ClearValue) -> Result<()> {
        let image = self.image_mut(id)?;
        let texel = match value {
            ClearValue::Float(c) => image.encode_texel(Vec4::from(c)),
            ClearValue::Uint(v) => v.to_le_bytes().to_vec(),
            ClearValue::Depth(d) => d.to_le_bytes().to_vec(),
        };
        image.fill(&texel);
        Ok(())
    }
}

// ============================================================================
// Barrier Tracking
// ============================================================================

/// Resources written by a pass and not yet fenced by a barrier.
#[derive(Default)]
struct BarrierTracker {
    pending: FxHashMap<PhysicalResource, u32>,
    pass_seq: u32,
    pass_name: &'static str,
}

impl BarrierTracker {
    fn begin_pass(&mut self, name: &'static str) {
        self.pass_seq += 1;
        self.pass_name = name;
    }

    fn fence(&mut self, resource: PhysicalResource) {
        self.pending.remove(&resource);
    }

    /// `Err(resource)` when `resource` was written by an earlier pass without a fence.
    fn access(
        &mut self,
        resource: PhysicalResource,
        write: bool,
    ) -> std::result::Result<(), PhysicalResource> {
        if let Some(&seq) = self.pending.get(&resource)
            && seq != self.pass_seq
        {
            return Err(resource);
        }
        if write {
            self.pending.insert(resource, self.pass_seq);
        }
        Ok(())
    }
}

impl SoftwareDevice {
    fn track(
        &self,
        tracker: &mut BarrierTracker,
        reads: impl IntoIterator<Item = PhysicalResource>,
        writes: impl IntoIterator<Item = PhysicalResource>,
    ) -> Result<()> {
        if !self.validate_barriers {
            return Ok(());
        }
        let reads = reads.into_iter().map(|r| (r, false));
        let writes = writes.into_iter().map(|r| (r, true));
        for (resource, write) in reads.chain(writes) {
            tracker.access(resource, write).map_err(|resource| KilnError::MissingBarrier {
                pass: tracker.pass_name.to_owned(),
                resource: self.label(resource),
            })?;
        }
        Ok(())
    }

    fn track_kernel(&self, tracker: &mut BarrierTracker, kernel: &Kernel) -> Result<()> {
        let bindings = kernel.bindings();
        self.track(
            tracker,
            bindings.iter().filter_map(crate::command::Binding::read),
            bindings.iter().filter_map(crate::command::Binding::written),
        )
    }
}

// ============================================================================
// RenderDevice
// ============================================================================

impl RenderDevice for SoftwareDevice {
    fn backend_name(&self) -> &'static str {
        "software"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        Ok(self.buffers.insert(SoftBuffer::new(desc.label, desc.size)))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(id);
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        Ok(self.images.insert(SoftImage::new(desc)))
    }

    fn destroy_image(&mut self, id: ImageId) {
        self.images.remove(id);
    }

    fn contains_image(&self, id: ImageId) -> bool {
        self.images.contains_key(id)
    }

    fn contains_pipeline(&self, id: PipelineId) -> bool {
        self.pipelines.contains_key(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let buffer = self.buffer_mut(id)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buffer.data.len() {
            return Err(KilnError::OutOfBounds {
                label: buffer.label.to_owned(),
                offset,
                size: data.len() as u64,
                capacity: buffer.data.len() as u64,
            });
        }
        buffer.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn write_image(&mut self, id: ImageId, layer: u32, data: &[u8]) -> Result<()> {
        let image = self.image_mut(id)?;
        let (w, h) = image.extent(0);
        let bpt = image.desc.format.bytes_per_texel() as usize;
        let size = w as usize * h as usize * bpt;
        if data.len() != size || layer >= image.desc.layers {
            return Err(KilnError::OutOfBounds {
                label: image.desc.label.to_owned(),
                offset: u64::from(layer),
                size: data.len() as u64,
                capacity: size as u64,
            });
        }
        // layer-major layout: mip 0 of `layer` starts after the previous layers' chains
        let layer_bytes = image.data.len() / image.desc.layers as usize;
        let start = layer as usize * layer_bytes;
        image.data[start..start + size].copy_from_slice(data);
        Ok(())
    }

    fn submit(&mut self, stream: &CommandStream<'_>) -> Result<Vec<ReadbackData>> {
        let mut tracker = BarrierTracker::default();
        let mut readbacks = Vec::new();
        self.dispatch_log.clear();
        self.presented = None;

        for command in stream.commands() {
            match *command {
                GpuCommand::BeginPass { name, .. } => tracker.begin_pass(name),
                GpuCommand::EndPass => {}
                GpuCommand::Barrier(barrier) => {
                    tracker.fence(barrier.resource);
                    if let (Access::Present, PhysicalResource::Image(image)) = (barrier.after, barrier.resource) {
                        self.presented = Some(image);
                    }
                }
                GpuCommand::ClearBuffer { buffer } => {
                    self.track(&mut tracker, None, Some(PhysicalResource::Buffer(buffer)))?;
                    self.buffer_mut(buffer)?.data.fill(0);
                }
                GpuCommand::WriteBuffer { buffer, offset, data } => {
                    self.track(&mut tracker, None, Some(PhysicalResource::Buffer(buffer)))?;
                    RenderDevice::write_buffer(self, buffer, offset, data)?;
                }
                GpuCommand::ClearImage { image, value } => {
                    self.track(&mut tracker, None, Some(PhysicalResource::Image(image)))?;
                    self.clear_image(image, value)?;
                }
                GpuCommand::Dispatch { kernel, groups } => {
                    self.track_kernel(&mut tracker, &kernel)?;
                    self.dispatch_log.push(DispatchRecord {
                        pass: tracker.pass_name,
                        kernel: kernel.name(),
                        groups,
                    });
                    self.run_kernel(&kernel, groups)?;
                }
                GpuCommand::DispatchIndirect { kernel, args, offset } => {
                    self.track(&mut tracker, Some(PhysicalResource::Buffer(args)), None)?;
                    self.track_kernel(&mut tracker, &kernel)?;
                    let groups = self.read_indirect_args(args, offset)?;
                    self.dispatch_log.push(DispatchRecord {
                        pass: tracker.pass_name,
                        kernel: kernel.name(),
                        groups,
                    });
                    self.run_kernel(&kernel, groups)?;
                }
                GpuCommand::Draw(draw) => {
                    self.track(&mut tracker, draw.reads(), draw.writes())?;
                    self.rasterize(&draw)?;
                }
                GpuCommand::Readback { buffer, offset, size, tag } => {
                    self.track(&mut tracker, Some(PhysicalResource::Buffer(buffer)), None)?;
                    let source = self.buffer(buffer)?;
                    let start = offset as usize;
                    let bytes = source
                        .data
                        .get(start..start + size as usize)
                        .ok_or_else(|| KilnError::OutOfBounds {
                            label: source.label.to_owned(),
                            offset,
                            size,
                            capacity: source.data.len() as u64,
                        })?;
                    readbacks.push(ReadbackData {
                        tag,
                        bytes: bytes.to_vec(),
                    });
                }
            }
        }
        Ok(readbacks)
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }

    fn allocated_bytes(&self) -> u64 {
        let buffers: u64 = self.buffers.values().map(|b| b.data.len() as u64).sum();
        let images: u64 = self.images.values().map(|i| i.data.len() as u64).sum();
        buffers + images
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Barrier, GpuCommand};
    use crate::device::BufferUsage;
    use crate::graph::{Access, PassKind};

    fn buffer(device: &mut SoftwareDevice, label: &'static str) -> BufferId {
        device
            .create_buffer(&BufferDesc {
                label,
                size: 16,
                usage: BufferUsage::STORAGE,
            })
            .unwrap()
    }

    #[test]
    fn unfenced_cross_pass_access_is_rejected() {
        let mut device = SoftwareDevice::new();
        let target = buffer(&mut device, "counter");

        let mut stream = CommandStream::new();
        stream.push(GpuCommand::BeginPass { name: "Clear", kind: PassKind::Transfer });
        stream.push(GpuCommand::ClearBuffer { buffer: target });
        stream.push(GpuCommand::EndPass);
        stream.push(GpuCommand::BeginPass { name: "Readback", kind: PassKind::Transfer });
        stream.push(GpuCommand::Readback { buffer: target, offset: 0, size: 4, tag: 0 });
        stream.push(GpuCommand::EndPass);

        match device.submit(&stream) {
            Err(KilnError::MissingBarrier { pass, resource }) => {
                assert_eq!(pass, "Readback");
                assert_eq!(resource, "counter");
            }
            other => panic!("expected a missing barrier, got {other:?}"),
        }
    }

    #[test]
    fn fenced_access_is_accepted() {
        let mut device = SoftwareDevice::new();
        let target = buffer(&mut device, "counter");
        device.write_buffer(target, 0, &7u32.to_le_bytes()).unwrap();

        let mut stream = CommandStream::new();
        stream.push(GpuCommand::BeginPass { name: "Write", kind: PassKind::Transfer });
        stream.push(GpuCommand::WriteBuffer { buffer: target, offset: 4, data: &[1, 0, 0, 0] });
        stream.push(GpuCommand::EndPass);
        stream.push(GpuCommand::BeginPass { name: "Readback", kind: PassKind::Transfer });
        stream.push(GpuCommand::Barrier(Barrier {
            resource: PhysicalResource::Buffer(target),
            before: Access::TransferWrite,
            after: Access::HostRead,
        }));
        stream.push(GpuCommand::Readback { buffer: target, offset: 0, size: 8, tag: 3 });
        stream.push(GpuCommand::EndPass);

        let readbacks = device.submit(&stream).unwrap();
        assert_eq!(readbacks.len(), 1);
        assert_eq!(readbacks[0].tag, 3);
        assert_eq!(readbacks[0].bytes, vec![7, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn standard_gbuffer_packs_emissive_across_targets() {
        let input = SurfaceInput {
            pixel: UVec2::ZERO,
            world_position: Vec3::ZERO,
            normal: Vec3::Z,
            uv: Vec2::ZERO,
            material: GpuMaterial {
                base_color: [0.5, 0.5, 0.5, 1.0],
                emissive: [1.0, 0.5, 0.25, 2.0],
                params: [0.3, 0.7, 0.0, 0.0],
            },
            base_color_sample: Vec4::ONE,
        };
        let texels = StandardGBuffer.shade(&input);
        assert_eq!(texels.material, Vec4::new(0.3, 0.7, 2.0, 1.0));
        assert_eq!(texels.normal, Vec4::new(0.0, 0.0, 1.0, 0.5));
    }
}
