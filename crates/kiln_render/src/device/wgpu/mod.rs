//! wgpu Render Device
//!
//! Executes the command stream on a real GPU. Each [`Kernel`] maps to one
//! WGSL compute program whose bind group mirrors [`Kernel::bindings`];
//! parameter blocks of a whole stream are packed into one uniform buffer and
//! bound with dynamic offsets. Raster draws pull vertices from storage
//! buffers through the compacted index buffer.
//!
//! wgpu tracks resource states itself, so graph barriers only delimit debug
//! groups here. Readbacks are copied into mapped staging buffers and are the
//! only point where `submit` blocks.

mod pipelines;
mod resources;

use std::num::NonZeroU64;
use std::sync::Arc;

use kiln_core::{BufferId, ImageId, KilnError, PipelineId, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use self::pipelines::{LayoutKey, PipelineCache, Program, SlotLayout};
use self::resources::{GpuBuffer, GpuImage, buffer_descriptor, texture_descriptor};
use super::{BufferDesc, ImageDesc, ReadbackData, RenderDevice};
use crate::command::{
    Binding, BindingList, ClearValue, CommandStream, GpuCommand, Kernel, RasterDraw, RasterKind,
    SamplerKind,
};

pub use self::pipelines::{STANDARD_GBUFFER_SOURCE, gbuffer_program};

/// Storage buffers the GBuffer program binds in one stage.
const REQUIRED_STORAGE_BUFFERS: u32 = 12;

/// Adapter selection for [`WgpuDevice::request`].
#[derive(Debug, Clone)]
pub struct WgpuDeviceSettings {
    pub power_preference: wgpu::PowerPreference,
    pub force_fallback_adapter: bool,
    pub required_features: wgpu::Features,
}

impl Default for WgpuDeviceSettings {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            required_features: wgpu::Features::empty(),
        }
    }
}

struct Samplers {
    linear_clamp: wgpu::Sampler,
    linear_repeat: wgpu::Sampler,
    shadow_compare: wgpu::Sampler,
}

impl Samplers {
    fn new(device: &wgpu::Device) -> Self {
        let linear = |label, address_mode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Linear,
                ..Default::default()
            })
        };
        Self {
            linear_clamp: linear("Linear Clamp Sampler", wgpu::AddressMode::ClampToEdge),
            linear_repeat: linear("Linear Repeat Sampler", wgpu::AddressMode::Repeat),
            shadow_compare: device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("Shadow Compare Sampler"),
                address_mode_u: wgpu::AddressMode::ClampToEdge,
                address_mode_v: wgpu::AddressMode::ClampToEdge,
                compare: Some(wgpu::CompareFunction::LessEqual),
                ..Default::default()
            }),
        }
    }

    fn get(&self, kind: SamplerKind) -> &wgpu::Sampler {
        match kind {
            SamplerKind::LinearClamp => &self.linear_clamp,
            SamplerKind::LinearRepeat => &self.linear_repeat,
            SamplerKind::ShadowCompare => &self.shadow_compare,
        }
    }
}

/// Uniform buffer holding every parameter block of one stream.
struct ParamsBuffer {
    buffer: wgpu::Buffer,
    capacity: u64,
    generation: u64,
}

impl ParamsBuffer {
    fn new(device: &wgpu::Device, capacity: u64, generation: u64) -> Self {
        Self {
            buffer: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Kernel Parameters"),
                size: capacity,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            capacity,
            generation,
        }
    }
}

type BindGroupKey = (LayoutKey, BindingList, u64);

/// Resource owned while a bind group is assembled.
enum BoundResource<'d> {
    Buffer(&'d wgpu::Buffer),
    View(wgpu::TextureView),
    Sampler(&'d wgpu::Sampler),
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
    uniform_alignment: u64,
    buffers: SlotMap<BufferId, GpuBuffer>,
    images: SlotMap<ImageId, GpuImage>,
    materials: SlotMap<PipelineId, String>,
    pipelines: PipelineCache,
    samplers: Samplers,
    params: ParamsBuffer,
    bind_groups: FxHashMap<BindGroupKey, wgpu::BindGroup>,
    /// First error reported by the device callbacks since the last check.
    errors: Arc<Mutex<Option<KilnError>>>,
}

impl WgpuDevice {
    /// Blocking [`WgpuDevice::request`] with default settings.
    pub fn new() -> Result<Self> {
        pollster::block_on(Self::request(&WgpuDeviceSettings::default()))
    }

    /// Requests a headless adapter and device able to run the pipeline.
    pub async fn request(settings: &WgpuDeviceSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: settings.force_fallback_adapter,
            })
            .await
            .map_err(|e| KilnError::AdapterRequestFailed(e.to_string()))?;

        let downlevel = adapter.get_downlevel_capabilities();
        for (flag, name) in [
            (wgpu::DownlevelFlags::COMPUTE_SHADERS, "compute shaders"),
            (wgpu::DownlevelFlags::INDIRECT_EXECUTION, "indirect execution"),
            (wgpu::DownlevelFlags::VERTEX_STORAGE, "vertex stage storage buffers"),
        ] {
            if !downlevel.flags.contains(flag) {
                return Err(KilnError::MissingCapability(name));
            }
        }
        if adapter.limits().max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(KilnError::MissingCapability("12 storage buffers per shader stage"));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Kiln Device"),
                required_features: settings.required_features,
                required_limits: wgpu::Limits {
                    max_storage_buffers_per_shader_stage: REQUIRED_STORAGE_BUFFERS,
                    ..wgpu::Limits::default()
                },
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let adapter_info = adapter.get_info();
        log::info!(
            "wgpu device ready: {} ({:?}, {:?})",
            adapter_info.name,
            adapter_info.backend,
            adapter_info.device_type
        );
        Ok(Self::from_device(device, queue, adapter_info))
    }

    /// Wraps an existing device, e.g. one shared with a windowing layer.
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, adapter_info: wgpu::AdapterInfo) -> Self {
        let errors: Arc<Mutex<Option<KilnError>>> = Arc::default();
        {
            let errors = errors.clone();
            device.set_device_lost_callback(move |reason, message| {
                log::error!("Device lost: {reason:?} {message}");
                errors
                    .lock()
                    .get_or_insert(KilnError::DeviceLost(format!("{reason:?}: {message}")));
            });
        }
        {
            let errors = errors.clone();
            device.on_uncaptured_error(Arc::new(move |e| {
                log::error!("Caught wgpu error: {e}");
                errors.lock().get_or_insert(KilnError::Validation(e.to_string()));
            }));
        }

        let uniform_alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let samplers = Samplers::new(&device);
        let params = ParamsBuffer::new(&device, 64 * uniform_alignment, 0);
        Self {
            device,
            queue,
            adapter_info,
            uniform_alignment,
            buffers: SlotMap::with_key(),
            images: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            pipelines: PipelineCache::default(),
            samplers,
            params,
            bind_groups: FxHashMap::default(),
            errors,
        }
    }

    #[must_use]
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    #[must_use]
    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn wgpu_queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The texture behind an image, e.g. to present the final image.
    #[must_use]
    pub fn texture(&self, id: ImageId) -> Option<&wgpu::Texture> {
        self.images.get(id).map(|image| &image.texture)
    }

    /// Compiles a material GBuffer program.
    ///
    /// `shade_surface` must define
    /// `fn shade_surface(input: SurfaceInput) -> GBufferTexels`; the
    /// surrounding program (bindings, surface reconstruction, stores) is
    /// shared with the built-in [`STANDARD_GBUFFER_SOURCE`].
    pub fn register_gbuffer_shader(&mut self, label: &str, shade_surface: &str) -> Result<PipelineId> {
        let hash = self
            .pipelines
            .compile(&self.device, label, &gbuffer_program(shade_surface))
            .inspect_err(|_| {
                // the module error was also reported to the uncaptured handler
                self.errors.lock().take();
            })?;
        let id = self.materials.insert(label.to_owned());
        self.pipelines.register_program(Program::Material(id), hash);
        Ok(id)
    }

    pub fn remove_pipeline(&mut self, id: PipelineId) {
        if self.materials.remove(id).is_some() {
            self.pipelines.forget_program(Program::Material(id));
        }
    }

    /// Reads a whole buffer back, blocking until the device is idle.
    pub fn read_buffer(&mut self, id: BufferId) -> Result<Vec<u8>> {
        let size = self.buffer(id)?.desc.size;
        let mut stream = CommandStream::new();
        stream.push(GpuCommand::Readback {
            buffer: id,
            offset: 0,
            size,
            tag: 0,
        });
        let mut readbacks = self.submit(&stream)?;
        Ok(readbacks.pop().map(|r| r.bytes).unwrap_or_default())
    }

    // ─── Internal Access ─────────────────────────────────────────────────

    fn buffer(&self, id: BufferId) -> Result<&GpuBuffer> {
        self.buffers
            .get(id)
            .ok_or_else(|| KilnError::UnknownBuffer(format!("{id:?}")))
    }

    fn image(&self, id: ImageId) -> Result<&GpuImage> {
        self.images
            .get(id)
            .ok_or_else(|| KilnError::UnknownImage(format!("{id:?}")))
    }

    fn check_errors(&self) -> Result<()> {
        match self.errors.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|e| KilnError::DeviceLost(e.to_string()))
    }

    // ─── Bind Groups ─────────────────────────────────────────────────────

    fn slot_layout(&self, binding: &Binding) -> Result<SlotLayout> {
        Ok(match *binding {
            Binding::Uniform(_) => SlotLayout::Uniform,
            Binding::StorageRead(_) => SlotLayout::Storage { read_only: true },
            Binding::StorageReadWrite(_) => SlotLayout::Storage { read_only: false },
            Binding::Texture { image, .. } => {
                let desc = &self.image(image)?.desc;
                SlotLayout::Texture {
                    format: desc.format,
                    dimension: desc.dimension,
                }
            }
            Binding::StorageTexture { image, .. } => SlotLayout::StorageTexture {
                format: self.image(image)?.desc.format,
            },
            Binding::Sampler(kind) => SlotLayout::Sampler(kind),
        })
    }

    fn layout_key(&self, params_size: u64, bindings: &[Binding]) -> Result<LayoutKey> {
        let mut key = LayoutKey::new();
        key.push(SlotLayout::Params(params_size));
        for binding in bindings {
            key.push(self.slot_layout(binding)?);
        }
        Ok(key)
    }

    fn bind_group(
        &mut self,
        key: &LayoutKey,
        visibility: wgpu::ShaderStages,
        params_size: u64,
        bindings: BindingList,
    ) -> Result<wgpu::BindGroup> {
        let cache_key = (key.clone(), bindings, self.params.generation);
        if let Some(group) = self.bind_groups.get(&cache_key) {
            return Ok(group.clone());
        }
        let layout = self.pipelines.layout(&self.device, key, visibility).bind_group.clone();

        let mut bound = Vec::with_capacity(cache_key.1.len());
        for binding in &cache_key.1 {
            bound.push(match *binding {
                Binding::Uniform(id) | Binding::StorageRead(id) | Binding::StorageReadWrite(id) => {
                    BoundResource::Buffer(&self.buffer(id)?.buffer)
                }
                Binding::Texture { image, mip } => BoundResource::View(self.image(image)?.sampled_view(mip)),
                Binding::StorageTexture { image, mip } => {
                    BoundResource::View(self.image(image)?.subresource_view(mip, 0))
                }
                Binding::Sampler(kind) => BoundResource::Sampler(self.samplers.get(kind)),
            });
        }

        let mut entries = Vec::with_capacity(bound.len() + 1);
        entries.push(wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &self.params.buffer,
                offset: 0,
                size: NonZeroU64::new(params_size),
            }),
        });
        for (index, resource) in bound.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: index as u32 + 1,
                resource: match resource {
                    BoundResource::Buffer(buffer) => buffer.as_entire_binding(),
                    BoundResource::View(view) => wgpu::BindingResource::TextureView(view),
                    BoundResource::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            });
        }

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Kiln Bind Group"),
            layout: &layout,
            entries: &entries,
        });
        drop(entries);
        drop(bound);
        self.bind_groups.insert(cache_key, group.clone());
        Ok(group)
    }

    fn invalidate_bind_groups(&mut self) {
        self.bind_groups.clear();
    }

    // ─── Stream Preparation ──────────────────────────────────────────────

    /// Packs every parameter block of `stream` and returns each command's offset.
    fn upload_params(&mut self, stream: &CommandStream<'_>) -> Vec<u32> {
        let mut bytes = Vec::new();
        let mut offsets = Vec::with_capacity(stream.len());
        for command in stream.commands() {
            let params: &[u8] = match command {
                GpuCommand::Dispatch { kernel, .. } | GpuCommand::DispatchIndirect { kernel, .. } => {
                    kernel.params_bytes()
                }
                GpuCommand::Draw(draw) => bytemuck::bytes_of(&draw.params),
                _ => {
                    offsets.push(0);
                    continue;
                }
            };
            let offset = (bytes.len() as u64).next_multiple_of(self.uniform_alignment);
            bytes.resize(offset as usize, 0);
            bytes.extend_from_slice(params);
            offsets.push(offset as u32);
        }
        if bytes.is_empty() {
            return offsets;
        }

        bytes.resize((bytes.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize, 0);
        let needed = bytes.len() as u64;
        if needed > self.params.capacity {
            let capacity = needed.next_power_of_two();
            log::debug!("Growing kernel parameter buffer to {capacity} bytes");
            self.params = ParamsBuffer::new(&self.device, capacity, self.params.generation + 1);
            self.invalidate_bind_groups();
        }
        self.queue.write_buffer(&self.params.buffer, 0, &bytes);
        offsets
    }

    /// Packs the payloads of every `WriteBuffer` into one copy source.
    fn stage_writes(&self, stream: &CommandStream<'_>) -> Result<Option<(wgpu::Buffer, Vec<u64>)>> {
        let mut contents = Vec::new();
        let mut offsets = Vec::new();
        for command in stream.commands() {
            let GpuCommand::WriteBuffer { buffer, offset, data } = *command else {
                continue;
            };
            let target = self.buffer(buffer)?;
            if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0
                || offset % wgpu::COPY_BUFFER_ALIGNMENT != 0
                || offset + data.len() as u64 > target.desc.size
            {
                return Err(KilnError::OutOfBounds {
                    label: target.desc.label.to_owned(),
                    offset,
                    size: data.len() as u64,
                    capacity: target.desc.size,
                });
            }
            offsets.push(contents.len() as u64);
            contents.extend_from_slice(data);
        }
        if contents.is_empty() {
            return Ok(None);
        }
        let staging = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Stream Uploads"),
            contents: &contents,
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        Ok(Some((staging, offsets)))
    }

    // ─── Encoding ────────────────────────────────────────────────────────

    fn encode_clear(&self, encoder: &mut wgpu::CommandEncoder, id: ImageId, value: ClearValue) -> Result<()> {
        let image = self.image(id)?;
        if !image.is_attachment() {
            if value != ClearValue::Float([0.0; 4]) && value != ClearValue::Uint(0) {
                log::warn!("'{}' is not a render target; clearing to zero", image.desc.label);
            }
            encoder.clear_texture(&image.texture, &wgpu::ImageSubresourceRange::default());
            return Ok(());
        }

        for layer in 0..image.desc.layers {
            for mip in 0..image.desc.mip_levels {
                let view = image.subresource_view(mip, layer);
                let (color, depth) = match value {
                    ClearValue::Depth(d) => (None, Some(d)),
                    ClearValue::Float([r, g, b, a]) if image.desc.format.is_depth() => (None, Some(r.max(g).max(b).max(a))),
                    ClearValue::Float([r, g, b, a]) => (
                        Some(wgpu::Color {
                            r: f64::from(r),
                            g: f64::from(g),
                            b: f64::from(b),
                            a: f64::from(a),
                        }),
                        None,
                    ),
                    ClearValue::Uint(v) => (
                        Some(wgpu::Color {
                            r: f64::from(v),
                            g: 0.0,
                            b: 0.0,
                            a: 0.0,
                        }),
                        None,
                    ),
                };
                let color_attachment = color.map(|clear| wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                });
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Image"),
                    color_attachments: &[color_attachment],
                    depth_stencil_attachment: depth.map(|clear| wgpu::RenderPassDepthStencilAttachment {
                        view: &view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(clear),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }),
                    timestamp_writes: None,
                    occlusion_query_set: None,
                    multiview_mask: None,
                });
            }
        }
        Ok(())
    }

    fn kernel_program(&self, kernel: &Kernel) -> Program {
        match *kernel {
            Kernel::GenerateGBuffer { pipeline: Some(id), .. }
                if self.pipelines.has_program(Program::Material(id)) =>
            {
                Program::Material(id)
            }
            Kernel::GenerateGBuffer { .. } => Program::StandardGBuffer,
            _ => Program::Kernel(kernel.name()),
        }
    }

    fn encode_dispatch(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        kernel: &Kernel,
        params_offset: u32,
        indirect: Option<(BufferId, u64)>,
        groups: [u32; 3],
    ) -> Result<()> {
        let params_size = kernel.params_bytes().len() as u64;
        let bindings = kernel.bindings();
        let key = self.layout_key(params_size, &bindings)?;
        let group = self.bind_group(&key, wgpu::ShaderStages::COMPUTE, params_size, bindings)?;
        let program = self.kernel_program(kernel);
        let pipeline = self.pipelines.compute(&self.device, program, &key)?.clone();
        let indirect = match indirect {
            Some((args, offset)) => Some((self.buffer(args)?.buffer.clone(), offset)),
            None => None,
        };

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &group, &[params_offset]);
        match indirect {
            Some((args, offset)) => pass.dispatch_workgroups_indirect(&args, offset),
            None if groups.iter().all(|&g| g > 0) => pass.dispatch_workgroups(groups[0], groups[1], groups[2]),
            None => {}
        }
        Ok(())
    }

    fn encode_draw(&mut self, encoder: &mut wgpu::CommandEncoder, draw: &RasterDraw, params_offset: u32) -> Result<()> {
        let g = &draw.geometry;
        let bindings: BindingList = [
            g.objects,
            g.meshes,
            g.meshlets,
            g.meshlet_vertices,
            g.meshlet_triangles,
            g.vertices,
            g.surviving,
        ]
        .into_iter()
        .map(Binding::StorageRead)
        .collect();
        let params_size = std::mem::size_of_val(&draw.params) as u64;
        let key = self.layout_key(params_size, &bindings)?;
        let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let pipeline = self.pipelines.raster(&self.device)?.get(draw.kind).clone();
        let group = self.bind_group(&key, visibility, params_size, bindings)?;

        let depth = self.image(draw.depth)?;
        let depth_view = depth.subresource_view(0, draw.depth_layer);
        let color_view = match draw.color {
            Some(id) => Some(self.image(id)?.subresource_view(0, 0)),
            None => None,
        };
        let indices = &self.buffer(draw.indices)?.buffer;
        let args = &self.buffer(draw.draw_args)?.buffer;

        let color_attachment = color_view.as_ref().map(|view| wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        });
        let depth_store = if draw.kind == RasterKind::Visibility {
            wgpu::StoreOp::Discard
        } else {
            wgpu::StoreOp::Store
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Meshlet Raster"),
            color_attachments: &[color_attachment],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: depth_store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &group, &[params_offset]);
        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed_indirect(args, 0);
        Ok(())
    }

    /// Maps every readback staging buffer and collects the payloads.
    fn resolve_readbacks(&self, pending: Vec<(u32, wgpu::Buffer, u64)>) -> Result<Vec<ReadbackData>> {
        if pending.is_empty() {
            return Ok(Vec::new());
        }
        let (sender, receiver) = flume::unbounded();
        for (index, (_, staging, _)) in pending.iter().enumerate() {
            let sender = sender.clone();
            staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                sender.send((index, result)).ok();
            });
        }
        drop(sender);
        self.wait()?;

        for _ in 0..pending.len() {
            let (index, result) = receiver
                .recv()
                .map_err(|_| KilnError::ReadbackFailed("map callback dropped".to_owned()))?;
            result.map_err(|e| KilnError::ReadbackFailed(format!("readback {index}: {e}")))?;
        }

        Ok(pending
            .into_iter()
            .map(|(tag, staging, size)| {
                let bytes = {
                    let view = staging.slice(..).get_mapped_range();
                    view[..size as usize].to_vec()
                };
                staging.unmap();
                ReadbackData { tag, bytes }
            })
            .collect())
    }
}

// ============================================================================
// RenderDevice
// ============================================================================

impl RenderDevice for WgpuDevice {
    fn backend_name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId> {
        let buffer = self.device.create_buffer(&buffer_descriptor(desc));
        Ok(self.buffers.insert(GpuBuffer {
            buffer,
            desc: desc.clone(),
        }))
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(buffer) = self.buffers.remove(id) {
            buffer.buffer.destroy();
            self.invalidate_bind_groups();
        }
    }

    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId> {
        let texture = self.device.create_texture(&texture_descriptor(desc));
        Ok(self.images.insert(GpuImage {
            texture,
            desc: desc.clone(),
        }))
    }

    fn destroy_image(&mut self, id: ImageId) {
        if let Some(image) = self.images.remove(id) {
            image.texture.destroy();
            self.invalidate_bind_groups();
        }
    }

    fn contains_image(&self, id: ImageId) -> bool {
        self.images.contains_key(id)
    }

    fn contains_pipeline(&self, id: PipelineId) -> bool {
        self.materials.contains_key(id)
    }

    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let target = self.buffer(id)?;
        if offset + data.len() as u64 > target.desc.size {
            return Err(KilnError::OutOfBounds {
                label: target.desc.label.to_owned(),
                offset,
                size: data.len() as u64,
                capacity: target.desc.size,
            });
        }
        if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            self.queue.write_buffer(&target.buffer, offset, data);
        } else {
            let mut padded = data.to_vec();
            padded.resize(data.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize), 0);
            self.queue.write_buffer(&target.buffer, offset, &padded);
        }
        Ok(())
    }

    fn write_image(&mut self, id: ImageId, layer: u32, data: &[u8]) -> Result<()> {
        let image = self.image(id)?;
        let desc = &image.desc;
        let bytes_per_row = desc.width * desc.format.bytes_per_texel();
        let size = bytes_per_row as usize * desc.height as usize;
        if data.len() != size || layer >= desc.layers {
            return Err(KilnError::OutOfBounds {
                label: desc.label.to_owned(),
                offset: u64::from(layer),
                size: data.len() as u64,
                capacity: size as u64,
            });
        }
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &image.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn submit(&mut self, stream: &CommandStream<'_>) -> Result<Vec<ReadbackData>> {
        self.check_errors()?;
        let params_offsets = self.upload_params(stream);
        let staged = self.stage_writes(stream)?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Kiln Frame"),
        });

        let mut pending = Vec::new();
        let mut write_index = 0;
        let mut open_groups = 0u32;
        for (command, &params_offset) in stream.commands().iter().zip(&params_offsets) {
            match *command {
                GpuCommand::BeginPass { name, .. } => {
                    encoder.push_debug_group(name);
                    open_groups += 1;
                }
                GpuCommand::EndPass => {
                    if open_groups > 0 {
                        encoder.pop_debug_group();
                        open_groups -= 1;
                    }
                }
                GpuCommand::Barrier(_) => {}
                GpuCommand::ClearBuffer { buffer } => {
                    encoder.clear_buffer(&self.buffer(buffer)?.buffer, 0, None);
                }
                GpuCommand::WriteBuffer { buffer, offset, data } => {
                    let Some((staging, offsets)) = &staged else {
                        continue;
                    };
                    let source_offset = offsets[write_index];
                    write_index += 1;
                    encoder.copy_buffer_to_buffer(
                        staging,
                        source_offset,
                        &self.buffer(buffer)?.buffer,
                        offset,
                        data.len() as u64,
                    );
                }
                GpuCommand::ClearImage { image, value } => self.encode_clear(&mut encoder, image, value)?,
                GpuCommand::Dispatch { kernel, groups } => {
                    self.encode_dispatch(&mut encoder, &kernel, params_offset, None, groups)?;
                }
                GpuCommand::DispatchIndirect { kernel, args, offset } => {
                    self.encode_dispatch(&mut encoder, &kernel, params_offset, Some((args, offset)), [0; 3])?;
                }
                GpuCommand::Draw(draw) => self.encode_draw(&mut encoder, &draw, params_offset)?,
                GpuCommand::Readback { buffer, offset, size, tag } => {
                    let source = self.buffer(buffer)?;
                    let copy_size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
                    if offset + copy_size > source.buffer.size() {
                        return Err(KilnError::OutOfBounds {
                            label: source.desc.label.to_owned(),
                            offset,
                            size,
                            capacity: source.desc.size,
                        });
                    }
                    let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("Readback Staging"),
                        size: copy_size.max(wgpu::COPY_BUFFER_ALIGNMENT),
                        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    });
                    encoder.copy_buffer_to_buffer(&source.buffer, offset, &staging, 0, copy_size);
                    pending.push((tag, staging, size));
                }
            }
        }
        for _ in 0..open_groups {
            encoder.pop_debug_group();
        }

        self.queue.submit(Some(encoder.finish()));
        let readbacks = self.resolve_readbacks(pending)?;
        self.check_errors()?;
        Ok(readbacks)
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.wait()?;
        self.check_errors()
    }

    fn allocated_bytes(&self) -> u64 {
        let buffers: u64 = self.buffers.values().map(|b| b.desc.size).sum();
        let images: u64 = self.images.values().map(|i| i.desc.byte_size()).sum();
        buffers + images
    }
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.adapter_info.name)
            .field("buffers", &self.buffers.len())
            .field("images", &self.images.len())
            .field("modules", &self.pipelines.module_count())
            .finish_non_exhaustive()
    }
}
