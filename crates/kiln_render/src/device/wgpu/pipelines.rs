//! Shader modules, bind group layouts and pipelines.
//!
//! Kernel layouts are explicit: binding 0 is the dynamic-offset parameter
//! block, bindings 1.. follow [`Kernel::bindings`], and texture entries take
//! their sample type and view dimension from the bound image. Pipelines are
//! created lazily and cached by `(shader hash, layout)`.

use std::num::NonZeroU64;

use kiln_core::{KilnError, PipelineId, Result};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_128;

use super::resources::{sample_type, texture_format, view_dimension};
use crate::command::{RasterKind, RasterParams, SamplerKind};
use crate::device::{ImageDimension, ImageFormat};

// ─── Sources ───────────────────────────────────────────────────────────────

const COMMON: &str = include_str!("../../shaders/common.wgsl");
const GBUFFER_PRELUDE: &str = include_str!("../../shaders/gbuffer.wgsl");
/// Built-in `shade_surface` of the GBuffer program.
pub const STANDARD_GBUFFER_SOURCE: &str = include_str!("../../shaders/gbuffer_standard.wgsl");
const RASTER: &str = include_str!("../../shaders/raster.wgsl");

fn kernel_source(name: &str) -> Option<&'static str> {
    Some(match name {
        "cull_objects" => include_str!("../../shaders/cull_objects.wgsl"),
        "generate_indirect_args" => include_str!("../../shaders/generate_indirect_args.wgsl"),
        "cull_meshlets" => include_str!("../../shaders/cull_meshlets.wgsl"),
        "compact_primitives" => include_str!("../../shaders/compact_primitives.wgsl"),
        "count_materials" => include_str!("../../shaders/count_materials.wgsl"),
        "prefix_sum" => include_str!("../../shaders/prefix_sum.wgsl"),
        "collect_pixels" => include_str!("../../shaders/collect_pixels.wgsl"),
        "generate_material_args" => include_str!("../../shaders/generate_material_args.wgsl"),
        "shade" => include_str!("../../shaders/shade.wgsl"),
        "skybox" => include_str!("../../shaders/skybox.wgsl"),
        "gtao_prefilter_depth" => include_str!("../../shaders/gtao_prefilter_depth.wgsl"),
        "gtao_downsample_depth" => include_str!("../../shaders/gtao_downsample_depth.wgsl"),
        "gtao_main" => include_str!("../../shaders/gtao_main.wgsl"),
        "gtao_denoise" => include_str!("../../shaders/gtao_denoise.wgsl"),
        _ => return None,
    })
}

/// Full WGSL of a GBuffer program around a material's `shade_surface`.
#[must_use]
pub fn gbuffer_program(shade_surface: &str) -> String {
    [COMMON, GBUFFER_PRELUDE, shade_surface].join("\n")
}

// ─── Layouts ───────────────────────────────────────────────────────────────

/// Shape of one bind group slot, independent of the bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum SlotLayout {
    /// Dynamic-offset uniform window of `size` bytes.
    Params(u64),
    Uniform,
    Storage { read_only: bool },
    Texture { format: ImageFormat, dimension: ImageDimension },
    StorageTexture { format: ImageFormat },
    Sampler(SamplerKind),
}

pub(super) type LayoutKey = SmallVec<[SlotLayout; 20]>;

fn layout_entry(binding: u32, slot: SlotLayout, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    let ty = match slot {
        SlotLayout::Params(size) => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(size),
        },
        SlotLayout::Uniform => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        SlotLayout::Storage { read_only } => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        SlotLayout::Texture { format, dimension } => wgpu::BindingType::Texture {
            sample_type: sample_type(format),
            view_dimension: view_dimension(dimension),
            multisampled: false,
        },
        SlotLayout::StorageTexture { format } => wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format: texture_format(format),
            view_dimension: wgpu::TextureViewDimension::D2,
        },
        SlotLayout::Sampler(SamplerKind::ShadowCompare) => {
            wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
        }
        SlotLayout::Sampler(_) => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    };
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
        count: None,
    }
}

/// Slots of every raster draw: parameters, then the vertex-pulling buffers.
fn raster_layout() -> LayoutKey {
    let mut key = LayoutKey::new();
    key.push(SlotLayout::Params(std::mem::size_of::<RasterParams>() as u64));
    key.extend(std::iter::repeat_n(SlotLayout::Storage { read_only: true }, 7));
    key
}

// ─── Programs ──────────────────────────────────────────────────────────────

/// Which WGSL program a compute pipeline runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Program {
    Kernel(&'static str),
    /// The built-in GBuffer program.
    StandardGBuffer,
    Material(PipelineId),
}

pub(super) struct Layout {
    pub bind_group: wgpu::BindGroupLayout,
    pub pipeline: wgpu::PipelineLayout,
}

pub(super) struct RasterPipelines {
    pub pre_depth: wgpu::RenderPipeline,
    pub visibility: wgpu::RenderPipeline,
    pub shadow: wgpu::RenderPipeline,
}

impl RasterPipelines {
    pub fn get(&self, kind: RasterKind) -> &wgpu::RenderPipeline {
        match kind {
            RasterKind::PreDepth => &self.pre_depth,
            RasterKind::Visibility => &self.visibility,
            RasterKind::Shadow => &self.shadow,
        }
    }
}

/// Compiled modules and pipelines of one device.
#[derive(Default)]
pub(super) struct PipelineCache {
    /// xxh3-128 of the final WGSL → compiled module.
    modules: FxHashMap<u128, wgpu::ShaderModule>,
    programs: FxHashMap<Program, u128>,
    layouts: FxHashMap<(LayoutKey, wgpu::ShaderStages), Layout>,
    compute: FxHashMap<(u128, LayoutKey), wgpu::ComputePipeline>,
    raster: Option<RasterPipelines>,
}

impl PipelineCache {
    /// Compiles `source` (or reuses an identical module) and surfaces WGSL errors.
    pub fn compile(&mut self, device: &wgpu::Device, label: &str, source: &str) -> Result<u128> {
        let hash = xxh3_128(source.as_bytes());
        if self.modules.contains_key(&hash) {
            return Ok(hash);
        }

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let info = pollster::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
            .map(|m| m.message.clone())
            .collect();
        if !errors.is_empty() {
            return Err(KilnError::ShaderCompilation {
                label: label.to_owned(),
                message: errors.join("\n"),
            });
        }

        log::debug!("Compiled shader module '{label}'");
        self.modules.insert(hash, module);
        Ok(hash)
    }

    pub fn register_program(&mut self, program: Program, hash: u128) {
        self.programs.insert(program, hash);
    }

    pub fn forget_program(&mut self, program: Program) {
        self.programs.remove(&program);
    }

    pub fn has_program(&self, program: Program) -> bool {
        self.programs.contains_key(&program)
    }

    fn program_hash(&mut self, device: &wgpu::Device, program: Program) -> Result<u128> {
        if let Some(&hash) = self.programs.get(&program) {
            return Ok(hash);
        }
        let hash = match program {
            Program::Kernel(name) => {
                let body = kernel_source(name)
                    .ok_or_else(|| KilnError::Graph(format!("no WGSL program for kernel '{name}'")))?;
                self.compile(device, name, &[COMMON, body].join("\n"))?
            }
            Program::StandardGBuffer => {
                self.compile(device, "generate_gbuffer", &gbuffer_program(STANDARD_GBUFFER_SOURCE))?
            }
            Program::Material(id) => {
                return Err(KilnError::Graph(format!("material pipeline {id:?} is not registered")));
            }
        };
        self.programs.insert(program, hash);
        Ok(hash)
    }

    pub fn layout(&mut self, device: &wgpu::Device, key: &LayoutKey, visibility: wgpu::ShaderStages) -> &Layout {
        self.layouts.entry((key.clone(), visibility)).or_insert_with(|| {
            let entries: Vec<_> = key
                .iter()
                .enumerate()
                .map(|(binding, &slot)| layout_entry(binding as u32, slot, visibility))
                .collect();
            let bind_group = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Kiln Bind Group Layout"),
                entries: &entries,
            });
            let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Kiln Pipeline Layout"),
                bind_group_layouts: &[Some(&bind_group)],
                immediate_size: 0,
            });
            Layout { bind_group, pipeline }
        })
    }

    /// Compute pipeline of `program` for the given bind group shape.
    pub fn compute(
        &mut self,
        device: &wgpu::Device,
        program: Program,
        key: &LayoutKey,
    ) -> Result<&wgpu::ComputePipeline> {
        let hash = self.program_hash(device, program)?;
        let cache_key = (hash, key.clone());
        if !self.compute.contains_key(&cache_key) {
            self.layout(device, key, wgpu::ShaderStages::COMPUTE);
            let (Some(module), Some(layout)) = (
                self.modules.get(&hash),
                self.layouts.get(&(key.clone(), wgpu::ShaderStages::COMPUTE)),
            ) else {
                return Err(KilnError::Graph("pipeline inputs evicted".to_owned()));
            };
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("Kiln Compute Pipeline"),
                layout: Some(&layout.pipeline),
                module,
                entry_point: Some("main"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
            self.compute.insert(cache_key.clone(), pipeline);
        }
        self.compute
            .get(&cache_key)
            .ok_or_else(|| KilnError::Graph("compute pipeline missing after creation".to_owned()))
    }

    /// The three raster pipelines, built on first use.
    pub fn raster(&mut self, device: &wgpu::Device) -> Result<&RasterPipelines> {
        if self.raster.is_none() {
            let hash = self.compile(device, "raster", &[COMMON, RASTER].join("\n"))?;
            let key = raster_layout();
            let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
            let layout = self.layout(device, &key, visibility).pipeline.clone();
            let module = self
                .modules
                .get(&hash)
                .ok_or_else(|| KilnError::Graph("raster module missing".to_owned()))?;
            let build = |label, fragment: Option<(&'static str, wgpu::TextureFormat)>, depth_write, compare| {
                let targets = fragment.map(|(_, format)| {
                    [Some(wgpu::ColorTargetState {
                        format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })]
                });
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&layout),
                    vertex: wgpu::VertexState {
                        module,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: fragment.zip(targets.as_ref()).map(|((entry, _), targets)| wgpu::FragmentState {
                        module,
                        entry_point: Some(entry),
                        targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::TriangleList,
                        cull_mode: None,
                        ..Default::default()
                    },
                    depth_stencil: Some(wgpu::DepthStencilState {
                        format: wgpu::TextureFormat::Depth32Float,
                        depth_write_enabled: Some(depth_write),
                        depth_compare: Some(compare),
                        stencil: wgpu::StencilState::default(),
                        bias: wgpu::DepthBiasState::default(),
                    }),
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
            };
            let pre_depth = build(
                "Pre-Depth Pipeline",
                Some(("fs_normals", wgpu::TextureFormat::Rgba16Float)),
                true,
                wgpu::CompareFunction::Less,
            );
            let visibility = build(
                "Visibility Pipeline",
                Some(("fs_visibility", wgpu::TextureFormat::R32Uint)),
                false,
                wgpu::CompareFunction::Equal,
            );
            let shadow = build("Shadow Pipeline", None, true, wgpu::CompareFunction::Less);
            self.raster = Some(RasterPipelines {
                pre_depth,
                visibility,
                shadow,
            });
        }
        self.raster
            .as_ref()
            .ok_or_else(|| KilnError::Graph("raster pipelines missing after creation".to_owned()))
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}
