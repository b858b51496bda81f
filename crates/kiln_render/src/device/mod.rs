//! Render Device Seam
//!
//! The pipeline records a backend-neutral [`CommandStream`]; a [`RenderDevice`]
//! owns the physical resources and executes the stream.
//!
//! ```text
//!  RenderGraph ──compile──► CompiledGraph ──execute──► CommandStream
//!                                                          │
//!                           ┌──────────────────────────────┴───────────┐
//!                           ▼                                          ▼
//!                   WgpuDevice (GPU)                     SoftwareDevice (CPU reference)
//!            WGSL kernels, render pipelines      sequential kernels, edge-function raster,
//!            mapped staging readback              barrier contract validation
//! ```
//!
//! Indirect dispatch and indexed indirect draws are required capabilities:
//! every compaction stage sizes its successor on the device.

pub mod software;
pub mod wgpu;

use bitflags::bitflags;
use kiln_core::{BufferId, ImageId, PipelineId, Result};

use crate::command::CommandStream;

pub use self::software::SoftwareDevice;
pub use self::wgpu::WgpuDevice;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const STORAGE  = 1 << 0;
        const UNIFORM  = 1 << 1;
        const INDIRECT = 1 << 2;
        const INDEX    = 1 << 3;
        const COPY_SRC = 1 << 4;
        const COPY_DST = 1 << 5;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const SAMPLED      = 1 << 0;
        const STORAGE      = 1 << 1;
        const COLOR_TARGET = 1 << 2;
        const DEPTH_TARGET = 1 << 3;
        const COPY_DST     = 1 << 4;
        const COPY_SRC     = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    R32Uint,
    R32Float,
    Rgba8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl ImageFormat {
    #[must_use]
    pub const fn bytes_per_texel(self) -> u32 {
        match self {
            Self::R32Uint | Self::R32Float | Self::Rgba8Unorm | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
        }
    }

    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageDimension {
    D2,
    D2Array,
    Cube,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub label: &'static str,
    pub size: u64,
    pub usage: BufferUsage,
}

impl BufferDesc {
    /// Storage buffer holding `count` elements of `T` (never zero-sized).
    #[must_use]
    pub fn storage<T>(label: &'static str, count: u32) -> Self {
        Self {
            label,
            size: (std::mem::size_of::<T>() as u64 * u64::from(count.max(1))).max(16),
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST | BufferUsage::COPY_SRC,
        }
    }

    #[must_use]
    pub fn uniform<T>(label: &'static str) -> Self {
        Self {
            label,
            size: std::mem::size_of::<T>() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        }
    }

    #[must_use]
    pub fn with_usage(mut self, usage: BufferUsage) -> Self {
        self.usage |= usage;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_levels: u32,
    pub format: ImageFormat,
    pub dimension: ImageDimension,
    pub usage: ImageUsage,
}

impl ImageDesc {
    #[must_use]
    pub fn d2(label: &'static str, width: u32, height: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label,
            width: width.max(1),
            height: height.max(1),
            layers: 1,
            mip_levels: 1,
            format,
            dimension: ImageDimension::D2,
            usage,
        }
    }

    #[must_use]
    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    #[must_use]
    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers.max(1);
        self.dimension = ImageDimension::D2Array;
        self
    }

    #[must_use]
    pub fn cube(label: &'static str, size: u32, format: ImageFormat, usage: ImageUsage) -> Self {
        Self {
            label,
            width: size.max(1),
            height: size.max(1),
            layers: 6,
            mip_levels: 1,
            format,
            dimension: ImageDimension::Cube,
            usage,
        }
    }

    /// Size of `mip` (clamped to 1).
    #[must_use]
    pub fn mip_extent(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }

    /// Bytes occupied by every layer and mip.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        (0..self.mip_levels)
            .map(|mip| {
                let (w, h) = self.mip_extent(mip);
                u64::from(w) * u64::from(h)
            })
            .sum::<u64>()
            * u64::from(self.layers)
            * u64::from(self.format.bytes_per_texel())
    }
}

/// Payload of one readback recorded in a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadbackData {
    pub tag: u32,
    pub bytes: Vec<u8>,
}

/// Owner of physical GPU resources and executor of command streams.
pub trait RenderDevice {
    fn backend_name(&self) -> &'static str;

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferId>;
    fn destroy_buffer(&mut self, id: BufferId);
    fn create_image(&mut self, desc: &ImageDesc) -> Result<ImageId>;
    fn destroy_image(&mut self, id: ImageId);

    fn contains_image(&self, id: ImageId) -> bool;
    /// Whether `id` is a material pipeline this device compiled successfully.
    fn contains_pipeline(&self, id: PipelineId) -> bool;

    /// Immediate upload outside any command stream.
    fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()>;
    /// Uploads mip 0 of one layer; `data` is tightly packed in the image format.
    fn write_image(&mut self, id: ImageId, layer: u32, data: &[u8]) -> Result<()>;

    /// Executes a recorded stream. Readbacks recorded in the stream are the
    /// only point where this call waits for the device.
    fn submit(&mut self, stream: &CommandStream<'_>) -> Result<Vec<ReadbackData>>;

    /// Blocks until all submitted work finished.
    fn wait_idle(&mut self) -> Result<()>;

    /// Total bytes of live buffers and images.
    fn allocated_bytes(&self) -> u64;
}
