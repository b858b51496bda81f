//! Physical buffers and images, and the mapping of backend-neutral
//! descriptors onto wgpu ones.

use crate::device::{BufferDesc, BufferUsage, ImageDesc, ImageDimension, ImageFormat, ImageUsage};

pub(super) struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub desc: BufferDesc,
}

pub(super) struct GpuImage {
    pub texture: wgpu::Texture,
    pub desc: ImageDesc,
}

impl GpuImage {
    /// Whether clears can go through a render pass load op.
    pub fn is_attachment(&self) -> bool {
        self.desc
            .usage
            .intersects(ImageUsage::COLOR_TARGET | ImageUsage::DEPTH_TARGET)
    }

    /// View used for sampling; `mip = None` spans the whole chain.
    pub fn sampled_view(&self, mip: Option<u32>) -> wgpu::TextureView {
        let (base_mip_level, mip_level_count) = match mip {
            Some(mip) => (mip, Some(1)),
            None => (0, None),
        };
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(self.desc.label),
            dimension: Some(view_dimension(self.desc.dimension)),
            base_mip_level,
            mip_level_count,
            ..Default::default()
        })
    }

    /// Single-mip, single-layer view for storage writes and attachments.
    pub fn subresource_view(&self, mip: u32, layer: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(self.desc.label),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: layer,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

pub(super) fn buffer_descriptor(desc: &BufferDesc) -> wgpu::BufferDescriptor<'_> {
    let mut usage = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    for (flag, wgpu_flag) in [
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::INDIRECT, wgpu::BufferUsages::INDIRECT),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
    ] {
        if desc.usage.contains(flag) {
            usage |= wgpu_flag;
        }
    }
    wgpu::BufferDescriptor {
        label: Some(desc.label),
        // copies and clears work in 4-byte units
        size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
        usage,
        mapped_at_creation: false,
    }
}

pub(super) fn texture_descriptor(desc: &ImageDesc) -> wgpu::TextureDescriptor<'_> {
    let mut usage = wgpu::TextureUsages::COPY_DST;
    for (flag, wgpu_flag) in [
        (ImageUsage::SAMPLED, wgpu::TextureUsages::TEXTURE_BINDING),
        (ImageUsage::STORAGE, wgpu::TextureUsages::STORAGE_BINDING),
        (ImageUsage::COLOR_TARGET, wgpu::TextureUsages::RENDER_ATTACHMENT),
        (ImageUsage::DEPTH_TARGET, wgpu::TextureUsages::RENDER_ATTACHMENT),
        (ImageUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
    ] {
        if desc.usage.contains(flag) {
            usage |= wgpu_flag;
        }
    }
    wgpu::TextureDescriptor {
        label: Some(desc.label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: desc.layers,
        },
        mip_level_count: desc.mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(desc.format),
        usage,
        view_formats: &[],
    }
}

pub(super) const fn texture_format(format: ImageFormat) -> wgpu::TextureFormat {
    match format {
        ImageFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        ImageFormat::R32Float => wgpu::TextureFormat::R32Float,
        ImageFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ImageFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ImageFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

pub(super) const fn view_dimension(dimension: ImageDimension) -> wgpu::TextureViewDimension {
    match dimension {
        ImageDimension::D2 => wgpu::TextureViewDimension::D2,
        ImageDimension::D2Array => wgpu::TextureViewDimension::D2Array,
        ImageDimension::Cube => wgpu::TextureViewDimension::Cube,
    }
}

/// Sample type a kernel declares for a texture of `format`.
pub(super) const fn sample_type(format: ImageFormat) -> wgpu::TextureSampleType {
    match format {
        ImageFormat::R32Uint => wgpu::TextureSampleType::Uint,
        ImageFormat::R32Float => wgpu::TextureSampleType::Float { filterable: false },
        ImageFormat::Depth32Float => wgpu::TextureSampleType::Depth,
        ImageFormat::Rgba8Unorm | ImageFormat::Rgba16Float => {
            wgpu::TextureSampleType::Float { filterable: true }
        }
    }
}
