//! Host-memory buffers and images of the software device.
//!
//! Images keep their texels in the same encoding the GPU uses (`half` floats
//! for `Rgba16Float`, unorm bytes for `Rgba8Unorm`) so quantization matches.

use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4};
use half::f16;

use crate::device::{ImageDesc, ImageDimension, ImageFormat};

#[derive(Debug, Clone)]
pub(crate) struct SoftBuffer {
    pub label: &'static str,
    pub data: Vec<u8>,
}

impl SoftBuffer {
    pub fn new(label: &'static str, size: u64) -> Self {
        Self {
            label,
            data: vec![0; size as usize],
        }
    }

    /// Copies the whole buffer out as `T` (trailing bytes ignored).
    pub fn to_vec<T: Pod>(&self) -> Vec<T> {
        let stride = std::mem::size_of::<T>();
        self.data
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    pub fn read<T: Pod>(&self, index: usize) -> Option<T> {
        let stride = std::mem::size_of::<T>();
        let bytes = self.data.get(index * stride..(index + 1) * stride)?;
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Stores `value` at element `index`; out-of-range stores are dropped like
    /// robust buffer access on the GPU.
    pub fn write<T: Pod>(&mut self, index: usize, value: T) {
        let stride = std::mem::size_of::<T>();
        if let Some(bytes) = self.data.get_mut(index * stride..(index + 1) * stride) {
            bytes.copy_from_slice(bytemuck::bytes_of(&value));
        }
    }

    pub fn store_all<T: Pod>(&mut self, values: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let len = bytes.len().min(self.data.len());
        self.data[..len].copy_from_slice(&bytes[..len]);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SoftImage {
    pub desc: ImageDesc,
    pub data: Vec<u8>,
    /// Byte offset of each (layer, mip) subresource.
    offsets: Vec<usize>,
}

impl SoftImage {
    pub fn new(desc: &ImageDesc) -> Self {
        let bpt = desc.format.bytes_per_texel() as usize;
        let mut offsets = Vec::with_capacity((desc.layers * desc.mip_levels) as usize);
        let mut cursor = 0usize;
        for _layer in 0..desc.layers {
            for mip in 0..desc.mip_levels {
                offsets.push(cursor);
                let (w, h) = desc.mip_extent(mip);
                cursor += w as usize * h as usize * bpt;
            }
        }
        Self {
            desc: desc.clone(),
            data: vec![0; cursor],
            offsets,
        }
    }

    #[inline]
    pub fn extent(&self, mip: u32) -> (u32, u32) {
        self.desc.mip_extent(mip)
    }

    fn texel_offset(&self, x: u32, y: u32, layer: u32, mip: u32) -> Option<usize> {
        let (w, h) = self.extent(mip);
        if x >= w || y >= h || layer >= self.desc.layers || mip >= self.desc.mip_levels {
            return None;
        }
        let base = self.offsets[(layer * self.desc.mip_levels + mip) as usize];
        let bpt = self.desc.format.bytes_per_texel() as usize;
        Some(base + (y as usize * w as usize + x as usize) * bpt)
    }

    /// `textureLoad` semantics: out-of-range loads return zero.
    pub fn load(&self, x: u32, y: u32, layer: u32, mip: u32) -> Vec4 {
        let Some(offset) = self.texel_offset(x, y, layer, mip) else {
            return Vec4::ZERO;
        };
        let bytes = &self.data[offset..];
        match self.desc.format {
            ImageFormat::R32Uint => {
                Vec4::new(read_u32(bytes) as f32, 0.0, 0.0, 1.0)
            }
            ImageFormat::R32Float | ImageFormat::Depth32Float => {
                Vec4::new(f32::from_bits(read_u32(bytes)), 0.0, 0.0, 1.0)
            }
            ImageFormat::Rgba8Unorm => Vec4::new(
                f32::from(bytes[0]) / 255.0,
                f32::from(bytes[1]) / 255.0,
                f32::from(bytes[2]) / 255.0,
                f32::from(bytes[3]) / 255.0,
            ),
            ImageFormat::Rgba16Float => {
                let c = |i: usize| f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32();
                Vec4::new(c(0), c(1), c(2), c(3))
            }
        }
    }

    pub fn load_u32(&self, x: u32, y: u32) -> u32 {
        self.texel_offset(x, y, 0, 0)
            .map_or(0, |offset| read_u32(&self.data[offset..]))
    }

    pub fn load_f32(&self, x: u32, y: u32, layer: u32, mip: u32) -> f32 {
        self.load(x, y, layer, mip).x
    }

    pub fn store(&mut self, x: u32, y: u32, layer: u32, mip: u32, value: Vec4) {
        let Some(offset) = self.texel_offset(x, y, layer, mip) else {
            return;
        };
        let format = self.desc.format;
        let bytes = &mut self.data[offset..];
        match format {
            ImageFormat::R32Uint => write_u32(bytes, value.x as u32),
            ImageFormat::R32Float | ImageFormat::Depth32Float => write_u32(bytes, value.x.to_bits()),
            ImageFormat::Rgba8Unorm => {
                for (i, c) in value.to_array().into_iter().enumerate() {
                    bytes[i] = (c.clamp(0.0, 1.0) * 255.0).round() as u8;
                }
            }
            ImageFormat::Rgba16Float => {
                for (i, c) in value.to_array().into_iter().enumerate() {
                    bytes[i * 2..i * 2 + 2].copy_from_slice(&f16::from_f32(c).to_le_bytes());
                }
            }
        }
    }

    pub fn store_u32(&mut self, x: u32, y: u32, value: u32) {
        if let Some(offset) = self.texel_offset(x, y, 0, 0) {
            write_u32(&mut self.data[offset..], value);
        }
    }

    pub fn store_f32(&mut self, x: u32, y: u32, layer: u32, mip: u32, value: f32) {
        self.store(x, y, layer, mip, Vec4::new(value, 0.0, 0.0, 1.0));
    }

    /// Fills every subresource with one texel value.
    pub fn fill(&mut self, texel: &[u8]) {
        for chunk in self.data.chunks_exact_mut(texel.len()) {
            chunk.copy_from_slice(texel);
        }
    }

    /// Encodes one texel of this image's format.
    pub fn encode_texel(&self, value: Vec4) -> Vec<u8> {
        let mut scratch = Self::new(&ImageDesc::d2(
            "texel",
            1,
            1,
            self.desc.format,
            self.desc.usage,
        ));
        scratch.store(0, 0, 0, 0, value);
        scratch.data
    }

    /// Bilinear sample of one layer at `uv`, clamping or wrapping at the border.
    pub fn sample(&self, uv: Vec2, layer: u32, mip: f32, repeat: bool) -> Vec4 {
        let mip = (mip.round().max(0.0) as u32).min(self.desc.mip_levels - 1);
        let (w, h) = self.extent(mip);
        let p = uv * Vec2::new(w as f32, h as f32) - 0.5;
        let base = p.floor();
        let f = p - base;

        let fetch = |dx: i32, dy: i32| {
            let mut x = base.x as i32 + dx;
            let mut y = base.y as i32 + dy;
            if repeat {
                x = x.rem_euclid(w as i32);
                y = y.rem_euclid(h as i32);
            } else {
                x = x.clamp(0, w as i32 - 1);
                y = y.clamp(0, h as i32 - 1);
            }
            self.load(x as u32, y as u32, layer, mip)
        };

        let top = fetch(0, 0).lerp(fetch(1, 0), f.x);
        let bottom = fetch(0, 1).lerp(fetch(1, 1), f.x);
        top.lerp(bottom, f.y)
    }

    /// Cube sample along `dir`; non-cube images return their centre sample.
    pub fn sample_cube(&self, dir: Vec3, mip: f32) -> Vec4 {
        if self.desc.dimension != ImageDimension::Cube {
            return self.sample(Vec2::splat(0.5), 0, mip, false);
        }
        let (face, uv) = cube_face_uv(dir);
        self.sample(uv, face, mip, false)
    }
}

/// Standard cube face selection (+X, -X, +Y, -Y, +Z, -Z).
pub(crate) fn cube_face_uv(dir: Vec3) -> (u32, Vec2) {
    let a = dir.abs();
    let (face, ma, sc, tc) = if a.x >= a.y && a.x >= a.z {
        if dir.x >= 0.0 { (0, a.x, -dir.z, -dir.y) } else { (1, a.x, dir.z, -dir.y) }
    } else if a.y >= a.z {
        if dir.y >= 0.0 { (2, a.y, dir.x, dir.z) } else { (3, a.y, dir.x, -dir.z) }
    } else if dir.z >= 0.0 {
        (4, a.z, dir.x, -dir.y)
    } else {
        (5, a.z, -dir.x, -dir.y)
    };
    let ma = ma.max(f32::EPSILON);
    (face, Vec2::new(sc / ma * 0.5 + 0.5, tc / ma * 0.5 + 0.5))
}

#[inline]
fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn write_u32(bytes: &mut [u8], value: u32) {
    bytes[..4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ImageUsage;

    #[test]
    fn rgba16_round_trips_through_half() {
        let mut image = SoftImage::new(&ImageDesc::d2(
            "n",
            2,
            2,
            ImageFormat::Rgba16Float,
            ImageUsage::STORAGE,
        ));
        image.store(1, 1, 0, 0, Vec4::new(0.5, -1.0, 0.25, 0.0));
        assert_eq!(image.load(1, 1, 0, 0), Vec4::new(0.5, -1.0, 0.25, 0.0));
        assert_eq!(image.load(0, 0, 0, 0), Vec4::ZERO);
    }

    #[test]
    fn mips_have_independent_storage() {
        let desc = ImageDesc::d2("d", 8, 8, ImageFormat::R32Float, ImageUsage::STORAGE).with_mips(3);
        let mut image = SoftImage::new(&desc);
        image.store_f32(0, 0, 0, 2, 4.0);
        assert_eq!(image.load_f32(0, 0, 0, 2), 4.0);
        assert_eq!(image.load_f32(0, 0, 0, 0), 0.0);
        assert_eq!(image.extent(2), (2, 2));
        assert_eq!(image.data.len(), (64 + 16 + 4) * 4);
    }

    #[test]
    fn out_of_range_access_is_ignored() {
        let mut buffer = SoftBuffer::new("b", 8);
        buffer.write(5, 1u32);
        assert_eq!(buffer.read::<u32>(5), None);
        assert_eq!(buffer.to_vec::<u32>(), vec![0, 0]);
    }
}
