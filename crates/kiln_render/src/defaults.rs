//! Default Resources
//!
//! Stand-ins bound whenever the asset layer has nothing usable:
//!
//! | Resource            | Used when                                       |
//! |---------------------|-------------------------------------------------|
//! | 1×1 white texture   | a material has no (or an unknown) base color map |
//! | black 1×1 cube      | no skylight, or its cube maps are gone          |
//! | default material    | a material slot does not resolve                |
//! | 1×1 AO = 1.0        | GTAO is disabled                                |
//! | 1×1 shadow array    | no directional light casts shadows              |
//!
//! Created with the renderer and destroyed by [`DefaultResources::destroy`]
//! when it shuts down.

use kiln_core::{ImageId, Result};
use kiln_scene::{GpuMaterial, Material};

use crate::device::{ImageDesc, ImageFormat, ImageUsage, RenderDevice};

/// Texel written into the fallback AO image (`R32Uint`, visibility × 255).
pub const FULLY_VISIBLE_AO: u32 = 255;

#[derive(Debug)]
pub struct DefaultResources {
    pub white_texture: ImageId,
    pub black_cube: ImageId,
    pub ao_fallback: ImageId,
    pub shadow_fallback: ImageId,
    pub material: Material,
}

impl DefaultResources {
    pub fn new<D: RenderDevice + ?Sized>(device: &mut D) -> Result<Self> {
        let white_texture = device.create_image(&ImageDesc::d2(
            "Default White",
            1,
            1,
            ImageFormat::Rgba8Unorm,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))?;
        device.write_image(white_texture, 0, &[255, 255, 255, 255])?;

        let black_cube = device.create_image(&ImageDesc::cube(
            "Default Black Cube",
            1,
            ImageFormat::Rgba16Float,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))?;
        for face in 0..6 {
            device.write_image(black_cube, face, &[0; 8])?;
        }

        let ao_fallback = device.create_image(&ImageDesc::d2(
            "Default AO",
            1,
            1,
            ImageFormat::R32Uint,
            ImageUsage::SAMPLED | ImageUsage::COPY_DST,
        ))?;
        device.write_image(ao_fallback, 0, &FULLY_VISIBLE_AO.to_le_bytes())?;

        // never sampled while shadows are off; contents are irrelevant
        let shadow_fallback = device.create_image(
            &ImageDesc::d2(
                "Default Shadow Map",
                1,
                1,
                ImageFormat::Depth32Float,
                ImageUsage::SAMPLED | ImageUsage::DEPTH_TARGET,
            )
            .with_layers(1),
        )?;

        log::debug!("Default resources created on {}", device.backend_name());
        Ok(Self {
            white_texture,
            black_cube,
            ao_fallback,
            shadow_fallback,
            material: Material::default(),
        })
    }

    /// GPU record of the default material.
    #[must_use]
    pub fn gpu_material(&self) -> GpuMaterial {
        self.material.to_gpu()
    }

    /// `image` if the device still knows it, otherwise the white texture.
    #[must_use]
    pub fn texture_or_white<D: RenderDevice + ?Sized>(&self, device: &D, image: Option<ImageId>) -> ImageId {
        image
            .filter(|&id| device.contains_image(id))
            .unwrap_or(self.white_texture)
    }

    /// `image` if the device still knows it, otherwise the black cube.
    #[must_use]
    pub fn cube_or_black<D: RenderDevice + ?Sized>(&self, device: &D, image: Option<ImageId>) -> ImageId {
        image
            .filter(|&id| device.contains_image(id))
            .unwrap_or(self.black_cube)
    }

    pub fn destroy<D: RenderDevice + ?Sized>(self, device: &mut D) {
        for image in [
            self.white_texture,
            self.black_cube,
            self.ao_fallback,
            self.shadow_fallback,
        ] {
            device.destroy_image(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;
    use glam::Vec4;

    #[test]
    fn fallbacks_hold_their_documented_values() {
        let mut device = SoftwareDevice::new();
        let defaults = DefaultResources::new(&mut device).unwrap();

        assert_eq!(device.read_texel(defaults.white_texture, 0, 0).unwrap(), Vec4::ONE);
        assert_eq!(device.read_texel_u32(defaults.ao_fallback, 0, 0).unwrap(), FULLY_VISIBLE_AO);
        assert_eq!(device.image_desc(defaults.black_cube).unwrap().layers, 6);
        assert_eq!(device.read_texel(defaults.black_cube, 0, 0).unwrap(), Vec4::ZERO);
    }

    #[test]
    fn unknown_images_fall_back() {
        let mut device = SoftwareDevice::new();
        let defaults = DefaultResources::new(&mut device).unwrap();
        let texture = device
            .create_image(&ImageDesc::d2("t", 2, 2, ImageFormat::Rgba8Unorm, ImageUsage::SAMPLED))
            .unwrap();

        assert_eq!(defaults.texture_or_white(&device, Some(texture)), texture);
        device.destroy_image(texture);
        assert_eq!(defaults.texture_or_white(&device, Some(texture)), defaults.white_texture);
        assert_eq!(defaults.cube_or_black(&device, None), defaults.black_cube);

        let before = device.allocated_bytes();
        defaults.destroy(&mut device);
        assert!(device.allocated_bytes() < before);
    }
}
