use glam::Vec3;
use kiln_core::ImageId;
use slotmap::new_key_type;

new_key_type! {
    pub struct LightId;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels (from the light towards the scene).
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    /// Only the first shadow-casting directional light receives cascades.
    pub cast_shadows: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub falloff: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotLight {
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub range: f32,
    /// Half-angles in radians.
    pub inner_angle: f32,
    pub outer_angle: f32,
}

/// A light component as the renderer sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Directional(DirectionalLight),
    Point(PointLight),
    Spot(SpotLight),
}

impl Light {
    #[must_use]
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self::Directional(DirectionalLight {
            direction: direction.normalize_or(Vec3::NEG_Y),
            color,
            intensity,
            cast_shadows: false,
        })
    }

    #[must_use]
    pub fn point(position: Vec3, color: Vec3, intensity: f32, radius: f32) -> Self {
        Self::Point(PointLight {
            position,
            color,
            intensity,
            radius,
            falloff: 1.0,
        })
    }

    #[must_use]
    pub fn spot(position: Vec3, direction: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self::Spot(SpotLight {
            position,
            direction: direction.normalize_or(Vec3::NEG_Z),
            color,
            intensity,
            range,
            inner_angle: 0.35,
            outer_angle: 0.5,
        })
    }

    /// Enables cascaded shadows on a directional light; no-op for other kinds.
    #[must_use]
    pub fn with_shadows(mut self) -> Self {
        if let Self::Directional(light) = &mut self {
            light.cast_shadows = true;
        }
        self
    }
}

/// Image-based lighting source.
///
/// The cube images are produced by the asset layer (already convolved). An id
/// the device no longer knows is treated exactly like a missing skylight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Skylight {
    pub irradiance: Option<ImageId>,
    pub radiance: Option<ImageId>,
    pub intensity: f32,
    /// Radiance mip the skybox shows behind the geometry.
    pub lod: f32,
}

impl Skylight {
    #[must_use]
    pub fn new(irradiance: Option<ImageId>, radiance: Option<ImageId>, intensity: f32) -> Self {
        Self {
            irradiance,
            radiance,
            intensity,
            lod: 0.0,
        }
    }

    #[must_use]
    pub fn with_lod(mut self, lod: f32) -> Self {
        self.lod = lod.max(0.0);
        self
    }
}
