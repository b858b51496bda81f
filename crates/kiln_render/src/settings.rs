//! Renderer Settings
//!
//! Runtime configuration of the visibility pipeline. Settings are plain data
//! (serde-serializable) owned by the `SceneRenderer`; replacing them through
//! `SceneRenderer::set_settings` takes effect on the next frame.
//!
//! ```rust,ignore
//! use kiln::render::{RendererSettings, ShadingMode};
//!
//! let settings = RendererSettings {
//!     shading_mode: ShadingMode::Normals,
//!     collect_statistics: true,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ShadingMode
// ---------------------------------------------------------------------------

/// What the shading pass writes into the final image.
///
/// Everything except [`Shaded`](Self::Shaded) is a debug view of one GBuffer
/// channel; the pipeline up to the GBuffer runs identically in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShadingMode {
    #[default]
    Shaded,
    Albedo,
    Normals,
    Metalness,
    Roughness,
    Emissive,
    AmbientOcclusion,
}

impl ShadingMode {
    /// Index written into the shading kernel's parameter block.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Inverse of [`index`](Self::index); unknown values shade normally.
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        match index {
            1 => Self::Albedo,
            2 => Self::Normals,
            3 => Self::Metalness,
            4 => Self::Roughness,
            5 => Self::Emissive,
            6 => Self::AmbientOcclusion,
            _ => Self::Shaded,
        }
    }
}

// ---------------------------------------------------------------------------
// VisualizationMode
// ---------------------------------------------------------------------------

/// Debug overlay the shading pass applies to covered pixels after the
/// [`ShadingMode`] has produced their color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VisualizationMode {
    #[default]
    None,
    /// Tints each pixel by the shadow cascade its view depth falls into.
    Cascades,
    /// Heat map of the lights reaching each pixel, saturating at
    /// [`LIGHT_COMPLEXITY_SATURATION`].
    LightComplexity,
    /// Flat color per rasterized triangle, read from the visibility buffer.
    TriangleId,
    /// Flat color per surviving meshlet, read from the visibility buffer.
    MeshletId,
}

/// Light count at which the complexity heat map turns fully red.
pub const LIGHT_COMPLEXITY_SATURATION: u32 = 8;

impl VisualizationMode {
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Inverse of [`index`](Self::index); unknown values disable the overlay.
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        match index {
            1 => Self::Cascades,
            2 => Self::LightComplexity,
            3 => Self::TriangleId,
            4 => Self::MeshletId,
            _ => Self::None,
        }
    }
}

// ---------------------------------------------------------------------------
// GTAO
// ---------------------------------------------------------------------------

/// Ground-truth ambient occlusion tuning (XeGTAO parameterization).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GtaoSettings {
    pub enabled: bool,
    /// World-space radius of the horizon search.
    pub effect_radius: f32,
    /// Fraction of the radius over which sample contribution fades out.
    pub effect_falloff_range: f32,
    pub radius_multiplier: f32,
    /// Exponent applied to the final visibility term.
    pub final_value_power: f32,
    /// Bias of step positions towards the centre pixel.
    pub sample_distribution_power: f32,
    pub thin_occluder_compensation: f32,
    /// Offset subtracted from `log2(sample distance)` to pick the depth mip.
    pub depth_mip_sampling_offset: f32,
    pub denoise_blur_beta: f32,
    pub slice_count: u32,
    pub steps_per_slice: u32,
}

impl Default for GtaoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            effect_radius: 0.5,
            effect_falloff_range: 0.615,
            radius_multiplier: 1.457,
            final_value_power: 2.2,
            sample_distribution_power: 2.0,
            thin_occluder_compensation: 0.0,
            depth_mip_sampling_offset: 3.3,
            denoise_blur_beta: 1.2,
            slice_count: 2,
            steps_per_slice: 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Shadows
// ---------------------------------------------------------------------------

/// Cascaded shadow map configuration for the first shadow-casting directional light.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    pub enabled: bool,
    /// Number of cascades, clamped to `1..=4`.
    pub cascade_count: u32,
    /// Width and height of each cascade layer in texels.
    pub resolution: u32,
    /// Blend between uniform (0) and logarithmic (1) split distribution.
    pub split_lambda: f32,
    /// Constant depth bias applied to the receiver before comparison.
    pub depth_bias: f32,
    /// Distance the cascade volume extends towards the light to catch casters
    /// outside the view frustum.
    pub caster_extension: f32,
    /// Far limit of the shadowed range; `None` uses the camera's far plane.
    pub max_distance: Option<f32>,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cascade_count: 4,
            resolution: 1024,
            split_lambda: 0.5,
            depth_bias: 0.002,
            caster_extension: 50.0,
            max_distance: Some(100.0),
        }
    }
}

// ---------------------------------------------------------------------------
// RendererSettings
// ---------------------------------------------------------------------------

/// Configuration of the visibility pipeline.
///
/// | Field                   | Description                                     | Default        |
/// |-------------------------|-------------------------------------------------|----------------|
/// | `shading_mode`          | Final image content (lit or a GBuffer view)     | `Shaded`       |
/// | `visualization_mode`    | Debug overlay (cascades, lights, triangle ids)  | `None`         |
/// | `clear_color`           | Color of pixels no geometry covers              | black          |
/// | `collect_statistics`    | Read culling counters back every frame          | `false`        |
/// | `frames_in_flight`      | N-buffering depth of per-frame uploads          | 3              |
/// | `transient_idle_frames` | Frames an unused transient survives in the pool | 4              |
/// | `gtao`                  | Ambient occlusion                               | enabled        |
/// | `shadows`               | Cascaded directional shadows                    | enabled        |
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub shading_mode: ShadingMode,
    pub visualization_mode: VisualizationMode,
    pub clear_color: [f32; 4],
    /// Adds the statistics readback, the pipeline's only CPU/GPU rendezvous.
    pub collect_statistics: bool,
    pub frames_in_flight: u32,
    pub transient_idle_frames: u32,
    pub gtao: GtaoSettings,
    pub shadows: ShadowSettings,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            shading_mode: ShadingMode::default(),
            visualization_mode: VisualizationMode::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            collect_statistics: false,
            frames_in_flight: 3,
            transient_idle_frames: 4,
            gtao: GtaoSettings::default(),
            shadows: ShadowSettings::default(),
        }
    }
}

impl RendererSettings {
    /// Frame slot of `frame_index` under N-buffering.
    #[inline]
    #[must_use]
    pub fn frame_slot(&self, frame_index: u64) -> usize {
        (frame_index % u64::from(self.frames_in_flight.max(1))) as usize
    }

    /// Whether switching from `self` to `other` changes persistent image sizes.
    #[must_use]
    pub fn requires_reallocation(&self, other: &Self) -> bool {
        self.shadows.resolution != other.shadows.resolution
            || self.shadows.cascade_count != other.shadows.cascade_count
            || self.frames_in_flight != other.frames_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shading_mode_indices_round_trip() {
        for mode in [
            ShadingMode::Shaded,
            ShadingMode::Albedo,
            ShadingMode::Normals,
            ShadingMode::Metalness,
            ShadingMode::Roughness,
            ShadingMode::Emissive,
            ShadingMode::AmbientOcclusion,
        ] {
            assert_eq!(ShadingMode::from_index(mode.index()), mode);
        }
        assert_eq!(ShadingMode::from_index(99), ShadingMode::Shaded);
    }

    #[test]
    fn visualization_mode_indices_round_trip() {
        for mode in [
            VisualizationMode::None,
            VisualizationMode::Cascades,
            VisualizationMode::LightComplexity,
            VisualizationMode::TriangleId,
            VisualizationMode::MeshletId,
        ] {
            assert_eq!(VisualizationMode::from_index(mode.index()), mode);
        }
        assert_eq!(VisualizationMode::from_index(42), VisualizationMode::None);
    }

    #[test]
    fn frame_slots_cycle() {
        let settings = RendererSettings::default();
        let slots: Vec<usize> = (0..5).map(|f| settings.frame_slot(f)).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn shadow_resolution_changes_need_reallocation() {
        let a = RendererSettings::default();
        let mut b = a;
        b.shading_mode = ShadingMode::Albedo;
        assert!(!a.requires_reallocation(&b));
        b.shadows.resolution = 2048;
        assert!(a.requires_reallocation(&b));
    }
}
