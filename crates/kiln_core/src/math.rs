//! Dispatch sizing, culling math and debug colors.
//!
//! These helpers are mirrored one-to-one by the WGSL kernels; the CPU side uses
//! them to fill constant buffers and the software device uses them to execute
//! the same tests the GPU runs.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Maximum number of workgroups a single dispatch dimension may contain.
pub const MAX_DISPATCH_DIMENSION: u32 = 65_535;

/// `ceil(count / group_size)`; a zero count yields zero groups.
#[inline]
#[must_use]
pub const fn div_round_up(count: u32, group_size: u32) -> u32 {
    count.div_ceil(group_size)
}

/// Dispatch dimensions for one workgroup per item, wrapping across Y once X
/// reaches [`MAX_DISPATCH_DIMENSION`].
///
/// Kernels dispatched this way recover the linear item index as
/// `group.y * num_groups.x + group.x` and must discard indices `>= count`.
#[must_use]
pub const fn wrapped_dispatch(count: u32) -> [u32; 3] {
    if count <= MAX_DISPATCH_DIMENSION {
        [count, 1, 1]
    } else {
        [MAX_DISPATCH_DIMENSION, count.div_ceil(MAX_DISPATCH_DIMENSION), 1]
    }
}

// ============================================================================
// Frustum Culling
// ============================================================================

/// The four constants of the symmetric two-plane frustum test.
///
/// `x = (plane_x.x, plane_x.z)` and `y = (plane_y.y, plane_y.z)`, where the planes
/// are the normalized sums of the transposed projection's row 3 with rows 0 and 1.
/// Near and far are deliberately absent: spheres in front of the near plane or
/// beyond the far plane are never rejected here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrustumPlanes {
    pub x: Vec2,
    pub y: Vec2,
}

impl FrustumPlanes {
    /// Extracts the left/right and top/bottom plane pair from a projection matrix.
    ///
    /// The test folds both sides of each axis into one plane through `abs`, so
    /// `projection` must be symmetric: pass the unjittered matrix. A subpixel
    /// jitter offsets the clip-space XY and would shift one side of each pair.
    #[must_use]
    pub fn from_projection(projection: Mat4) -> Self {
        let row0 = projection.row(0);
        let row1 = projection.row(1);
        let row3 = projection.row(3);

        let plane_x = normalize_plane(row3 + row0);
        let plane_y = normalize_plane(row3 + row1);

        Self {
            x: Vec2::new(plane_x.x, plane_x.z),
            y: Vec2::new(plane_y.y, plane_y.z),
        }
    }

    /// Inclusive sphere test in view space: a sphere touching a plane is visible.
    #[inline]
    #[must_use]
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        let dist_x = center.z * self.x.y - center.x.abs() * self.x.x;
        let dist_y = center.z * self.y.y - center.y.abs() * self.y.x;
        dist_x >= -radius && dist_y >= -radius
    }

    /// Packs the planes in the order the culling kernels read them.
    #[must_use]
    pub fn to_array(self) -> [f32; 4] {
        [self.x.x, self.x.y, self.y.x, self.y.y]
    }
}

/// Normalizes a plane by the length of its normal.
#[inline]
#[must_use]
pub fn normalize_plane(plane: Vec4) -> Vec4 {
    let len = plane.truncate().length();
    if len > 0.0 { plane / len } else { plane }
}

/// View-space XY extent of an orthographic projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthoBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl OrthoBounds {
    /// Recovers the box `[left, right] x [bottom, top]` from an orthographic projection.
    #[must_use]
    pub fn from_projection(projection: Mat4) -> Self {
        let sx = projection.x_axis.x;
        let sy = projection.y_axis.y;
        let tx = projection.w_axis.x;
        let ty = projection.w_axis.y;

        let left = (-1.0 - tx) / sx;
        let right = (1.0 - tx) / sx;
        let bottom = (-1.0 - ty) / sy;
        let top = (1.0 - ty) / sy;

        Self {
            min: Vec2::new(left.min(right), bottom.min(top)),
            max: Vec2::new(left.max(right), bottom.max(top)),
        }
    }

    /// Inclusive sphere test against the XY box; depth is not tested.
    #[inline]
    #[must_use]
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        center.x + radius >= self.min.x
            && center.x - radius <= self.max.x
            && center.y + radius >= self.min.y
            && center.y - radius <= self.max.y
    }
}

/// Largest axis scale of an affine transform, used to scale bounding radii.
#[inline]
#[must_use]
pub fn max_axis_scale(transform: &Mat4) -> f32 {
    let sx = transform.x_axis.truncate().length_squared();
    let sy = transform.y_axis.truncate().length_squared();
    let sz = transform.z_axis.truncate().length_squared();
    sx.max(sy).max(sz).sqrt()
}

// ============================================================================
// Debug Colors
// ============================================================================

/// Stable pseudo-random color of an id, each channel in `[0, 1]`.
///
/// An integer finalizer over `id`; the shading kernel runs the same steps so
/// both devices agree on the color of every triangle and meshlet.
#[must_use]
pub const fn id_color_bits(id: u32) -> [u32; 3] {
    let mut h = id.wrapping_add(1).wrapping_mul(0x9E37_79B9);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    [h & 0xFF, (h >> 8) & 0xFF, (h >> 16) & 0xFF]
}

#[must_use]
pub fn id_color(id: u32) -> Vec3 {
    let [r, g, b] = id_color_bits(id);
    Vec3::new(r as f32, g as f32, b as f32) / 255.0
}
