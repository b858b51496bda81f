use glam::{Mat4, Vec2, Vec3};

/// Projection model of a [`Camera`]. Both variants are right-handed with a
/// `[0, 1]` depth range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

/// The camera a frame is rendered from.
///
/// `view` maps world space to view space (RH, looking down -Z). `jitter` is a
/// subpixel offset in NDC units applied only to the rasterization projection;
/// culling always uses the unjittered matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub projection: Projection,
    pub view: Mat4,
    pub jitter: Vec2,
}

impl Camera {
    #[must_use]
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            },
            view: Mat4::IDENTITY,
            jitter: Vec2::ZERO,
        }
    }

    #[must_use]
    pub fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        Self {
            projection: Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            },
            view: Mat4::IDENTITY,
            jitter: Vec2::ZERO,
        }
    }

    /// Places the camera at `eye` looking at `target`.
    #[must_use]
    pub fn looking_at(mut self, eye: Vec3, target: Vec3, up: Vec3) -> Self {
        self.view = Mat4::look_at_rh(eye, target, up);
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: Vec2) -> Self {
        self.jitter = jitter;
        self
    }

    /// Unjittered projection matrix.
    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    /// Projection with the subpixel jitter folded into the clip-space XY.
    #[must_use]
    pub fn jittered_projection_matrix(&self) -> Mat4 {
        let mut proj = self.projection_matrix();
        if self.jitter != Vec2::ZERO {
            for col in [
                &mut proj.x_axis,
                &mut proj.y_axis,
                &mut proj.z_axis,
                &mut proj.w_axis,
            ] {
                col.x += self.jitter.x * col.w;
                col.y += self.jitter.y * col.w;
            }
        }
        proj
    }

    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        self.jittered_projection_matrix() * self.view
    }

    #[must_use]
    pub fn near(&self) -> f32 {
        match self.projection {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    #[must_use]
    pub fn far(&self) -> f32 {
        match self.projection {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    /// Vertical field of view; zero for orthographic cameras.
    #[must_use]
    pub fn fov_y(&self) -> f32 {
        match self.projection {
            Projection::Perspective { fov_y, .. } => fov_y,
            Projection::Orthographic { .. } => 0.0,
        }
    }

    #[must_use]
    pub fn is_orthographic(&self) -> bool {
        matches!(self.projection, Projection::Orthographic { .. })
    }

    /// World-space position of the eye.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.view.inverse().w_axis.truncate()
    }

    /// Keeps the projection in step with a new output size.
    ///
    /// Perspective cameras update their aspect ratio; orthographic cameras keep
    /// their box (callers that want pixel-exact mapping rebuild it themselves).
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if let Projection::Perspective { aspect, .. } = &mut self.projection
            && width > 0
            && height > 0
        {
            *aspect = width as f32 / height as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_shifts_clip_xy_only() {
        let cam = Camera::perspective(1.0, 1.0, 0.1, 100.0)
            .with_jitter(Vec2::new(0.01, -0.02));
        let p = glam::Vec4::new(0.0, 0.0, -10.0, 1.0);
        let a = cam.projection_matrix() * p;
        let b = cam.jittered_projection_matrix() * p;
        assert!(((b.x / b.w) - (a.x / a.w) - 0.01).abs() < 1e-5);
        assert!(((b.y / b.w) - (a.y / a.w) + 0.02).abs() < 1e-5);
        assert!((b.z - a.z).abs() < 1e-6);
    }

    #[test]
    fn position_inverts_view() {
        let cam = Camera::perspective(1.0, 1.0, 0.1, 100.0).looking_at(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::ZERO,
            Vec3::Y,
        );
        assert!((cam.position() - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-4);
    }
}
