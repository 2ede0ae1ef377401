//! Camera projections used for screen-space bounding.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2};

use crate::geometry::BBox;

/// Screen-space estimate of a camera-space box.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScreenBound {
    /// Projected extent in pixels. Infinite when the box cannot be measured reliably.
    pub size: Vec2,
    pub cull: bool,
}

impl ScreenBound {
    pub const CULLED: ScreenBound = ScreenBound {
        size: Vec2::ZERO,
        cull: true,
    };
}

/// Parameters the GPU bound kernels need to reproduce [`Projection::bound`].
///
/// Matches `struct Projection` in the bound-and-split WGSL programs.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ProjectionUniform {
    pub proj: [[f32; 4]; 4],
    pub viewport: [f32; 2],
    pub near: f32,
    pub far: f32,
}

/// Projection consumed by the bound-and-split engines and the renderer.
///
/// `bound` must be deterministic for a given box.
pub trait Projection: Send + Sync {
    fn calc_projection(&self) -> Mat4;

    fn bound(&self, bbox: &BBox) -> ScreenBound;

    fn uniform(&self) -> ProjectionUniform;
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PerspectiveProjection {
    /// Vertical field of view in radians.
    pub fovy: f32,
    pub near: f32,
    pub far: f32,
    pub viewport: UVec2,
}

impl PerspectiveProjection {
    pub fn new(fovy: f32, near: f32, far: f32, viewport: UVec2) -> Self {
        Self {
            fovy,
            near,
            far,
            viewport,
        }
    }

    pub fn with_viewport(viewport: UVec2) -> Self {
        Self {
            viewport,
            ..Self::default()
        }
    }

    #[inline]
    fn aspect(&self) -> f32 {
        self.viewport.x.max(1) as f32 / self.viewport.y.max(1) as f32
    }
}

impl Default for PerspectiveProjection {
    fn default() -> Self {
        Self {
            fovy: 75f32.to_radians(),
            near: 0.01,
            far: 1000.0,
            viewport: UVec2::new(1024, 768),
        }
    }
}

impl Projection for PerspectiveProjection {
    fn calc_projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fovy, self.aspect(), self.near, self.far)
    }

    fn bound(&self, bbox: &BBox) -> ScreenBound {
        if bbox.is_empty() || bbox.min.z > -self.near || bbox.max.z < -self.far {
            return ScreenBound::CULLED;
        }

        // Straddles the near plane: perspective division is meaningless here.
        if bbox.max.z > -self.near {
            return ScreenBound {
                size: Vec2::INFINITY,
                cull: false,
            };
        }

        let proj = self.calc_projection();
        let scale = Vec2::new(proj.x_axis.x, proj.y_axis.y);
        let viewport = self.viewport.as_vec2();

        let mut lo = Vec2::INFINITY;
        let mut hi = Vec2::NEG_INFINITY;
        for c in bbox.corners() {
            let ndc = scale * Vec2::new(c.x, c.y) / -c.z;
            let px = (ndc * 0.5 + 0.5) * viewport;
            lo = lo.min(px);
            hi = hi.max(px);
        }

        if hi.x < 0.0 || hi.y < 0.0 || lo.x > viewport.x || lo.y > viewport.y {
            return ScreenBound::CULLED;
        }

        ScreenBound {
            size: hi - lo,
            cull: false,
        }
    }

    fn uniform(&self) -> ProjectionUniform {
        ProjectionUniform {
            proj: self.calc_projection().to_cols_array_2d(),
            viewport: self.viewport.as_vec2().to_array(),
            near: self.near,
            far: self.far,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn proj() -> PerspectiveProjection {
        PerspectiveProjection::new(90f32.to_radians(), 0.1, 100.0, UVec2::new(800, 800))
    }

    #[test]
    fn box_behind_near_plane_is_culled() {
        let b = BBox::new(Vec3::new(-1.0, -1.0, -0.05), Vec3::new(1.0, 1.0, 2.0));
        assert!(proj().bound(&b).cull);
    }

    #[test]
    fn box_beyond_far_plane_is_culled() {
        let b = BBox::new(Vec3::new(-1.0, -1.0, -300.0), Vec3::new(1.0, 1.0, -200.0));
        assert!(proj().bound(&b).cull);
    }

    #[test]
    fn box_outside_viewport_is_culled() {
        let b = BBox::new(Vec3::new(50.0, -1.0, -10.0), Vec3::new(60.0, 1.0, -9.0));
        assert!(proj().bound(&b).cull);
    }

    #[test]
    fn straddling_box_has_unbounded_size() {
        let b = BBox::new(Vec3::new(-1.0, -1.0, -5.0), Vec3::new(1.0, 1.0, 1.0));
        let s = proj().bound(&b);
        assert!(!s.cull);
        assert!(s.size.x.is_infinite() && s.size.y.is_infinite());
    }

    #[test]
    fn flat_box_projects_to_expected_pixels() {
        // 90 degree fov: a 2x2 quad at distance 1 fills the 800 pixel viewport.
        let b = BBox::new(Vec3::new(-0.5, -0.5, -1.0), Vec3::new(0.5, 0.5, -1.0));
        let s = proj().bound(&b);
        assert!(!s.cull);
        assert!((s.size.x - 400.0).abs() < 1e-2, "{:?}", s.size);
        assert!((s.size.y - 400.0).abs() < 1e-2, "{:?}", s.size);
    }

    #[test]
    fn bound_is_deterministic() {
        let p = PerspectiveProjection::default();
        let b = BBox::new(Vec3::new(-0.3, 0.1, -4.0), Vec3::new(0.7, 0.4, -3.0));
        assert_eq!(p.bound(&b), p.bound(&b));
    }

    #[test]
    fn uniform_carries_projection_scale() {
        let p = proj();
        let u = p.uniform();
        assert!((u.proj[0][0] - 1.0).abs() < 1e-5);
        assert!((u.proj[1][1] - 1.0).abs() < 1e-5);
        assert_eq!(u.viewport, [800.0, 800.0]);
        assert_eq!(std::mem::size_of::<ProjectionUniform>(), 80);
    }
}
