use glam::Mat4;

use crate::geometry::{BezierPatch, PatchRange, bound_patch_range};
use crate::projection::Projection;

/// Outcome of classifying one patch range.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Decision {
    Cull,
    Accept,
    /// Deeper than the split limit; dropped.
    DepthLimit,
    Split([PatchRange; 2]),
}

/// The classification policy shared by every engine.
///
/// In order: cull; accept when in front of the eye and strictly under
/// `limit` pixels on both axes; drop past `max_depth`; otherwise split
/// across the longer parametric direction. Mirrored by `classify` in
/// `shaders/bound.wgsl`.
pub fn classify(
    range: &PatchRange,
    patch: &BezierPatch,
    mv: &Mat4,
    projection: &dyn Projection,
    limit: f32,
    max_depth: u32,
) -> Decision {
    let bound = bound_patch_range(range, patch, mv);
    let screen = projection.bound(&bound.bbox);

    if screen.cull {
        Decision::Cull
    } else if bound.bbox.min.z < 0.0 && screen.size.x < limit && screen.size.y < limit {
        Decision::Accept
    } else if range.depth > max_depth {
        Decision::DepthLimit
    } else {
        Decision::Split(bound.split(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, ParamRect};
    use crate::projection::{PerspectiveProjection, ProjectionUniform, ScreenBound};
    use crate::test_support::flat_patch;
    use glam::{UVec2, Vec2};

    /// Reports the same screen size for every box.
    struct FixedSize(f32);

    impl Projection for FixedSize {
        fn calc_projection(&self) -> Mat4 {
            Mat4::IDENTITY
        }

        fn bound(&self, _bbox: &BBox) -> ScreenBound {
            ScreenBound {
                size: Vec2::splat(self.0),
                cull: false,
            }
        }

        fn uniform(&self) -> ProjectionUniform {
            bytemuck::Zeroable::zeroed()
        }
    }

    fn visible_patch() -> BezierPatch {
        flat_patch(-1.0, -1.0, 1.0, 1.0, -5.0)
    }

    #[test]
    fn size_equal_to_limit_needs_split() {
        let d = classify(
            &PatchRange::root(0),
            &visible_patch(),
            &Mat4::IDENTITY,
            &FixedSize(8.0),
            8.0,
            22,
        );
        assert!(matches!(d, Decision::Split(_)), "{d:?}");
    }

    #[test]
    fn size_below_limit_is_accepted() {
        let d = classify(
            &PatchRange::root(0),
            &visible_patch(),
            &Mat4::IDENTITY,
            &FixedSize(7.999),
            8.0,
            22,
        );
        assert_eq!(d, Decision::Accept);
    }

    #[test]
    fn geometry_at_or_behind_eye_is_never_accepted() {
        let patch = flat_patch(-1.0, -1.0, 1.0, 1.0, 0.0);
        let d = classify(
            &PatchRange::root(0),
            &patch,
            &Mat4::IDENTITY,
            &FixedSize(0.5),
            8.0,
            22,
        );
        assert!(matches!(d, Decision::Split(_)), "{d:?}");
    }

    #[test]
    fn depth_limit_only_past_max_depth() {
        let mut range = PatchRange::root(0);
        range.depth = 3;
        let at_limit = classify(&range, &visible_patch(), &Mat4::IDENTITY, &FixedSize(100.0), 8.0, 3);
        assert!(matches!(at_limit, Decision::Split(_)));

        range.depth = 4;
        let past = classify(&range, &visible_patch(), &Mat4::IDENTITY, &FixedSize(100.0), 8.0, 3);
        assert_eq!(past, Decision::DepthLimit);
    }

    #[test]
    fn patch_behind_camera_is_culled() {
        let proj = PerspectiveProjection::with_viewport(UVec2::new(640, 480));
        let patch = flat_patch(-1.0, -1.0, 1.0, 1.0, 4.0);
        let d = classify(&PatchRange::root(0), &patch, &Mat4::IDENTITY, &proj, 8.0, 22);
        assert_eq!(d, Decision::Cull);
    }

    #[test]
    fn large_patch_splits_into_halves() {
        let proj = PerspectiveProjection::with_viewport(UVec2::new(640, 480));
        let d = classify(&PatchRange::root(0), &visible_patch(), &Mat4::IDENTITY, &proj, 8.0, 22);
        let Decision::Split([a, b]) = d else {
            panic!("expected split, got {d:?}");
        };
        assert_eq!(a.depth, 1);
        assert_eq!(a.range.area() + b.range.area(), ParamRect::FULL.area());
    }
}
