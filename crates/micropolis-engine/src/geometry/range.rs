use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use super::{BBox, BezierPatch};

/// Parametric sub-rectangle `[min.x, max.x] x [min.y, max.y]` of a patch.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ParamRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl ParamRect {
    pub const FULL: ParamRect = ParamRect {
        min: Vec2::ZERO,
        max: Vec2::ONE,
    };

    #[inline]
    pub fn new(u0: f32, v0: f32, u1: f32, v1: f32) -> Self {
        Self {
            min: Vec2::new(u0, v0),
            max: Vec2::new(u1, v1),
        }
    }

    #[inline]
    pub fn area(&self) -> f32 {
        let d = self.max - self.min;
        d.x * d.y
    }

    /// Parameter value at normalized position `t` inside the rectangle.
    #[inline]
    pub fn lerp(&self, t: Vec2) -> Vec2 {
        self.min + (self.max - self.min) * t
    }
}

/// A piece of one patch still awaiting an accept/split/discard decision.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PatchRange {
    pub patch_id: u32,
    pub range: ParamRect,
    pub depth: u32,
}

impl PatchRange {
    /// Whole patch at depth 0.
    pub fn root(patch_id: u32) -> Self {
        Self {
            patch_id,
            range: ParamRect::FULL,
            depth: 0,
        }
    }

    /// Halves the v interval: `(u0,v0)-(u1,cv)` then `(u0,cv)-(u1,v1)`.
    pub fn vsplit(&self) -> [PatchRange; 2] {
        let r = self.range;
        let cv = (r.min.y + r.max.y) * 0.5;
        [
            self.child(ParamRect::new(r.min.x, r.min.y, r.max.x, cv)),
            self.child(ParamRect::new(r.min.x, cv, r.max.x, r.max.y)),
        ]
    }

    /// Halves the u interval: `(u0,v0)-(cu,v1)` then `(cu,v0)-(u1,v1)`.
    pub fn hsplit(&self) -> [PatchRange; 2] {
        let r = self.range;
        let cu = (r.min.x + r.max.x) * 0.5;
        [
            self.child(ParamRect::new(r.min.x, r.min.y, cu, r.max.y)),
            self.child(ParamRect::new(cu, r.min.y, r.max.x, r.max.y)),
        ]
    }

    #[inline]
    fn child(&self, range: ParamRect) -> PatchRange {
        PatchRange {
            patch_id: self.patch_id,
            range,
            depth: self.depth + 1,
        }
    }

    pub fn to_gpu(&self) -> GpuRange {
        GpuRange {
            patch_id: self.patch_id,
            depth: self.depth,
            min: self.range.min.to_array(),
            max: self.range.max.to_array(),
        }
    }
}

/// Device layout of a patch range; matches `struct Range` in the WGSL programs.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct GpuRange {
    pub patch_id: u32,
    pub depth: u32,
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl From<GpuRange> for PatchRange {
    fn from(g: GpuRange) -> Self {
        PatchRange {
            patch_id: g.patch_id,
            range: ParamRect {
                min: Vec2::from_array(g.min),
                max: Vec2::from_array(g.max),
            },
            depth: g.depth,
        }
    }
}

/// Camera-space bound of a range plus its edge-length estimates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RangeBound {
    pub bbox: BBox,
    /// Longest summed polyline along u (across the 3x3 samples).
    pub u_len: f32,
    /// Longest summed polyline along v.
    pub v_len: f32,
}

impl RangeBound {
    /// The split goes across the longer direction.
    pub fn split(&self, range: &PatchRange) -> [PatchRange; 2] {
        if self.u_len < self.v_len {
            range.vsplit()
        } else {
            range.hsplit()
        }
    }
}

const BOUND_RES: usize = 3;

/// Samples the range on a 3x3 grid in camera space.
///
/// The sampling order and arithmetic are mirrored by `bound_range` in the
/// GPU bound-and-split programs; keep both in step.
pub fn bound_patch_range(r: &PatchRange, patch: &BezierPatch, mv: &Mat4) -> RangeBound {
    let mut ps = [[Vec3::ZERO; BOUND_RES]; BOUND_RES];
    let mut bbox = BBox::EMPTY;
    let step = 1.0 / (BOUND_RES - 1) as f32;

    for (iv, row) in ps.iter_mut().enumerate() {
        for (iu, slot) in row.iter_mut().enumerate() {
            let uv = r.range.lerp(Vec2::new(iu as f32 * step, iv as f32 * step));
            let pos = patch.eval(uv.x, uv.y);
            let pt = mv.transform_point3(pos);
            bbox.add_point(pt);
            *slot = pt;
        }
    }

    let mut u_len = 0.0f32;
    let mut v_len = 0.0f32;
    for i in 0..BOUND_RES {
        let mut u = 0.0;
        let mut v = 0.0;
        for j in 0..BOUND_RES - 1 {
            u += ps[i][j].distance(ps[i][j + 1]);
            v += ps[j][i].distance(ps[j + 1][i]);
        }
        u_len = u_len.max(u);
        v_len = v_len.max(v);
    }

    RangeBound { bbox, u_len, v_len }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::flat_patch;

    #[test]
    fn vsplit_tiles_parent_exactly() {
        let [a, b] = PatchRange::root(7).vsplit();
        assert_eq!(a.range, ParamRect::new(0.0, 0.0, 1.0, 0.5));
        assert_eq!(b.range, ParamRect::new(0.0, 0.5, 1.0, 1.0));
        assert_eq!((a.depth, b.depth), (1, 1));
        assert_eq!((a.patch_id, b.patch_id), (7, 7));
    }

    #[test]
    fn hsplit_tiles_parent_exactly() {
        let parent = PatchRange {
            patch_id: 2,
            range: ParamRect::new(0.25, 0.5, 0.75, 1.0),
            depth: 3,
        };
        let [a, b] = parent.hsplit();
        assert_eq!(a.range, ParamRect::new(0.25, 0.5, 0.5, 1.0));
        assert_eq!(b.range, ParamRect::new(0.5, 0.5, 0.75, 1.0));
        assert_eq!(a.range.max.x, b.range.min.x);
        assert_eq!(a.range.area() + b.range.area(), parent.range.area());
        assert_eq!(a.depth, 4);
    }

    #[test]
    fn wide_patch_splits_across_u() {
        let patch = flat_patch(-4.0, -1.0, 4.0, 1.0, -5.0);
        let root = PatchRange::root(0);
        let bound = bound_patch_range(&root, &patch, &Mat4::IDENTITY);
        assert!((bound.u_len - 8.0).abs() < 1e-4);
        assert!((bound.v_len - 2.0).abs() < 1e-4);
        let [a, _] = bound.split(&root);
        assert_eq!(a.range, ParamRect::new(0.0, 0.0, 0.5, 1.0));
    }

    #[test]
    fn tall_patch_splits_across_v() {
        let patch = flat_patch(-1.0, -4.0, 1.0, 4.0, -5.0);
        let root = PatchRange::root(0);
        let bound = bound_patch_range(&root, &patch, &Mat4::IDENTITY);
        let [a, _] = bound.split(&root);
        assert_eq!(a.range, ParamRect::new(0.0, 0.0, 1.0, 0.5));
    }

    #[test]
    fn bound_uses_model_view() {
        let patch = flat_patch(0.0, 0.0, 1.0, 1.0, 0.0);
        let mv = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0));
        let bound = bound_patch_range(&PatchRange::root(0), &patch, &mv);
        assert_eq!(bound.bbox.min.z, -3.0);
        assert_eq!(bound.bbox.max.z, -3.0);
        assert!(bound.bbox.max.x <= 1.0 + 1e-6);
    }

    #[test]
    fn gpu_range_round_trips_fields() {
        let r = PatchRange {
            patch_id: 11,
            range: ParamRect::new(0.125, 0.25, 0.5, 0.75),
            depth: 5,
        };
        assert_eq!(PatchRange::from(r.to_gpu()), r);
        assert_eq!(std::mem::size_of::<GpuRange>(), 24);
    }
}
