use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Bicubic Bézier patch, 4x4 control points.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BezierPatch {
    pub p: [[Vec3; 4]; 4],
}

/// Control points as sixteen `vec4<f32>` (w = 1), the layout every kernel reads.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct GpuPatch {
    pub points: [[f32; 4]; 16],
}

#[inline]
fn bernstein(t: f32) -> [f32; 4] {
    let s = 1.0 - t;
    [s * s * s, 3.0 * s * s * t, 3.0 * s * t * t, t * t * t]
}

#[inline]
fn eval_curve(c: &[Vec3; 4], t: f32) -> Vec3 {
    let b = bernstein(t);
    c[0] * b[0] + c[1] * b[1] + c[2] * b[2] + c[3] * b[3]
}

/// de Casteljau split at `t`, returning the `[0, t]` half.
fn curve_left(c: &[Vec3; 4], t: f32) -> [Vec3; 4] {
    let p01 = c[0].lerp(c[1], t);
    let p12 = c[1].lerp(c[2], t);
    let p23 = c[2].lerp(c[3], t);
    let p012 = p01.lerp(p12, t);
    let p123 = p12.lerp(p23, t);
    [c[0], p01, p012, p012.lerp(p123, t)]
}

/// de Casteljau split at `t`, returning the `[t, 1]` half.
fn curve_right(c: &[Vec3; 4], t: f32) -> [Vec3; 4] {
    let p01 = c[0].lerp(c[1], t);
    let p12 = c[1].lerp(c[2], t);
    let p23 = c[2].lerp(c[3], t);
    let p012 = p01.lerp(p12, t);
    let p123 = p12.lerp(p23, t);
    [p012.lerp(p123, t), p123, p23, c[3]]
}

/// Control polygon of the cubic restricted to `[t0, t1]`.
fn restrict_curve(c: &[Vec3; 4], t0: f32, t1: f32) -> [Vec3; 4] {
    if t1 <= 0.0 {
        return [c[0]; 4];
    }
    let left = curve_left(c, t1);
    curve_right(&left, t0 / t1)
}

impl BezierPatch {
    pub fn new(p: [[Vec3; 4]; 4]) -> Self {
        Self { p }
    }

    /// Surface point at `(u, v)`.
    pub fn eval(&self, u: f32, v: f32) -> Vec3 {
        let rows = [
            eval_curve(&self.p[0], u),
            eval_curve(&self.p[1], u),
            eval_curve(&self.p[2], u),
            eval_curve(&self.p[3], u),
        ];
        eval_curve(&rows, v)
    }

    pub fn transformed(&self, m: &Mat4) -> Self {
        let mut out = *self;
        for row in &mut out.p {
            for cp in row.iter_mut() {
                *cp = m.transform_point3(*cp);
            }
        }
        out
    }

    /// Exact control points of the sub-surface over `[u0, u1] x [v0, v1]`.
    pub fn sub_patch(&self, u0: f32, v0: f32, u1: f32, v1: f32) -> Self {
        let mut rows = [[Vec3::ZERO; 4]; 4];
        for (j, row) in self.p.iter().enumerate() {
            rows[j] = restrict_curve(row, u0, u1);
        }

        let mut out = [[Vec3::ZERO; 4]; 4];
        for i in 0..4 {
            let column = [rows[0][i], rows[1][i], rows[2][i], rows[3][i]];
            let column = restrict_curve(&column, v0, v1);
            for j in 0..4 {
                out[j][i] = column[j];
            }
        }
        Self { p: out }
    }

    /// Bounding box of the control hull, which contains the surface.
    pub fn hull_bbox(&self) -> super::BBox {
        self.p.iter().flatten().copied().collect()
    }

    pub fn to_gpu(&self) -> GpuPatch {
        let mut points = [[0.0; 4]; 16];
        for (k, cp) in self.p.iter().flatten().enumerate() {
            points[k] = [cp.x, cp.y, cp.z, 1.0];
        }
        GpuPatch { points }
    }
}
