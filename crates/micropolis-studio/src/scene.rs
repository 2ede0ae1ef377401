//! Procedural demo scene: a wavy ground sheet and a spinning torus, both
//! made of bicubic Bezier patches.

use std::f32::consts::FRAC_PI_2;

use glam::{Mat4, Vec2, Vec3, Vec4};
use micropolis_engine::{BezierPatch, PatchesHandle, Renderer};

/// Handle of a quarter circle's cubic control polygon.
const ARC_K: f32 = 0.552_284_75;

pub struct SceneObject {
    pub name: &'static str,
    pub handle: PatchesHandle,
    pub color: Vec4,
    patches: Vec<BezierPatch>,
    placement: Mat4,
    /// Radians per second about the object's local y axis.
    spin: f32,
}

impl SceneObject {
    pub fn patches(&self) -> &[BezierPatch] {
        &self.patches
    }

    pub fn model(&self, t: f32) -> Mat4 {
        self.placement * Mat4::from_rotation_y(self.spin * t)
    }
}

pub struct Scene {
    objects: Vec<SceneObject>,
    eye: Vec3,
    target: Vec3,
    /// Radians per second the camera orbits the target.
    orbit: f32,
}

impl Scene {
    pub fn demo(sheet_resolution: u32) -> Self {
        let sheet = SceneObject {
            name: "sheet",
            handle: PatchesHandle(1),
            color: Vec4::new(0.35, 0.6, 0.85, 1.0),
            patches: wavy_sheet(sheet_resolution, 4.0, 0.35),
            placement: Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)),
            spin: 0.0,
        };
        let torus = SceneObject {
            name: "torus",
            handle: PatchesHandle(2),
            color: Vec4::new(0.9, 0.55, 0.25, 1.0),
            patches: torus(1.4, 0.45),
            placement: Mat4::from_translation(Vec3::new(0.0, 0.4, 0.0))
                * Mat4::from_rotation_x(0.5),
            spin: 0.8,
        };

        Self {
            objects: vec![sheet, torus],
            eye: Vec3::new(0.0, 2.5, 7.0),
            target: Vec3::ZERO,
            orbit: 0.15,
        }
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn patch_count(&self) -> usize {
        self.objects.iter().map(|o| o.patches.len()).sum()
    }

    /// Uploads every object's patches under its handle.
    pub fn load(&self, renderer: &Renderer) {
        for object in &self.objects {
            if !renderer.are_patches_loaded(object.handle) {
                renderer.load_patches(object.handle, object.patches().to_vec());
            }
        }
    }

    pub fn view(&self, t: f32) -> Mat4 {
        let eye = Mat4::from_rotation_y(self.orbit * t).transform_point3(self.eye - self.target)
            + self.target;
        Mat4::look_at_rh(eye, self.target, Vec3::Y)
    }
}

fn sheet_height(x: f32, z: f32) -> f32 {
    (1.3 * x).sin() * (1.1 * z).cos() + 0.5 * (0.7 * x + 1.9 * z).sin()
}

/// `resolution^2` patches covering `[-half, half]^2` in the xz plane.
///
/// Control points sample the height field on a uniform grid, so neighbouring
/// patches share their boundary control points.
pub fn wavy_sheet(resolution: u32, half: f32, amplitude: f32) -> Vec<BezierPatch> {
    let n = resolution.max(1);
    let step = 2.0 * half / n as f32;
    let mut out = Vec::with_capacity((n * n) as usize);

    for pz in 0..n {
        for px in 0..n {
            let mut p = [[Vec3::ZERO; 4]; 4];
            for (j, row) in p.iter_mut().enumerate() {
                for (i, cp) in row.iter_mut().enumerate() {
                    let x = -half + (px as f32 + i as f32 / 3.0) * step;
                    let z = -half + (pz as f32 + j as f32 / 3.0) * step;
                    *cp = Vec3::new(x, amplitude * sheet_height(x, z), z);
                }
            }
            out.push(BezierPatch::new(p));
        }
    }
    out
}

/// Control polygon of the unit circle arc over `[a0, a0 + pi/2]`.
fn quarter_arc(a0: f32) -> [Vec2; 4] {
    let a1 = a0 + FRAC_PI_2;
    let p0 = Vec2::new(a0.cos(), a0.sin());
    let p3 = Vec2::new(a1.cos(), a1.sin());
    let t0 = Vec2::new(-a0.sin(), a0.cos());
    let t1 = Vec2::new(-a1.sin(), a1.cos());
    [p0, p0 + ARC_K * t0, p3 - ARC_K * t1, p3]
}

/// Torus about the y axis as 16 patches, four quarter arcs around the ring
/// times four around the tube.
pub fn torus(ring_radius: f32, tube_radius: f32) -> Vec<BezierPatch> {
    let mut out = Vec::with_capacity(16);
    for ring in 0..4 {
        let around = quarter_arc(ring as f32 * FRAC_PI_2);
        for tube in 0..4 {
            let section = quarter_arc(tube as f32 * FRAC_PI_2);
            let mut p = [[Vec3::ZERO; 4]; 4];
            for (j, row) in p.iter_mut().enumerate() {
                for (i, cp) in row.iter_mut().enumerate() {
                    let radial = ring_radius + tube_radius * section[j].x;
                    *cp = Vec3::new(
                        radial * around[i].x,
                        tube_radius * section[j].y,
                        radial * around[i].y,
                    );
                }
            }
            out.push(BezierPatch::new(p));
        }
    }
    out
}
