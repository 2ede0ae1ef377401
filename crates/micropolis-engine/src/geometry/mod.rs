//! Patch geometry shared by the host bound-and-split path and the GPU uploads.
//!
//! Conventions:
//! - `u` runs along the x component of a parametric rectangle, `v` along y.
//! - Control point `p[j][i]` sits at row `j` (v) and column `i` (u).
//! - Camera space looks down -Z; visible geometry has negative z.

mod bbox;
mod patch;
mod range;

pub use bbox::BBox;
pub use patch::{BezierPatch, GpuPatch};
pub use range::{GpuRange, ParamRect, PatchRange, RangeBound, bound_patch_range};
