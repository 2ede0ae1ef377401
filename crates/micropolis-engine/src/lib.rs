//! Micropolis engine crate.
//!
//! Adaptive micropolygon rendering of bicubic Bézier patches on wgpu compute:
//! bound-and-split subdivision, a pipelined dice/shade/sample chain, and a
//! tiled framebuffer with per-tile locks.

pub mod bound_n_split;
pub mod config;
pub mod error;
pub mod framebuffer;
pub mod geometry;
pub mod gpu;
pub mod logging;
pub mod pipeline;
pub mod projection;
pub mod stats;
pub mod store;

pub use config::{BoundNSplitMethod, ReyesConfig};
pub use error::{ReyesError, Result};
pub use framebuffer::Framebuffer;
pub use geometry::{BBox, BezierPatch, PatchRange};
pub use gpu::{Event, GpuContext, WaitList};
pub use pipeline::Renderer;
pub use projection::{PerspectiveProjection, Projection};
pub use stats::Statistics;
pub use store::{PatchIndex, PatchStore, PatchesHandle};
