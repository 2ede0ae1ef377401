//! Adaptive bound-and-split subdivision.
//!
//! Every engine applies the same classification policy (see [`classify`]) to
//! patch ranges and hands accepted ranges to the renderer in batches. They
//! differ only in where the loop runs:
//! - [`CpuBoundNSplit`]: explicit work stack on the host
//! - [`GpuSinglePass`]: one classify-and-split kernel over ping/pong stacks
//! - [`GpuMultipass`]: bound and move kernels with prefix-sum compaction

mod classify;
mod cpu;
mod device;
mod gpu_multipass;
mod gpu_single;

use std::sync::Arc;

use glam::Mat4;

pub use classify::{Decision, classify};
pub use cpu::CpuBoundNSplit;
pub use gpu_multipass::GpuMultipass;
pub use gpu_single::GpuSinglePass;

use crate::config::{BoundNSplitMethod, ReyesConfig};
use crate::error::Result;
use crate::geometry::PatchRange;
use crate::gpu::{Event, GpuContext, Program};
use crate::projection::Projection;
use crate::stats::ClassifyCounts;
use crate::store::{PatchStore, PatchesHandle};

/// Accepted ranges produced by one `do_bound_n_split` call.
#[derive(Debug)]
pub struct Batch {
    /// Number of accepted ranges; never above the per-pass capacity.
    pub count: u32,
    pub ranges: BatchRanges,
    /// Completes once `ranges` may be read by the dice stage.
    pub transfer_done: Event,
    pub counts: ClassifyCounts,
}

#[derive(Debug)]
pub enum BatchRanges {
    /// Ranges on the host, in pop order.
    Host(Vec<PatchRange>),
    /// `ranges` holds `count` [`GpuRange`](crate::geometry::GpuRange) entries
    /// indexing into the patch set storage buffer `patches`.
    Device {
        ranges: wgpu::Buffer,
        patches: wgpu::Buffer,
    },
}

impl Batch {
    pub fn empty() -> Self {
        Self {
            count: 0,
            ranges: BatchRanges::Host(Vec::new()),
            transfer_done: Event::complete(),
            counts: ClassifyCounts::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Common contract of the bound-and-split engines.
///
/// Drive with `init`, then `do_bound_n_split` until `done`, then `finish`.
pub trait BoundNSplit {
    /// Resets to every patch of `handle` at full range and depth 0.
    fn init(
        &mut self,
        handle: PatchesHandle,
        mv: Mat4,
        projection: Arc<dyn Projection>,
    ) -> Result<()>;

    /// True once no unresolved ranges remain.
    fn done(&self) -> bool;

    /// Does a bounded amount of work. `ready` completes when the previous
    /// batch's buffers may be overwritten.
    fn do_bound_n_split(&mut self, ready: &Event) -> Result<Batch>;

    /// Drops per-frame state.
    fn finish(&mut self) -> Result<()>;
}

/// Builds the engine selected by `config.bound_n_split_method`.
pub fn create(
    config: &ReyesConfig,
    ctx: &GpuContext,
    store: Arc<dyn PatchStore>,
) -> Result<Box<dyn BoundNSplit>> {
    log::info!("bound-and-split method: {:?}", config.bound_n_split_method);
    Ok(match config.bound_n_split_method {
        BoundNSplitMethod::Cpu => Box::new(CpuBoundNSplit::new(config, store)),
        BoundNSplitMethod::GpuSinglePass => Box::new(GpuSinglePass::new(config, ctx, store)?),
        BoundNSplitMethod::GpuMultipass => Box::new(GpuMultipass::new(config, ctx, store)?),
    })
}

/// Work-group width of the bound kernels.
pub(crate) const BOUND_GROUP_WIDTH: u32 = 64;

/// Bound program with the classification policy baked in.
pub(crate) fn bound_program(name: &str, config: &ReyesConfig, kernel_src: &'static str) -> Program {
    let mut program = Program::new(name)
        .source(include_str!("shaders/ranges.wgsl"))
        .source(include_str!("shaders/bound.wgsl"))
        .source(kernel_src);
    program
        .set_constant("WG", BOUND_GROUP_WIDTH)
        .set_constant("SPLIT_LIMIT", config.bound_n_split_limit)
        .set_constant("MAX_SPLIT_DEPTH", config.max_split_depth);
    program
}

/// Per-call uniforms of the GPU engines; matches `struct StepParams`.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct StepParams {
    pub mv: [[f32; 4]; 4],
    pub in_base: u32,
    pub in_count: u32,
    pub out_base: u32,
    pub _pad: u32,
}

/// Ranges to take from a stack of `height` so that accepts fit one pass and
/// children fit the stack.
pub(crate) fn step_size(height: u32, per_pass: u32, stack_capacity: u32) -> u32 {
    height.min(per_pass).min(stack_capacity.saturating_sub(height))
}
