use std::sync::Arc;

use glam::Mat4;

use super::device::{DeviceShared, range_buffer, range_offset};
use super::{BOUND_GROUP_WIDTH, Batch, BatchRanges, BoundNSplit, bound_program};
use crate::config::ReyesConfig;
use crate::error::Result;
use crate::gpu::{Event, GpuContext, Kernel, WaitList};
use crate::projection::Projection;
use crate::stats::ClassifyCounts;
use crate::store::{PatchStore, PatchesHandle};

/// Bound-and-split with one kernel per call over two range stacks.
///
/// The stacks form a two-slot arena selected by `parity`. Each call copies the
/// bottom of the active stack to the other slot, classifies the top ranges into
/// it, and flips `parity`.
pub struct GpuSinglePass {
    shared: DeviceShared,
    store: Arc<dyn PatchStore>,
    kernel: Kernel,
    stacks: [wgpu::Buffer; 2],
    parity: usize,
    height: u32,
    active: Option<Active>,
}

struct Active {
    patches: wgpu::Buffer,
    mv: Mat4,
    /// Bind group reading `stacks[p]` and writing `stacks[p ^ 1]`.
    bind_groups: [wgpu::BindGroup; 2],
    ready: Event,
}

impl GpuSinglePass {
    pub fn new(config: &ReyesConfig, ctx: &GpuContext, store: Arc<dyn PatchStore>) -> Result<Self> {
        let device = ctx.device();
        let program = bound_program(
            "bound_n_split_single",
            config,
            include_str!("shaders/single_pass.wgsl"),
        )
        .build(device)?;
        let kernel = program.kernel(device, "bound_n_split")?;

        let capacity = config.range_stack_capacity;
        let stacks = [
            range_buffer(device, "range stack ping", capacity),
            range_buffer(device, "range stack pong", capacity),
        ];

        Ok(Self {
            shared: DeviceShared::new(ctx, config, "single-pass"),
            store,
            kernel,
            stacks,
            parity: 0,
            height: 0,
            active: None,
        })
    }

    fn bind(&self, patches: &wgpu::Buffer, parity: usize) -> wgpu::BindGroup {
        let s = &self.shared;
        self.kernel.bind(
            s.queue.device(),
            0,
            &[
                (0, patches),
                (1, &s.projection),
                (2, &s.params),
                (3, &self.stacks[parity]),
                (4, &self.stacks[parity ^ 1]),
                (5, &s.accepted),
                (6, &s.counters),
            ],
        )
    }
}

impl BoundNSplit for GpuSinglePass {
    fn init(
        &mut self,
        handle: PatchesHandle,
        mv: Mat4,
        projection: Arc<dyn Projection>,
    ) -> Result<()> {
        let count = self.store.get_patch_vector(handle)?.len() as u32;
        let patches = self.store.patch_buffer(self.shared.queue.device(), handle)?;

        self.parity = 0;
        let ready = self
            .shared
            .upload_roots(&self.stacks[0], count, projection.as_ref())?;
        self.height = count;

        let bind_groups = [self.bind(&patches, 0), self.bind(&patches, 1)];
        self.active = Some(Active {
            patches,
            mv,
            bind_groups,
            ready,
        });
        Ok(())
    }

    fn done(&self) -> bool {
        self.height == 0
    }

    fn do_bound_n_split(&mut self, ready: &Event) -> Result<Batch> {
        let Some(active) = self.active.as_ref() else {
            return Ok(Batch::empty());
        };
        if self.height == 0 {
            return Ok(Batch::empty());
        }

        let s = &self.shared;
        let n = s.step(self.height)?;
        let keep = self.height - n;
        let (input, output) = (&self.stacks[self.parity], &self.stacks[self.parity ^ 1]);

        let wait = ready | &active.ready;
        let cleared = s.clear_counters(&wait)?;
        let copied = s.queue.enq_copy_buffer(
            input,
            0,
            output,
            0,
            range_offset(keep),
            &WaitList::from(&cleared),
        )?;
        let params = s.write_params(&active.mv, keep, n, keep, &WaitList::from(&copied))?;
        let classified = s.queue.enq_kernel(
            &self.kernel,
            &[&active.bind_groups[self.parity]],
            n,
            BOUND_GROUP_WIDTH,
            &WaitList::from(&params),
        )?;

        let [accepted, children, culled, depth_limited] =
            s.read_counters(&WaitList::from(&classified))?;

        self.height = keep + children;
        self.parity ^= 1;
        log::trace!("single-pass step: {n} in, {accepted} accepted, height {}", self.height);

        Ok(Batch {
            count: accepted,
            ranges: BatchRanges::Device {
                ranges: s.accepted.clone(),
                patches: active.patches.clone(),
            },
            transfer_done: classified,
            counts: ClassifyCounts {
                accepted: accepted as u64,
                culled: culled as u64,
                depth_limited: depth_limited as u64,
                split: (children / 2) as u64,
            },
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.height = 0;
        self.active = None;
        Ok(())
    }
}
