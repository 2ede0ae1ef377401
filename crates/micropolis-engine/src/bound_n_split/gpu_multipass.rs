use std::sync::Arc;

use glam::Mat4;

use super::device::{DeviceShared, range_buffer, u32_buffer};
use super::{BOUND_GROUP_WIDTH, Batch, BatchRanges, BoundNSplit, bound_program};
use crate::config::ReyesConfig;
use crate::error::Result;
use crate::gpu::{Event, GpuContext, Kernel, PrefixSum, Program, WaitList};
use crate::projection::Projection;
use crate::stats::ClassifyCounts;
use crate::store::{PatchStore, PatchesHandle};

/// Bound-and-split as separate bound and move kernels.
///
/// The bound kernel records a decision per range and raises a draw or split
/// flag. Exclusive scans of both flag arrays give every accepted range its
/// output slot and every split range the slot of its children, so the move
/// kernel compacts without atomics. Only the culled and depth-limited
/// counters use atomics.
pub struct GpuMultipass {
    shared: DeviceShared,
    store: Arc<dyn PatchStore>,
    bound: Kernel,
    mover: Kernel,
    prefix_sum: PrefixSum,

    stack: wgpu::Buffer,
    pad: wgpu::Buffer,
    decisions: wgpu::Buffer,
    draw_flags: wgpu::Buffer,
    split_flags: wgpu::Buffer,
    move_bind_group: wgpu::BindGroup,

    height: u32,
    active: Option<Active>,
}

struct Active {
    patches: wgpu::Buffer,
    mv: Mat4,
    bound_bind_group: wgpu::BindGroup,
    ready: Event,
}

impl GpuMultipass {
    pub fn new(config: &ReyesConfig, ctx: &GpuContext, store: Arc<dyn PatchStore>) -> Result<Self> {
        let device = ctx.device();

        let bound = bound_program(
            "bound_n_split_multipass",
            config,
            include_str!("shaders/multipass_bound.wgsl"),
        )
        .build(device)?
        .kernel(device, "bound_ranges")?;

        let mut move_program = Program::new("bound_n_split_move")
            .source(include_str!("shaders/ranges.wgsl"))
            .source(include_str!("shaders/multipass_move.wgsl"));
        move_program.set_constant("WG", BOUND_GROUP_WIDTH);
        let mover = move_program.build(device)?.kernel(device, "move_ranges")?;

        let per_pass = config.reyes_patches_per_pass;
        let shared = DeviceShared::new(ctx, config, "multipass");
        let stack = range_buffer(device, "range stack", config.range_stack_capacity);
        let pad = range_buffer(device, "range pad", per_pass * 2);
        let decisions = u32_buffer(device, "range decisions", per_pass);
        let draw_flags = u32_buffer(device, "draw flags", per_pass);
        let split_flags = u32_buffer(device, "split flags", per_pass);

        let move_bind_group = mover.bind(
            device,
            0,
            &[
                (0, &shared.params),
                (1, &pad),
                (2, &decisions),
                (3, &draw_flags),
                (4, &split_flags),
                (5, &stack),
                (6, &shared.accepted),
            ],
        );

        Ok(Self {
            prefix_sum: PrefixSum::new(ctx, per_pass)?,
            shared,
            store,
            bound,
            mover,
            stack,
            pad,
            decisions,
            draw_flags,
            split_flags,
            move_bind_group,
            height: 0,
            active: None,
        })
    }
}

impl BoundNSplit for GpuMultipass {
    fn init(
        &mut self,
        handle: PatchesHandle,
        mv: Mat4,
        projection: Arc<dyn Projection>,
    ) -> Result<()> {
        let count = self.store.get_patch_vector(handle)?.len() as u32;
        let device = self.shared.queue.device();
        let patches = self.store.patch_buffer(device, handle)?;

        let ready = self
            .shared
            .upload_roots(&self.stack, count, projection.as_ref())?;
        self.height = count;

        let s = &self.shared;
        let bound_bind_group = self.bound.bind(
            device,
            0,
            &[
                (0, &patches),
                (1, &s.projection),
                (2, &s.params),
                (3, &self.stack),
                (4, &self.pad),
                (5, &self.decisions),
                (6, &self.draw_flags),
                (7, &self.split_flags),
                (8, &s.counters),
            ],
        );
        self.active = Some(Active {
            patches,
            mv,
            bound_bind_group,
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
        let base = self.height - n;

        let wait = ready | &active.ready;
        let cleared = s.clear_counters(&wait)?;
        // Children overwrite the consumed top of the stack.
        let params = s.write_params(&active.mv, base, n, base, &WaitList::from(&cleared))?;
        let bounded = s.queue.enq_kernel(
            &self.bound,
            &[&active.bound_bind_group],
            n,
            BOUND_GROUP_WIDTH,
            &WaitList::from(&params),
        )?;

        let scanned = self
            .prefix_sum
            .scan(&self.draw_flags, n, &WaitList::from(&bounded))?;
        let total = self
            .prefix_sum
            .copy_total(n, &s.counters, 0, &WaitList::from(&scanned))?;
        let scanned = self
            .prefix_sum
            .scan(&self.split_flags, n, &WaitList::from(&total))?;
        let total = self
            .prefix_sum
            .copy_total(n, &s.counters, 4, &WaitList::from(&scanned))?;

        let moved = s.queue.enq_kernel(
            &self.mover,
            &[&self.move_bind_group],
            n,
            BOUND_GROUP_WIDTH,
            &WaitList::from(&total),
        )?;

        let [accepted, splits, culled, depth_limited] =
            s.read_counters(&WaitList::from(&moved))?;
        self.height = base + 2 * splits;
        log::trace!("multipass step: {n} in, {accepted} accepted, height {}", self.height);

        Ok(Batch {
            count: accepted,
            ranges: BatchRanges::Device {
                ranges: s.accepted.clone(),
                patches: active.patches.clone(),
            },
            transfer_done: moved,
            counts: ClassifyCounts {
                accepted: accepted as u64,
                culled: culled as u64,
                depth_limited: depth_limited as u64,
                split: splits as u64,
            },
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.height = 0;
        self.active = None;
        Ok(())
    }
}
