use std::sync::Arc;
use std::time::Instant;

use glam::{Mat4, Vec4};
use wgpu::util::DeviceExt;

use super::{PatchBufferPool, Stages};
use crate::bound_n_split::{self, BatchRanges, BoundNSplit};
use crate::config::ReyesConfig;
use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::geometry::{BezierPatch, GpuRange, PatchRange};
use crate::gpu::{CommandQueue, Event, GpuContext, WaitList};
use crate::projection::{PerspectiveProjection, Projection};
use crate::stats::Statistics;
use crate::store::{PatchStore, PatchesHandle};

/// Drives bound-and-split and the dice/shade/sample passes of one frame.
///
/// Frame protocol: `prepare`, any number of `draw_patches` or `draw_patch`,
/// then `finish`. Patches staged through `draw_patch` are diced once a pool
/// slot fills or on `flush`; device batches from the GPU bound-and-split
/// engines are diced as soon as they are produced.
pub struct Renderer {
    config: ReyesConfig,
    queue: CommandQueue,
    store: Arc<dyn PatchStore>,
    bound_n_split: Box<dyn BoundNSplit>,

    pool: PatchBufferPool,
    stages: Stages,
    framebuffer: Framebuffer,
    /// Range `i` covers all of patch `i`; used for staged patches.
    identity_ranges: wgpu::Buffer,

    /// Completion of the most recent sample pass.
    last_sample: Event,
    projection: Arc<dyn Projection>,
    color: Vec4,
    stats: Statistics,
}

impl Renderer {
    pub fn new(ctx: &GpuContext, config: ReyesConfig, store: Arc<dyn PatchStore>) -> Result<Self> {
        config.validate()?;
        let device = ctx.device();

        let framebuffer = Framebuffer::new(ctx, &config)?;
        let stages = Stages::new(device, &config, &framebuffer)?;
        let bound_n_split = bound_n_split::create(&config, ctx, store.clone())?;
        let pool = PatchBufferPool::new(
            device,
            config.patch_buffer_count,
            config.reyes_patches_per_pass,
        );

        let identity: Vec<GpuRange> = (0..config.reyes_patches_per_pass)
            .map(|i| PatchRange::root(i).to_gpu())
            .collect();
        let identity_ranges = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("identity ranges"),
            contents: bytemuck::cast_slice(&identity),
            usage: wgpu::BufferUsages::STORAGE,
        });

        log::info!(
            "renderer: {}x{}, {} patches/pass of {}x{} micropolygons, {} patch buffers",
            config.window_size.x,
            config.window_size.y,
            config.reyes_patches_per_pass,
            config.reyes_patch_size,
            config.reyes_patch_size,
            pool.len(),
        );

        Ok(Self {
            projection: Arc::new(PerspectiveProjection::with_viewport(config.window_size)),
            color: Vec4::ONE,
            queue: CommandQueue::new(ctx),
            store,
            bound_n_split,
            pool,
            stages,
            framebuffer,
            identity_ranges,
            last_sample: Event::complete(),
            stats: Statistics::new(),
            config,
        })
    }

    pub fn config(&self) -> &ReyesConfig {
        &self.config
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn framebuffer_mut(&mut self) -> &mut Framebuffer {
        &mut self.framebuffer
    }

    pub fn last_sample(&self) -> &Event {
        &self.last_sample
    }

    /// Patches staged but not yet flushed.
    pub fn pending_patches(&self) -> usize {
        self.pool.pending()
    }

    pub fn load_patches(&self, handle: PatchesHandle, patches: Vec<BezierPatch>) {
        self.store.load_patches(handle, patches);
    }

    pub fn are_patches_loaded(&self, handle: PatchesHandle) -> bool {
        self.store.are_patches_loaded(handle)
    }

    /// Starts a frame: clears the framebuffer once the previous frame has sampled.
    pub fn prepare(&mut self) -> Result<()> {
        self.stats.start_render();
        let acquired = self.framebuffer.acquire();
        let cleared = self.framebuffer.clear(&(&acquired | &self.last_sample))?;
        self.stages
            .clear_overflow(&self.queue, &WaitList::from(&cleared))?;
        Ok(())
    }

    /// Projection used for staged patches.
    ///
    /// Staged patches are flushed first when the projection matrix changes;
    /// a different projection object with the same matrix keeps them staged.
    pub fn set_projection(&mut self, projection: Arc<dyn Projection>) -> Result<()> {
        if Arc::ptr_eq(&projection, &self.projection) {
            return Ok(());
        }
        if projection.calc_projection() != self.projection.calc_projection() {
            self.flush()?;
        }
        self.projection = projection;
        Ok(())
    }

    /// Base color of subsequent patches. Flushes staged patches first when it changes.
    pub fn set_color(&mut self, color: Vec4) -> Result<()> {
        if color != self.color {
            self.flush()?;
            self.color = color;
        }
        Ok(())
    }

    /// Stages one eye-space patch; flushes when the active buffer fills.
    pub fn draw_patch(&mut self, patch: &BezierPatch) -> Result<()> {
        if self.pool.push(patch.to_gpu())? {
            self.flush()?;
        }
        Ok(())
    }

    /// Uploads the active patch buffer and enqueues its dice/shade/sample pass.
    pub fn flush(&mut self) -> Result<()> {
        let Some(index) = self.pool.rotate() else {
            return Ok(());
        };

        match self.enqueue_staged(index) {
            Ok((count, written, sampled)) => {
                self.pool.complete(index, written, sampled.clone());
                self.finish_pass(count, sampled);
                Ok(())
            }
            Err(e) => {
                self.pool.discard(index);
                Err(e)
            }
        }
    }

    fn enqueue_staged(&self, index: usize) -> Result<(u32, Event, Event)> {
        let (buffer, patches) = self.pool.staged(index);
        let count = patches.len() as u32;
        let written = self.queue.enq_write_buffer(
            buffer,
            0,
            bytemuck::cast_slice(patches),
            &WaitList::new(),
        )?;
        let (_, sampled) = self.stages.run(
            &self.queue,
            buffer,
            &self.identity_ranges,
            count,
            Mat4::IDENTITY,
            self.projection.calc_projection(),
            self.color,
            &(&written | &self.last_sample),
            self.framebuffer.cleared(),
        )?;
        Ok((count, written, sampled))
    }

    /// Bound-and-splits every patch of `handle` under `mv` and renders the result.
    pub fn draw_patches(
        &mut self,
        handle: PatchesHandle,
        mv: Mat4,
        projection: Arc<dyn Projection>,
        color: Vec4,
    ) -> Result<()> {
        self.set_projection(projection.clone())?;
        self.set_color(color)?;

        let patches = self.store.get_patch_vector(handle)?;
        self.bound_n_split.init(handle, mv, projection)?;

        let mut ready = Event::complete();
        while !self.bound_n_split.done() {
            let started = Instant::now();
            let batch = self.bound_n_split.do_bound_n_split(&ready)?;
            self.stats.add_bound_n_split_time(started.elapsed());
            self.stats.add_classification(batch.counts);
            if batch.is_empty() {
                continue;
            }

            match &batch.ranges {
                BatchRanges::Host(ranges) => {
                    for r in ranges {
                        let sub = patches[r.patch_id as usize]
                            .sub_patch(r.range.min.x, r.range.min.y, r.range.max.x, r.range.max.y)
                            .transformed(&mv);
                        self.draw_patch(&sub)?;
                    }
                }
                BatchRanges::Device {
                    ranges,
                    patches: patch_buffer,
                } => {
                    let (diced, sampled) = self.stages.run(
                        &self.queue,
                        patch_buffer,
                        ranges,
                        batch.count,
                        mv,
                        self.projection.calc_projection(),
                        self.color,
                        &(&batch.transfer_done | &self.last_sample),
                        self.framebuffer.cleared(),
                    )?;
                    // The engine may overwrite its accepted ranges once dice has read them.
                    ready = diced;
                    self.finish_pass(batch.count, sampled);
                }
            }
        }

        self.bound_n_split.finish()
    }

    /// Flushes staged patches, waits for the frame and hands the framebuffer back.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        self.queue
            .wait_for_events(&WaitList::from(&self.last_sample))?;
        self.pool.wait_idle()?;
        let overflows = self
            .stages
            .read_overflow(&self.queue, &WaitList::from(&self.last_sample))?;
        self.stats.add_block_overflows(overflows as u64);
        let released = self
            .framebuffer
            .release(&WaitList::from(&self.last_sample))?;
        released.wait()?;

        self.stats.end_render();
        self.stats.update();
        Ok(())
    }

    fn finish_pass(&mut self, count: u32, sampled: Event) {
        self.stats.inc_patch_count(count as u64);
        self.stats.inc_pass_count();
        self.last_sample = sampled;
    }
}
