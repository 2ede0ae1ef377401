//! The dice/shade/sample pipeline and its orchestration.
//!
//! A pass dices up to `reyes_patches_per_pass` patches into
//! `(patch_size + 1)^2` grids, shades one color per micropolygon and samples
//! 8x8 micropolygon blocks into the framebuffer under tile locks.

mod patch_buffer;
mod renderer;

pub use patch_buffer::{PatchBuffer, PatchBufferPool};
pub use renderer::Renderer;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec4};

use crate::config::ReyesConfig;
use crate::error::Result;
use crate::framebuffer::Framebuffer;
use crate::gpu::{CommandQueue, Event, Kernel, Program, WaitList};

/// Per-pass uniforms; matches `struct PassParams` in `reyes.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct PassParams {
    mv: [[f32; 4]; 4],
    proj: [[f32; 4]; 4],
    color: [f32; 4],
    viewport: [f32; 2],
    patch_count: u32,
    _pad: u32,
}

/// Micropolygons per sample block edge.
const BLOCK_EDGE: u32 = 8;

/// Kernels and intermediate grids of the pipeline.
struct Stages {
    dice: Kernel,
    shade: Kernel,
    sample: Kernel,

    params: wgpu::Buffer,
    pos: wgpu::Buffer,
    pxlpos: wgpu::Buffer,
    depth: wgpu::Buffer,
    /// Blocks skipped for touching more than `max_block_assignments` tiles.
    overflow: wgpu::Buffer,

    shade_group: wgpu::BindGroup,
    sample_group: wgpu::BindGroup,

    patch_size: u32,
    dice_group_width: u32,
    tile_size: u32,
    viewport: Vec2,
}

impl Stages {
    fn new(device: &wgpu::Device, config: &ReyesConfig, framebuffer: &Framebuffer) -> Result<Self> {
        let grid = framebuffer.grid();
        let size = framebuffer.size();

        let mut program = Program::new("reyes")
            .source(include_str!("../bound_n_split/shaders/ranges.wgsl"))
            .source(include_str!("shaders/reyes.wgsl"));
        program
            .set_constant("PATCH_SIZE", config.reyes_patch_size)
            .set_constant("GROUP_WIDTH", config.dice_group_width)
            .set_constant("TILE", config.framebuffer_tile_size)
            .set_constant("GRID_X", grid.x)
            .set_constant("FB_WIDTH", size.x)
            .set_constant("FB_HEIGHT", size.y)
            .set_constant("SUBPIXEL_SCALE", (1u32 << config.subpixel_bits) as f32)
            .set_constant("MAX_BLOCK_ASSIGNMENTS", config.max_block_assignments)
            .set_constant("BACKFACE_CULLING", config.backface_culling);
        let built = program.build(device)?;
        let dice = built.kernel(device, "dice")?;
        let shade = built.kernel(device, "shade")?;
        let sample = built.kernel(device, "sample_blocks")?;

        let edge = config.reyes_patch_size as u64 + 1;
        let points = edge * edge * config.reyes_patches_per_pass as u64;
        let blocks = config.max_block_count() as u64;
        let micropolygons = blocks * (BLOCK_EDGE * BLOCK_EDGE) as u64;

        let storage = |label: &str, bytes: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes.max(16),
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        };
        let pos = storage("grid eye positions", points * 16);
        let pxlpos = storage("grid pixel positions", points * 8);
        let depth = storage("grid depths", points * 4);
        let colors = storage("micropolygon colors", micropolygons * 16);
        let block_tiles = storage("block tile ranges", blocks * 16);
        let overflow = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("block overflow counter"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pass params"),
            size: std::mem::size_of::<PassParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shade_group = shade.bind(
            device,
            0,
            &[
                (2, &params),
                (3, &pos),
                (4, &pxlpos),
                (6, &colors),
                (7, &block_tiles),
            ],
        );
        let sample_group = sample.bind(
            device,
            0,
            &[
                (2, &params),
                (4, &pxlpos),
                (5, &depth),
                (6, &colors),
                (7, &block_tiles),
                (8, framebuffer.color_buffer()),
                (9, framebuffer.depth_buffer()),
                (10, framebuffer.tile_lock_buffer()),
                (11, &overflow),
            ],
        );

        log::debug!(
            "pipeline grids: {points} points, {blocks} blocks, {} KiB",
            (points * 28 + micropolygons * 16 + blocks * 16) / 1024
        );

        Ok(Self {
            dice,
            shade,
            sample,
            params,
            pos,
            pxlpos,
            depth,
            overflow,
            shade_group,
            sample_group,
            patch_size: config.reyes_patch_size,
            dice_group_width: config.dice_group_width,
            tile_size: config.framebuffer_tile_size,
            viewport: size.as_vec2(),
        })
    }

    #[track_caller]
    fn clear_overflow(&self, queue: &CommandQueue, wait: &WaitList) -> Result<Event> {
        queue.enq_clear_buffer(&self.overflow, 0, 4, wait)
    }

    /// Blocks skipped since the last `clear_overflow`.
    #[track_caller]
    fn read_overflow(&self, queue: &CommandQueue, wait: &WaitList) -> Result<u32> {
        let count: Vec<u32> = queue.enq_read_buffer(&self.overflow, 0, 1, wait)?;
        Ok(count.first().copied().unwrap_or(0))
    }

    /// Enqueues dice, shade and sample over `count` ranges of `patches`.
    ///
    /// Returns the dice and sample completion events.
    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        queue: &CommandQueue,
        patches: &wgpu::Buffer,
        ranges: &wgpu::Buffer,
        count: u32,
        mv: Mat4,
        proj: Mat4,
        color: Vec4,
        wait: &WaitList,
        cleared: &Event,
    ) -> Result<(Event, Event)> {
        let params = PassParams {
            mv: mv.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            color: color.to_array(),
            viewport: self.viewport.to_array(),
            patch_count: count,
            _pad: 0,
        };
        let written = queue.enq_write_buffer(&self.params, 0, bytemuck::bytes_of(&params), wait)?;

        let dice_group = self.dice.bind(
            queue.device(),
            0,
            &[
                (0, patches),
                (1, ranges),
                (2, &self.params),
                (3, &self.pos),
                (4, &self.pxlpos),
                (5, &self.depth),
            ],
        );
        let edge = self.patch_size + 1;
        let diced = queue.enq_kernel(
            &self.dice,
            &[&dice_group],
            (edge, edge, count),
            (self.dice_group_width, self.dice_group_width, 1),
            &(wait.clone() | &written),
        )?;

        let shaded = queue.enq_kernel(
            &self.shade,
            &[&self.shade_group],
            (self.patch_size, self.patch_size, count),
            (BLOCK_EDGE, BLOCK_EDGE, 1),
            &WaitList::from(&diced),
        )?;

        let blocks_per_edge = self.patch_size / BLOCK_EDGE;
        let blocks = blocks_per_edge * blocks_per_edge * count;
        let group = self.tile_size * self.tile_size;
        let sampled = queue.enq_kernel(
            &self.sample,
            &[&self.sample_group],
            blocks * group,
            group,
            &(&shaded | cleared),
        )?;

        Ok((diced, sampled))
    }
}
