//! Tiled color and depth target with per-tile locks.
//!
//! Pixels are stored tile by tile: pixel `(x, y)` lives at
//! `(ty * grid.x + tx) * T * T + ly * T + lx` with `T` the tile edge. The
//! sample kernel takes a tile's lock before its depth-test-and-write, so the
//! lock array has one entry per tile.
//!
//! When the device also drives the display the color buffer is read directly
//! by [`Framebuffer::show`]. Otherwise `release` copies it through host memory
//! into a separate display buffer.

use bytemuck::{Pod, Zeroable};
use glam::{UVec2, Vec4};

use crate::config::ReyesConfig;
use crate::error::Result;
use crate::gpu::{CommandQueue, Event, GpuContext, Kernel, Program, WaitList};

const CLEAR_GROUP_WIDTH: u32 = 256;

/// Depth of an empty pixel; sampled depths lie in `[0, 1]`.
pub const CLEAR_DEPTH: f32 = 1.0;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ClearParams {
    color: [f32; 4],
    pixel_count: u32,
    tile_count: u32,
    depth: f32,
    _pad: u32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ShowParams {
    size: [u32; 2],
    grid_x: u32,
    tile: u32,
    encode_gamma: u32,
    _pad: [u32; 3],
}

/// Maps display color to the linear values stored in the framebuffer.
fn linearize(c: Vec4) -> [f32; 4] {
    [c.x.powf(2.2), c.y.powf(2.2), c.z.powf(2.2), c.w]
}

pub struct Framebuffer {
    queue: CommandQueue,
    size: UVec2,
    tile_size: u32,
    grid: UVec2,

    color: wgpu::Buffer,
    depth: wgpu::Buffer,
    tile_locks: wgpu::Buffer,

    clear_kernels: [Kernel; 3],
    clear_groups: [wgpu::BindGroup; 3],
    cleared: Event,

    shared: bool,
    /// Upload target of the read-back path.
    display: Option<wgpu::Buffer>,
    show_params: wgpu::Buffer,
    presenter: Option<Presenter>,
}

struct Presenter {
    format: wgpu::TextureFormat,
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
}

impl Framebuffer {
    pub fn new(ctx: &GpuContext, config: &ReyesConfig) -> Result<Self> {
        let device = ctx.device();
        let size = config.window_size;
        let tile_size = config.framebuffer_tile_size;
        let grid = config.tile_grid();
        let pixel_count = grid.x * grid.y * tile_size * tile_size;
        let tile_count = grid.x * grid.y;

        let storage = |label: &str, bytes: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let color = storage("framebuffer color", pixel_count as u64 * 16);
        let depth = storage("framebuffer depth", pixel_count as u64 * 4);
        let tile_locks = storage("framebuffer tile locks", tile_count as u64 * 4);

        let clear_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framebuffer clear params"),
            size: std::mem::size_of::<ClearParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let show_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("framebuffer show params"),
            size: std::mem::size_of::<ShowParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut program = Program::new("framebuffer").source(include_str!("shaders/clear.wgsl"));
        program.set_constant("WG", CLEAR_GROUP_WIDTH);
        let built = program.build(device)?;
        let clear_kernels = [
            built.kernel(device, "clear_color")?,
            built.kernel(device, "clear_depth")?,
            built.kernel(device, "init_tile_locks")?,
        ];
        let clear_groups = [
            clear_kernels[0].bind(device, 0, &[(0, &clear_params), (1, &color)]),
            clear_kernels[1].bind(device, 0, &[(0, &clear_params), (2, &depth)]),
            clear_kernels[2].bind(device, 0, &[(0, &clear_params), (3, &tile_locks)]),
        ];

        let shared = ctx.is_presentable() && !config.disable_buffer_sharing;
        let display = (!shared).then(|| storage("framebuffer display copy", pixel_count as u64 * 16));
        log::debug!(
            "framebuffer {}x{} in {}x{} tiles of {tile_size}, sharing {}",
            size.x,
            size.y,
            grid.x,
            grid.y,
            if shared { "on" } else { "off" },
        );

        let queue = CommandQueue::new(ctx);
        let params = ClearParams {
            color: linearize(config.clear_color),
            pixel_count,
            tile_count,
            depth: CLEAR_DEPTH,
            _pad: 0,
        };
        queue.enq_write_buffer(&clear_params, 0, bytemuck::bytes_of(&params), &WaitList::new())?;
        let show = ShowParams {
            size: size.to_array(),
            grid_x: grid.x,
            tile: tile_size,
            encode_gamma: 0,
            _pad: [0; 3],
        };
        queue.enq_write_buffer(&show_params, 0, bytemuck::bytes_of(&show), &WaitList::new())?;

        Ok(Self {
            queue,
            size,
            tile_size,
            grid,
            color,
            depth,
            tile_locks,
            clear_kernels,
            clear_groups,
            cleared: Event::complete(),
            shared,
            display,
            show_params,
            presenter: None,
        })
    }

    pub fn size(&self) -> UVec2 {
        self.size
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn grid(&self) -> UVec2 {
        self.grid
    }

    /// Pixels including the padding of partial edge tiles.
    pub fn pixel_count(&self) -> u32 {
        self.grid.x * self.grid.y * self.tile_size * self.tile_size
    }

    pub fn color_buffer(&self) -> &wgpu::Buffer {
        &self.color
    }

    pub fn depth_buffer(&self) -> &wgpu::Buffer {
        &self.depth
    }

    pub fn tile_lock_buffer(&self) -> &wgpu::Buffer {
        &self.tile_locks
    }

    /// True when the color buffer is presented without a host round trip.
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Completion of the most recent `clear`.
    pub fn cleared(&self) -> &Event {
        &self.cleared
    }

    /// Resets color, depth and every tile lock.
    #[track_caller]
    pub fn clear(&mut self, wait: &WaitList) -> Result<Event> {
        let pixels = self.pixel_count();
        let tiles = self.grid.x * self.grid.y;

        let color = self.queue.enq_kernel(
            &self.clear_kernels[0],
            &[&self.clear_groups[0]],
            pixels,
            CLEAR_GROUP_WIDTH,
            wait,
        )?;
        let depth = self.queue.enq_kernel(
            &self.clear_kernels[1],
            &[&self.clear_groups[1]],
            pixels,
            CLEAR_GROUP_WIDTH,
            &WaitList::from(&color),
        )?;
        self.cleared = self.queue.enq_kernel(
            &self.clear_kernels[2],
            &[&self.clear_groups[2]],
            tiles,
            CLEAR_GROUP_WIDTH,
            &WaitList::from(&depth),
        )?;
        Ok(self.cleared.clone())
    }

    /// Hands the buffers to the renderer.
    ///
    /// Rendering and presentation share one in-order queue, so nothing needs
    /// to be fenced on either path.
    pub fn acquire(&self) -> Event {
        Event::complete()
    }

    /// Returns the buffers to the display once `wait` completes.
    ///
    /// On the read-back path this blocks on a host copy of the color buffer
    /// and uploads it into the display buffer.
    #[track_caller]
    pub fn release(&self, wait: &WaitList) -> Result<Event> {
        let Some(display) = &self.display else {
            return Ok(Event::complete());
        };
        let pixels: Vec<[f32; 4]> =
            self.queue
                .enq_read_buffer(&self.color, 0, self.pixel_count() as usize, wait)?;
        self.queue
            .enq_write_buffer(display, 0, bytemuck::cast_slice(&pixels), &WaitList::new())
    }

    /// Row-major copy of the color buffer.
    pub fn read_color(&self) -> Result<Vec<[f32; 4]>> {
        let tiled: Vec<[f32; 4]> =
            self.queue
                .enq_read_buffer(&self.color, 0, self.pixel_count() as usize, &WaitList::new())?;
        Ok(untile(&tiled, self.size, self.tile_size, self.grid))
    }

    /// Row-major copy of the depth buffer.
    pub fn read_depth(&self) -> Result<Vec<f32>> {
        let tiled: Vec<f32> =
            self.queue
                .enq_read_buffer(&self.depth, 0, self.pixel_count() as usize, &WaitList::new())?;
        Ok(untile(&tiled, self.size, self.tile_size, self.grid))
    }

    /// Draws the color buffer over `target` with a full-screen pass.
    pub fn show(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        format: wgpu::TextureFormat,
    ) {
        if self.presenter.as_ref().map(|p| p.format) != Some(format) {
            self.presenter = Some(self.build_presenter(format));
        }
        let Some(presenter) = self.presenter.as_ref() else { return };

        let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("micropolis framebuffer show pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        rpass.set_pipeline(&presenter.pipeline);
        rpass.set_bind_group(0, &presenter.bind_group, &[]);
        rpass.draw(0..3, 0..1);
    }

    fn build_presenter(&self, format: wgpu::TextureFormat) -> Presenter {
        let device = self.queue.device();

        let show = ShowParams {
            size: self.size.to_array(),
            grid_x: self.grid.x,
            tile: self.tile_size,
            encode_gamma: u32::from(!format.is_srgb()),
            _pad: [0; 3],
        };
        // Show runs after the caller's next submit, which applies this write first.
        if let Err(e) =
            self.queue
                .enq_write_buffer(&self.show_params, 0, bytemuck::bytes_of(&show), &WaitList::new())
        {
            log::warn!("failed to update show params: {e}");
        }

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("micropolis framebuffer show shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/show.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("micropolis framebuffer show bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("micropolis framebuffer show pipeline layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("micropolis framebuffer show pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        let source = self.display.as_ref().unwrap_or(&self.color);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("micropolis framebuffer show bind group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.show_params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: source.as_entire_binding(),
                },
            ],
        });

        log::debug!("framebuffer presenter built for {format:?}");
        Presenter {
            format,
            pipeline,
            bind_group,
        }
    }
}

/// Index of pixel `(x, y)` in a tiled buffer.
pub fn tiled_index(x: u32, y: u32, tile: u32, grid_x: u32) -> usize {
    let (tx, ty) = (x / tile, y / tile);
    let (lx, ly) = (x % tile, y % tile);
    ((ty * grid_x + tx) * tile * tile + ly * tile + lx) as usize
}

/// Row-major `size.x * size.y` copy of a tiled buffer, dropping edge padding.
fn untile<T: Copy>(tiled: &[T], size: UVec2, tile: u32, grid: UVec2) -> Vec<T> {
    let mut out = Vec::with_capacity((size.x * size.y) as usize);
    for y in 0..size.y {
        for x in 0..size.x {
            out.push(tiled[tiled_index(x, y, tile, grid.x)]);
        }
    }
    out
}
