mod clock;
mod runtime;
mod scene;
mod surface;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use glam::{UVec2, Vec4};

use micropolis_engine::logging::{LoggingConfig, init_logging};
use micropolis_engine::{BoundNSplitMethod, ReyesConfig};

use crate::runtime::RuntimeConfig;
use crate::scene::Scene;
use crate::surface::SurfaceInit;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Method {
    Cpu,
    GpuSinglePass,
    GpuMultipass,
}

impl From<Method> for BoundNSplitMethod {
    fn from(m: Method) -> Self {
        match m {
            Method::Cpu => BoundNSplitMethod::Cpu,
            Method::GpuSinglePass => BoundNSplitMethod::GpuSinglePass,
            Method::GpuMultipass => BoundNSplitMethod::GpuMultipass,
        }
    }
}

/// Interactive REYES micropolygon renderer.
#[derive(Debug, Parser)]
#[command(name = "micropolis-studio", version, about)]
struct Args {
    #[arg(long, default_value_t = 1024)]
    width: u32,

    #[arg(long, default_value_t = 768)]
    height: u32,

    /// Bound-and-split engine.
    #[arg(long, value_enum, default_value_t = Method::Cpu)]
    method: Method,

    #[arg(long, default_value_t = 1024)]
    patches_per_pass: u32,

    /// Micropolygons per patch edge (multiple of 8).
    #[arg(long, default_value_t = 16)]
    patch_size: u32,

    /// Screen-space split threshold in pixels.
    #[arg(long, default_value_t = 32.0)]
    split_limit: f32,

    #[arg(long, default_value_t = 22)]
    max_split_depth: u32,

    #[arg(long, default_value_t = 8)]
    tile_size: u32,

    #[arg(long)]
    backface_culling: bool,

    /// Copy the framebuffer through the host instead of sampling it directly.
    #[arg(long)]
    disable_buffer_sharing: bool,

    /// Patches per edge of the ground sheet.
    #[arg(long, default_value_t = 4)]
    sheet_resolution: u32,

    /// Disable vsync.
    #[arg(long)]
    no_vsync: bool,

    /// Log filter in env_logger syntax; overrides RUST_LOG.
    #[arg(long)]
    log: Option<String>,

    /// Trace every GPU submission.
    #[arg(long)]
    trace_events: bool,

    /// Log adapter details and device limits.
    #[arg(short, long)]
    verbose: bool,

    /// Write the last frame's statistics here on exit.
    #[arg(long, value_name = "PATH")]
    stats_file: Option<PathBuf>,
}

impl Args {
    fn renderer_config(&self) -> ReyesConfig {
        ReyesConfig {
            window_size: UVec2::new(self.width, self.height),
            reyes_patches_per_pass: self.patches_per_pass,
            reyes_patch_size: self.patch_size,
            bound_n_split_limit: self.split_limit,
            max_split_depth: self.max_split_depth,
            framebuffer_tile_size: self.tile_size,
            backface_culling: self.backface_culling,
            disable_buffer_sharing: self.disable_buffer_sharing,
            bound_n_split_method: self.method.into(),
            clear_color: Vec4::new(0.08, 0.08, 0.12, 1.0),
            ..ReyesConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LoggingConfig {
        env_filter: args.log.clone(),
        trace_events: args.trace_events,
        ..LoggingConfig::default()
    });

    let renderer = args.renderer_config();
    renderer
        .validate()
        .context("invalid renderer configuration")?;
    log::info!(
        "bound-and-split: {:?}, split limit {} px",
        renderer.bound_n_split_method,
        renderer.bound_n_split_limit
    );

    let config = RuntimeConfig {
        title: "micropolis".to_string(),
        surface: SurfaceInit {
            present_mode: if args.no_vsync {
                wgpu::PresentMode::AutoNoVsync
            } else {
                wgpu::PresentMode::Fifo
            },
            verbose: args.verbose,
            ..SurfaceInit::default()
        },
        renderer,
        stats_file: args.stats_file.clone(),
    };

    runtime::run(config, Scene::demo(args.sheet_resolution))
}
