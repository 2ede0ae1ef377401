use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use ouroboros::self_referencing;

use micropolis_engine::{PatchIndex, PerspectiveProjection, Renderer, ReyesConfig};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use crate::clock::FrameClock;
use crate::scene::Scene;
use crate::surface::{Surface, SurfaceErrorAction, SurfaceInit};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub surface: SurfaceInit,
    pub renderer: ReyesConfig,
    /// Written with the last frame's statistics when the window closes.
    pub stats_file: Option<PathBuf>,
}

#[self_referencing]
struct WindowEntry {
    window: Window,

    #[borrows(window)]
    #[covariant]
    surface: Surface<'this>,
}

/// The open window and the renderer drawing into it.
struct Viewer {
    entry: WindowEntry,
    renderer: Renderer,
    projection: Arc<PerspectiveProjection>,
    clock: FrameClock,
}

impl Viewer {
    fn open(event_loop: &ActiveEventLoop, config: &RuntimeConfig, scene: &Scene) -> Result<Self> {
        let size = config.renderer.window_size;
        let attrs = Window::default_attributes()
            .with_title(config.title.clone())
            .with_inner_size(PhysicalSize::new(size.x, size.y));
        let window = event_loop
            .create_window(attrs)
            .context("failed to create window")?;

        let init = config.surface.clone();
        let entry = WindowEntryTryBuilder {
            window,
            surface_builder: |w| pollster::block_on(Surface::new(w, init)),
        }
        .try_build()
        .context("GPU initialization failed for window")?;

        let ctx = entry.borrow_surface().context().clone();
        let renderer = Renderer::new(&ctx, config.renderer.clone(), Arc::new(PatchIndex::new()))
            .context("failed to create renderer")?;
        scene.load(&renderer);
        log::info!(
            "scene: {} objects, {} patches",
            scene.objects().len(),
            scene.patch_count()
        );

        Ok(Self {
            entry,
            renderer,
            projection: Arc::new(PerspectiveProjection::with_viewport(size)),
            clock: FrameClock::new(),
        })
    }

    fn request_redraw(&self) {
        self.entry.with_window(|w| w.request_redraw());
    }

    fn resize(&mut self, size: PhysicalSize<u32>) {
        self.entry.with_surface_mut(|s| s.resize(size));
        self.clock.reset();
    }

    /// Renders one frame of `scene` and presents it.
    fn redraw(&mut self, scene: &Scene) -> Result<()> {
        let time = self.clock.tick();
        let view = scene.view(time.elapsed);
        log::trace!("frame {} dt {:.2} ms", time.frame_index, time.dt * 1e3);

        self.renderer.prepare().context("failed to prepare frame")?;
        for object in scene.objects() {
            self.renderer
                .draw_patches(
                    object.handle,
                    view * object.model(time.elapsed),
                    self.projection.clone(),
                    object.color,
                )
                .with_context(|| format!("failed to draw {}", object.name))?;
        }
        self.renderer.finish().context("failed to finish frame")?;

        let size = self.entry.borrow_surface().size();
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }

        let frame = match self.entry.borrow_surface().begin_frame() {
            Ok(frame) => frame,
            Err(err) => {
                let message = err.to_string();
                let action = self.entry.with_surface_mut(|s| s.handle_surface_error(err));
                if action == SurfaceErrorAction::Fatal {
                    anyhow::bail!("surface error: {message}");
                }
                log::debug!("skipped frame {}: {message}", time.frame_index);
                return Ok(());
            }
        };

        let surface = self.entry.borrow_surface();
        let mut frame = frame;
        self.renderer
            .framebuffer_mut()
            .show(&mut frame.encoder, &frame.view, surface.format());
        self.entry.with_window(|w| w.pre_present_notify());
        surface.submit(frame);
        Ok(())
    }

    fn write_stats(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create stats file {}", path.display()))?;
        self.renderer
            .stats()
            .write_summary(BufWriter::new(file))
            .with_context(|| format!("failed to write stats file {}", path.display()))?;
        log::info!("statistics written to {}", path.display());
        Ok(())
    }
}

struct Studio {
    config: RuntimeConfig,
    scene: Scene,
    viewer: Option<Viewer>,
    error: Option<anyhow::Error>,
}

impl Studio {
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error = Some(err);
        self.viewer = None;
        event_loop.exit();
    }

    fn close(&mut self, event_loop: &ActiveEventLoop) {
        if let (Some(viewer), Some(path)) = (self.viewer.take(), &self.config.stats_file) {
            if let Err(e) = viewer.write_stats(path) {
                log::error!("{e:#}");
                self.error = Some(e);
            }
        }
        event_loop.exit();
    }
}

impl ApplicationHandler for Studio {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.viewer.is_some() {
            return;
        }
        match Viewer::open(event_loop, &self.config, &self.scene) {
            Ok(viewer) => {
                viewer.request_redraw();
                self.viewer = Some(viewer);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);
        // Continuous redraw; the scene animates.
        if let Some(viewer) = &self.viewer {
            viewer.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(viewer) = self.viewer.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => self.close(event_loop),
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed
                    && matches!(
                        event.physical_key,
                        PhysicalKey::Code(KeyCode::Escape | KeyCode::KeyQ)
                    ) =>
            {
                self.close(event_loop);
            }
            WindowEvent::Resized(size) => {
                viewer.resize(size);
                viewer.request_redraw();
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = viewer.entry.with_window(|w| w.inner_size());
                viewer.resize(size);
                viewer.request_redraw();
            }
            WindowEvent::RedrawRequested => {
                if let Err(e) = viewer.redraw(&self.scene) {
                    self.fail(event_loop, e);
                }
            }
            _ => {}
        }
    }
}

/// Opens the studio window and runs until it is closed.
pub fn run(config: RuntimeConfig, scene: Scene) -> Result<()> {
    let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
    let mut studio = Studio {
        config,
        scene,
        viewer: None,
        error: None,
    };

    event_loop
        .run_app(&mut studio)
        .context("winit event loop terminated with error")?;

    match studio.error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
