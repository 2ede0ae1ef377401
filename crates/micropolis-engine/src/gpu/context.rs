use crate::error::{ReyesError, Result};

/// Device and queue shared by every GPU-side component of a renderer.
///
/// `presentable` records whether the device also drives a display surface; the
/// framebuffer only skips its host read-back path in that case.
#[derive(Clone, Debug)]
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    presentable: bool,
}

impl GpuContext {
    /// Creates a device without a surface (tests, off-screen tools).
    pub async fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| ReyesError::Device(format!("no suitable adapter: {e}")))?;

        Self::log_adapter(&adapter, false);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("micropolis headless device"),
                required_features: wgpu::Features::empty(),
                required_limits: Self::required_limits(&adapter),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ReyesError::Device(format!("failed to create device: {e}")))?;

        Ok(Self {
            device,
            queue,
            presentable: false,
        })
    }

    /// Adopts a device created by a windowing host for its surface.
    pub fn from_surface_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            presentable: true,
        }
    }

    /// Limits the renderer asks for: the defaults, with storage-buffer limits
    /// raised to what the adapter offers.
    pub fn required_limits(adapter: &wgpu::Adapter) -> wgpu::Limits {
        let supported = adapter.limits();
        wgpu::Limits {
            max_storage_buffers_per_shader_stage: supported.max_storage_buffers_per_shader_stage,
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::default()
        }
    }

    /// Logs the adapter in use; `verbose` adds driver details and the limits
    /// the renderer sizes its buffers and dispatches against.
    pub fn log_adapter(adapter: &wgpu::Adapter, verbose: bool) {
        let info = adapter.get_info();
        log::info!("using adapter {} ({:?})", info.name, info.backend);
        if !verbose {
            return;
        }
        log::info!(
            "  {:?}, vendor {:#06x} device {:#06x}, driver {} {}",
            info.device_type,
            info.vendor,
            info.device,
            info.driver,
            info.driver_info,
        );
        for line in limit_lines(&adapter.limits()) {
            log::info!("  {line}");
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn is_presentable(&self) -> bool {
        self.presentable
    }
}

fn limit_lines(limits: &wgpu::Limits) -> Vec<String> {
    vec![
        format!("max buffer size: {}", limits.max_buffer_size),
        format!(
            "max storage buffer binding size: {}",
            limits.max_storage_buffer_binding_size
        ),
        format!(
            "max storage buffers per stage: {}",
            limits.max_storage_buffers_per_shader_stage
        ),
        format!(
            "max workgroup size: {}x{}x{} ({} invocations)",
            limits.max_compute_workgroup_size_x,
            limits.max_compute_workgroup_size_y,
            limits.max_compute_workgroup_size_z,
            limits.max_compute_invocations_per_workgroup
        ),
        format!(
            "max workgroups per dimension: {}",
            limits.max_compute_workgroups_per_dimension
        ),
        format!(
            "max workgroup storage: {} bytes",
            limits.max_compute_workgroup_storage_size
        ),
    ]
}
