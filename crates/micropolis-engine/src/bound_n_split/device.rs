//! Buffers and uploads shared by the GPU bound-and-split engines.

use glam::Mat4;

use super::StepParams;
use crate::config::ReyesConfig;
use crate::error::{ReyesError, Result};
use crate::geometry::{GpuRange, PatchRange};
use crate::gpu::{CommandQueue, Event, GpuContext, WaitList};
use crate::projection::{Projection, ProjectionUniform};

const COUNTER_COUNT: usize = 4;

pub(super) struct DeviceShared {
    pub queue: CommandQueue,
    pub projection: wgpu::Buffer,
    pub params: wgpu::Buffer,
    pub counters: wgpu::Buffer,
    /// Output of accepted ranges, one pass worth.
    pub accepted: wgpu::Buffer,
    pub per_pass: u32,
    pub stack_capacity: u32,
}

/// Storage buffer of `capacity` [`GpuRange`]s.
pub(super) fn range_buffer(device: &wgpu::Device, label: &str, capacity: u32) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: capacity.max(1) as u64 * std::mem::size_of::<GpuRange>() as u64,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

pub(super) fn u32_buffer(device: &wgpu::Device, label: &str, len: u32) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: len.max(1) as u64 * 4,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Byte offset of range `index` in a range buffer.
pub(super) fn range_offset(index: u32) -> u64 {
    index as u64 * std::mem::size_of::<GpuRange>() as u64
}

impl DeviceShared {
    pub fn new(ctx: &GpuContext, config: &ReyesConfig, label: &str) -> Self {
        let device = ctx.device();
        let uniform = |name: &str, size: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{label} {name}")),
                size: size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };

        Self {
            queue: CommandQueue::new(ctx),
            projection: uniform("projection", std::mem::size_of::<ProjectionUniform>()),
            params: uniform("params", std::mem::size_of::<StepParams>()),
            counters: u32_buffer(device, &format!("{label} counters"), COUNTER_COUNT as u32),
            accepted: range_buffer(
                device,
                &format!("{label} accepted ranges"),
                config.reyes_patches_per_pass,
            ),
            per_pass: config.reyes_patches_per_pass,
            stack_capacity: config.range_stack_capacity,
        }
    }

    /// Writes every root range of a `count` patch set and the projection parameters.
    #[track_caller]
    pub fn upload_roots(
        &self,
        stack: &wgpu::Buffer,
        count: u32,
        projection: &dyn Projection,
    ) -> Result<Event> {
        if count > self.stack_capacity {
            return Err(ReyesError::Capacity {
                what: "range stack",
                requested: count as usize,
                capacity: self.stack_capacity as usize,
            });
        }

        let uniform = projection.uniform();
        let written = self.queue.enq_write_buffer(
            &self.projection,
            0,
            bytemuck::bytes_of(&uniform),
            &WaitList::new(),
        )?;

        let roots: Vec<GpuRange> = (0..count).map(|pid| PatchRange::root(pid).to_gpu()).collect();
        if roots.is_empty() {
            return Ok(written);
        }
        self.queue
            .enq_write_buffer(stack, 0, bytemuck::cast_slice(&roots), &WaitList::from(&written))
    }

    #[track_caller]
    pub fn write_params(
        &self,
        mv: &Mat4,
        in_base: u32,
        in_count: u32,
        out_base: u32,
        wait: &WaitList,
    ) -> Result<Event> {
        let params = StepParams {
            mv: mv.to_cols_array_2d(),
            in_base,
            in_count,
            out_base,
            _pad: 0,
        };
        self.queue
            .enq_write_buffer(&self.params, 0, bytemuck::bytes_of(&params), wait)
    }

    #[track_caller]
    pub fn clear_counters(&self, wait: &WaitList) -> Result<Event> {
        self.queue
            .enq_clear_buffer(&self.counters, 0, (COUNTER_COUNT * 4) as u64, wait)
    }

    #[track_caller]
    pub fn read_counters(&self, wait: &WaitList) -> Result<[u32; COUNTER_COUNT]> {
        let values: Vec<u32> = self
            .queue
            .enq_read_buffer(&self.counters, 0, COUNTER_COUNT, wait)?;
        let mut out = [0; COUNTER_COUNT];
        out.copy_from_slice(&values);
        Ok(out)
    }

    /// Step size for a stack of `height`, or a capacity error when no progress is possible.
    pub fn step(&self, height: u32) -> Result<u32> {
        let n = super::step_size(height, self.per_pass, self.stack_capacity);
        if n == 0 && height > 0 {
            return Err(ReyesError::Capacity {
                what: "range stack",
                requested: height as usize + 1,
                capacity: self.stack_capacity as usize,
            });
        }
        Ok(n)
    }
}
