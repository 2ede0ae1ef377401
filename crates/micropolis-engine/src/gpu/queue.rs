//! Command submission with explicit completion handles.
//!
//! Every `enq_*` call records one command buffer, submits it, and returns the
//! [`Event`] of that submission. The wgpu queue executes submissions in order,
//! so device events in a wait list are satisfied by submission order alone;
//! host-signalled user events are waited on before submitting.

use std::panic::Location;

use bytemuck::Pod;

use super::{Event, GpuContext, Kernel, WaitList};
use crate::error::{ReyesError, Result};

/// Global or local work size in one to three dimensions.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WorkSize(pub [u32; 3]);

impl From<u32> for WorkSize {
    fn from(x: u32) -> Self {
        WorkSize([x, 1, 1])
    }
}

impl From<(u32, u32)> for WorkSize {
    fn from((x, y): (u32, u32)) -> Self {
        WorkSize([x, y, 1])
    }
}

impl From<(u32, u32, u32)> for WorkSize {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        WorkSize([x, y, z])
    }
}

impl WorkSize {
    /// Work groups needed to cover `self` with groups of `local`.
    pub fn groups(&self, local: WorkSize) -> [u32; 3] {
        let mut out = [0; 3];
        for (i, g) in out.iter_mut().enumerate() {
            *g = self.0[i].div_ceil(local.0[i].max(1));
        }
        out
    }
}

#[derive(Clone, Debug)]
pub struct CommandQueue {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl CommandQueue {
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            device: ctx.device().clone(),
            queue: ctx.queue().clone(),
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Uploads `data` at `offset` through the queue's staging memory.
    #[track_caller]
    pub fn enq_write_buffer(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        data: &[u8],
        wait: &WaitList,
    ) -> Result<Event> {
        let location = Location::caller();
        wait.wait_user_events()?;
        self.submit("write buffer", location, |_| {
            self.queue.write_buffer(buffer, offset, data);
        })
    }

    #[track_caller]
    pub fn enq_copy_buffer(
        &self,
        src: &wgpu::Buffer,
        src_offset: u64,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        size: u64,
        wait: &WaitList,
    ) -> Result<Event> {
        let location = Location::caller();
        wait.wait_user_events()?;
        if size == 0 {
            return Ok(Event::complete());
        }
        self.submit("copy buffer", location, |encoder| {
            encoder.copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
        })
    }

    /// Fills `size` bytes at `offset` with zeros.
    #[track_caller]
    pub fn enq_clear_buffer(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        size: u64,
        wait: &WaitList,
    ) -> Result<Event> {
        let location = Location::caller();
        wait.wait_user_events()?;
        self.submit("clear buffer", location, |encoder| {
            encoder.clear_buffer(buffer, offset, Some(size));
        })
    }

    /// Dispatches `kernel` over `global` invocations in groups of `local`.
    ///
    /// `local` must equal the kernel's declared work-group size.
    #[track_caller]
    pub fn enq_kernel(
        &self,
        kernel: &Kernel,
        bind_groups: &[&wgpu::BindGroup],
        global: impl Into<WorkSize>,
        local: impl Into<WorkSize>,
        wait: &WaitList,
    ) -> Result<Event> {
        let location = Location::caller();
        let groups = global.into().groups(local.into());

        let max = self.device.limits().max_compute_workgroups_per_dimension;
        if groups.iter().any(|&g| g > max) {
            return Err(ReyesError::backend(
                format!("enqueue kernel `{}`", kernel.name()),
                format!("dispatch {groups:?} exceeds {max} groups per dimension"),
                location,
            ));
        }

        wait.wait_user_events()?;
        if groups.contains(&0) {
            return Ok(Event::complete());
        }

        self.submit(kernel.name(), location, |encoder| {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.name()),
                timestamp_writes: None,
            });
            pass.set_pipeline(kernel.pipeline());
            for (i, bg) in bind_groups.iter().enumerate() {
                pass.set_bind_group(i as u32, *bg, &[]);
            }
            pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        })
    }

    /// Blocking read-back of `count` elements starting at byte `offset`.
    #[track_caller]
    pub fn enq_read_buffer<T: Pod>(
        &self,
        buffer: &wgpu::Buffer,
        offset: u64,
        count: usize,
        wait: &WaitList,
    ) -> Result<Vec<T>> {
        let location = Location::caller();
        let size = (count * std::mem::size_of::<T>()) as u64;
        if size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("micropolis read-back"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let copied = self.enq_copy_buffer_at(buffer, offset, &staging, size, wait, location)?;
        copied.wait()?;

        let (sender, receiver) = std::sync::mpsc::channel();
        let slice = staging.slice(..);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| ReyesError::Poll(e.to_string()))?;

        let mapped = receiver
            .recv()
            .map_err(|_| ReyesError::backend("map read-back", "map callback dropped", location))?
            .map_err(|e| ReyesError::backend("map read-back", e.to_string(), location))
            .map(|()| slice.get_mapped_range())?;

        let out = bytemuck::try_cast_slice::<u8, T>(&mapped)
            .map(<[T]>::to_vec)
            .map_err(|e| ReyesError::backend("map read-back", e.to_string(), location));
        drop(mapped);
        staging.unmap();
        out
    }

    fn enq_copy_buffer_at(
        &self,
        src: &wgpu::Buffer,
        src_offset: u64,
        dst: &wgpu::Buffer,
        size: u64,
        wait: &WaitList,
        location: &'static Location<'static>,
    ) -> Result<Event> {
        wait.wait_user_events()?;
        self.submit("read buffer", location, |encoder| {
            encoder.copy_buffer_to_buffer(src, src_offset, dst, 0, size);
        })
    }

    pub fn wait_for_events(&self, wait: &WaitList) -> Result<()> {
        wait.wait_all()
    }

    /// Blocks until every submission so far has completed.
    pub fn finish(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| ReyesError::Poll(e.to_string()))
    }

    fn submit(
        &self,
        what: &str,
        location: &'static Location<'static>,
        record: impl FnOnce(&mut wgpu::CommandEncoder),
    ) -> Result<Event> {
        let oom = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation = self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(what) });
        record(&mut encoder);
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let validation = pollster::block_on(validation.pop());
        let oom = pollster::block_on(oom.pop());
        if let Some(err) = validation.or(oom) {
            return Err(ReyesError::backend(what, err.to_string(), location));
        }

        log::trace!(
            "{}:{}: submitted {what}",
            location.file(),
            location.line()
        );
        Ok(Event::submitted(
            what.to_string(),
            &self.device,
            &self.queue,
            index,
        ))
    }
}
