use bytemuck::{Pod, Zeroable};

use super::{CommandQueue, Event, GpuContext, Kernel, Program, WaitList};
use crate::error::{ReyesError, Result};

/// Elements scanned per work group.
pub const SCAN_BLOCK: u32 = 256;

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
struct ScanParams {
    len: u32,
    _pad: [u32; 3],
}

/// Device-side exclusive scan over `u32` with recursive block sums.
///
/// Level `k` scans blocks of level `k - 1`'s totals until one block remains;
/// that block's total is the sum of the whole input.
pub struct PrefixSum {
    queue: CommandQueue,
    scan: Kernel,
    add: Kernel,
    capacity: u32,
    /// Block totals of each level.
    sums: Vec<wgpu::Buffer>,
    params: Vec<wgpu::Buffer>,
}

/// Element counts of every scan level for an input of `len`.
fn level_lens(len: u32) -> Vec<u32> {
    let mut lens = vec![len];
    let mut last = len;
    while last > SCAN_BLOCK {
        last = last.div_ceil(SCAN_BLOCK);
        lens.push(last);
    }
    lens
}

impl PrefixSum {
    pub fn new(ctx: &GpuContext, capacity: u32) -> Result<Self> {
        let device = ctx.device();

        let mut program = Program::new("prefix_sum").source(include_str!("shaders/prefix_sum.wgsl"));
        program.set_constant("BLOCK", SCAN_BLOCK);
        let built = program.build(device)?;
        let scan = built.kernel(device, "scan_block")?;
        let add = built.kernel(device, "add_block_sums")?;

        let lens = level_lens(capacity.max(1));
        let sums = lens
            .iter()
            .enumerate()
            .map(|(level, len)| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("prefix sum block totals {level}")),
                    size: (len.div_ceil(SCAN_BLOCK) as u64) * 4,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        let params = lens
            .iter()
            .map(|_| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("prefix sum params"),
                    size: std::mem::size_of::<ScanParams>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        log::debug!(
            "prefix sum for {capacity} elements in {} levels",
            lens.len()
        );

        Ok(Self {
            queue: CommandQueue::new(ctx),
            scan,
            add,
            capacity,
            sums,
            params,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Replaces the first `len` elements of `data` by their exclusive prefix sum.
    #[track_caller]
    pub fn scan(&self, data: &wgpu::Buffer, len: u32, wait: &WaitList) -> Result<Event> {
        if len > self.capacity {
            return Err(ReyesError::Capacity {
                what: "prefix sum",
                requested: len as usize,
                capacity: self.capacity as usize,
            });
        }

        if len == 0 {
            // Nothing to scan; the reported total must still read zero.
            return self.queue.enq_clear_buffer(&self.sums[0], 0, 4, wait);
        }

        let device = self.queue.device();
        let lens = level_lens(len);
        let mut ready = wait.clone();
        let mut last = Event::complete();

        for (level, &level_len) in lens.iter().enumerate() {
            let params = ScanParams {
                len: level_len,
                _pad: [0; 3],
            };
            last = self.queue.enq_write_buffer(
                &self.params[level],
                0,
                bytemuck::bytes_of(&params),
                &ready,
            )?;
            ready = WaitList::from(&last);
        }

        // Up: scan each level, its block totals become the next level.
        for (level, &level_len) in lens.iter().enumerate() {
            let input = if level == 0 { data } else { &self.sums[level - 1] };
            let bg = self.scan.bind(
                device,
                0,
                &[(0, input), (1, &self.sums[level]), (2, &self.params[level])],
            );
            last = self
                .queue
                .enq_kernel(&self.scan, &[&bg], level_len, SCAN_BLOCK, &ready)?;
            ready = WaitList::from(&last);
        }

        // Down: add the scanned totals of level k + 1 into level k.
        for level in (0..lens.len() - 1).rev() {
            let input = if level == 0 { data } else { &self.sums[level - 1] };
            let bg = self.add.bind(
                device,
                0,
                &[(0, input), (1, &self.sums[level]), (2, &self.params[level])],
            );
            last = self
                .queue
                .enq_kernel(&self.add, &[&bg], lens[level], SCAN_BLOCK, &ready)?;
            ready = WaitList::from(&last);
        }

        Ok(last)
    }

    /// Copies the grand total of the last `scan` of `len` elements to `dst`.
    #[track_caller]
    pub fn copy_total(
        &self,
        len: u32,
        dst: &wgpu::Buffer,
        dst_offset: u64,
        wait: &WaitList,
    ) -> Result<Event> {
        let top = level_lens(len.max(1)).len() - 1;
        self.queue
            .enq_copy_buffer(&self.sums[top], 0, dst, dst_offset, 4, wait)
    }
}
