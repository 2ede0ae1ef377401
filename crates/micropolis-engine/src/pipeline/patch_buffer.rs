use crate::error::{ReyesError, Result};
use crate::geometry::GpuPatch;
use crate::gpu::{Event, WaitList};

/// One pool slot: host staging, its device buffer, and the completion of the
/// last pass that used it.
#[derive(Debug)]
pub struct PatchBuffer<B> {
    buffer: B,
    staged: Vec<GpuPatch>,
    write_complete: Event,
    rasterizer_done: Event,
}

/// Fixed ring of patch buffers.
///
/// The host stages into the active slot while earlier slots are still being
/// processed. Staging into a slot first waits for that slot's previous
/// upload and sample pass.
#[derive(Debug)]
pub struct PatchBufferPool<B = wgpu::Buffer> {
    slots: Vec<PatchBuffer<B>>,
    active: usize,
    capacity: usize,
}

impl PatchBufferPool<wgpu::Buffer> {
    pub fn new(device: &wgpu::Device, count: usize, capacity: u32) -> Self {
        let size = capacity.max(1) as u64 * std::mem::size_of::<GpuPatch>() as u64;
        let buffers = (0..count)
            .map(|i| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("patch buffer {i}")),
                    size,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();
        Self::from_buffers(buffers, capacity as usize)
    }
}

impl<B> PatchBufferPool<B> {
    pub fn from_buffers(buffers: Vec<B>, capacity: usize) -> Self {
        let slots = buffers
            .into_iter()
            .map(|buffer| PatchBuffer {
                buffer,
                staged: Vec::with_capacity(capacity),
                write_complete: Event::complete(),
                rasterizer_done: Event::complete(),
            })
            .collect();
        Self {
            slots,
            active: 0,
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Patches staged in the active slot.
    pub fn pending(&self) -> usize {
        self.slots.get(self.active).map_or(0, |s| s.staged.len())
    }

    /// Stages `patch` in the active slot; returns true once the slot is full.
    ///
    /// The first patch staged into a slot blocks until the slot's previous
    /// pass has signalled.
    pub fn push(&mut self, patch: GpuPatch) -> Result<bool> {
        let capacity = self.capacity;
        let Some(slot) = self.slots.get_mut(self.active) else {
            return Err(ReyesError::Capacity {
                what: "patch buffer pool",
                requested: 1,
                capacity: 0,
            });
        };
        if slot.staged.len() >= capacity {
            return Err(ReyesError::Capacity {
                what: "patch buffer",
                requested: slot.staged.len() + 1,
                capacity,
            });
        }
        if slot.staged.is_empty() {
            (&slot.write_complete | &slot.rasterizer_done).wait_all()?;
        }

        slot.staged.push(patch);
        Ok(slot.staged.len() >= capacity)
    }

    /// Retires the active slot for flushing and advances to the next one.
    ///
    /// Returns `None` when nothing is staged.
    pub fn rotate(&mut self) -> Option<usize> {
        if self.pending() == 0 {
            return None;
        }
        let flushed = self.active;
        self.active = (self.active + 1) % self.slots.len();
        Some(flushed)
    }

    /// Device buffer and staged patches of slot `index`.
    pub fn staged(&self, index: usize) -> (&B, &[GpuPatch]) {
        let slot = &self.slots[index];
        (&slot.buffer, &slot.staged)
    }

    /// Records the events of the pass that consumed slot `index` and empties it.
    pub fn complete(&mut self, index: usize, write_complete: Event, rasterizer_done: Event) {
        let slot = &mut self.slots[index];
        slot.staged.clear();
        slot.write_complete = write_complete;
        slot.rasterizer_done = rasterizer_done;
    }

    /// Drops the patches staged in slot `index` without touching its events.
    ///
    /// Used when the pass for a rotated slot could not be enqueued.
    pub fn discard(&mut self, index: usize) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.staged.clear();
        }
    }

    /// Blocks until every slot's last pass has completed.
    pub fn wait_idle(&self) -> Result<()> {
        self.slots
            .iter()
            .flat_map(|s| [&s.write_complete, &s.rasterizer_done])
            .collect::<WaitList>()
            .wait_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytemuck::Zeroable;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    fn patch() -> GpuPatch {
        GpuPatch::zeroed()
    }

    #[test]
    fn slots_round_robin() {
        let mut pool = PatchBufferPool::from_buffers(vec![(), (), ()], 2);
        assert!(!pool.push(patch()).unwrap());
        assert!(pool.push(patch()).unwrap());
        assert_eq!(pool.rotate(), Some(0));
        assert_eq!(pool.active(), 1);

        pool.push(patch()).unwrap();
        assert_eq!(pool.rotate(), Some(1));
        assert_eq!(pool.staged(0).1.len(), 2);
        assert_eq!(pool.staged(1).1.len(), 1);
        pool.complete(0, Event::complete(), Event::complete());
        assert!(pool.staged(0).1.is_empty());

        pool.push(patch()).unwrap();
        assert_eq!(pool.rotate(), Some(2));
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn empty_slot_does_not_rotate() {
        let mut pool = PatchBufferPool::from_buffers(vec![(), ()], 4);
        assert_eq!(pool.rotate(), None);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn discarded_slot_is_reusable() {
        let mut pool = PatchBufferPool::from_buffers(vec![()], 1);
        assert!(pool.push(patch()).unwrap());
        assert_eq!(pool.rotate(), Some(0));
        assert_eq!(pool.active(), 0);

        // Still holding the patches of the pass that never ran.
        assert!(matches!(
            pool.push(patch()),
            Err(ReyesError::Capacity { .. })
        ));

        pool.discard(0);
        assert_eq!(pool.pending(), 0);
        assert!(pool.push(patch()).unwrap());
        assert_eq!(pool.rotate(), Some(0));
        pool.wait_idle().unwrap();
    }

    #[test]
    fn full_slot_rejects_more_patches() {
        let mut pool = PatchBufferPool::from_buffers(vec![(), ()], 1);
        assert!(pool.push(patch()).unwrap());
        assert!(matches!(
            pool.push(patch()),
            Err(ReyesError::Capacity { .. })
        ));
    }

    #[test]
    fn reused_slot_waits_for_its_previous_pass() {
        let mut pool = PatchBufferPool::from_buffers(vec![(), ()], 1);
        let upload = Event::user("slot 0 upload");
        let raster = Event::user("slot 0 sample");

        assert!(pool.push(patch()).unwrap());
        let slot = pool.rotate().unwrap();
        pool.complete(slot, upload.clone(), raster.clone());

        // Slot 1 is free.
        assert!(pool.push(patch()).unwrap());
        let slot = pool.rotate().unwrap();
        pool.complete(slot, Event::complete(), Event::complete());

        let drained = Arc::new(AtomicBool::new(false));
        let gpu = {
            let drained = drained.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                upload.set_complete();
                thread::sleep(Duration::from_millis(30));
                drained.store(true, Ordering::SeqCst);
                raster.set_complete();
            })
        };

        // Wraps around to slot 0 and must block until both events fire.
        pool.push(patch()).unwrap();
        assert!(drained.load(Ordering::SeqCst));
        gpu.join().unwrap();
    }

    #[test]
    fn flooding_never_stages_into_a_busy_slot() {
        let mut pool = PatchBufferPool::from_buffers(vec![(), (), ()], 4);
        let mut gates: Vec<(Event, Arc<AtomicBool>)> = Vec::new();
        let mut workers = Vec::new();

        for pass in 0..12 {
            if pass >= 3 {
                // The slot about to be reused has been drained.
                let (_, done) = &gates[pass - 3];
                for _ in 0..4 {
                    pool.push(patch()).unwrap();
                    assert!(done.load(Ordering::SeqCst));
                }
            } else {
                for _ in 0..4 {
                    pool.push(patch()).unwrap();
                }
            }
            let slot = pool.rotate().unwrap();
            let gate = Event::user(format!("pass {pass}"));
            let done = Arc::new(AtomicBool::new(false));
            pool.complete(slot, Event::complete(), gate.clone());

            let (g, d) = (gate.clone(), done.clone());
            workers.push(thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                d.store(true, Ordering::SeqCst);
                g.set_complete();
            }));
            gates.push((gate, done));
        }

        for w in workers {
            w.join().unwrap();
        }
        pool.wait_idle().unwrap();
    }
}
