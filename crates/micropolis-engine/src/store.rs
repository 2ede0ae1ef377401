//! Patch store: owns patch sets and their device copies, addressed by handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use bytemuck::Zeroable;
use wgpu::util::DeviceExt;

use crate::error::{ReyesError, Result};
use crate::geometry::{BezierPatch, GpuPatch};

/// Opaque handle naming one patch set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct PatchesHandle(pub u64);

/// Provider of patch data. The renderer and the bound-and-split engines only read.
pub trait PatchStore: Send + Sync {
    fn get_patch_vector(&self, handle: PatchesHandle) -> Result<Arc<[BezierPatch]>>;

    fn are_patches_loaded(&self, handle: PatchesHandle) -> bool;

    /// Replaces any previous patch set under `handle`.
    fn load_patches(&self, handle: PatchesHandle, patches: Vec<BezierPatch>);

    /// Storage buffer of [`GpuPatch`] for the set, created on first use.
    fn patch_buffer(&self, device: &wgpu::Device, handle: PatchesHandle) -> Result<wgpu::Buffer>;
}

/// In-memory [`PatchStore`].
#[derive(Default)]
pub struct PatchIndex {
    patches: RwLock<HashMap<PatchesHandle, Arc<[BezierPatch]>>>,
    buffers: Mutex<HashMap<PatchesHandle, wgpu::Buffer>>,
}

impl PatchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.patches.read().map(|p| p.len()).unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PatchStore for PatchIndex {
    fn get_patch_vector(&self, handle: PatchesHandle) -> Result<Arc<[BezierPatch]>> {
        let patches = self.patches.read().unwrap_or_else(|e| e.into_inner());
        patches
            .get(&handle)
            .cloned()
            .ok_or(ReyesError::UnknownPatches(handle))
    }

    fn are_patches_loaded(&self, handle: PatchesHandle) -> bool {
        let patches = self.patches.read().unwrap_or_else(|e| e.into_inner());
        patches.contains_key(&handle)
    }

    fn load_patches(&self, handle: PatchesHandle, patches: Vec<BezierPatch>) {
        log::debug!("loading {} patches under {:?}", patches.len(), handle);
        let mut map = self.patches.write().unwrap_or_else(|e| e.into_inner());
        map.insert(handle, patches.into());
        drop(map);

        // Stale device copy.
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        buffers.remove(&handle);
    }

    fn patch_buffer(&self, device: &wgpu::Device, handle: PatchesHandle) -> Result<wgpu::Buffer> {
        let mut buffers = self.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(buffer) = buffers.get(&handle) {
            return Ok(buffer.clone());
        }

        let patches = self.get_patch_vector(handle)?;
        let mut gpu: Vec<GpuPatch> = patches.iter().map(BezierPatch::to_gpu).collect();
        if gpu.is_empty() {
            // Zero-sized storage bindings are invalid.
            gpu.push(GpuPatch::zeroed());
        }

        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("micropolis patch set"),
            contents: bytemuck::cast_slice(&gpu),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        log::debug!(
            "uploaded {} patches for {:?} ({} bytes)",
            patches.len(),
            handle,
            buffer.size()
        );

        buffers.insert(handle, buffer.clone());
        Ok(buffer)
    }
}
