//! Renderer configuration.
//!
//! Read-only for the duration of a frame. Values that end up baked into the
//! WGSL programs (patch size, tile size, block limits) require a new renderer
//! when they change.

use glam::{UVec2, Vec4};

use crate::error::{ReyesError, Result};

/// Where the bound-and-split loop runs.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum BoundNSplitMethod {
    /// Explicit work stack on the host.
    #[default]
    Cpu,
    /// One classify-and-split kernel per call over ping/pong range buffers.
    GpuSinglePass,
    /// Separate bound and move kernels with prefix-sum compaction.
    GpuMultipass,
}

#[derive(Debug, Clone)]
pub struct ReyesConfig {
    /// Framebuffer size in pixels.
    pub window_size: UVec2,

    /// Patches (or accepted patch ranges) diced per pass.
    pub reyes_patches_per_pass: u32,

    /// Micropolygons per patch edge. Must be a multiple of 8 (sample blocks are 8x8).
    pub reyes_patch_size: u32,

    /// Dice work-group edge length.
    pub dice_group_width: u32,

    /// Screen-space split threshold `s` in pixels.
    pub bound_n_split_limit: f32,

    /// Ranges deeper than this are dropped instead of split.
    pub max_split_depth: u32,

    /// Framebuffer tile edge in pixels; one sample work group covers one tile.
    pub framebuffer_tile_size: u32,

    /// Number of patch buffers round-robined between host and GPU.
    pub patch_buffer_count: usize,

    /// Upper bound on tiles a single micropolygon block may touch.
    pub max_block_assignments: u32,

    /// Clear color as displayed; the framebuffer stores it linearized.
    pub clear_color: Vec4,

    pub backface_culling: bool,

    /// Fractional bits of the fixed-point pixel coordinates produced by dice.
    pub subpixel_bits: u32,

    pub bound_n_split_method: BoundNSplitMethod,

    /// Capacity of the device-side range stacks used by the GPU variants.
    pub range_stack_capacity: u32,

    /// Forces the framebuffer read-back path even when the device could present directly.
    pub disable_buffer_sharing: bool,
}

impl Default for ReyesConfig {
    fn default() -> Self {
        Self {
            window_size: UVec2::new(1024, 768),
            reyes_patches_per_pass: 1024,
            reyes_patch_size: 16,
            dice_group_width: 8,
            bound_n_split_limit: 32.0,
            max_split_depth: 22,
            framebuffer_tile_size: 8,
            patch_buffer_count: 3,
            max_block_assignments: 16,
            clear_color: Vec4::new(0.1, 0.1, 0.15, 1.0),
            backface_culling: false,
            subpixel_bits: 4,
            bound_n_split_method: BoundNSplitMethod::Cpu,
            range_stack_capacity: 1 << 16,
            disable_buffer_sharing: false,
        }
    }
}

impl ReyesConfig {
    /// Number of 8x8 micropolygon blocks produced by one full pass.
    pub fn max_block_count(&self) -> u32 {
        let blocks_per_edge = self.reyes_patch_size / 8;
        blocks_per_edge * blocks_per_edge * self.reyes_patches_per_pass
    }

    /// Tile grid covering the framebuffer, rounded up.
    pub fn tile_grid(&self) -> UVec2 {
        let t = self.framebuffer_tile_size;
        UVec2::new(
            self.window_size.x.div_ceil(t),
            self.window_size.y.div_ceil(t),
        )
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ReyesError::InvalidConfig(msg));

        if self.window_size.x == 0 || self.window_size.y == 0 {
            return fail(format!("window size {} has a zero edge", self.window_size));
        }
        if self.reyes_patches_per_pass == 0 {
            return fail("reyes_patches_per_pass must be positive".into());
        }
        if self.reyes_patch_size == 0 || self.reyes_patch_size % 8 != 0 {
            return fail(format!(
                "reyes_patch_size {} is not a positive multiple of 8",
                self.reyes_patch_size
            ));
        }
        if self.dice_group_width == 0 || self.dice_group_width * self.dice_group_width > 256 {
            return fail(format!(
                "dice_group_width {} must be in 1..=16",
                self.dice_group_width
            ));
        }
        if !(4..=16).contains(&self.framebuffer_tile_size) {
            return fail(format!(
                "framebuffer_tile_size {} must be in 4..=16",
                self.framebuffer_tile_size
            ));
        }
        if self.patch_buffer_count < 2 {
            return fail(format!(
                "patch_buffer_count {} leaves no room for overlap",
                self.patch_buffer_count
            ));
        }
        if !(self.bound_n_split_limit > 0.0) {
            return fail(format!(
                "bound_n_split_limit {} must be positive",
                self.bound_n_split_limit
            ));
        }
        if self.max_block_assignments == 0 {
            return fail("max_block_assignments must be positive".into());
        }
        if self.subpixel_bits > 8 {
            return fail(format!("subpixel_bits {} exceeds 8", self.subpixel_bits));
        }
        if self.range_stack_capacity < 2 {
            return fail("range_stack_capacity must hold at least two ranges".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        ReyesConfig::default().validate().unwrap();
    }

    #[test]
    fn patch_size_must_tile_into_blocks() {
        let config = ReyesConfig {
            reyes_patch_size: 12,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ReyesError::InvalidConfig(_))));
    }

    #[test]
    fn single_patch_buffer_is_rejected() {
        let config = ReyesConfig {
            patch_buffer_count: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn tile_grid_rounds_up() {
        let config = ReyesConfig {
            window_size: UVec2::new(17, 8),
            framebuffer_tile_size: 8,
            ..Default::default()
        };
        assert_eq!(config.tile_grid(), UVec2::new(3, 1));
    }

    #[test]
    fn block_count_scales_with_patch_size() {
        let config = ReyesConfig {
            reyes_patch_size: 16,
            reyes_patches_per_pass: 10,
            ..Default::default()
        };
        assert_eq!(config.max_block_count(), 40);
    }
}
