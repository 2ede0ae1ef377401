use std::sync::Arc;

use glam::Mat4;

use super::{Batch, BatchRanges, BoundNSplit, Decision, classify};
use crate::config::ReyesConfig;
use crate::error::Result;
use crate::geometry::{BezierPatch, PatchRange};
use crate::gpu::Event;
use crate::projection::Projection;
use crate::stats::ClassifyCounts;
use crate::store::{PatchStore, PatchesHandle};

/// Bound-and-split on the host with an explicit stack.
///
/// Ranges are popped from the back, so traversal is depth first and the
/// stack stays near `patch count + max_split_depth`.
pub struct CpuBoundNSplit {
    store: Arc<dyn PatchStore>,
    batch_capacity: usize,
    limit: f32,
    max_depth: u32,

    stack: Vec<PatchRange>,
    active: Option<Active>,
}

struct Active {
    patches: Arc<[BezierPatch]>,
    mv: Mat4,
    projection: Arc<dyn Projection>,
}

impl CpuBoundNSplit {
    pub fn new(config: &ReyesConfig, store: Arc<dyn PatchStore>) -> Self {
        Self {
            store,
            batch_capacity: config.reyes_patches_per_pass as usize,
            limit: config.bound_n_split_limit,
            max_depth: config.max_split_depth,
            stack: Vec::new(),
            active: None,
        }
    }

    /// Unresolved ranges still on the stack.
    pub fn pending(&self) -> usize {
        self.stack.len()
    }
}

impl BoundNSplit for CpuBoundNSplit {
    fn init(
        &mut self,
        handle: PatchesHandle,
        mv: Mat4,
        projection: Arc<dyn Projection>,
    ) -> Result<()> {
        let patches = self.store.get_patch_vector(handle)?;

        self.stack.clear();
        self.stack
            .extend((0..patches.len() as u32).map(PatchRange::root));
        self.active = Some(Active {
            patches,
            mv,
            projection,
        });
        Ok(())
    }

    fn done(&self) -> bool {
        self.stack.is_empty()
    }

    fn do_bound_n_split(&mut self, _ready: &Event) -> Result<Batch> {
        let Some(active) = self.active.as_ref() else {
            return Ok(Batch::empty());
        };

        let mut accepted = Vec::with_capacity(self.batch_capacity.min(self.stack.len()));
        let mut counts = ClassifyCounts::default();

        while accepted.len() < self.batch_capacity {
            let Some(range) = self.stack.pop() else { break };
            let patch = &active.patches[range.patch_id as usize];

            match classify(
                &range,
                patch,
                &active.mv,
                active.projection.as_ref(),
                self.limit,
                self.max_depth,
            ) {
                Decision::Cull => counts.culled += 1,
                Decision::Accept => {
                    counts.accepted += 1;
                    accepted.push(range);
                }
                Decision::DepthLimit => counts.depth_limited += 1,
                Decision::Split(children) => {
                    counts.split += 1;
                    self.stack.extend(children);
                }
            }
        }

        Ok(Batch {
            count: accepted.len() as u32,
            ranges: BatchRanges::Host(accepted),
            transfer_done: Event::complete(),
            counts,
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.stack.clear();
        self.active = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BBox, ParamRect};
    use crate::projection::{PerspectiveProjection, ProjectionUniform, ScreenBound};
    use crate::store::PatchIndex;
    use crate::test_support::flat_patch;
    use glam::{UVec2, Vec2};

    struct FixedSize(f32);

    impl Projection for FixedSize {
        fn calc_projection(&self) -> Mat4 {
            Mat4::IDENTITY
        }

        fn bound(&self, _bbox: &BBox) -> ScreenBound {
            ScreenBound {
                size: Vec2::splat(self.0),
                cull: false,
            }
        }

        fn uniform(&self) -> ProjectionUniform {
            bytemuck::Zeroable::zeroed()
        }
    }

    fn engine_with(
        patches: Vec<BezierPatch>,
        config: &ReyesConfig,
    ) -> (CpuBoundNSplit, PatchesHandle) {
        let store = Arc::new(PatchIndex::new());
        let handle = PatchesHandle(1);
        store.load_patches(handle, patches);
        (CpuBoundNSplit::new(config, store), handle)
    }

    fn run_to_completion(engine: &mut CpuBoundNSplit) -> (Vec<PatchRange>, ClassifyCounts) {
        let mut all = Vec::new();
        let mut counts = ClassifyCounts::default();
        let ready = Event::complete();
        while !engine.done() {
            let batch = engine.do_bound_n_split(&ready).unwrap();
            counts.merge(batch.counts);
            let BatchRanges::Host(ranges) = batch.ranges else {
                panic!("host engine produced a device batch");
            };
            assert_eq!(ranges.len() as u32, batch.count);
            all.extend(ranges);
        }
        (all, counts)
    }

    fn viewport_projection() -> Arc<dyn Projection> {
        Arc::new(PerspectiveProjection::with_viewport(UVec2::new(800, 600)))
    }

    #[test]
    fn small_flat_patch_is_one_full_range() {
        let config = ReyesConfig::default();
        let (mut engine, handle) =
            engine_with(vec![flat_patch(-0.01, -0.01, 0.01, 0.01, -5.0)], &config);
        engine
            .init(handle, Mat4::IDENTITY, viewport_projection())
            .unwrap();

        let (ranges, counts) = run_to_completion(&mut engine);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].range, ParamRect::FULL);
        assert_eq!(ranges[0].depth, 0);
        assert_eq!(counts.split, 0);
    }

    #[test]
    fn accepted_ranges_tile_each_visible_patch() {
        let config = ReyesConfig {
            reyes_patches_per_pass: 16,
            ..Default::default()
        };
        let (mut engine, handle) =
            engine_with(vec![flat_patch(-0.5, -0.5, 0.5, 0.5, -3.0)], &config);
        engine
            .init(handle, Mat4::IDENTITY, viewport_projection())
            .unwrap();

        let mut batches = 0;
        let mut area = 0.0;
        let ready = Event::complete();
        while !engine.done() {
            let batch = engine.do_bound_n_split(&ready).unwrap();
            assert!(batch.count <= 16);
            if let BatchRanges::Host(ranges) = &batch.ranges {
                area += ranges.iter().map(|r| r.range.area() as f64).sum::<f64>();
            }
            batches += 1;
        }
        assert!(batches > 1, "expected the pass capacity to split the output");
        assert!((area - 1.0).abs() < 1e-9, "accepted area {area}");
    }

    #[test]
    fn depth_limit_bounds_the_split_tree() {
        let max_depth = 2;
        let config = ReyesConfig {
            max_split_depth: max_depth,
            ..Default::default()
        };
        let (mut engine, handle) =
            engine_with(vec![flat_patch(-1.0, -1.0, 1.0, 1.0, -5.0)], &config);
        // Never small enough: every range splits until the depth limit.
        engine
            .init(handle, Mat4::IDENTITY, Arc::new(FixedSize(1e6)))
            .unwrap();

        let (ranges, counts) = run_to_completion(&mut engine);
        assert!(ranges.is_empty());
        assert_eq!(counts.split, (1 << (max_depth + 1)) - 1);
        assert_eq!(counts.depth_limited, 1 << (max_depth + 1));

        let total = counts.split + counts.depth_limited;
        assert!(total <= (1 << (max_depth + 2)) - 1);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let config = ReyesConfig {
            reyes_patches_per_pass: 8,
            ..Default::default()
        };
        let patches = vec![
            flat_patch(-0.4, -0.2, 0.3, 0.6, -2.0),
            flat_patch(-3.0, -3.0, 3.0, 3.0, -8.0),
        ];
        let (mut engine, handle) = engine_with(patches, &config);
        let mv = Mat4::from_rotation_y(0.3);

        engine.init(handle, mv, viewport_projection()).unwrap();
        let first = run_to_completion(&mut engine);
        engine.init(handle, mv, viewport_projection()).unwrap();
        let second = run_to_completion(&mut engine);

        assert!(!first.0.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn patch_behind_camera_yields_nothing() {
        let config = ReyesConfig::default();
        let (mut engine, handle) =
            engine_with(vec![flat_patch(-1.0, -1.0, 1.0, 1.0, 3.0)], &config);
        engine
            .init(handle, Mat4::IDENTITY, viewport_projection())
            .unwrap();

        let (ranges, counts) = run_to_completion(&mut engine);
        assert!(ranges.is_empty());
        assert_eq!(counts.culled, 1);
    }

    #[test]
    fn unknown_handle_fails_init() {
        let config = ReyesConfig::default();
        let (mut engine, _) = engine_with(Vec::new(), &config);
        assert!(
            engine
                .init(PatchesHandle(42), Mat4::IDENTITY, viewport_projection())
                .is_err()
        );
        assert!(engine.done());
    }
}
