//! Device-backed behaviour. Every test returns early when no adapter is present.

use std::sync::Arc;

use glam::{Mat4, UVec2, Vec3, Vec4};

use micropolis_engine::bound_n_split::{self, BatchRanges};
use micropolis_engine::geometry::GpuRange;
use micropolis_engine::gpu::{CommandQueue, PrefixSum, Program, WaitList};
use micropolis_engine::stats::ClassifyCounts;
use micropolis_engine::logging::{LoggingConfig, init_logging};
use micropolis_engine::{
    BezierPatch, BoundNSplitMethod, Event, GpuContext, PatchIndex, PatchRange, PatchStore,
    PatchesHandle, PerspectiveProjection, Projection, Renderer, ReyesConfig, ReyesError,
};

const METHODS: [BoundNSplitMethod; 3] = [
    BoundNSplitMethod::Cpu,
    BoundNSplitMethod::GpuSinglePass,
    BoundNSplitMethod::GpuMultipass,
];

fn context() -> Option<GpuContext> {
    init_logging(LoggingConfig::default());
    match pollster::block_on(GpuContext::headless()) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            log::warn!("skipping GPU test: {e}");
            None
        }
    }
}

fn flat(x0: f32, y0: f32, x1: f32, y1: f32, z: f32) -> BezierPatch {
    let mut p = [[Vec3::ZERO; 4]; 4];
    for (j, row) in p.iter_mut().enumerate() {
        for (i, cp) in row.iter_mut().enumerate() {
            *cp = Vec3::new(
                x0 + (x1 - x0) * i as f32 / 3.0,
                y0 + (y1 - y0) * j as f32 / 3.0,
                z,
            );
        }
    }
    BezierPatch::new(p)
}

fn sort_key(r: &PatchRange) -> (u32, u32, u32, u32, u32) {
    (
        r.patch_id,
        r.depth,
        r.range.min.x.to_bits(),
        r.range.min.y.to_bits(),
        r.range.max.x.to_bits(),
    )
}

/// Runs one engine to completion and returns its accepted ranges, sorted.
fn accepted_ranges(
    ctx: &GpuContext,
    config: &ReyesConfig,
    store: Arc<dyn PatchStore>,
    handle: PatchesHandle,
    mv: Mat4,
    projection: Arc<dyn Projection>,
) -> Vec<PatchRange> {
    let queue = CommandQueue::new(ctx);
    let mut engine = bound_n_split::create(config, ctx, store).unwrap();
    engine.init(handle, mv, projection).unwrap();

    let mut out = Vec::new();
    let ready = Event::complete();
    while !engine.done() {
        let batch = engine.do_bound_n_split(&ready).unwrap();
        assert!(batch.count <= config.reyes_patches_per_pass);
        match batch.ranges {
            BatchRanges::Host(ranges) => out.extend(ranges),
            BatchRanges::Device { ranges, .. } => {
                let gpu: Vec<GpuRange> = queue
                    .enq_read_buffer(
                        &ranges,
                        0,
                        batch.count as usize,
                        &WaitList::from(&batch.transfer_done),
                    )
                    .unwrap();
                out.extend(gpu.into_iter().map(PatchRange::from));
            }
        }
    }
    engine.finish().unwrap();

    out.sort_by_key(sort_key);
    out
}

/// Runs one engine to completion and sums the classification counts of every batch.
fn classification_counts(
    ctx: &GpuContext,
    config: &ReyesConfig,
    store: Arc<dyn PatchStore>,
    handle: PatchesHandle,
    projection: Arc<dyn Projection>,
) -> ClassifyCounts {
    let mut engine = bound_n_split::create(config, ctx, store).unwrap();
    engine.init(handle, Mat4::IDENTITY, projection).unwrap();

    let mut counts = ClassifyCounts::default();
    let ready = Event::complete();
    while !engine.done() {
        counts.merge(engine.do_bound_n_split(&ready).unwrap().counts);
    }
    engine.finish().unwrap();
    counts
}

#[test]
fn engines_accept_the_same_ranges() {
    let Some(ctx) = context() else { return };

    // Non-square patches keep the split axis unambiguous.
    let store = Arc::new(PatchIndex::new());
    let handle = PatchesHandle(7);
    store.load_patches(
        handle,
        vec![
            flat(-1.0, -0.65, 1.0, 0.65, -4.0),
            flat(-0.9, -0.3, 0.5, 0.4, -6.0),
            flat(-1.0, -1.0, 1.0, 1.0, 5.0),
        ],
    );
    let projection: Arc<dyn Projection> =
        Arc::new(PerspectiveProjection::with_viewport(UVec2::new(512, 512)));

    let mut results = Vec::new();
    for method in METHODS {
        let config = ReyesConfig {
            window_size: UVec2::new(512, 512),
            reyes_patches_per_pass: 32,
            bound_n_split_limit: 16.0,
            bound_n_split_method: method,
            ..Default::default()
        };
        let ranges = accepted_ranges(
            &ctx,
            &config,
            store.clone(),
            handle,
            Mat4::from_translation(Vec3::new(0.1, 0.0, 0.0)),
            projection.clone(),
        );
        assert!(!ranges.is_empty(), "{method:?} accepted nothing");
        assert!(ranges.iter().all(|r| r.patch_id != 2), "{method:?} kept a culled patch");
        results.push((method, ranges));
    }

    let (_, reference) = &results[0];
    for (method, ranges) in &results[1..] {
        assert_eq!(ranges, reference, "{method:?} disagrees with the host engine");
    }
}

#[test]
fn engines_agree_on_every_classification() {
    let Some(ctx) = context() else { return };

    // Runs along v from z = 3 (behind the eye) to z = -2, straddling the near plane.
    let mut straddler = [[Vec3::ZERO; 4]; 4];
    for (j, row) in straddler.iter_mut().enumerate() {
        for (i, cp) in row.iter_mut().enumerate() {
            let u = i as f32 / 3.0;
            let v = j as f32 / 3.0;
            *cp = Vec3::new(-1.0 + 2.0 * u, -0.5, 3.0 - 5.0 * v);
        }
    }

    let store = Arc::new(PatchIndex::new());
    let visible = PatchesHandle(11);
    let mixed = PatchesHandle(12);
    store.load_patches(visible, vec![flat(-1.0, -1.0, 1.0, 1.0, -5.0)]);
    store.load_patches(
        mixed,
        vec![flat(-1.0, -1.0, 1.0, 1.0, -5.0), BezierPatch::new(straddler)],
    );
    let projection: Arc<dyn Projection> =
        Arc::new(PerspectiveProjection::with_viewport(UVec2::new(512, 512)));

    let mut mixed_counts = Vec::new();
    for method in METHODS {
        // Nothing is ever small enough, so every branch runs into the depth limit.
        let config = ReyesConfig {
            window_size: UVec2::new(512, 512),
            reyes_patches_per_pass: 64,
            bound_n_split_limit: 1e-3,
            max_split_depth: 3,
            bound_n_split_method: method,
            ..Default::default()
        };

        let counts = classification_counts(
            &ctx,
            &config,
            store.clone(),
            visible,
            projection.clone(),
        );
        assert_eq!(
            counts,
            ClassifyCounts {
                accepted: 0,
                culled: 0,
                depth_limited: 16,
                split: 15,
            },
            "{method:?}"
        );

        let counts =
            classification_counts(&ctx, &config, store.clone(), mixed, projection.clone());
        assert_eq!(counts.accepted, 0, "{method:?}");
        assert!(counts.culled > 0, "{method:?} culled nothing behind the eye");
        assert!(counts.depth_limited > 16, "{method:?}");
        // Every split adds two ranges to the two roots; each range gets one outcome.
        assert_eq!(
            counts.split + 2,
            counts.accepted + counts.culled + counts.depth_limited,
            "{method:?}"
        );
        mixed_counts.push((method, counts));
    }

    let (_, reference) = mixed_counts[0];
    for (method, counts) in &mixed_counts[1..] {
        assert_eq!(*counts, reference, "{method:?} disagrees with the host engine");
    }
}

#[test]
fn small_patch_renders_in_one_pass() {
    let Some(ctx) = context() else { return };

    for method in METHODS {
        let config = ReyesConfig {
            window_size: UVec2::new(128, 96),
            reyes_patches_per_pass: 16,
            bound_n_split_method: method,
            ..Default::default()
        };
        let store = Arc::new(PatchIndex::new());
        let mut renderer = Renderer::new(&ctx, config, store).unwrap();
        let handle = PatchesHandle(1);
        renderer.load_patches(handle, vec![flat(-0.05, -0.05, 0.05, 0.05, -2.0)]);
        assert!(renderer.are_patches_loaded(handle));

        let projection = Arc::new(PerspectiveProjection::with_viewport(UVec2::new(128, 96)));
        renderer.prepare().unwrap();
        renderer
            .draw_patches(handle, Mat4::IDENTITY, projection, Vec4::ONE)
            .unwrap();
        renderer.finish().unwrap();

        let frame = renderer.stats().last_frame();
        assert_eq!(frame.passes, 1, "{method:?}");
        assert_eq!(frame.accepted, 1, "{method:?}");
        assert_eq!(frame.patches, 1, "{method:?}");

        let depth = renderer.framebuffer().read_depth().unwrap();
        let center = (48 * 128 + 64) as usize;
        assert!(depth[center] < 1.0, "{method:?} left the center pixel empty");
        assert_eq!(depth[0], 1.0, "{method:?} drew into the corner");
    }
}

#[test]
fn nearest_depth_wins_under_tile_locks() {
    let Some(ctx) = context() else { return };

    let size = UVec2::new(64, 64);
    let config = ReyesConfig {
        window_size: size,
        reyes_patches_per_pass: 64,
        framebuffer_tile_size: 16,
        max_block_assignments: 64,
        ..Default::default()
    };
    let mut renderer = Renderer::new(&ctx, config, Arc::new(PatchIndex::new())).unwrap();
    let projection = Arc::new(PerspectiveProjection::with_viewport(size));

    // Overlapping patches in scrambled depth order, all sampled in one pass.
    let depths: Vec<f32> = (0..48).map(|i| -2.0 - ((i * 29) % 48) as f32 * 0.0625).collect();
    let nearest = depths.iter().copied().fold(f32::MIN, f32::max);

    renderer.prepare().unwrap();
    renderer.set_projection(projection.clone()).unwrap();
    for &z in &depths {
        renderer.draw_patch(&flat(-0.2, -0.2, 0.2, 0.2, z)).unwrap();
    }
    assert_eq!(renderer.pending_patches(), depths.len());
    renderer.finish().unwrap();
    assert_eq!(renderer.stats().last_frame().passes, 1);

    let clip = projection.calc_projection() * Vec4::new(0.0, 0.0, nearest, 1.0);
    let expected = clip.z / clip.w;
    let depth = renderer.framebuffer().read_depth().unwrap();
    let center = depth[(32 * 64 + 32) as usize];
    assert!(
        (center - expected).abs() < 1e-4,
        "center depth {center}, nearest {expected}"
    );
}

#[test]
fn prefix_sum_matches_host_scan() {
    let Some(ctx) = context() else { return };

    let len = 70_000u32;
    let values: Vec<u32> = (0..len).map(|i| (i * 7 + 3) % 5).collect();
    let mut expected = Vec::with_capacity(values.len());
    let mut total = 0u32;
    for v in &values {
        expected.push(total);
        total += v;
    }

    let device = ctx.device();
    let data = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("scan data"),
        size: len as u64 * 4,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let sum = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("scan total"),
        size: 4,
        usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let queue = CommandQueue::new(&ctx);
    let scan = PrefixSum::new(&ctx, len).unwrap();
    let written = queue
        .enq_write_buffer(&data, 0, bytemuck::cast_slice(&values), &WaitList::new())
        .unwrap();
    let scanned = scan.scan(&data, len, &WaitList::from(&written)).unwrap();
    let copied = scan
        .copy_total(len, &sum, 0, &WaitList::from(&scanned))
        .unwrap();

    let out: Vec<u32> = queue
        .enq_read_buffer(&data, 0, len as usize, &WaitList::from(&copied))
        .unwrap();
    assert_eq!(out, expected);
    let read: Vec<u32> = queue.enq_read_buffer(&sum, 0, 1, &WaitList::new()).unwrap();
    assert_eq!(read[0], total);
}

#[test]
fn oversized_blocks_are_counted() {
    let Some(ctx) = context() else { return };

    let size = UVec2::new(64, 64);
    let config = ReyesConfig {
        window_size: size,
        reyes_patches_per_pass: 8,
        reyes_patch_size: 16,
        framebuffer_tile_size: 4,
        max_block_assignments: 1,
        ..Default::default()
    };
    let mut renderer = Renderer::new(&ctx, config, Arc::new(PatchIndex::new())).unwrap();
    let projection = Arc::new(PerspectiveProjection::with_viewport(size));

    // About 20 px across: each 8x8 block spans several 4 px tiles.
    renderer.prepare().unwrap();
    renderer.set_projection(projection).unwrap();
    renderer.draw_patch(&flat(-0.5, -0.5, 0.5, 0.5, -2.0)).unwrap();
    renderer.finish().unwrap();

    let frame = renderer.stats().last_frame();
    assert_eq!(frame.passes, 1);
    assert_eq!(frame.block_overflows, 4);
    let depth = renderer.framebuffer().read_depth().unwrap();
    assert_eq!(depth[(32 * 64 + 32) as usize], 1.0);

    // Counted per frame.
    renderer.prepare().unwrap();
    renderer.finish().unwrap();
    assert_eq!(renderer.stats().last_frame().block_overflows, 0);
}

#[test]
fn equal_projection_keeps_patches_staged() {
    let Some(ctx) = context() else { return };

    let size = UVec2::new(64, 64);
    let config = ReyesConfig {
        window_size: size,
        reyes_patches_per_pass: 8,
        ..Default::default()
    };
    let mut renderer = Renderer::new(&ctx, config, Arc::new(PatchIndex::new())).unwrap();

    renderer.prepare().unwrap();
    renderer
        .set_projection(Arc::new(PerspectiveProjection::with_viewport(size)))
        .unwrap();
    renderer.draw_patch(&flat(-0.2, -0.2, 0.2, 0.2, -2.0)).unwrap();
    renderer.draw_patch(&flat(-0.1, -0.1, 0.1, 0.1, -3.0)).unwrap();

    // A fresh object with the same matrix.
    renderer
        .set_projection(Arc::new(PerspectiveProjection::with_viewport(size)))
        .unwrap();
    assert_eq!(renderer.pending_patches(), 2);

    let wider = PerspectiveProjection {
        fovy: 90f32.to_radians(),
        ..PerspectiveProjection::with_viewport(size)
    };
    renderer.set_projection(Arc::new(wider)).unwrap();
    assert_eq!(renderer.pending_patches(), 0);
    renderer.finish().unwrap();
    assert_eq!(renderer.stats().last_frame().passes, 1);
}

#[test]
fn oversized_dispatch_reports_the_enqueueing_call() {
    let Some(ctx) = context() else { return };
    let device = ctx.device();

    let kernel = Program::new("touch")
        .source(
            "@group(0) @binding(0) var<storage, read_write> out: array<u32>;\n\
             @compute @workgroup_size(1)\n\
             fn touch(@builtin(global_invocation_id) id: vec3<u32>) { out[id.x] = id.x; }\n",
        )
        .build(device)
        .unwrap()
        .kernel(device, "touch")
        .unwrap();
    let out = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("touch out"),
        size: 16,
        usage: wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });
    let group = kernel.bind(device, 0, &[(0, &out)]);

    let max = device.limits().max_compute_workgroups_per_dimension;
    let queue = CommandQueue::new(&ctx);
    let err = queue
        .enq_kernel(&kernel, &[&group], max + 1, 1, &WaitList::new())
        .unwrap_err();
    assert!(matches!(err, ReyesError::Backend { .. }), "{err:?}");
    let text = err.to_string();
    assert!(text.starts_with(file!()), "{text}");
    assert!(text.contains("enqueue kernel `touch`"), "{text}");
}
