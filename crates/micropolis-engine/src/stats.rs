//! Per-renderer frame statistics.

use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Counters for the frame currently being rendered.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct FrameStats {
    /// Patches (or accepted ranges) sent to dice.
    pub patches: u64,
    /// dice/shade/sample passes issued.
    pub passes: u64,
    pub accepted: u64,
    pub culled: u64,
    /// Ranges dropped at the split-depth limit.
    pub depth_limited: u64,
    /// Sample blocks skipped for touching too many tiles.
    pub block_overflows: u64,
    pub bound_n_split_time: Duration,
    pub render_time: Duration,
}

/// Classification outcome counts reported by one bound-and-split step.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ClassifyCounts {
    pub accepted: u64,
    pub culled: u64,
    pub depth_limited: u64,
    pub split: u64,
}

impl ClassifyCounts {
    pub fn merge(&mut self, other: ClassifyCounts) {
        self.accepted += other.accepted;
        self.culled += other.culled;
        self.depth_limited += other.depth_limited;
        self.split += other.split;
    }
}

#[derive(Debug, Clone)]
pub struct Statistics {
    current: FrameStats,
    last_frame: FrameStats,
    render_start: Option<Instant>,

    report_interval: Duration,
    last_report: Instant,
    frames_since_report: u32,
    fps: f32,
}

impl Statistics {
    pub fn new() -> Self {
        Self::with_report_interval(Duration::from_secs(5))
    }

    pub fn with_report_interval(report_interval: Duration) -> Self {
        Self {
            current: FrameStats::default(),
            last_frame: FrameStats::default(),
            render_start: None,
            report_interval,
            last_report: Instant::now(),
            frames_since_report: 0,
            fps: 0.0,
        }
    }

    pub fn start_render(&mut self) {
        self.current = FrameStats::default();
        self.render_start = Some(Instant::now());
    }

    pub fn end_render(&mut self) {
        if let Some(start) = self.render_start.take() {
            self.current.render_time = start.elapsed();
        }
        self.last_frame = self.current;
        self.frames_since_report += 1;
    }

    pub fn inc_patch_count(&mut self, n: u64) {
        self.current.patches += n;
    }

    pub fn inc_pass_count(&mut self) {
        self.current.passes += 1;
    }

    pub fn add_bound_n_split_time(&mut self, d: Duration) {
        self.current.bound_n_split_time += d;
    }

    pub fn add_classification(&mut self, counts: ClassifyCounts) {
        self.current.accepted += counts.accepted;
        self.current.culled += counts.culled;
        self.current.depth_limited += counts.depth_limited;
    }

    pub fn add_block_overflows(&mut self, n: u64) {
        self.current.block_overflows += n;
    }

    /// Counters of the frame in progress.
    pub fn current(&self) -> &FrameStats {
        &self.current
    }

    /// Counters of the most recently completed frame.
    pub fn last_frame(&self) -> &FrameStats {
        &self.last_frame
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Refreshes the fps estimate and logs a summary once per report interval.
    pub fn update(&mut self) {
        let elapsed = self.last_report.elapsed();
        if elapsed < self.report_interval {
            return;
        }

        self.fps = self.frames_since_report as f32 / elapsed.as_secs_f32();
        let f = &self.last_frame;
        log::info!(
            "{:.1} fps | {} patches in {} passes | b&s {:.2} ms | render {:.2} ms | culled {} | depth-limited {} | block overflows {}",
            self.fps,
            f.patches,
            f.passes,
            f.bound_n_split_time.as_secs_f64() * 1e3,
            f.render_time.as_secs_f64() * 1e3,
            f.culled,
            f.depth_limited,
            f.block_overflows,
        );
        if f.depth_limited > 0 {
            log::warn!(
                "{} ranges dropped at the split-depth limit last frame",
                f.depth_limited
            );
        }

        if f.block_overflows > 0 {
            log::warn!(
                "{} sample blocks skipped last frame, raise max_block_assignments",
                f.block_overflows
            );
        }

        self.last_report = Instant::now();
        self.frames_since_report = 0;
    }

    /// Writes the last frame's counters as `key = value;` lines.
    pub fn write_summary(&self, mut out: impl Write) -> io::Result<()> {
        let f = &self.last_frame;
        writeln!(out, "fps = {:.2};", self.fps)?;
        writeln!(out, "patches = {};", f.patches)?;
        writeln!(out, "passes = {};", f.passes)?;
        writeln!(out, "accepted = {};", f.accepted)?;
        writeln!(out, "culled = {};", f.culled)?;
        writeln!(out, "depth_limited = {};", f.depth_limited)?;
        writeln!(out, "block_overflows = {};", f.block_overflows)?;
        writeln!(
            out,
            "bound_n_split_ms = {:.3};",
            f.bound_n_split_time.as_secs_f64() * 1e3
        )?;
        writeln!(out, "render_ms = {:.3};", f.render_time.as_secs_f64() * 1e3)?;
        out.flush()
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}
