//! Streaming scheduler.
//!
//! One pass looks at the viewport, decides which tiles on which scales are
//! needed next and dispatches the I/O and decode work for them:
//!
//! ```text
//!   viewport ──► scale range ──► load regions ──► target tile
//!                                                     │
//!                    escalate LL needs to coarser scales
//!                                                     │
//!   read missing chunks (offset order, capped, time budget)
//!                                                     │
//!   decompress H ──► reconstruct tiles with a ready neighbourhood
//! ```
//!
//! [`TileStreamer`] is the per-viewer session around the pass: it keeps the
//! latest viewport and makes sure at most one pass runs at a time. A request
//! arriving while a pass is in flight only raises the frame-boundary flag; the
//! running pass stops dispatching at the next check and the session starts a
//! fresh pass with the new viewport.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::dispatch::{
    begin_decompress_h_coeff, begin_load_tile, run_decompress_task, run_load_task, DispatchPolicy,
};
use super::first_load::{begin_first_load, do_first_load};
use super::region::{escalate_ll_requirements, LoadRegion};
use super::viewport::{Bounds2f, Viewport};
use crate::config::StreamerConfig;
use crate::queue::WorkQueue;
use crate::slide::{Slide, TileCoord, TileState};
use crate::tile::neighborhood_ready;

/// What one streaming pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassStats {
    /// The slide had not finished its first load; nothing was streamed.
    pub first_load_pending: bool,
    /// This pass started the first load.
    pub first_load_started: bool,
    /// Tile the pass prioritised.
    pub target: Option<TileCoord>,
    pub chunks_requested: usize,
    pub chunks_read: usize,
    pub chunk_read_failures: usize,
    pub h_dispatched: usize,
    pub tiles_dispatched: usize,
    /// Dispatch stopped on a frame boundary or queue backlog.
    pub stopped_early: bool,
}

impl PassStats {
    /// Whether the pass changed nothing; another pass over the same
    /// viewport would do the same.
    pub fn is_idle(&self) -> bool {
        !self.first_load_pending
            && self.chunks_requested == 0
            && self.h_dispatched == 0
            && self.tiles_dispatched == 0
    }
}

/// Totals of [`TileStreamer::run_until_idle`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub passes: usize,
    /// An idle pass was reached before the pass limit.
    pub converged: bool,
    pub chunks_read: usize,
    pub tiles_dispatched: usize,
}

/// Outcome of [`TileStreamer::stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRequest {
    /// A new session task was submitted.
    Started,
    /// A session is already running; it will restart with the new viewport.
    Coalesced,
    /// The queue refused the session task.
    Rejected,
}

/// Per-viewer streaming session.
///
/// Session tasks hold an `Arc` of the streamer and thereby of the queue, so
/// the queue's owner must wait for it to go idle before dropping it.
pub struct TileStreamer {
    slide: Arc<Slide>,
    queue: Arc<dyn WorkQueue>,
    config: StreamerConfig,
    policy: DispatchPolicy,
    viewport: Mutex<Viewport>,
    in_progress: AtomicBool,
    frame_boundary: AtomicBool,
    passes: AtomicUsize,
}

impl TileStreamer {
    /// Create a session viewing the whole coarsest level.
    pub fn new(slide: Arc<Slide>, queue: Arc<dyn WorkQueue>, config: StreamerConfig) -> Arc<Self> {
        let max_scale = slide.max_scale();
        let viewport = slide
            .level(max_scale)
            .map(|level| Viewport::whole_level(level, max_scale as i32))
            .unwrap_or_else(|| Viewport::new(Bounds2f::default(), max_scale as i32));
        Arc::new(Self {
            policy: DispatchPolicy::from_config(&config),
            slide,
            queue,
            config,
            viewport: Mutex::new(viewport),
            in_progress: AtomicBool::new(false),
            frame_boundary: AtomicBool::new(false),
            passes: AtomicUsize::new(0),
        })
    }

    pub fn slide(&self) -> &Arc<Slide> {
        &self.slide
    }

    pub fn viewport(&self) -> Viewport {
        *self.viewport.lock()
    }

    /// Replace the viewport used by the next pass.
    pub fn set_viewport(&self, viewport: Viewport) {
        *self.viewport.lock() = viewport;
    }

    /// Number of passes run by session tasks so far.
    pub fn passes_completed(&self) -> usize {
        self.passes.load(Ordering::Acquire)
    }

    pub fn is_streaming(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Request a streaming pass over the current viewport.
    ///
    /// Starts a session task unless one is already running, in which case
    /// the running session is told to restart.
    pub fn stream(self: &Arc<Self>) -> StreamRequest {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.frame_boundary.store(true, Ordering::Release);
            return StreamRequest::Coalesced;
        }

        let session = Arc::clone(self);
        if !self.queue.submit(Box::new(move || session.run_session())) {
            warn!(
                resource_id = self.slide.resource_id(),
                "Streaming session refused by queue"
            );
            self.in_progress.store(false, Ordering::Release);
            return StreamRequest::Rejected;
        }
        StreamRequest::Started
    }

    fn run_session(&self) {
        loop {
            loop {
                let viewport = self.viewport();
                self.run_pass(&viewport);
                self.passes.fetch_add(1, Ordering::AcqRel);
                if !self.frame_boundary.swap(false, Ordering::AcqRel) {
                    break;
                }
            }
            self.in_progress.store(false, Ordering::Release);

            // A request may have been coalesced after the last check
            if !self.frame_boundary.load(Ordering::Acquire)
                || self
                    .in_progress
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
            self.frame_boundary.store(false, Ordering::Release);
        }
    }

    /// Run passes over `viewport` until one is idle or `max_passes` ran.
    ///
    /// `settle` is called after every pass, typically to wait for the queue
    /// to drain.
    pub fn run_until_idle(
        &self,
        viewport: &Viewport,
        max_passes: usize,
        mut settle: impl FnMut(),
    ) -> StreamSummary {
        let mut summary = StreamSummary::default();
        while summary.passes < max_passes {
            let stats = self.run_pass(viewport);
            settle();
            summary.passes += 1;
            summary.chunks_read += stats.chunks_read;
            summary.tiles_dispatched += stats.tiles_dispatched;
            if stats.is_idle() {
                summary.converged = true;
                break;
            }
        }
        summary
    }

    // =========================================================================
    // Pass
    // =========================================================================

    /// Run one streaming pass over `viewport`.
    pub fn run_pass(&self, viewport: &Viewport) -> PassStats {
        let mut stats = PassStats::default();

        if !self.slide.is_first_load_complete() {
            stats.first_load_pending = true;
            stats.first_load_started = self.start_first_load();
            return stats;
        }

        let Some((preload, highest)) = self.scale_range(viewport) else {
            return stats;
        };

        let padding = self.config.padding;
        let mut regions: Vec<Option<LoadRegion>> = (preload..=highest)
            .map(|scale| {
                self.slide
                    .level(scale)
                    .and_then(|level| LoadRegion::new(level, viewport, padding))
            })
            .collect();

        let Some(target) = regions[0]
            .as_ref()
            .and_then(|region| self.pick_target(viewport, region))
        else {
            return stats;
        };
        stats.target = Some(target);

        let Some(target_level) = self.slide.level(target.scale) else {
            return stats;
        };
        if let Some(region) = regions[0].as_mut() {
            region.mark_for_full_loading(target_level, target.tile_x, target.tile_y);
        }
        for i in 0..regions.len() - 1 {
            let (lower, upper) = regions.split_at_mut(i + 1);
            if let (Some(child), Some(parent)) = (lower[i].as_ref(), upper[0].as_mut()) {
                escalate_ll_requirements(&self.slide, child, parent);
            }
        }

        let chunks = self.collect_chunks(&regions);
        stats.chunks_requested = chunks.len();
        if !self.read_chunks(&chunks, &mut stats) {
            stats.stopped_early = true;
            return stats;
        }

        // Load everything visible the resident chunks allow
        if let Some(region) = regions[0].as_mut() {
            let visible = region.visible;
            for (x, y) in visible.iter() {
                if target_level.tile_exists(x, y) {
                    region.mark_for_full_loading(target_level, x, y);
                }
            }
        }

        stats.h_dispatched = self.dispatch_decompression(&regions);
        let (dispatched, stopped) = self.dispatch_reconstruction(&regions);
        stats.tiles_dispatched = dispatched;
        stats.stopped_early |= stopped;

        debug!(
            target_scale = target.scale,
            target_x = target.tile_x,
            target_y = target.tile_y,
            chunks = stats.chunks_read,
            failed_chunks = stats.chunk_read_failures,
            h = stats.h_dispatched,
            tiles = stats.tiles_dispatched,
            stopped_early = stats.stopped_early,
            "Streaming pass"
        );
        stats
    }

    fn start_first_load(&self) -> bool {
        if self.policy.should_dispatch_async(self.queue.as_ref()) {
            return begin_first_load(&self.slide, &self.queue, self.policy);
        }
        if !self.slide.try_start_first_load() {
            return false;
        }
        do_first_load(&self.slide, self.queue.as_ref(), &self.policy);
        true
    }

    /// Scales to work on, finest first: `(preload, highest)`.
    ///
    /// Fully loaded scales at the top are skipped. `None` when nothing is left.
    fn scale_range(&self, viewport: &Viewport) -> Option<(u32, u32)> {
        let max_scale = self.slide.max_scale();
        let lowest_visible = viewport.zoom_level.clamp(0, max_scale as i32) as u32;
        let preload = if self.config.load_next_level_greedily {
            lowest_visible.saturating_sub(1)
        } else {
            lowest_visible
        };

        let mut highest = max_scale as i64;
        while highest >= lowest_visible as i64 && self.slide.is_level_fully_loaded(highest as u32) {
            highest -= 1;
        }
        if highest < preload as i64 {
            return None;
        }
        Some((preload, highest as u32))
    }

    /// Nearest visible tile that exists and is neither loaded nor reserved.
    fn pick_target(&self, viewport: &Viewport, region: &LoadRegion) -> Option<TileCoord> {
        let level = self.slide.level(region.scale)?;
        region
            .visible
            .iter()
            .filter(|&(x, y)| {
                self.slide.tile_state(region.scale, x, y).is_some_and(|t| {
                    t.exists() && !t.is_submitted_for_loading() && !t.is_loaded()
                })
            })
            .map(|(x, y)| (x, y, viewport.distance_sq_to_tile(level, x, y)))
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(x, y, _)| TileCoord::new(region.scale, x, y))
    }

    /// Chunks holding H coefficients some region still needs, coarsest scale
    /// first, capped and then sorted by file offset.
    fn collect_chunks(&self, regions: &[Option<LoadRegion>]) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut chunks = Vec::new();

        'scan: for region in regions.iter().rev().flatten() {
            let Some(level) = self.slide.level(region.scale) else {
                continue;
            };
            for (x, y, req) in region.iter() {
                if !req.need_h {
                    continue;
                }
                let Some(state) = self.slide.tile_state(region.scale, x, y) else {
                    continue;
                };
                if !state.exists()
                    || state.has_h()
                    || state.is_submitted_for_h()
                    || state.is_loaded()
                {
                    continue;
                }
                let Some(tile) = level.tile(x, y) else {
                    continue;
                };
                let index = tile.data_chunk_index;
                if self.slide.chunks().contains(index) || !seen.insert(index) {
                    continue;
                }
                chunks.push(index);
                if chunks.len() >= self.config.max_chunks_to_check {
                    break 'scan;
                }
            }
        }

        chunks.truncate(self.config.max_chunks_per_pass);
        let geometry = self.slide.geometry();
        chunks.sort_by_key(|&index| {
            geometry
                .data_chunks
                .get(index)
                .map_or(u64::MAX, |chunk| chunk.offset)
        });
        chunks
    }

    /// Read chunks into the resident cache within the I/O budget.
    ///
    /// Returns `false` if a frame boundary interrupted the reads.
    fn read_chunks(&self, chunks: &[usize], stats: &mut PassStats) -> bool {
        let budget = self.config.chunk_io_budget();
        let start = Instant::now();

        for &index in chunks {
            if self.frame_boundary.load(Ordering::Acquire) {
                return false;
            }
            match self.slide.load_chunk(index) {
                Ok(_) => stats.chunks_read += 1,
                Err(e) => {
                    stats.chunk_read_failures += 1;
                    warn!(chunk = index, error = %e, "Failed to read chunk");
                }
            }
            if start.elapsed() > budget {
                debug!(
                    read = stats.chunks_read,
                    requested = chunks.len(),
                    "Chunk I/O budget exhausted"
                );
                break;
            }
        }
        true
    }

    /// Decompress H for every needed tile whose chunk is resident.
    fn dispatch_decompression(&self, regions: &[Option<LoadRegion>]) -> usize {
        let mut dispatched = 0;
        for region in regions.iter().rev().flatten() {
            let Some(level) = self.slide.level(region.scale) else {
                continue;
            };
            for (x, y, req) in region.iter() {
                if !req.need_h {
                    continue;
                }
                let Some(state) = self.slide.tile_state(region.scale, x, y) else {
                    continue;
                };
                if !state.exists()
                    || state.is_submitted_for_h()
                    || state.has_h()
                    || state.is_loaded()
                {
                    continue;
                }
                let resident = level
                    .tile(x, y)
                    .is_some_and(|tile| self.slide.chunks().contains(tile.data_chunk_index));
                if resident && self.dispatch_h(TileCoord::new(region.scale, x, y), state) {
                    dispatched += 1;
                }
            }
        }
        dispatched
    }

    fn dispatch_h(&self, coord: TileCoord, state: &TileState) -> bool {
        let queue = self.queue.as_ref();
        if self.policy.should_dispatch_async(queue) {
            return begin_decompress_h_coeff(&self.slide, queue, coord);
        }
        if self.frame_boundary.load(Ordering::Acquire) || !state.try_reserve_h() {
            return false;
        }
        run_decompress_task(&self.slide, coord);
        true
    }

    /// Reconstruct every wanted tile whose neighbourhood is ready.
    ///
    /// Returns the number dispatched and whether dispatch stopped early.
    fn dispatch_reconstruction(&self, regions: &[Option<LoadRegion>]) -> (usize, bool) {
        let queue = self.queue.as_ref();
        let mut dispatched = 0;
        let mut stopped = false;

        'scan: for region in regions.iter().rev().flatten() {
            for (x, y, req) in region.iter() {
                if !req.want_full_load {
                    continue;
                }
                let Some(state) = self.slide.tile_state(region.scale, x, y) else {
                    continue;
                };
                if !state.exists()
                    || state.is_submitted_for_loading()
                    || state.is_loaded()
                    || !state.has_ll()
                    || !state.has_h()
                {
                    continue;
                }
                let coord = TileCoord::new(region.scale, x, y);
                if !neighborhood_ready(&self.slide, coord) {
                    continue;
                }
                if self.dispatch_load(coord, state) {
                    dispatched += 1;
                }
                if self.frame_boundary.load(Ordering::Acquire) || self.policy.is_backlogged(queue) {
                    stopped = true;
                    break 'scan;
                }
            }
        }
        (dispatched, stopped)
    }

    fn dispatch_load(&self, coord: TileCoord, state: &TileState) -> bool {
        let queue = self.queue.as_ref();
        if self.policy.should_dispatch_async(queue) {
            return begin_load_tile(&self.slide, queue, coord);
        }
        if self.frame_boundary.load(Ordering::Acquire) || !state.try_reserve_load() {
            return false;
        }
        run_load_task(&self.slide, coord);
        true
    }
}

impl std::fmt::Debug for TileStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileStreamer")
            .field("slide", &self.slide)
            .field("viewport", &self.viewport())
            .field("in_progress", &self.is_streaming())
            .field("passes", &self.passes_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;
    use crate::queue::{InlineQueue, Task};
    use crate::slide::{build_synthetic_slide, SynthOptions};
    use crate::tile::CollectingSink;

    /// Holds submitted tasks until the test runs them.
    #[derive(Default)]
    struct ManualQueue {
        tasks: Mutex<Vec<Task>>,
    }

    impl ManualQueue {
        fn run_all(&self) -> usize {
            let mut ran = 0;
            loop {
                let tasks: Vec<Task> = std::mem::take(&mut *self.tasks.lock());
                if tasks.is_empty() {
                    return ran;
                }
                for task in tasks {
                    task();
                    ran += 1;
                }
            }
        }
    }

    impl WorkQueue for ManualQueue {
        fn submit(&self, task: Task) -> bool {
            self.tasks.lock().push(task);
            true
        }
        fn pending_task_count(&self) -> usize {
            self.tasks.lock().len()
        }
        fn idle_worker_count(&self) -> usize {
            0
        }
        fn worker_count(&self) -> usize {
            1
        }
    }

    struct RejectingQueue;

    impl WorkQueue for RejectingQueue {
        fn submit(&self, _task: Task) -> bool {
            false
        }
        fn pending_task_count(&self) -> usize {
            0
        }
        fn idle_worker_count(&self) -> usize {
            1
        }
        fn worker_count(&self) -> usize {
            1
        }
    }

    fn open() -> (Arc<Slide>, Arc<CollectingSink>) {
        let synthetic = build_synthetic_slide(&SynthOptions::default()).unwrap();
        let sink = Arc::new(CollectingSink::new());
        let slide = Slide::open(
            0,
            synthetic.geometry,
            Box::new(MemoryRangeReader::new(synthetic.data, "mem://scheduler")),
            sink.clone(),
            &StreamerConfig::default(),
        )
        .unwrap();
        (slide, sink)
    }

    fn level0_viewport(slide: &Slide) -> Viewport {
        Viewport::whole_level(slide.level(0).unwrap(), 0)
    }

    #[test]
    fn test_first_pass_runs_first_load() {
        let (slide, sink) = open();
        let streamer = TileStreamer::new(slide.clone(), Arc::new(InlineQueue), StreamerConfig::default());

        let stats = streamer.run_pass(&level0_viewport(&slide));
        assert!(stats.first_load_pending);
        assert!(stats.first_load_started);
        assert!(stats.target.is_none());
        assert!(slide.is_first_load_complete());
        assert_eq!(sink.count_at_scale(3), 1);
    }

    #[test]
    fn test_scale_range() {
        let (slide, _) = open();
        let streamer = TileStreamer::new(slide.clone(), Arc::new(InlineQueue), StreamerConfig::default());
        let mut viewport = level0_viewport(&slide);

        assert_eq!(streamer.scale_range(&viewport), Some((0, 3)));
        viewport.zoom_level = -4;
        assert_eq!(streamer.scale_range(&viewport), Some((0, 3)));
        viewport.zoom_level = 9;
        assert_eq!(streamer.scale_range(&viewport), Some((3, 3)));

        streamer.run_pass(&viewport);
        // Top level loaded by first load
        assert_eq!(streamer.scale_range(&viewport), None);
        viewport.zoom_level = 1;
        assert_eq!(streamer.scale_range(&viewport), Some((1, 2)));

        let greedy = TileStreamer::new(
            slide,
            Arc::new(InlineQueue),
            StreamerConfig {
                load_next_level_greedily: true,
                ..StreamerConfig::default()
            },
        );
        assert_eq!(greedy.scale_range(&viewport), Some((0, 2)));
    }

    #[test]
    fn test_pass_targets_nearest_tile() {
        let (slide, sink) = open();
        let streamer = TileStreamer::new(slide.clone(), Arc::new(InlineQueue), StreamerConfig::default());
        let viewport = level0_viewport(&slide);
        streamer.run_pass(&viewport);

        let stats = streamer.run_pass(&viewport);
        // Four tiles tie at the centre; the first in raster order wins
        assert_eq!(stats.target, Some(TileCoord::new(0, 3, 3)));
        assert_eq!(stats.chunks_requested, 4);
        assert_eq!(stats.chunks_read, 4);
        assert!(stats.h_dispatched > 0);
        assert!(stats.tiles_dispatched > 0);
        assert!(slide.tile_state(0, 3, 3).unwrap().is_loaded());
        assert!(slide.is_level_fully_loaded(2));
        assert!(sink.count_at_scale(0) > 0);
    }

    #[test]
    fn test_run_until_idle_loads_everything() {
        let (slide, sink) = open();
        let streamer = TileStreamer::new(slide.clone(), Arc::new(InlineQueue), StreamerConfig::default());
        let summary = streamer.run_until_idle(&level0_viewport(&slide), 200, || {});

        assert!(summary.converged);
        for scale in 0..=3 {
            assert!(slide.is_level_fully_loaded(scale));
        }
        assert_eq!(sink.len(), 1 + 4 + 16 + 64);
        assert_eq!(slide.h_pool().outstanding(), 0);
        assert_eq!(slide.ll_pool().outstanding(), 0);

        let stats = streamer.run_pass(&level0_viewport(&slide));
        assert!(stats.is_idle());
        assert!(stats.target.is_none());
    }

    #[test]
    fn test_stream_coalesces_requests() {
        let (slide, _) = open();
        let queue = Arc::new(ManualQueue::default());
        let streamer = TileStreamer::new(slide, queue.clone(), StreamerConfig::default());

        assert_eq!(streamer.stream(), StreamRequest::Started);
        assert_eq!(streamer.stream(), StreamRequest::Coalesced);
        assert_eq!(streamer.stream(), StreamRequest::Coalesced);
        assert!(streamer.is_streaming());

        queue.run_all();
        // One pass, then one restart for the coalesced requests
        assert_eq!(streamer.passes_completed(), 2);
        assert!(!streamer.is_streaming());

        assert_eq!(streamer.stream(), StreamRequest::Started);
        queue.run_all();
        assert_eq!(streamer.passes_completed(), 3);
    }

    #[test]
    fn test_rejected_session_clears_flag() {
        let (slide, _) = open();
        let streamer = TileStreamer::new(slide.clone(), Arc::new(RejectingQueue), StreamerConfig::default());
        let baseline = Arc::strong_count(&streamer);

        assert_eq!(streamer.stream(), StreamRequest::Rejected);
        assert!(!streamer.is_streaming());
        assert_eq!(Arc::strong_count(&streamer), baseline);

        // First load refused as well, and left claimable
        let stats = streamer.run_pass(&level0_viewport(&slide));
        assert!(stats.first_load_pending);
        assert!(!slide.is_first_load_complete());
    }
}
