//! Streaming scheduler integration tests.
//!
//! Tests verify:
//! - Whole-slide streaming converges with every existing tile emitted once
//! - Sparse pyramids never wait on absent tiles
//! - An empty chunk read leaves its tiles untouched until a later pass
//! - Passes over fully loaded levels do no I/O and dispatch nothing
//! - Results do not depend on the queue (inline vs worker pool)
//! - Coalesced sessions on a real worker pool

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use isyntax_streamer::queue::{InlineQueue, TokioWorkQueue, WorkQueue};
use isyntax_streamer::slide::{SynthOptions, TileCoord};
use isyntax_streamer::stream::{StreamRequest, TileStreamer, Viewport};
use isyntax_streamer::StreamerConfig;

use super::test_utils::{
    all_levels_loaded, chunk_offset_of, existing_tiles, open_synthetic, open_synthetic_with,
    TestSlide,
};

fn level0_viewport(t: &TestSlide) -> Viewport {
    Viewport::whole_level(t.slide.level(0).unwrap(), 0)
}

fn inline_streamer(t: &TestSlide) -> Arc<TileStreamer> {
    TileStreamer::new(
        t.slide.clone(),
        Arc::new(InlineQueue),
        StreamerConfig::default(),
    )
}

fn total_existing(t: &TestSlide) -> usize {
    (0..=t.slide.max_scale())
        .map(|scale| existing_tiles(&t.slide, scale))
        .sum()
}

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn test_whole_slide_streams_to_completion() {
    let t = open_synthetic(&SynthOptions::default());
    let streamer = inline_streamer(&t);
    let summary = streamer.run_until_idle(&level0_viewport(&t), 200, || {});

    assert!(summary.converged);
    assert!(all_levels_loaded(&t.slide));
    assert_eq!(t.sink.len(), total_existing(&t));

    // Every tile emitted exactly once
    let tiles = t.sink.take();
    let unique: HashSet<_> = tiles.iter().map(|t| (t.scale, t.tile_x, t.tile_y)).collect();
    assert_eq!(unique.len(), tiles.len());

    // Every chunk read exactly once
    let reads = t.log.requests();
    let offsets: HashSet<_> = reads.iter().map(|(offset, _)| *offset).collect();
    assert_eq!(offsets.len(), reads.len());
    assert_eq!(reads.len(), t.slide.geometry().data_chunks.len());

    assert_eq!(t.slide.h_pool().outstanding(), 0);
    assert_eq!(t.slide.ll_pool().outstanding(), 0);
}

#[test]
fn test_zoomed_viewport_loads_only_what_it_needs() {
    let options = SynthOptions {
        level0_width_in_tiles: 32,
        level0_height_in_tiles: 32,
        max_scale: 5,
        ..SynthOptions::default()
    };
    let t = open_synthetic(&options);
    let streamer = inline_streamer(&t);

    // Two tiles across at level 0, near the top-left corner
    let tile_um = t.slide.level(0).unwrap().tile_width_um;
    let viewport = Viewport::centered([tile_um * 2.0, tile_um * 2.0], tile_um * 2.0, tile_um * 2.0, 0);
    let summary = streamer.run_until_idle(&viewport, 200, || {});

    assert!(summary.converged);
    for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
        assert!(t.slide.tile_state(0, x, y).unwrap().is_loaded());
    }
    // The far corner is never touched
    assert!(!t.slide.tile_state(0, 31, 31).unwrap().is_loaded());
    assert!(!t.slide.is_level_fully_loaded(0));
    assert!(t.log.request_count() < t.slide.geometry().data_chunks.len());
}

#[test]
fn test_greedy_preloads_next_level() {
    let t = open_synthetic(&SynthOptions::default());
    let config = StreamerConfig {
        load_next_level_greedily: true,
        ..StreamerConfig::default()
    };
    let streamer = TileStreamer::new(t.slide.clone(), Arc::new(InlineQueue), config);
    let viewport = Viewport::whole_level(t.slide.level(1).unwrap(), 1);
    let summary = streamer.run_until_idle(&viewport, 200, || {});

    assert!(summary.converged);
    assert!(t.slide.is_level_fully_loaded(1));
    assert!(t.slide.is_level_fully_loaded(0));
}

// =============================================================================
// Sparse Pyramids
// =============================================================================

#[test]
fn test_sparse_pyramid_skips_absent_tile() {
    let options = SynthOptions {
        level0_width_in_tiles: 16,
        level0_height_in_tiles: 20,
        missing_tiles: vec![(2, 3, 4)],
        ..SynthOptions::default()
    };
    let t = open_synthetic(&options);
    assert!(!t.slide.tile_exists(2, 3, 4));
    assert!(!t.slide.tile_exists(0, 15, 19));

    let streamer = inline_streamer(&t);
    let summary = streamer.run_until_idle(&level0_viewport(&t), 300, || {});

    assert!(summary.converged);
    assert!(all_levels_loaded(&t.slide));
    assert_eq!(t.sink.len(), total_existing(&t));

    // Neighbours of the absent tile reconstructed without it
    for (x, y) in [(2, 3), (3, 3), (2, 4)] {
        assert!(t.slide.tile_state(2, x, y).unwrap().is_loaded());
    }
    assert!(!t.slide.tile_state(2, 3, 4).unwrap().is_loaded());

    // Only chunks of existing tiles were read, each once
    let reads = t.log.requests();
    assert_eq!(reads.len(), t.slide.geometry().data_chunks.len());
}

// =============================================================================
// Failed Reads
// =============================================================================

#[test]
fn test_empty_chunk_read_is_retried_next_pass() {
    let t = open_synthetic(&SynthOptions::default());
    let failing = chunk_offset_of(&t.slide, 2, 1, 1);
    t.log.return_empty_at(failing, 1);

    let streamer = inline_streamer(&t);
    let viewport = level0_viewport(&t);
    streamer.run_pass(&viewport);

    let stats = streamer.run_pass(&viewport);
    assert_eq!(stats.target, Some(TileCoord::new(0, 3, 3)));
    assert_eq!(stats.chunk_read_failures, 1);
    assert_eq!(stats.chunks_read, 3);

    // Everything stored in the failed chunk is untouched
    let affected = std::iter::once((2, 1, 1))
        .chain((2..4).flat_map(|y| (2..4).map(move |x| (1, x, y))))
        .chain((4..8).flat_map(|y| (4..8).map(move |x| (0, x, y))));
    for (scale, x, y) in affected {
        let state = t.slide.tile_state(scale, x, y).unwrap();
        assert!(!state.has_h(), "({}, {}, {})", scale, x, y);
        assert!(!state.is_loaded(), "({}, {}, {})", scale, x, y);
    }
    // The target needs (4, 4), which is in the failed chunk
    assert!(!t.slide.tile_state(0, 3, 3).unwrap().is_loaded());

    let summary = streamer.run_until_idle(&viewport, 200, || {});
    assert!(summary.converged);
    assert!(all_levels_loaded(&t.slide));
    assert_eq!(t.log.reads_at(failing), 2);
    assert_eq!(t.log.empty_reads_left(), 0);
}

// =============================================================================
// Idempotence and Bounded Memory
// =============================================================================

#[test]
fn test_pass_over_loaded_levels_is_idle() {
    let t = open_synthetic(&SynthOptions::default());
    let streamer = inline_streamer(&t);
    let viewport = level0_viewport(&t);
    streamer.run_until_idle(&viewport, 200, || {});

    let reads = t.log.request_count();
    let emitted = t.sink.len();
    for zoom in [0, 1, 3] {
        let mut viewport = viewport;
        viewport.zoom_level = zoom;
        let stats = streamer.run_pass(&viewport);
        assert!(stats.is_idle());
        assert_eq!(stats.target, None);
    }
    assert_eq!(t.log.request_count(), reads);
    assert_eq!(t.sink.len(), emitted);
}

#[test]
fn test_streaming_with_single_resident_chunk() {
    let config = StreamerConfig {
        max_resident_chunks: 1,
        ..StreamerConfig::default()
    };
    let t = open_synthetic_with(&SynthOptions::default(), &config);
    let streamer = TileStreamer::new(t.slide.clone(), Arc::new(InlineQueue), config);
    let summary = streamer.run_until_idle(&level0_viewport(&t), 500, || {});

    assert!(summary.converged);
    assert!(all_levels_loaded(&t.slide));
    assert!(t.slide.chunks().len() <= 1);
    assert_eq!(t.sink.len(), total_existing(&t));
}

// =============================================================================
// Determinism
// =============================================================================

fn pixels_by_tile(t: &TestSlide) -> BTreeMap<(u32, u32, u32), Vec<u8>> {
    t.sink
        .take()
        .into_iter()
        .map(|tile| ((tile.scale, tile.tile_x, tile.tile_y), tile.pixels))
        .collect()
}

#[test]
fn test_inline_and_pooled_streaming_agree() {
    let options = SynthOptions {
        max_scale: 4,
        level0_width_in_tiles: 16,
        level0_height_in_tiles: 12,
        ..SynthOptions::default()
    };

    let inline = open_synthetic(&options);
    let streamer = inline_streamer(&inline);
    assert!(streamer.run_until_idle(&level0_viewport(&inline), 300, || {}).converged);

    let pooled = open_synthetic(&options);
    let pool = Arc::new(TokioWorkQueue::new(4).unwrap());
    let queue: Arc<dyn WorkQueue> = pool.clone();
    let streamer = TileStreamer::new(pooled.slide.clone(), queue, StreamerConfig::default());
    let summary = streamer.run_until_idle(&level0_viewport(&pooled), 1000, || pool.wait_idle());
    pool.wait_idle();

    assert!(summary.converged);
    assert!(all_levels_loaded(&pooled.slide));
    assert_eq!(pooled.slide.h_pool().outstanding(), 0);
    assert_eq!(pooled.slide.ll_pool().outstanding(), 0);

    let a = pixels_by_tile(&inline);
    let b = pixels_by_tile(&pooled);
    assert_eq!(a.len(), b.len());
    assert!(a == b, "pixel buffers differ between queues");
}

// =============================================================================
// Sessions
// =============================================================================

#[test]
fn test_session_streams_on_worker_pool() {
    let t = open_synthetic(&SynthOptions::default());
    let pool = Arc::new(TokioWorkQueue::new(2).unwrap());
    let queue: Arc<dyn WorkQueue> = pool.clone();
    let streamer = TileStreamer::new(t.slide.clone(), queue, StreamerConfig::default());
    streamer.set_viewport(level0_viewport(&t));

    for _ in 0..300 {
        if all_levels_loaded(&t.slide) {
            break;
        }
        let first = streamer.stream();
        assert_ne!(first, StreamRequest::Rejected);
        // Requests while a session runs are folded into it
        let _ = streamer.stream();
        pool.wait_idle();
        assert!(!streamer.is_streaming());
    }

    assert!(all_levels_loaded(&t.slide));
    assert_eq!(t.sink.len(), total_existing(&t));
    assert!(streamer.passes_completed() > 0);
}
