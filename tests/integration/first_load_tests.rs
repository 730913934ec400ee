//! First-load integration tests.
//!
//! Tests verify:
//! - All levels stored in the top chunks load, on the inline and the pooled queue
//! - Completion callbacks carry full-size pixel buffers
//! - Coefficient pools return to baseline for fully loaded levels
//! - A failed top chunk leaves its level for the streaming path

use std::sync::Arc;

use isyntax_streamer::queue::{InlineQueue, TokioWorkQueue, WorkQueue};
use isyntax_streamer::slide::{SynthContent, SynthOptions};
use isyntax_streamer::stream::{begin_first_load, do_first_load, DispatchPolicy, Viewport};
use isyntax_streamer::{StreamerConfig, TileStreamer};

use super::test_utils::{all_levels_loaded, chunk_offset_of, existing_tiles, open_synthetic};

/// Three levels in the top chunks, 512x512 pixel tiles, nothing below scale 6.
fn three_level_options() -> SynthOptions {
    SynthOptions {
        block_width: 256,
        block_height: 256,
        max_scale: 8,
        level0_width_in_tiles: 384,
        level0_height_in_tiles: 256,
        lowest_populated_scale: 6,
        content: SynthContent::Flat,
        ..SynthOptions::default()
    }
}

// =============================================================================
// Top-Chunk Levels
// =============================================================================

#[test]
fn test_first_load_three_levels_inline() {
    let t = open_synthetic(&three_level_options());
    let stats = do_first_load(&t.slide, &InlineQueue, &DispatchPolicy::default());

    assert_eq!(stats.scales, vec![8, 7, 6]);
    assert_eq!(stats.tiles_failed, 0);
    assert_eq!(stats.chunk_read_failures, 0);
    assert!(t.slide.is_first_load_complete());

    for scale in 6..=8 {
        assert!(t.slide.is_level_fully_loaded(scale), "scale {}", scale);
        let level = t.slide.level(scale).unwrap();
        let expected = (level.width_in_tiles * level.height_in_tiles) as usize;
        assert_eq!(existing_tiles(&t.slide, scale), expected);
        assert_eq!(t.sink.count_at_scale(scale), expected);
    }

    for tile in t.sink.take() {
        assert_eq!(tile.resource_id, 7);
        assert_eq!((tile.tile_width, tile.tile_height), (512, 512));
        assert_eq!(tile.pixels.len(), 512 * 512 * 3);
    }

    assert_eq!(t.slide.h_pool().outstanding(), 0);
    assert_eq!(t.slide.ll_pool().outstanding(), 0);
    // One read per top tile, nothing else
    assert_eq!(t.log.request_count(), existing_tiles(&t.slide, 8));
}

#[test]
fn test_first_load_three_levels_on_worker_pool() {
    let t = open_synthetic(&three_level_options());
    let pool = Arc::new(TokioWorkQueue::new(4).unwrap());
    let queue: Arc<dyn WorkQueue> = pool.clone();

    assert!(begin_first_load(&t.slide, &queue, DispatchPolicy::default()));
    pool.wait_idle();

    assert!(t.slide.is_first_load_complete());
    for scale in 6..=8 {
        assert!(t.slide.is_level_fully_loaded(scale));
        assert_eq!(t.sink.count_at_scale(scale), existing_tiles(&t.slide, scale));
    }
    assert_eq!(t.slide.h_pool().outstanding(), 0);
    assert_eq!(t.slide.ll_pool().outstanding(), 0);
}

#[test]
fn test_first_load_donates_to_next_level() {
    let t = open_synthetic(&SynthOptions::default());
    do_first_load(&t.slide, &InlineQueue, &DispatchPolicy::default());

    assert!(t.slide.is_level_fully_loaded(3));
    for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let state = t.slide.tile_state(2, x, y).unwrap();
        assert!(state.has_ll());
        assert!(!state.has_h());
    }
    // Only the top chunk was read
    assert_eq!(t.log.request_count(), 1);
}

#[test]
fn test_first_load_runs_once() {
    let t = open_synthetic(&SynthOptions::default());
    let queue: Arc<dyn WorkQueue> = Arc::new(InlineQueue);

    assert!(begin_first_load(&t.slide, &queue, DispatchPolicy::default()));
    assert!(!begin_first_load(&t.slide, &queue, DispatchPolicy::default()));
    assert_eq!(t.sink.len(), 1);
    assert_eq!(t.log.request_count(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failed_top_chunk_is_recovered_by_streaming() {
    let t = open_synthetic(&SynthOptions::default());
    let top = chunk_offset_of(&t.slide, 3, 0, 0);
    t.log.return_empty_at(top, 1);

    let stats = do_first_load(&t.slide, &InlineQueue, &DispatchPolicy::default());
    assert_eq!(stats.chunk_read_failures, 1);
    assert_eq!(stats.tiles_failed, 1);
    assert!(t.slide.is_first_load_complete());
    assert!(!t.slide.is_level_fully_loaded(3));
    assert!(t.sink.is_empty());

    // Streaming decodes the top tile's LL together with its H
    let streamer = TileStreamer::new(
        t.slide.clone(),
        Arc::new(InlineQueue),
        StreamerConfig::default(),
    );
    let viewport = Viewport::whole_level(t.slide.level(0).unwrap(), 0);
    let summary = streamer.run_until_idle(&viewport, 200, || {});

    assert!(summary.converged);
    assert!(all_levels_loaded(&t.slide));
    assert_eq!(t.sink.len(), 1 + 4 + 16 + 64);
    assert_eq!(t.log.reads_at(top), 2);
}
