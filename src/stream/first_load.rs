//! First load: make the coarsest levels viewable right after open.
//!
//! The top chunk of every tile at the coarsest scale holds that tile's LL
//! and H codeblocks plus the H codeblocks of up to two finer levels. First
//! load reads all of these chunks, then walks the covered levels top-down:
//!
//! ```text
//! max_scale     decode LL + H ──► reconstruct all ──► donate LL ─┐
//! max_scale-1   decode H      ──► reconstruct all ──► donate LL ─┤
//! max_scale-2   decode H      ──► reconstruct all                ◄┘
//! ```
//!
//! Reconstructions go to the work queue when it has room. Waiting for a level
//! helps: any tile not yet started is claimed and reconstructed inline, so a
//! saturated or single-threaded queue cannot stall the load.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::dispatch::{load_claimed_tile, run_load_task, DispatchPolicy};
use crate::queue::WorkQueue;
use crate::slide::{levels_in_chunk, Slide, TileCoord};
use crate::tile::decompress_tile_from_chunk;

/// Outcome of a first load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FirstLoadStats {
    /// Scales processed, coarsest first.
    pub scales: Vec<u32>,
    pub chunks_read: usize,
    pub chunk_read_failures: usize,
    pub tiles_loaded: usize,
    pub tiles_failed: usize,
    pub elapsed: Duration,
}

/// Claim the slide's first load and submit it to the queue.
///
/// Returns `false` if the first load was already claimed or the queue refused
/// the task; a refusal gives the claim back so a later pass retries.
pub fn begin_first_load(
    slide: &Arc<Slide>,
    queue: &Arc<dyn WorkQueue>,
    policy: DispatchPolicy,
) -> bool {
    if !slide.try_start_first_load() {
        return false;
    }
    let task_slide = Arc::clone(slide);
    let task_queue = Arc::clone(queue);
    if !queue.submit(Box::new(move || {
        do_first_load(&task_slide, task_queue.as_ref(), &policy);
    })) {
        warn!(resource_id = slide.resource_id(), "First load refused by queue");
        slide.cancel_first_load_start();
        return false;
    }
    true
}

/// Read, decode and reconstruct every level stored in the top chunks.
///
/// Failures are logged and leave the affected tiles for the streaming path.
/// Coefficients of levels that loaded completely are released afterwards.
pub fn do_first_load(
    slide: &Arc<Slide>,
    queue: &dyn WorkQueue,
    policy: &DispatchPolicy,
) -> FirstLoadStats {
    let start = Instant::now();
    let mut stats = FirstLoadStats::default();
    let max_scale = slide.max_scale();
    let levels = levels_in_chunk(max_scale).min(max_scale + 1);

    let chunks = read_top_chunks(slide, &mut stats);

    for depth in 0..levels {
        let scale = max_scale - depth;
        stats.scales.push(scale);
        decode_level(slide, scale, &chunks);
        let (loaded, failed) = load_all_tiles_in_level(slide, queue, policy, scale);
        stats.tiles_loaded += loaded;
        stats.tiles_failed += failed;
    }

    let mut released = 0;
    for &scale in &stats.scales {
        if slide.is_level_fully_loaded(scale) {
            slide.release_level_coefficients(scale);
            released += 1;
        } else {
            warn!(scale, "Level incomplete after first load");
        }
    }
    drop(chunks);

    slide.mark_first_load_complete();
    stats.elapsed = start.elapsed();
    info!(
        resource_id = slide.resource_id(),
        tiles = stats.tiles_loaded,
        failed = stats.tiles_failed,
        levels = stats.scales.len(),
        released_levels = released,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "First load complete"
    );
    stats
}

/// Read the chunk of every existing top-level tile, in raster order.
fn read_top_chunks(slide: &Slide, stats: &mut FirstLoadStats) -> HashMap<usize, Bytes> {
    let mut chunks = HashMap::new();
    let Some(level) = slide.level(slide.max_scale()) else {
        return chunks;
    };

    for tile in level.tiles.iter().filter(|t| t.exists) {
        let index = tile.data_chunk_index;
        if chunks.contains_key(&index) {
            continue;
        }
        match slide.read_chunk(index) {
            Ok(data) => {
                stats.chunks_read += 1;
                chunks.insert(index, data);
            }
            Err(e) => {
                stats.chunk_read_failures += 1;
                warn!(chunk = index, error = %e, "Failed to read top chunk");
            }
        }
    }
    debug!(chunks = chunks.len(), "Read top chunks");
    chunks
}

/// Decode the coefficients of every tile at `scale` whose chunk was read.
fn decode_level(slide: &Slide, scale: u32, chunks: &HashMap<usize, Bytes>) {
    let Some(level) = slide.level(scale) else {
        return;
    };
    for coord in existing_tiles(slide, scale) {
        let Some(state) = slide.tile_state(scale, coord.tile_x, coord.tile_y) else {
            continue;
        };
        if state.is_loaded() || state.has_h() {
            continue;
        }
        let Some(info) = level.tile(coord.tile_x, coord.tile_y) else {
            continue;
        };
        let Some(chunk) = chunks.get(&info.data_chunk_index) else {
            continue;
        };
        if let Err(e) = decompress_tile_from_chunk(slide, coord, chunk, true) {
            warn!(
                scale,
                tile_x = coord.tile_x,
                tile_y = coord.tile_y,
                error = %e,
                "Failed to decode tile during first load"
            );
        }
    }
}

/// Reconstruct every existing tile of a level and wait for all of them.
///
/// Returns `(loaded, failed)` counts for this level.
fn load_all_tiles_in_level(
    slide: &Arc<Slide>,
    queue: &dyn WorkQueue,
    policy: &DispatchPolicy,
    scale: u32,
) -> (usize, usize) {
    let tiles: Vec<TileCoord> = existing_tiles(slide, scale).collect();

    for &coord in &tiles {
        let Some(state) = slide.tile_state(scale, coord.tile_x, coord.tile_y) else {
            continue;
        };
        if state.is_loaded() || !policy.should_dispatch_async(queue) {
            continue;
        }
        if !state.try_reserve_load() {
            continue;
        }
        let task_slide = Arc::clone(slide);
        if !queue.submit(Box::new(move || {
            run_load_task(&task_slide, coord);
        })) {
            state.cancel_load_reservation();
        }
    }

    // Helping wait: run whatever no worker has started yet
    let (mut loaded, mut failed) = (0, 0);
    for &coord in &tiles {
        let Some(state) = slide.tile_state(scale, coord.tile_x, coord.tile_y) else {
            continue;
        };
        let ok = loop {
            if state.is_loaded() {
                break true;
            }
            if state.try_begin_load() {
                state.mark_submitted_for_loading();
                break load_claimed_tile(slide, coord, state);
            }
            std::thread::yield_now();
        };
        if ok {
            loaded += 1;
        } else {
            failed += 1;
        }
    }
    (loaded, failed)
}

fn existing_tiles(slide: &Slide, scale: u32) -> impl Iterator<Item = TileCoord> + '_ {
    slide.level(scale).into_iter().flat_map(move |level| {
        let width = level.width_in_tiles as i32;
        level
            .tiles
            .iter()
            .enumerate()
            .filter(|(_, t)| t.exists)
            .map(move |(i, _)| TileCoord::new(scale, i as i32 % width, i as i32 / width))
    })
}
