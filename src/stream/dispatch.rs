//! Task dispatch glue between the scheduler and the work queue.
//!
//! Every dispatched task captures a clone of the `Arc<Slide>`, so the slide
//! outlives all work in flight. A task the queue refuses is dropped together
//! with its clone, and the tile's reservation flag is rolled back so a later
//! pass retries it.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::StreamerConfig;
use crate::queue::WorkQueue;
use crate::slide::{Slide, TileCoord, TileState};
use crate::tile::{decompress_h_coeff_for_tile, load_tile};

/// Backpressure thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub async_queue_factor: usize,
    pub backlog_factor: usize,
}

impl DispatchPolicy {
    pub fn from_config(config: &StreamerConfig) -> Self {
        Self {
            async_queue_factor: config.async_queue_factor,
            backlog_factor: config.backlog_factor,
        }
    }

    /// Whether work should go to the queue rather than run inline.
    pub fn should_dispatch_async(&self, queue: &dyn WorkQueue) -> bool {
        queue.idle_worker_count() > 0
            && queue.pending_task_count() < queue.worker_count() * self.async_queue_factor
    }

    /// Whether the queue is so far behind that a pass should stop dispatching.
    pub fn is_backlogged(&self, queue: &dyn WorkQueue) -> bool {
        queue.pending_task_count() > queue.worker_count() * self.backlog_factor
    }
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self::from_config(&StreamerConfig::default())
    }
}

// =============================================================================
// Reconstruction
// =============================================================================

/// Reserve a tile for reconstruction and submit it to the queue.
///
/// Returns `false` if the tile was already reserved or the queue refused the
/// task; a refusal rolls the reservation back.
pub fn begin_load_tile(slide: &Arc<Slide>, queue: &dyn WorkQueue, coord: TileCoord) -> bool {
    let Some(state) = slide.tile_state(coord.scale, coord.tile_x, coord.tile_y) else {
        return false;
    };
    if !state.try_reserve_load() {
        return false;
    }
    let task_slide = Arc::clone(slide);
    if !queue.submit(Box::new(move || {
        run_load_task(&task_slide, coord);
    })) {
        debug!(
            scale = coord.scale,
            tile_x = coord.tile_x,
            tile_y = coord.tile_y,
            "Load task refused by queue"
        );
        state.cancel_load_reservation();
        return false;
    }
    true
}

/// Reconstruct a reserved tile and hand it to the sink.
///
/// Does nothing if another thread already loaded or is loading the tile.
/// Returns `true` if this call produced the tile.
pub fn run_load_task(slide: &Slide, coord: TileCoord) -> bool {
    let Some(state) = slide.tile_state(coord.scale, coord.tile_x, coord.tile_y) else {
        return false;
    };
    if !state.try_begin_load() {
        return false;
    }
    load_claimed_tile(slide, coord, state)
}

/// Reconstruct a tile whose load claim the caller holds, then drop the claim.
pub(crate) fn load_claimed_tile(slide: &Slide, coord: TileCoord, state: &TileState) -> bool {
    let produced = match load_tile(slide, coord) {
        Ok(pixels) => {
            slide.emit(coord, pixels);
            true
        }
        Err(e) => {
            warn!(
                scale = coord.scale,
                tile_x = coord.tile_x,
                tile_y = coord.tile_y,
                error = %e,
                "Tile reconstruction failed"
            );
            state.cancel_load_reservation();
            false
        }
    };
    state.end_load();
    produced
}

// =============================================================================
// H decompression
// =============================================================================

/// Reserve a tile for H decompression and submit it to the queue.
///
/// Returns `false` if the tile was already reserved or the queue refused the
/// task; a refusal rolls the reservation back.
pub fn begin_decompress_h_coeff(slide: &Arc<Slide>, queue: &dyn WorkQueue, coord: TileCoord) -> bool {
    let Some(state) = slide.tile_state(coord.scale, coord.tile_x, coord.tile_y) else {
        return false;
    };
    if !state.try_reserve_h() {
        return false;
    }
    let task_slide = Arc::clone(slide);
    if !queue.submit(Box::new(move || {
        run_decompress_task(&task_slide, coord);
    })) {
        debug!(
            scale = coord.scale,
            tile_x = coord.tile_x,
            tile_y = coord.tile_y,
            "Decompression task refused by queue"
        );
        state.cancel_h_reservation();
        return false;
    }
    true
}

/// Decompress a reserved tile's coefficients from its resident chunk.
///
/// A missing chunk or a decode error releases the reservation so the tile is
/// retried on a later pass. Returns `true` on success.
pub fn run_decompress_task(slide: &Slide, coord: TileCoord) -> bool {
    let Some(state) = slide.tile_state(coord.scale, coord.tile_x, coord.tile_y) else {
        return false;
    };
    match decompress_h_coeff_for_tile(slide, coord) {
        Ok(true) => true,
        Ok(false) => {
            debug!(
                scale = coord.scale,
                tile_x = coord.tile_x,
                tile_y = coord.tile_y,
                "Chunk no longer resident"
            );
            state.cancel_h_reservation();
            false
        }
        Err(e) => {
            warn!(
                scale = coord.scale,
                tile_x = coord.tile_x,
                tile_y = coord.tile_y,
                error = %e,
                "Coefficient decompression failed"
            );
            state.cancel_h_reservation();
            false
        }
    }
}
