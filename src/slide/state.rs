//! Mutable per-tile and per-level runtime state.
//!
//! Flags are atomics so the scheduler can scan whole levels without taking
//! locks. Coefficient buffers live behind a per-tile mutex; reconstruction
//! locks a tile and its neighbours in raster order, which keeps lock order
//! consistent across workers.
//!
//! Flag lifecycle of one tile:
//!
//! ```text
//! submitted_for_h ──► has_h ─┐
//!                            ├──► submitted_for_loading ──► loading ──► loaded
//! donation / top LL ► has_ll ┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::tile::CoeffBlock;

/// Coefficient buffers of one colour channel.
#[derive(Debug, Default)]
pub struct ChannelCoefficients {
    /// `bw x bh` LL coefficients.
    pub ll: Option<CoeffBlock>,
    /// `3 x bw x bh` H coefficients (HL, LH, HH).
    pub h: Option<CoeffBlock>,
}

/// All coefficient buffers of a tile.
#[derive(Debug, Default)]
pub struct TileCoefficients {
    pub channels: [ChannelCoefficients; 3],
}

impl TileCoefficients {
    pub fn has_ll(&self) -> bool {
        self.channels.iter().all(|c| c.ll.is_some())
    }

    pub fn has_h(&self) -> bool {
        self.channels.iter().all(|c| c.h.is_some())
    }
}

// =============================================================================
// Tile State
// =============================================================================

/// Runtime state of one tile.
#[derive(Debug, Default)]
pub struct TileState {
    exists: bool,
    has_ll: AtomicBool,
    has_h: AtomicBool,
    submitted_for_h: AtomicBool,
    submitted_for_loading: AtomicBool,
    loading: AtomicBool,
    loaded: AtomicBool,
    coefficients: Mutex<TileCoefficients>,
}

impl TileState {
    pub fn new(exists: bool) -> Self {
        Self {
            exists,
            ..Self::default()
        }
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.exists
    }

    #[inline]
    pub fn has_ll(&self) -> bool {
        self.has_ll.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_h(&self) -> bool {
        self.has_h.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_submitted_for_h(&self) -> bool {
        self.submitted_for_h.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_submitted_for_loading(&self) -> bool {
        self.submitted_for_loading.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub(crate) fn set_has_ll(&self, value: bool) {
        self.has_ll.store(value, Ordering::Release);
    }

    pub(crate) fn set_has_h(&self, value: bool) {
        self.has_h.store(value, Ordering::Release);
    }

    /// Reserve the tile for H decompression. Returns `false` if another pass
    /// already did.
    pub fn try_reserve_h(&self) -> bool {
        self.submitted_for_h
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Undo an H reservation so a later pass can retry.
    pub fn cancel_h_reservation(&self) {
        self.submitted_for_h.store(false, Ordering::Release);
    }

    /// Reserve the tile for reconstruction. Returns `false` if already
    /// reserved.
    pub fn try_reserve_load(&self) -> bool {
        self.submitted_for_loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Hold the reconstruction reservation whether or not a queued task
    /// already took it.
    pub(crate) fn mark_submitted_for_loading(&self) {
        self.submitted_for_loading.store(true, Ordering::Release);
    }

    /// Undo a reconstruction reservation so a later pass can retry.
    pub fn cancel_load_reservation(&self) {
        self.submitted_for_loading.store(false, Ordering::Release);
    }

    /// Claim the right to run reconstruction now.
    ///
    /// At most one thread holds the claim; a loaded tile is never claimed.
    pub fn try_begin_load(&self) -> bool {
        if self.is_loaded() {
            return false;
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if self.is_loaded() {
            self.loading.store(false, Ordering::Release);
            return false;
        }
        true
    }

    pub(crate) fn end_load(&self) {
        self.loading.store(false, Ordering::Release);
    }

    /// Mark the tile loaded. Returns `true` the first time.
    pub(crate) fn mark_loaded(&self) -> bool {
        !self.loaded.swap(true, Ordering::AcqRel)
    }

    /// Lock the tile's coefficient buffers.
    pub fn coefficients(&self) -> MutexGuard<'_, TileCoefficients> {
        self.coefficients.lock()
    }
}

// =============================================================================
// Level State
// =============================================================================

/// Runtime state of one pyramid level.
#[derive(Debug)]
pub struct LevelState {
    tiles: Vec<TileState>,
    existing_tiles: usize,
    loaded_tiles: AtomicUsize,
    fully_loaded: AtomicBool,
}

impl LevelState {
    /// Create state for a level from its tiles' existence flags.
    pub fn new(exists: impl IntoIterator<Item = bool>) -> Self {
        let tiles: Vec<TileState> = exists.into_iter().map(TileState::new).collect();
        let existing_tiles = tiles.iter().filter(|t| t.exists()).count();
        Self {
            tiles,
            existing_tiles,
            loaded_tiles: AtomicUsize::new(0),
            fully_loaded: AtomicBool::new(existing_tiles == 0),
        }
    }

    pub fn tile(&self, index: usize) -> Option<&TileState> {
        self.tiles.get(index)
    }

    pub fn tiles(&self) -> &[TileState] {
        &self.tiles
    }

    pub fn existing_tiles(&self) -> usize {
        self.existing_tiles
    }

    pub fn loaded_tiles(&self) -> usize {
        self.loaded_tiles.load(Ordering::Acquire)
    }

    /// Whether every existing tile of the level has been reconstructed.
    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded.load(Ordering::Acquire)
    }

    /// Count a newly loaded tile. Returns `true` when this completes the level.
    pub(crate) fn record_loaded(&self) -> bool {
        let loaded = self.loaded_tiles.fetch_add(1, Ordering::AcqRel) + 1;
        if loaded == self.existing_tiles {
            self.fully_loaded.store(true, Ordering::Release);
            return true;
        }
        false
    }
}
