//! Slide model: immutable pyramid geometry plus mutable runtime state.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      Arc<Slide>                        │
//! │                                                        │
//! │  PyramidGeometry (read-only)    RangeReader (file)     │
//! │  ┌─────────────────────────┐    ┌──────────────────┐   │
//! │  │ levels / codeblocks /   │    │ read_exact_at()  │   │
//! │  │ data chunks             │    └──────────────────┘   │
//! │  └─────────────────────────┘                           │
//! │                                                        │
//! │  LevelState[scale].tiles[index]   ChunkCache (LRU)     │
//! │  BlockAllocator: LL pool, H pool  TileSink             │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! Tiles are addressed by `(scale, tile index)` into per-level arenas; every
//! accessor is bounds-checked and returns `None` outside the grid. Tasks
//! dispatched to worker threads capture a clone of the `Arc<Slide>`, which
//! keeps the slide alive until the last task finishes.

mod geometry;
mod layout;
mod state;
mod synth;

pub use geometry::{Codeblock, DataChunk, Level, PyramidGeometry, TileInfo};
pub use layout::{
    adjacent_tiles_mask, adjacent_tiles_mask_only_existing, codeblock_index_in_chunk,
    codeblocks_per_color, levels_in_chunk, neighbor_bit, opposite_bit, parent_edge_mask, ADJ_ALL,
    ADJ_BOTTOM_CENTER, ADJ_BOTTOM_LEFT, ADJ_BOTTOM_RIGHT, ADJ_CENTER, ADJ_CENTER_LEFT,
    ADJ_CENTER_RIGHT, ADJ_TOP_CENTER, ADJ_TOP_LEFT, ADJ_TOP_RIGHT, NEIGHBORHOOD,
};
pub use state::{ChannelCoefficients, LevelState, TileCoefficients, TileState};
pub use synth::{
    build_synthetic_slide, SynthContent, SynthOptions, SyntheticSlide, FLAT_LUMA, SYNTH_MAGIC,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use crate::config::StreamerConfig;
use crate::error::{GeometryError, IoError};
use crate::io::{ChunkCache, RangeReader};
use crate::tile::{BlockAllocator, CompletedTile, TileSink};

/// Address of one tile in the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub scale: u32,
    pub tile_x: i32,
    pub tile_y: i32,
}

impl TileCoord {
    pub fn new(scale: u32, tile_x: i32, tile_y: i32) -> Self {
        Self {
            scale,
            tile_x,
            tile_y,
        }
    }
}

/// An open slide: geometry, file handle and all runtime state.
pub struct Slide {
    resource_id: u32,
    geometry: PyramidGeometry,
    reader: Box<dyn RangeReader>,
    levels: Vec<LevelState>,
    chunks: ChunkCache,
    ll_pool: BlockAllocator,
    h_pool: BlockAllocator,
    sink: Arc<dyn TileSink>,
    first_load_started: AtomicBool,
    first_load_complete: AtomicBool,
}

impl Slide {
    /// Open a slide over an already-parsed geometry.
    ///
    /// # Arguments
    /// * `resource_id` - Identifier passed back with every completed tile
    /// * `geometry` - Pyramid geometry; validated before use
    /// * `reader` - Positional reader over the slide file
    /// * `sink` - Receives every reconstructed tile
    /// * `config` - Pool and cache sizing
    pub fn open(
        resource_id: u32,
        geometry: PyramidGeometry,
        reader: Box<dyn RangeReader>,
        sink: Arc<dyn TileSink>,
        config: &StreamerConfig,
    ) -> Result<Arc<Self>, GeometryError> {
        geometry.validate()?;

        let levels = geometry
            .levels
            .iter()
            .map(|level| LevelState::new(level.tiles.iter().map(|t| t.exists)))
            .collect();

        let block_len = geometry.block_len();
        let ll_pool = BlockAllocator::new(
            "ll",
            block_len,
            config.blocks_per_batch,
            config.max_coefficient_blocks,
        );
        let h_pool = BlockAllocator::new(
            "h",
            block_len * 3,
            config.blocks_per_batch,
            config.max_coefficient_blocks,
        );

        info!(
            resource_id,
            source = reader.identifier(),
            levels = geometry.levels.len(),
            chunks = geometry.data_chunks.len(),
            block_width = geometry.block_width,
            block_height = geometry.block_height,
            "Opened slide"
        );

        Ok(Arc::new(Self {
            resource_id,
            geometry,
            reader,
            levels,
            chunks: ChunkCache::with_capacity(config.max_resident_chunks),
            ll_pool,
            h_pool,
            sink,
            first_load_started: AtomicBool::new(false),
            first_load_complete: AtomicBool::new(false),
        }))
    }

    pub fn resource_id(&self) -> u32 {
        self.resource_id
    }

    pub fn geometry(&self) -> &PyramidGeometry {
        &self.geometry
    }

    pub fn max_scale(&self) -> u32 {
        self.geometry.max_scale()
    }

    pub fn level(&self, scale: u32) -> Option<&Level> {
        self.geometry.level(scale)
    }

    pub fn level_state(&self, scale: u32) -> Option<&LevelState> {
        self.levels.get(scale as usize)
    }

    /// Runtime state of a tile, or `None` outside the level grid.
    pub fn tile_state(&self, scale: u32, tile_x: i32, tile_y: i32) -> Option<&TileState> {
        let index = self.level(scale)?.tile_index(tile_x, tile_y)?;
        self.level_state(scale)?.tile(index)
    }

    pub fn tile_exists(&self, scale: u32, tile_x: i32, tile_y: i32) -> bool {
        self.level(scale)
            .is_some_and(|level| level.tile_exists(tile_x, tile_y))
    }

    pub fn is_level_fully_loaded(&self, scale: u32) -> bool {
        self.level_state(scale)
            .is_some_and(|level| level.is_fully_loaded())
    }

    pub fn chunks(&self) -> &ChunkCache {
        &self.chunks
    }

    pub fn ll_pool(&self) -> &BlockAllocator {
        &self.ll_pool
    }

    pub fn h_pool(&self) -> &BlockAllocator {
        &self.h_pool
    }

    // =========================================================================
    // Chunk I/O
    // =========================================================================

    /// Read a chunk's full byte range from the file.
    ///
    /// Does not touch the chunk cache.
    pub fn read_chunk(&self, chunk_index: usize) -> Result<Bytes, IoError> {
        let (offset, len) = self
            .geometry
            .chunk_byte_range(chunk_index)
            .ok_or_else(|| IoError::NotFound(format!("chunk {}", chunk_index)))?;
        debug!(chunk = chunk_index, offset, len, "Reading chunk");
        let data = self.reader.read_exact_at(offset, len)?;
        if data.len() != len {
            return Err(IoError::ShortRead {
                offset,
                expected: len as u64,
                actual: data.len() as u64,
            });
        }
        Ok(data)
    }

    /// Get a chunk from the cache, reading and caching it if absent.
    pub fn load_chunk(&self, chunk_index: usize) -> Result<Bytes, IoError> {
        if let Some(data) = self.chunks.get(chunk_index) {
            return Ok(data);
        }
        let data = self.read_chunk(chunk_index)?;
        if let Some(evicted) = self.chunks.insert(chunk_index, data.clone()) {
            debug!(chunk = evicted, "Evicted resident chunk");
        }
        Ok(data)
    }

    // =========================================================================
    // First-load flags
    // =========================================================================

    /// Claim the one-shot first load. Returns `false` if already claimed.
    pub(crate) fn try_start_first_load(&self) -> bool {
        self.first_load_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give the first-load claim back after a failed submission.
    pub(crate) fn cancel_first_load_start(&self) {
        self.first_load_started.store(false, Ordering::Release);
    }

    pub(crate) fn mark_first_load_complete(&self) {
        self.first_load_complete.store(true, Ordering::Release);
    }

    pub fn is_first_load_complete(&self) -> bool {
        self.first_load_complete.load(Ordering::Acquire)
    }

    // =========================================================================
    // Coefficients and completion
    // =========================================================================

    /// Return all of a tile's coefficient buffers to the pools.
    pub(crate) fn release_tile_coefficients(&self, tile: &TileState) {
        let mut coefficients = tile.coefficients();
        for channel in coefficients.channels.iter_mut() {
            if let Some(block) = channel.ll.take() {
                self.ll_pool.release(block);
            }
            if let Some(block) = channel.h.take() {
                self.h_pool.release(block);
            }
        }
        tile.set_has_ll(false);
        tile.set_has_h(false);
    }

    /// Return the coefficient buffers of every tile at `scale`.
    pub(crate) fn release_level_coefficients(&self, scale: u32) {
        if let Some(level) = self.level_state(scale) {
            for tile in level.tiles() {
                self.release_tile_coefficients(tile);
            }
        }
    }

    /// Hand a finished tile to the sink.
    pub(crate) fn emit(&self, coord: TileCoord, pixels: Vec<u8>) {
        let Some(level) = self.level(coord.scale) else {
            return;
        };
        let Some(tile_index) = level.tile_index(coord.tile_x, coord.tile_y) else {
            return;
        };
        self.sink.tile_completed(CompletedTile {
            resource_id: self.resource_id,
            pixels,
            scale: coord.scale,
            tile_index,
            tile_x: coord.tile_x as u32,
            tile_y: coord.tile_y as u32,
            tile_width: self.geometry.tile_width(),
            tile_height: self.geometry.tile_height(),
        });
    }
}

impl std::fmt::Debug for Slide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slide")
            .field("resource_id", &self.resource_id)
            .field("source", &self.reader.identifier())
            .field("max_scale", &self.max_scale())
            .field("first_load_complete", &self.is_first_load_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryRangeReader;
    use crate::tile::CollectingSink;

    fn open_default() -> Arc<Slide> {
        let synthetic = build_synthetic_slide(&SynthOptions::default()).unwrap();
        let reader = MemoryRangeReader::new(synthetic.data, "mem://slide");
        Slide::open(
            1,
            synthetic.geometry,
            Box::new(reader),
            Arc::new(CollectingSink::new()),
            &StreamerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_open_builds_state() {
        let slide = open_default();
        assert_eq!(slide.max_scale(), 3);
        assert!(slide.tile_state(0, 7, 7).is_some());
        assert!(slide.tile_state(0, 8, 0).is_none());
        assert!(slide.tile_state(9, 0, 0).is_none());
        assert!(!slide.is_first_load_complete());
        assert_eq!(slide.level_state(0).unwrap().existing_tiles(), 64);
    }

    #[test]
    fn test_open_rejects_invalid_geometry() {
        let mut synthetic = build_synthetic_slide(&SynthOptions::default()).unwrap();
        synthetic.geometry.levels[2].tiles.pop();
        let result = Slide::open(
            1,
            synthetic.geometry,
            Box::new(MemoryRangeReader::new(synthetic.data, "mem://bad")),
            Arc::new(CollectingSink::new()),
            &StreamerConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_chunk_caches() {
        let slide = open_default();
        assert!(slide.chunks().is_empty());
        let first = slide.load_chunk(0).unwrap();
        assert!(slide.chunks().contains(0));
        let second = slide.load_chunk(0).unwrap();
        assert_eq!(first, second);
        assert_eq!(slide.chunks().len(), 1);
    }

    #[test]
    fn test_read_unknown_chunk() {
        let slide = open_default();
        assert!(matches!(slide.read_chunk(999), Err(IoError::NotFound(_))));
    }

    #[test]
    fn test_first_load_claim() {
        let slide = open_default();
        assert!(slide.try_start_first_load());
        assert!(!slide.try_start_first_load());
        slide.cancel_first_load_start();
        assert!(slide.try_start_first_load());
    }
}
