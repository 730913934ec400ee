//! Tile decompression, reconstruction and delivery.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        resident chunk (Bytes)           │
//! └────────────────────┬────────────────────┘
//!                      │ decompress (H, top LL)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  per-tile coefficient slots             │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │   LL pool    │  │    H pool       │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ reconstruct (3x3 neighbourhood)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │  RGB8 pixels ──► TileSink               │
//! │  quadrants   ──► children's LL slots    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`BlockAllocator`]: Thread-safe pools of fixed-size coefficient blocks
//! - [`decompress_h_coeff_for_tile`]: Decodes a tile's codeblocks from its resident chunk
//! - [`load_tile`]: Inverse wavelet, LL donation, loaded accounting and buffer retirement
//! - [`TileSink`]: Receives completed tiles ([`CollectingSink`], [`ChannelSink`], [`JpegDirSink`])

mod allocator;
mod decompress;
mod encoder;
mod reconstruct;
mod sink;

pub use allocator::{BlockAllocator, CoeffBlock, DEFAULT_BLOCKS_PER_BATCH};
pub use decompress::decompress_h_coeff_for_tile;
pub(crate) use decompress::decompress_tile_from_chunk;
pub use encoder::{
    clamp_quality, is_valid_quality, JpegDirSink, JpegTileEncoder, DEFAULT_JPEG_QUALITY,
    MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use reconstruct::{load_tile, neighborhood_ready, IDWT_PAD};
pub use sink::{ChannelSink, CollectingSink, CompletedTile, TileSink};
