//! # iSyntax Streamer
//!
//! A tile pyramid streaming and wavelet reconstruction engine for iSyntax
//! whole-slide images.
//!
//! iSyntax stores every pyramid level as entropy-coded wavelet coefficients
//! rather than as pixels. Showing a tile means reading the data chunk that
//! holds its codeblocks, decoding its detail (H) coefficients, obtaining its
//! low-pass (LL) coefficients from its reconstructed parent, and running an
//! inverse wavelet transform over it and its eight neighbours. This crate
//! schedules that work for a moving viewport.
//!
//! ## Features
//!
//! - **First load**: the coarsest levels are read and reconstructed right after open
//! - **Viewport streaming**: each pass loads the nearest missing tile and everything it depends on
//! - **LL donation**: finer tiles receive LL from their parent, never from disk
//! - **Backpressure**: work goes to a worker pool while it has room and runs inline otherwise
//! - **Bounded memory**: pooled coefficient blocks and an LRU bound on resident chunks
//!
//! ## Architecture
//!
//! - [`io`] - Positional range readers and the resident chunk cache
//! - [`codec`] - Codeblock decoding, inverse 5/3 wavelet, colour conversion
//! - [`slide`] - Pyramid geometry, per-tile runtime state, the shared [`Slide`]
//! - [`tile`] - Coefficient pools, per-tile decompression and reconstruction, sinks
//! - [`queue`] - Work queue abstraction and worker pools
//! - [`stream`] - First load, streaming scheduler and viewer sessions
//! - [`config`] - CLI and engine configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use isyntax_streamer::{
//!     build_synthetic_slide, CollectingSink, InlineQueue, MemoryRangeReader, Slide,
//!     StreamerConfig, SynthOptions, TileStreamer, Viewport,
//! };
//!
//! let synthetic = build_synthetic_slide(&SynthOptions::default()).unwrap();
//! let config = StreamerConfig::default();
//! let sink = Arc::new(CollectingSink::new());
//! let slide = Slide::open(
//!     0,
//!     synthetic.geometry,
//!     Box::new(MemoryRangeReader::new(synthetic.data, "synthetic")),
//!     sink.clone(),
//!     &config,
//! )
//! .unwrap();
//!
//! let viewport = Viewport::whole_level(slide.level(0).unwrap(), 0);
//! let streamer = TileStreamer::new(slide, Arc::new(InlineQueue), config);
//! let summary = streamer.run_until_idle(&viewport, 100, || {});
//! println!("{} passes, {} tiles", summary.passes, sink.len());
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod queue;
pub mod slide;
pub mod stream;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, RenderConfig, StreamerConfig, SynthConfig};
pub use error::{AllocError, CodecError, GeometryError, IoError, TileError};
pub use io::{ChunkCache, FileRangeReader, MemoryRangeReader, RangeReader};
pub use queue::{InlineQueue, Task, TokioWorkQueue, WorkQueue};
pub use slide::{
    build_synthetic_slide, Level, LevelState, PyramidGeometry, Slide, SynthContent, SynthOptions,
    SyntheticSlide, TileCoord, TileState,
};
pub use stream::{
    do_first_load, Bounds2f, Bounds2i, DispatchPolicy, FirstLoadStats, PassStats, StreamRequest,
    StreamSummary, TileStreamer, Viewport,
};
pub use tile::{
    load_tile, BlockAllocator, ChannelSink, CollectingSink, CompletedTile, JpegDirSink,
    JpegTileEncoder, TileSink, DEFAULT_JPEG_QUALITY,
};
