//! Completion sinks for reconstructed tiles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// A reconstructed tile handed to the sink.
///
/// The pixel buffer is interleaved RGB8, `tile_width * tile_height * 3` bytes,
/// and ownership moves to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTile {
    pub resource_id: u32,
    pub pixels: Vec<u8>,
    pub scale: u32,
    /// Raster index of the tile in its level.
    pub tile_index: usize,
    pub tile_x: u32,
    pub tile_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

/// Receives every completed tile.
///
/// Called from worker threads, possibly concurrently.
pub trait TileSink: Send + Sync {
    fn tile_completed(&self, tile: CompletedTile);
}

// =============================================================================
// Collecting Sink
// =============================================================================

/// Keeps every completed tile in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    tiles: Mutex<Vec<CompletedTile>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tiles received so far.
    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tiles received at `scale`.
    pub fn count_at_scale(&self, scale: u32) -> usize {
        self.tiles.lock().iter().filter(|t| t.scale == scale).count()
    }

    /// Take all received tiles, leaving the sink empty.
    pub fn take(&self) -> Vec<CompletedTile> {
        std::mem::take(&mut *self.tiles.lock())
    }
}

impl TileSink for CollectingSink {
    fn tile_completed(&self, tile: CompletedTile) {
        self.tiles.lock().push(tile);
    }
}

// =============================================================================
// Channel Sink
// =============================================================================

/// Forwards completed tiles into an unbounded channel.
///
/// Tiles sent after the receiver is dropped are logged and counted, then
/// discarded.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<CompletedTile>,
    dropped: Arc<AtomicUsize>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompletedTile>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Self {
            sender,
            dropped: Arc::new(AtomicUsize::new(0)),
        };
        (sink, receiver)
    }

    /// Whether the receiver has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Tiles discarded because the receiver was gone.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TileSink for ChannelSink {
    fn tile_completed(&self, tile: CompletedTile) {
        if let Err(mpsc::error::SendError(tile)) = self.sender.send(tile) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(
                resource_id = tile.resource_id,
                scale = tile.scale,
                tile_x = tile.tile_x,
                tile_y = tile.tile_y,
                "Tile receiver closed, dropping tile"
            );
        }
    }
}
