//! Test utilities for integration tests.
//!
//! This module provides a tracking range reader with injectable empty reads
//! and helpers for opening synthetic slides.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use isyntax_streamer::error::IoError;
use isyntax_streamer::io::{MemoryRangeReader, RangeReader};
use isyntax_streamer::slide::{build_synthetic_slide, Slide, SynthOptions};
use isyntax_streamer::tile::{CollectingSink, TileSink};
use isyntax_streamer::StreamerConfig;

// =============================================================================
// Tracking Reader
// =============================================================================

/// Shared view of the reads a [`TrackingReader`] performed.
#[derive(Clone, Default)]
pub struct ReadLog {
    requests: Arc<Mutex<Vec<(u64, usize)>>>,
    empty_offset: Arc<Mutex<Option<u64>>>,
    empty_reads_left: Arc<AtomicUsize>,
}

impl ReadLog {
    /// All reads as `(offset, len)`, in issue order.
    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Reads that started at `offset`.
    pub fn reads_at(&self, offset: u64) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|(o, _)| *o == offset)
            .count()
    }

    /// Make the next `count` reads at `offset` return zero bytes.
    pub fn return_empty_at(&self, offset: u64, count: usize) {
        *self.empty_offset.lock() = Some(offset);
        self.empty_reads_left.store(count, Ordering::SeqCst);
    }

    pub fn empty_reads_left(&self) -> usize {
        self.empty_reads_left.load(Ordering::SeqCst)
    }
}

/// A range reader that logs every read and can return empty buffers.
pub struct TrackingReader {
    inner: MemoryRangeReader,
    log: ReadLog,
}

impl TrackingReader {
    pub fn new(data: Vec<u8>) -> (Self, ReadLog) {
        let log = ReadLog::default();
        let reader = Self {
            inner: MemoryRangeReader::new(data, "mem://tracking"),
            log: log.clone(),
        };
        (reader, log)
    }
}

impl RangeReader for TrackingReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.log.requests.lock().push((offset, len));
        if *self.log.empty_offset.lock() == Some(offset) {
            let left = self.log.empty_reads_left.load(Ordering::SeqCst);
            if left > 0 {
                self.log.empty_reads_left.store(left - 1, Ordering::SeqCst);
                return Ok(Bytes::new());
            }
        }
        self.inner.read_exact_at(offset, len)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

// =============================================================================
// Slide Helpers
// =============================================================================

/// An opened synthetic slide plus its observation handles.
pub struct TestSlide {
    pub slide: Arc<Slide>,
    pub sink: Arc<CollectingSink>,
    pub log: ReadLog,
}

/// Build and open a synthetic slide with a collecting sink.
pub fn open_synthetic(options: &SynthOptions) -> TestSlide {
    open_synthetic_with(options, &StreamerConfig::default())
}

/// Build and open a synthetic slide with custom engine configuration.
pub fn open_synthetic_with(options: &SynthOptions, config: &StreamerConfig) -> TestSlide {
    let synthetic = build_synthetic_slide(options).expect("synthetic slide");
    let (reader, log) = TrackingReader::new(synthetic.data);
    let sink = Arc::new(CollectingSink::new());
    let slide = Slide::open(
        7,
        synthetic.geometry,
        Box::new(reader),
        sink.clone() as Arc<dyn TileSink>,
        config,
    )
    .expect("open slide");
    TestSlide { slide, sink, log }
}

/// Number of existing tiles at `scale`.
pub fn existing_tiles(slide: &Slide, scale: u32) -> usize {
    slide
        .level_state(scale)
        .map(|level| level.existing_tiles())
        .unwrap_or(0)
}

/// File offset of the chunk holding a tile's H coefficients.
pub fn chunk_offset_of(slide: &Slide, scale: u32, tile_x: i32, tile_y: i32) -> u64 {
    let level = slide.level(scale).expect("level");
    let tile = level.tile(tile_x, tile_y).expect("tile");
    slide.geometry().data_chunks[tile.data_chunk_index].offset
}

/// Whether every level of the slide is fully loaded.
pub fn all_levels_loaded(slide: &Slide) -> bool {
    (0..=slide.max_scale()).all(|scale| slide.is_level_fully_loaded(scale))
}
