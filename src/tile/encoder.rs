//! JPEG encoding of reconstructed tiles.
//!
//! Reconstructed tiles are raw interleaved RGB8. The CLI writes them out as
//! JPEG files through [`JpegDirSink`], one directory per scale.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, warn};

use super::sink::{CompletedTile, TileSink};
use crate::error::TileError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// JPEG Encoder
// =============================================================================

/// Encodes raw RGB8 tiles as JPEG.
#[derive(Debug, Clone, Default)]
pub struct JpegTileEncoder {}

impl JpegTileEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode an interleaved RGB8 buffer.
    ///
    /// # Arguments
    ///
    /// * `pixels` - `width * height * 3` bytes
    /// * `width`, `height` - Tile dimensions in pixels
    /// * `quality` - Output JPEG quality, clamped to 1-100
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size does not match the dimensions or
    /// encoding fails.
    pub fn encode_rgb(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(TileError::EncodeError {
                message: format!(
                    "pixel buffer has {} bytes, expected {} for {}x{} RGB",
                    pixels.len(),
                    expected,
                    width,
                    height
                ),
            });
        }

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, clamp_quality(quality));
        encoder
            .encode(pixels, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| TileError::EncodeError {
                message: e.to_string(),
            })?;

        Ok(Bytes::from(output))
    }
}

/// Validate JPEG quality parameter.
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Directory Sink
// =============================================================================

/// Writes every completed tile to `<root>/<scale>/<x>_<y>.jpg`.
///
/// Write failures are logged and counted; they never reach the engine.
#[derive(Debug)]
pub struct JpegDirSink {
    root: PathBuf,
    quality: u8,
    encoder: JpegTileEncoder,
    written: AtomicUsize,
    failed: AtomicUsize,
}

impl JpegDirSink {
    pub fn new(root: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            root: root.into(),
            quality: clamp_quality(quality),
            encoder: JpegTileEncoder::new(),
            written: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a tile is written to.
    pub fn tile_path(&self, scale: u32, tile_x: u32, tile_y: u32) -> PathBuf {
        self.root
            .join(scale.to_string())
            .join(format!("{}_{}.jpg", tile_x, tile_y))
    }

    /// Number of tiles written successfully.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Number of tiles that could not be encoded or written.
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    fn write_tile(&self, tile: &CompletedTile) -> Result<PathBuf, TileError> {
        let jpeg = self.encoder.encode_rgb(
            &tile.pixels,
            tile.tile_width,
            tile.tile_height,
            self.quality,
        )?;
        let path = self.tile_path(tile.scale, tile.tile_x, tile.tile_y);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::IoError::from)?;
        }
        std::fs::write(&path, &jpeg).map_err(crate::error::IoError::from)?;
        Ok(path)
    }
}

impl TileSink for JpegDirSink {
    fn tile_completed(&self, tile: CompletedTile) {
        match self.write_tile(&tile) {
            Ok(path) => {
                self.written.fetch_add(1, Ordering::Relaxed);
                debug!(
                    scale = tile.scale,
                    tile_x = tile.tile_x,
                    tile_y = tile.tile_y,
                    path = %path.display(),
                    "Wrote tile"
                );
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    scale = tile.scale,
                    tile_x = tile.tile_x,
                    tile_y = tile.tile_y,
                    error = %e,
                    "Failed to write tile"
                );
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
