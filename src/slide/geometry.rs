//! Pyramid geometry description.
//!
//! The geometry is produced by an external metadata parser and handed to the
//! engine read-only. It names every level's tile grid, the codeblock table and
//! the data chunks that group codeblocks into contiguous file ranges.
//!
//! It is (de)serialisable as JSON so the CLI can consume it from a file.

use serde::{Deserialize, Serialize};

use super::layout::{codeblock_index_in_chunk, codeblocks_per_color, levels_in_chunk};
use crate::codec::{bitplane_len, Band, CompressorVersion};
use crate::error::GeometryError;

fn default_quantization() -> u16 {
    1
}

/// One compressed coefficient block in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codeblock {
    /// Absolute file offset.
    pub offset: u64,
    /// Compressed size in bytes.
    pub size: u64,
    pub scale: u32,
    /// Colour channel (0 = Y, 1 = Co, 2 = Cg).
    pub color: u8,
    pub band: Band,
    #[serde(default = "default_quantization")]
    pub quantization: u16,
}

/// A contiguous file range holding the codeblocks of a tile and its
/// descendants.
///
/// Per colour the chunk stores `codeblock_count_per_color` codeblocks in the
/// codeblock table, starting at `top_codeblock_index + color * per_color`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChunk {
    pub offset: u64,
    /// Scale of the chunk's anchor tile.
    pub scale: u32,
    pub top_codeblock_index: usize,
    pub codeblock_count_per_color: usize,
}

impl DataChunk {
    /// Number of levels covered by this chunk.
    pub fn levels(&self) -> u32 {
        levels_in_chunk(self.scale)
    }

    /// Total codeblocks across all three colours.
    pub fn codeblock_count(&self) -> usize {
        self.codeblock_count_per_color.saturating_mul(3)
    }
}

/// One past the last codeblock table index of a chunk.
fn chunk_end_index(chunk: &DataChunk) -> Option<usize> {
    chunk
        .codeblock_count_per_color
        .checked_mul(3)
        .and_then(|count| chunk.top_codeblock_index.checked_add(count))
}

/// Per-tile entry of a level's tile table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileInfo {
    pub exists: bool,
    /// First codeblock of the tile's chunk in the codeblock table.
    #[serde(default)]
    pub codeblock_chunk_index: usize,
    #[serde(default)]
    pub data_chunk_index: usize,
}

/// One resolution level of the pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub scale: u32,
    pub width_in_tiles: u32,
    pub height_in_tiles: u32,
    /// Tile width in world units (micrometres).
    pub tile_width_um: f32,
    /// Tile height in world units (micrometres).
    pub tile_height_um: f32,
    /// World position of the level's tile grid origin.
    #[serde(default)]
    pub origin_offset: [f32; 2],
    pub tiles: Vec<TileInfo>,
}

impl Level {
    pub fn tile_count(&self) -> usize {
        self.width_in_tiles as usize * self.height_in_tiles as usize
    }

    /// Raster index of a tile, or `None` if out of bounds.
    #[inline]
    pub fn tile_index(&self, tile_x: i32, tile_y: i32) -> Option<usize> {
        if tile_x < 0
            || tile_y < 0
            || tile_x as u32 >= self.width_in_tiles
            || tile_y as u32 >= self.height_in_tiles
        {
            return None;
        }
        Some(tile_y as usize * self.width_in_tiles as usize + tile_x as usize)
    }

    pub fn tile(&self, tile_x: i32, tile_y: i32) -> Option<&TileInfo> {
        self.tile_index(tile_x, tile_y).map(|i| &self.tiles[i])
    }

    /// Whether the tile is in bounds and present in the file.
    #[inline]
    pub fn tile_exists(&self, tile_x: i32, tile_y: i32) -> bool {
        self.tile(tile_x, tile_y).is_some_and(|t| t.exists)
    }

    pub fn existing_tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.exists).count()
    }
}

/// The complete, read-only pyramid geometry of a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidGeometry {
    /// Coefficients per sub-band row of a codeblock.
    pub block_width: u32,
    /// Coefficients per sub-band column of a codeblock.
    pub block_height: u32,
    /// Levels indexed by scale, finest first.
    pub levels: Vec<Level>,
    pub codeblocks: Vec<Codeblock>,
    pub data_chunks: Vec<DataChunk>,
    /// Compressor revision of every codeblock in the file.
    #[serde(default)]
    pub compressor_version: CompressorVersion,
}

impl PyramidGeometry {
    /// Parse and validate a JSON geometry description.
    pub fn from_json(json: &str) -> Result<Self, GeometryError> {
        let geometry: Self = serde_json::from_str(json)?;
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn to_json(&self) -> Result<String, GeometryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Coarsest scale.
    pub fn max_scale(&self) -> u32 {
        self.levels.len().saturating_sub(1) as u32
    }

    pub fn level(&self, scale: u32) -> Option<&Level> {
        self.levels.get(scale as usize)
    }

    /// Reconstructed tile width in pixels.
    pub fn tile_width(&self) -> u32 {
        self.block_width * 2
    }

    /// Reconstructed tile height in pixels.
    pub fn tile_height(&self) -> u32 {
        self.block_height * 2
    }

    /// Coefficients per sub-band in one block.
    pub fn block_len(&self) -> usize {
        self.block_width as usize * self.block_height as usize
    }

    /// Byte range `(offset, len)` covering all of a chunk's codeblocks.
    pub fn chunk_byte_range(&self, chunk_index: usize) -> Option<(u64, usize)> {
        let chunk = self.data_chunks.get(chunk_index)?;
        let last = chunk_end_index(chunk)?.checked_sub(1)?;
        let last = self.codeblocks.get(last)?;
        let end = last.offset.checked_add(last.size)?;
        let len = usize::try_from(end.checked_sub(chunk.offset)?).ok()?;
        Some((chunk.offset, len))
    }

    /// Codeblock table index of a tile's H block for `color`.
    ///
    /// Returns `None` for tiles that do not exist.
    pub fn h_codeblock_index(&self, scale: u32, tile_x: i32, tile_y: i32, color: usize) -> Option<usize> {
        let tile = self.level(scale)?.tile(tile_x, tile_y)?;
        if !tile.exists {
            return None;
        }
        let chunk = self.data_chunks.get(tile.data_chunk_index)?;
        let scale_in_chunk = chunk.scale.checked_sub(scale)?;
        let index = codeblock_index_in_chunk(scale_in_chunk, tile_x as u32, tile_y as u32)?;
        Some(tile.codeblock_chunk_index + color * chunk.codeblock_count_per_color + index)
    }

    /// Codeblock table index of a tile's LL block for `color`.
    ///
    /// Only tiles at the anchor scale of a chunk that stores LL blocks (the
    /// top chunks) have one.
    pub fn ll_codeblock_index(&self, scale: u32, tile_x: i32, tile_y: i32, color: usize) -> Option<usize> {
        let tile = self.level(scale)?.tile(tile_x, tile_y)?;
        if !tile.exists {
            return None;
        }
        let chunk = self.data_chunks.get(tile.data_chunk_index)?;
        if chunk.scale != scale || !self.chunk_has_ll(chunk) {
            return None;
        }
        let per_color = chunk.codeblock_count_per_color;
        Some(tile.codeblock_chunk_index + color * per_color + per_color - 1)
    }

    /// Whether a chunk carries LL codeblocks for its anchor tile.
    pub fn chunk_has_ll(&self, chunk: &DataChunk) -> bool {
        chunk.scale == self.max_scale()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.levels.is_empty() {
            return Err(GeometryError::NoLevels);
        }
        self.validate_block_size()?;

        for (i, level) in self.levels.iter().enumerate() {
            if level.scale as usize != i {
                return Err(GeometryError::InvalidTile {
                    scale: level.scale,
                    tile_x: 0,
                    tile_y: 0,
                    reason: format!("level at position {} has scale {}", i, level.scale),
                });
            }
            if level.tiles.len() != level.tile_count() {
                return Err(GeometryError::TileCountMismatch {
                    scale: level.scale,
                    expected: level.tile_count(),
                    actual: level.tiles.len(),
                });
            }
        }

        for pair in self.levels.windows(2) {
            let (below, level) = (&pair[0], &pair[1]);
            if level.width_in_tiles < below.width_in_tiles.div_ceil(2)
                || level.height_in_tiles < below.height_in_tiles.div_ceil(2)
            {
                return Err(GeometryError::InvalidLevelGrid {
                    scale: level.scale,
                    width: level.width_in_tiles,
                    height: level.height_in_tiles,
                    below_width: below.width_in_tiles,
                    below_height: below.height_in_tiles,
                });
            }
        }

        for (index, _) in self.data_chunks.iter().enumerate() {
            self.validate_chunk(index)?;
        }

        for level in &self.levels {
            self.validate_level_tiles(level)?;
        }
        Ok(())
    }

    fn validate_block_size(&self) -> Result<(), GeometryError> {
        let (width, height) = (self.block_width, self.block_height);
        if width < 4 || height < 4 {
            return Err(GeometryError::InvalidBlockSize {
                width,
                height,
                reason: "blocks must be at least 4x4",
            });
        }
        if bitplane_len(width, height).is_err() {
            return Err(GeometryError::InvalidBlockSize {
                width,
                height,
                reason: "coefficients per sub-band must be a multiple of 8",
            });
        }
        Ok(())
    }

    fn validate_chunk(&self, index: usize) -> Result<(), GeometryError> {
        let chunk = &self.data_chunks[index];
        let invalid = |reason: String| GeometryError::InvalidChunk { index, reason };

        if chunk.scale > self.max_scale() {
            return Err(invalid(format!("scale {} above top scale", chunk.scale)));
        }
        let expected = codeblocks_per_color(chunk.levels(), self.chunk_has_ll(chunk));
        if chunk.codeblock_count_per_color != expected {
            return Err(invalid(format!(
                "{} codeblocks per colour, expected {}",
                chunk.codeblock_count_per_color, expected
            )));
        }
        let end = chunk_end_index(chunk).ok_or_else(|| {
            invalid(format!(
                "codeblock index {} overflows",
                chunk.top_codeblock_index
            ))
        })?;
        if end > self.codeblocks.len() {
            return Err(invalid(format!(
                "codeblocks {}..{} exceed table of {}",
                chunk.top_codeblock_index,
                end,
                self.codeblocks.len()
            )));
        }
        for codeblock in &self.codeblocks[chunk.top_codeblock_index..end] {
            if codeblock.offset < chunk.offset {
                return Err(invalid(format!(
                    "codeblock at offset {} precedes chunk offset {}",
                    codeblock.offset, chunk.offset
                )));
            }
            if codeblock.offset.checked_add(codeblock.size).is_none() {
                return Err(invalid(format!(
                    "codeblock at offset {} with size {} overflows",
                    codeblock.offset, codeblock.size
                )));
            }
        }
        if self.chunk_byte_range(index).is_none() {
            return Err(invalid("empty byte range".to_string()));
        }
        Ok(())
    }

    fn validate_level_tiles(&self, level: &Level) -> Result<(), GeometryError> {
        let scale = level.scale;
        let parent_level = self.level(scale + 1);

        for tile_y in 0..level.height_in_tiles {
            for tile_x in 0..level.width_in_tiles {
                let (x, y) = (tile_x as i32, tile_y as i32);
                let Some(tile) = level.tile(x, y) else {
                    continue;
                };
                if !tile.exists {
                    continue;
                }
                let invalid = |reason: String| GeometryError::InvalidTile {
                    scale,
                    tile_x,
                    tile_y,
                    reason,
                };

                let chunk = self.data_chunks.get(tile.data_chunk_index).ok_or_else(|| {
                    invalid(format!("data chunk {} does not exist", tile.data_chunk_index))
                })?;
                if chunk.scale < scale || chunk.scale - scale >= chunk.levels() {
                    return Err(invalid(format!(
                        "chunk {} at scale {} does not cover this level",
                        tile.data_chunk_index, chunk.scale
                    )));
                }
                if tile.codeblock_chunk_index != chunk.top_codeblock_index {
                    return Err(invalid(format!(
                        "codeblock index {} does not match chunk start {}",
                        tile.codeblock_chunk_index, chunk.top_codeblock_index
                    )));
                }
                for color in 0..3 {
                    let index = self
                        .h_codeblock_index(scale, x, y, color)
                        .ok_or_else(|| invalid("no H codeblock".to_string()))?;
                    let codeblock = &self.codeblocks[index];
                    if codeblock.band != Band::H || codeblock.scale != scale {
                        return Err(invalid(format!(
                            "codeblock {} is not an H block at this scale",
                            index
                        )));
                    }
                }

                if let Some(parent_level) = parent_level {
                    if !parent_level.tile_exists(x / 2, y / 2) {
                        return Err(GeometryError::OrphanTile {
                            scale,
                            tile_x,
                            tile_y,
                        });
                    }
                } else {
                    for color in 0..3 {
                        let index = self
                            .ll_codeblock_index(scale, x, y, color)
                            .ok_or_else(|| invalid("top tile has no LL codeblock".to_string()))?;
                        if self.codeblocks[index].band != Band::Ll {
                            return Err(invalid(format!("codeblock {} is not an LL block", index)));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
