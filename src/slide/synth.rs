//! Synthetic slide writer.
//!
//! Builds a pyramid geometry and matching file bytes for any pyramid shape.
//! Chunks follow the on-disk quadtree layout: one chunk per tile at the top
//! scale, and one chunk per tile at every lower scale `S` with `S % 3 == 2`,
//! each holding its anchor tile and up to two finer descendant levels.
//!
//! Used by the `synth` CLI command and as the fixture source for tests.

use std::collections::HashMap;

use super::geometry::{Codeblock, DataChunk, Level, PyramidGeometry, TileInfo};
use super::layout::{codeblock_index_in_chunk, codeblocks_per_color, levels_in_chunk};
use crate::codec::{compress_codeblock, Band, Coeff, CompressorVersion};
use crate::error::GeometryError;

/// Bytes written at the start of every synthetic slide file.
pub const SYNTH_MAGIC: &[u8; 8] = b"ISYNSYN1";

/// What the synthetic tiles look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthContent {
    /// Gradient LL with small pseudo-random detail coefficients.
    Pattern,
    /// Uniform grey: constant LL, all-zero detail.
    Flat,
}

/// Grey level of [`SynthContent::Flat`] slides.
pub const FLAT_LUMA: Coeff = 180;

/// Shape and content of a synthetic slide.
#[derive(Debug, Clone)]
pub struct SynthOptions {
    pub block_width: u32,
    pub block_height: u32,
    pub max_scale: u32,
    pub level0_width_in_tiles: u32,
    pub level0_height_in_tiles: u32,
    pub microns_per_pixel: f32,
    /// Scales below this have no tiles at all.
    pub lowest_populated_scale: u32,
    /// `(scale, tile_x, tile_y)` of tiles left out, together with their
    /// descendants.
    pub missing_tiles: Vec<(u32, u32, u32)>,
    pub content: SynthContent,
    pub quantization: u16,
    pub compressor_version: CompressorVersion,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            block_width: 8,
            block_height: 8,
            max_scale: 3,
            level0_width_in_tiles: 8,
            level0_height_in_tiles: 8,
            microns_per_pixel: 0.25,
            lowest_populated_scale: 0,
            missing_tiles: Vec::new(),
            content: SynthContent::Pattern,
            quantization: 1,
            compressor_version: CompressorVersion::V1,
        }
    }
}

/// A generated slide: geometry plus file contents.
#[derive(Debug, Clone)]
pub struct SyntheticSlide {
    pub geometry: PyramidGeometry,
    pub data: Vec<u8>,
}

/// Build a synthetic slide.
pub fn build_synthetic_slide(options: &SynthOptions) -> Result<SyntheticSlide, GeometryError> {
    Builder::new(options).build()
}

struct Builder<'a> {
    options: &'a SynthOptions,
    block_len: usize,
    levels: Vec<Level>,
    codeblocks: Vec<Codeblock>,
    chunks: Vec<DataChunk>,
    data: Vec<u8>,
    /// Encoded blobs reused across tiles with identical content.
    flat_cache: HashMap<(Band, u8), Vec<u8>>,
}

impl<'a> Builder<'a> {
    fn new(options: &'a SynthOptions) -> Self {
        Self {
            options,
            block_len: options.block_width as usize * options.block_height as usize,
            levels: Vec::new(),
            codeblocks: Vec::new(),
            chunks: Vec::new(),
            data: SYNTH_MAGIC.to_vec(),
            flat_cache: HashMap::new(),
        }
    }

    fn build(mut self) -> Result<SyntheticSlide, GeometryError> {
        self.build_levels();

        let max_scale = self.options.max_scale;
        let mut anchors = vec![max_scale];
        anchors.extend((0..max_scale).rev().filter(|s| s % 3 == 2));
        // Scales covered by the top chunk never get their own anchor
        let top_floor = max_scale + 1 - levels_in_chunk(max_scale);
        anchors.retain(|&s| s == max_scale || s < top_floor);

        for anchor in anchors {
            let (width, height) = self.grid(anchor);
            for tile_y in 0..height {
                for tile_x in 0..width {
                    if self.exists(anchor, tile_x, tile_y) {
                        self.write_chunk(anchor, tile_x, tile_y)?;
                    }
                }
            }
        }

        let geometry = PyramidGeometry {
            block_width: self.options.block_width,
            block_height: self.options.block_height,
            levels: self.levels,
            codeblocks: self.codeblocks,
            data_chunks: self.chunks,
            compressor_version: self.options.compressor_version,
        };
        geometry.validate()?;
        Ok(SyntheticSlide {
            geometry,
            data: self.data,
        })
    }

    fn build_levels(&mut self) {
        let options = self.options;
        let tile_px_w = options.block_width as f32 * 2.0;
        let tile_px_h = options.block_height as f32 * 2.0;
        let (mut width, mut height) = (
            options.level0_width_in_tiles.max(1),
            options.level0_height_in_tiles.max(1),
        );

        for scale in 0..=options.max_scale {
            let downsample = (1u64 << scale) as f32;
            self.levels.push(Level {
                scale,
                width_in_tiles: width,
                height_in_tiles: height,
                tile_width_um: tile_px_w * options.microns_per_pixel * downsample,
                tile_height_um: tile_px_h * options.microns_per_pixel * downsample,
                origin_offset: [0.0, 0.0],
                tiles: vec![TileInfo::default(); width as usize * height as usize],
            });
            width = width.div_ceil(2);
            height = height.div_ceil(2);
        }

        // Existence propagates top-down: a missing tile takes its subtree along
        for scale in (0..=options.max_scale).rev() {
            let (width, height) = self.grid(scale);
            for tile_y in 0..height {
                for tile_x in 0..width {
                    let parent_ok = scale == options.max_scale
                        || self.exists(scale + 1, tile_x / 2, tile_y / 2);
                    let exists = parent_ok
                        && scale >= options.lowest_populated_scale
                        && !options.missing_tiles.contains(&(scale, tile_x, tile_y));
                    let index = (tile_y * width + tile_x) as usize;
                    self.levels[scale as usize].tiles[index].exists = exists;
                }
            }
        }
    }

    fn grid(&self, scale: u32) -> (u32, u32) {
        let level = &self.levels[scale as usize];
        (level.width_in_tiles, level.height_in_tiles)
    }

    fn exists(&self, scale: u32, tile_x: u32, tile_y: u32) -> bool {
        self.levels[scale as usize].tile_exists(tile_x as i32, tile_y as i32)
    }

    /// Write one chunk anchored at `(anchor, anchor_x, anchor_y)`.
    fn write_chunk(&mut self, anchor: u32, anchor_x: u32, anchor_y: u32) -> Result<(), GeometryError> {
        let chunk_index = self.chunks.len();
        let levels = levels_in_chunk(anchor);
        let has_ll = anchor == self.options.max_scale;
        let per_color = codeblocks_per_color(levels, has_ll);
        let top_codeblock_index = self.codeblocks.len();
        let chunk_offset = self.data.len() as u64;

        for color in 0..3u8 {
            for index in 0..per_color {
                let is_ll = has_ll && index == per_color - 1;
                let (scale, tile_x, tile_y) = if is_ll {
                    (anchor, anchor_x, anchor_y)
                } else {
                    descendant_for_index(anchor, anchor_x, anchor_y, index)
                };
                debug_assert!(
                    is_ll || codeblock_index_in_chunk(anchor - scale, tile_x, tile_y) == Some(index)
                );

                let band = if is_ll { Band::Ll } else { Band::H };
                let offset = self.data.len() as u64;
                let mut size = 0;
                if self.exists(scale, tile_x, tile_y) {
                    let blob = self
                        .encode(band, scale, tile_x, tile_y, color)
                        .map_err(|e| GeometryError::InvalidChunk {
                            index: chunk_index,
                            reason: e.to_string(),
                        })?;
                    size = blob.len() as u64;
                    self.data.extend_from_slice(&blob);
                }
                self.codeblocks.push(Codeblock {
                    offset,
                    size,
                    scale,
                    color,
                    band,
                    quantization: self.options.quantization,
                });
            }
        }

        self.chunks.push(DataChunk {
            offset: chunk_offset,
            scale: anchor,
            top_codeblock_index,
            codeblock_count_per_color: per_color,
        });

        // Point every covered tile at this chunk
        for depth in 0..levels {
            let scale = anchor - depth;
            let span = 1u32 << depth;
            let (width, height) = self.grid(scale);
            for dy in 0..span {
                for dx in 0..span {
                    let (x, y) = (anchor_x * span + dx, anchor_y * span + dy);
                    if x >= width || y >= height {
                        continue;
                    }
                    let index = (y * width + x) as usize;
                    let tile = &mut self.levels[scale as usize].tiles[index];
                    if tile.exists {
                        tile.data_chunk_index = chunk_index;
                        tile.codeblock_chunk_index = top_codeblock_index;
                    }
                }
            }
        }
        Ok(())
    }

    fn encode(
        &mut self,
        band: Band,
        scale: u32,
        tile_x: u32,
        tile_y: u32,
        color: u8,
    ) -> Result<Vec<u8>, crate::error::CodecError> {
        let options = self.options;
        let (bw, bh) = (options.block_width, options.block_height);

        if options.content == SynthContent::Flat {
            if let Some(blob) = self.flat_cache.get(&(band, color)) {
                return Ok(blob.clone());
            }
            let value = match (band, color) {
                (Band::Ll, 0) => FLAT_LUMA,
                _ => 0,
            };
            let coefficients = vec![value; self.block_len * band.subbands()];
            let blob = compress_codeblock(
                &coefficients,
                bw,
                bh,
                band,
                options.quantization,
                options.compressor_version,
            )?;
            self.flat_cache.insert((band, color), blob.clone());
            return Ok(blob);
        }

        let coefficients: Vec<Coeff> = match band {
            Band::Ll => (0..self.block_len)
                .map(|i| {
                    let gx = tile_x * bw + (i as u32 % bw);
                    let gy = tile_y * bh + (i as u32 / bw);
                    pattern_ll(color, gx, gy)
                })
                .collect(),
            Band::H => (0..self.block_len * 3)
                .map(|i| {
                    let seed = hash(scale * 3 + color as u32, tile_x, tile_y);
                    (hash(seed, i as u32, 0x5EED) % 9) as Coeff - 4
                })
                .collect(),
        };
        let coefficients: Vec<Coeff> = coefficients
            .into_iter()
            .map(|c| c * options.quantization.max(1) as Coeff)
            .collect();
        compress_codeblock(
            &coefficients,
            bw,
            bh,
            band,
            options.quantization,
            options.compressor_version,
        )
    }
}

/// Tile addressed by an H block index within a chunk anchored at the given tile.
fn descendant_for_index(anchor: u32, anchor_x: u32, anchor_y: u32, index: usize) -> (u32, u32, u32) {
    match index {
        0 => (anchor, anchor_x, anchor_y),
        1..=4 => {
            let k = (index - 1) as u32;
            (anchor - 1, anchor_x * 2 + k % 2, anchor_y * 2 + k / 2)
        }
        _ => {
            let k = (index - 5) as u32;
            (anchor - 2, anchor_x * 4 + k % 4, anchor_y * 4 + k / 4)
        }
    }
}

fn pattern_ll(color: u8, gx: u32, gy: u32) -> Coeff {
    match color {
        0 => 64 + ((gx + gy) % 128) as Coeff,
        1 => ((gx / 8) % 32) as Coeff - 16,
        _ => ((gy / 8) % 32) as Coeff - 16,
    }
}

fn hash(a: u32, b: u32, c: u32) -> u32 {
    let mut h = a.wrapping_mul(0x9E37_79B1) ^ b.wrapping_mul(0x85EB_CA77) ^ c.wrapping_mul(0xC2B2_AE3D);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_anchors() {
        let options = SynthOptions {
            max_scale: 4,
            level0_width_in_tiles: 16,
            level0_height_in_tiles: 16,
            ..SynthOptions::default()
        };
        let slide = build_synthetic_slide(&options).unwrap();
        let geometry = &slide.geometry;

        // Top chunk covers scales 4 and 3 (4 % 3 + 1 = 2 levels)
        let top: Vec<_> = geometry.data_chunks.iter().filter(|c| c.scale == 4).collect();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].codeblock_count_per_color, 5 + 1);

        // Scale 2 anchors cover 2, 1, 0
        let lower: Vec<_> = geometry.data_chunks.iter().filter(|c| c.scale == 2).collect();
        assert_eq!(lower.len(), 16);
        assert!(lower.iter().all(|c| c.codeblock_count_per_color == 21));
        assert_eq!(geometry.data_chunks.len(), 17);
    }

    #[test]
    fn test_tiles_point_at_their_chunk() {
        let slide = build_synthetic_slide(&SynthOptions::default()).unwrap();
        let geometry = &slide.geometry;
        let tile = geometry.level(0).unwrap().tile(5, 6).unwrap();
        let chunk = &geometry.data_chunks[tile.data_chunk_index];
        assert_eq!(chunk.scale, 2);
        assert_eq!(chunk.top_codeblock_index, tile.codeblock_chunk_index);

        let index = geometry.h_codeblock_index(0, 5, 6, 1).unwrap();
        let codeblock = &geometry.codeblocks[index];
        assert_eq!(codeblock.scale, 0);
        assert_eq!(codeblock.color, 1);
        assert_eq!(codeblock.band, Band::H);
        assert!(codeblock.size > 0);
    }

    #[test]
    fn test_missing_tile_removes_subtree() {
        let options = SynthOptions {
            missing_tiles: vec![(1, 1, 1)],
            ..SynthOptions::default()
        };
        let slide = build_synthetic_slide(&options).unwrap();
        let geometry = &slide.geometry;
        assert!(!geometry.level(1).unwrap().tile_exists(1, 1));
        for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3)] {
            assert!(!geometry.level(0).unwrap().tile_exists(x, y));
        }
        assert!(geometry.level(0).unwrap().tile_exists(1, 1));
    }

    #[test]
    fn test_lowest_populated_scale() {
        let options = SynthOptions {
            lowest_populated_scale: 2,
            ..SynthOptions::default()
        };
        let slide = build_synthetic_slide(&options).unwrap();
        let geometry = &slide.geometry;
        assert_eq!(geometry.level(0).unwrap().existing_tile_count(), 0);
        assert_eq!(geometry.level(1).unwrap().existing_tile_count(), 0);
        assert_eq!(geometry.level(2).unwrap().existing_tile_count(), 4);
    }

    #[test]
    fn test_file_starts_with_magic_and_covers_codeblocks() {
        let slide = build_synthetic_slide(&SynthOptions::default()).unwrap();
        assert_eq!(&slide.data[..8], SYNTH_MAGIC);
        for index in 0..slide.geometry.data_chunks.len() {
            let (offset, len) = slide.geometry.chunk_byte_range(index).unwrap();
            assert!(offset as usize + len <= slide.data.len());
        }
    }

    #[test]
    fn test_flat_content_reuses_blobs() {
        let options = SynthOptions {
            content: SynthContent::Flat,
            ..SynthOptions::default()
        };
        let slide = build_synthetic_slide(&options).unwrap();
        let sizes: Vec<u64> = slide
            .geometry
            .codeblocks
            .iter()
            .filter(|c| c.band == Band::H && c.size > 0)
            .map(|c| c.size)
            .collect();
        assert!(sizes.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_compressor_version_recorded_in_geometry() {
        let options = SynthOptions {
            compressor_version: CompressorVersion::V2,
            ..SynthOptions::default()
        };
        let slide = build_synthetic_slide(&options).unwrap();
        assert_eq!(slide.geometry.compressor_version, CompressorVersion::V2);

        let json = slide.geometry.to_json().unwrap();
        assert!(json.contains("\"compressor_version\": \"2\""));
    }
}
