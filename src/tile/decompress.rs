//! Per-tile codeblock decompression.
//!
//! Decodes a tile's three H codeblocks (and, for top-chunk anchor tiles, its
//! three LL codeblocks) out of a resident chunk buffer into pooled
//! coefficient blocks. On any failure every block acquired so far goes back
//! to its pool and the tile's state is left untouched.

use bytes::Bytes;

use super::allocator::{BlockAllocator, CoeffBlock};
use crate::codec::{decompress_codeblock, Band};
use crate::error::{CodecError, TileError};
use crate::slide::{Codeblock, PyramidGeometry, Slide, TileCoord};

/// Decompress a tile's H coefficients from its resident chunk.
///
/// Tiles at the anchor scale of a top chunk also get their LL coefficients
/// when they lack them. Returns `Ok(false)` if the chunk is not resident.
pub fn decompress_h_coeff_for_tile(slide: &Slide, coord: TileCoord) -> Result<bool, TileError> {
    let tile = tile_info(slide, coord)?;
    let Some(chunk) = slide.chunks().get(tile.data_chunk_index) else {
        return Ok(false);
    };
    decompress_tile_from_chunk(slide, coord, &chunk, true)?;
    Ok(true)
}

/// Decompress a tile's missing coefficients from the given chunk buffer.
///
/// H coefficients are decoded if the tile lacks them; LL coefficients are
/// decoded if `include_ll` is set, the tile lacks them, and its chunk stores
/// an LL block for it.
pub(crate) fn decompress_tile_from_chunk(
    slide: &Slide,
    coord: TileCoord,
    chunk: &Bytes,
    include_ll: bool,
) -> Result<(), TileError> {
    let tile = tile_info(slide, coord)?;
    let state = slide
        .tile_state(coord.scale, coord.tile_x, coord.tile_y)
        .ok_or_else(|| no_such_tile(coord))?;
    let geometry = slide.geometry();
    let chunk_offset = geometry
        .data_chunks
        .get(tile.data_chunk_index)
        .map(|c| c.offset)
        .ok_or(TileError::ChunkNotResident(tile.data_chunk_index))?;

    let want_h = !state.has_h();
    let want_ll = include_ll
        && !state.has_ll()
        && geometry
            .ll_codeblock_index(coord.scale, coord.tile_x, coord.tile_y, 0)
            .is_some();

    let mut h_blocks = Vec::new();
    if want_h {
        let indices = (0..3).map(|color| {
            geometry.h_codeblock_index(coord.scale, coord.tile_x, coord.tile_y, color)
        });
        h_blocks = decode_channels(slide, slide.h_pool(), chunk, chunk_offset, indices, Band::H)
            .map_err(|e| log_context(e, coord))?;
    }

    let mut ll_blocks = Vec::new();
    if want_ll {
        let indices = (0..3).map(|color| {
            geometry.ll_codeblock_index(coord.scale, coord.tile_x, coord.tile_y, color)
        });
        match decode_channels(slide, slide.ll_pool(), chunk, chunk_offset, indices, Band::Ll) {
            Ok(blocks) => ll_blocks = blocks,
            Err(e) => {
                release_all(slide.h_pool(), h_blocks);
                return Err(log_context(e, coord));
            }
        }
    }

    {
        let mut coefficients = state.coefficients();
        for (channel, block) in coefficients.channels.iter_mut().zip(h_blocks) {
            if let Some(old) = channel.h.replace(block) {
                slide.h_pool().release(old);
            }
        }
        for (channel, block) in coefficients.channels.iter_mut().zip(ll_blocks) {
            if let Some(old) = channel.ll.replace(block) {
                slide.ll_pool().release(old);
            }
        }
        if want_h {
            state.set_has_h(true);
        }
        if want_ll {
            state.set_has_ll(true);
        }
    }
    Ok(())
}

fn tile_info(slide: &Slide, coord: TileCoord) -> Result<crate::slide::TileInfo, TileError> {
    slide
        .level(coord.scale)
        .and_then(|level| level.tile(coord.tile_x, coord.tile_y))
        .filter(|tile| tile.exists)
        .copied()
        .ok_or_else(|| no_such_tile(coord))
}

fn no_such_tile(coord: TileCoord) -> TileError {
    TileError::NoSuchTile {
        scale: coord.scale,
        tile_x: coord.tile_x.max(0) as u32,
        tile_y: coord.tile_y.max(0) as u32,
    }
}

fn log_context(error: TileError, coord: TileCoord) -> TileError {
    tracing::debug!(
        scale = coord.scale,
        tile_x = coord.tile_x,
        tile_y = coord.tile_y,
        error = %error,
        "Codeblock decompression failed"
    );
    error
}

/// Decode one codeblock per colour channel into blocks from `pool`.
fn decode_channels(
    slide: &Slide,
    pool: &BlockAllocator,
    chunk: &[u8],
    chunk_offset: u64,
    indices: impl Iterator<Item = Option<usize>>,
    band: Band,
) -> Result<Vec<CoeffBlock>, TileError> {
    let geometry = slide.geometry();
    let mut blocks = Vec::with_capacity(3);

    for index in indices {
        let result = index
            .and_then(|i| geometry.codeblocks.get(i))
            .ok_or_else(|| {
                TileError::Codec(CodecError::InvalidHeader(
                    "codeblock missing from table".to_string(),
                ))
            })
            .and_then(|codeblock| {
                let mut block = pool.acquire()?;
                match decode_one(chunk, chunk_offset, codeblock, geometry, band, &mut block) {
                    Ok(()) => Ok(block),
                    Err(e) => {
                        pool.release(block);
                        Err(e.into())
                    }
                }
            });

        match result {
            Ok(block) => blocks.push(block),
            Err(e) => {
                release_all(pool, blocks);
                return Err(e);
            }
        }
    }
    Ok(blocks)
}

fn decode_one(
    chunk: &[u8],
    chunk_offset: u64,
    codeblock: &Codeblock,
    geometry: &PyramidGeometry,
    band: Band,
    out: &mut [crate::codec::Coeff],
) -> Result<(), CodecError> {
    let bytes = codeblock_bytes(chunk, chunk_offset, codeblock)?;
    decompress_codeblock(
        bytes,
        geometry.block_width,
        geometry.block_height,
        band,
        codeblock.quantization,
        geometry.compressor_version,
        out,
    )
}

/// The slice of a chunk buffer holding one codeblock.
fn codeblock_bytes<'a>(
    chunk: &'a [u8],
    chunk_offset: u64,
    codeblock: &Codeblock,
) -> Result<&'a [u8], CodecError> {
    let out_of_chunk = || CodecError::OutOfChunk {
        offset: codeblock.offset,
        size: codeblock.size,
        chunk_len: chunk.len(),
    };
    let start = codeblock
        .offset
        .checked_sub(chunk_offset)
        .ok_or_else(out_of_chunk)? as usize;
    let end = start
        .checked_add(codeblock.size as usize)
        .ok_or_else(out_of_chunk)?;
    chunk.get(start..end).ok_or_else(out_of_chunk)
}

fn release_all(pool: &BlockAllocator, blocks: Vec<CoeffBlock>) {
    for block in blocks {
        pool.release(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::StreamerConfig;
    use crate::io::MemoryRangeReader;
    use crate::slide::{build_synthetic_slide, SynthOptions};
    use crate::tile::CollectingSink;

    fn open(data: Vec<u8>, options: &SynthOptions) -> Arc<Slide> {
        let synthetic = build_synthetic_slide(options).unwrap();
        let data = if data.is_empty() { synthetic.data } else { data };
        Slide::open(
            0,
            synthetic.geometry,
            Box::new(MemoryRangeReader::new(data, "mem://test")),
            Arc::new(CollectingSink::new()),
            &StreamerConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_codeblock_bytes_bounds() {
        let chunk = [0u8; 10];
        let codeblock = Codeblock {
            offset: 104,
            size: 4,
            scale: 0,
            color: 0,
            band: Band::H,
            quantization: 1,
        };
        assert_eq!(codeblock_bytes(&chunk, 100, &codeblock).unwrap().len(), 4);
        assert!(codeblock_bytes(&chunk, 106, &codeblock).is_err());
        let too_long = Codeblock { size: 8, ..codeblock };
        assert!(matches!(
            codeblock_bytes(&chunk, 100, &too_long),
            Err(CodecError::OutOfChunk { chunk_len: 10, .. })
        ));
    }

    #[test]
    fn test_not_resident_returns_false() {
        let slide = open(Vec::new(), &SynthOptions::default());
        let coord = TileCoord::new(0, 0, 0);
        assert!(!decompress_h_coeff_for_tile(&slide, coord).unwrap());
    }

    #[test]
    fn test_decompress_h_for_resident_chunk() {
        let slide = open(Vec::new(), &SynthOptions::default());
        let coord = TileCoord::new(1, 2, 3);
        let chunk_index = slide.level(1).unwrap().tile(2, 3).unwrap().data_chunk_index;
        slide.load_chunk(chunk_index).unwrap();

        assert!(decompress_h_coeff_for_tile(&slide, coord).unwrap());
        let state = slide.tile_state(1, 2, 3).unwrap();
        assert!(state.has_h());
        assert!(!state.has_ll());
        assert_eq!(slide.h_pool().outstanding(), 3);
        assert_eq!(slide.ll_pool().outstanding(), 0);
    }

    #[test]
    fn test_top_tile_gets_ll() {
        let slide = open(Vec::new(), &SynthOptions::default());
        let chunk_index = slide.level(3).unwrap().tile(0, 0).unwrap().data_chunk_index;
        slide.load_chunk(chunk_index).unwrap();

        decompress_h_coeff_for_tile(&slide, TileCoord::new(3, 0, 0)).unwrap();
        let state = slide.tile_state(3, 0, 0).unwrap();
        assert!(state.has_h());
        assert!(state.has_ll());
        assert_eq!(slide.ll_pool().outstanding(), 3);
    }

    #[test]
    fn test_corrupt_codeblock_releases_buffers() {
        let options = SynthOptions::default();
        let synthetic = build_synthetic_slide(&options).unwrap();
        let geometry = synthetic.geometry.clone();
        let mut data = synthetic.data.clone();

        // Clobber the header of the Cg H codeblock of tile (0, 0) at scale 0
        let index = geometry.h_codeblock_index(0, 0, 0, 2).unwrap();
        let offset = geometry.codeblocks[index].offset as usize;
        data[offset..offset + 4].copy_from_slice(&[0xFF; 4]);

        let slide = open(data, &options);
        let chunk_index = slide.level(0).unwrap().tile(0, 0).unwrap().data_chunk_index;
        slide.load_chunk(chunk_index).unwrap();

        let err = decompress_h_coeff_for_tile(&slide, TileCoord::new(0, 0, 0)).unwrap_err();
        assert!(matches!(err, TileError::Codec(CodecError::LengthMismatch { .. })));
        assert!(!slide.tile_state(0, 0, 0).unwrap().has_h());
        assert_eq!(slide.h_pool().outstanding(), 0);
    }

    #[test]
    fn test_v2_slide_decodes() {
        let options = SynthOptions {
            compressor_version: crate::codec::CompressorVersion::V2,
            ..SynthOptions::default()
        };
        let slide = open(Vec::new(), &options);
        let chunk_index = slide.level(3).unwrap().tile(0, 0).unwrap().data_chunk_index;
        slide.load_chunk(chunk_index).unwrap();

        assert!(decompress_h_coeff_for_tile(&slide, TileCoord::new(3, 0, 0)).unwrap());
        let state = slide.tile_state(3, 0, 0).unwrap();
        assert!(state.has_h());
        assert!(state.has_ll());
    }

    #[test]
    fn test_missing_tile_is_rejected() {
        let options = SynthOptions {
            missing_tiles: vec![(0, 1, 1)],
            ..SynthOptions::default()
        };
        let slide = open(Vec::new(), &options);
        let err = decompress_h_coeff_for_tile(&slide, TileCoord::new(0, 1, 1)).unwrap_err();
        assert!(matches!(err, TileError::NoSuchTile { .. }));
    }
}
