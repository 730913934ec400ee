//! Per-tile wavelet reconstruction.
//!
//! ```text
//!          3x3 neighbourhood (LL + H per channel)
//!                       │
//!                       ▼  pad by 2 coefficients, mirror missing neighbours
//!        interleaved (2bw + 8) x (2bh + 8) canvas per channel
//!                       │
//!                       ▼  inverse 5/3, rows then columns
//!               crop centre 2bw x 2bh
//!              ┌────────┴─────────┐
//!              ▼                  ▼
//!     quadrants donated      YCoCg -> RGB8
//!     as children's LL       to the sink
//! ```
//!
//! A tile is reconstructable once it and every existing neighbour hold both
//! LL and H coefficients. After reconstruction, tiles whose whole existing
//! neighbourhood is loaded give their coefficient buffers back to the pools.

use parking_lot::MutexGuard;
use tracing::info;

use crate::codec::{convert_to_rgb, inverse_53_2d, Coeff};
use crate::error::TileError;
use crate::slide::{Slide, TileCoefficients, TileCoord, TileState, NEIGHBORHOOD};

/// Coefficients borrowed from each neighbour on every side.
pub const IDWT_PAD: usize = 2;

/// Position of the centre tile in [`NEIGHBORHOOD`].
const CENTER: usize = 4;

/// Interleaved sub-band offsets in the synthesis canvas: LL, HL, LH, HH.
const SUBBAND_OFFSETS: [(usize, usize); 4] = [(0, 0), (1, 0), (0, 1), (1, 1)];

/// Whether a tile and all of its existing neighbours hold LL and H.
pub fn neighborhood_ready(slide: &Slide, coord: TileCoord) -> bool {
    let Some(level) = slide.level(coord.scale) else {
        return false;
    };
    if !level.tile_exists(coord.tile_x, coord.tile_y) {
        return false;
    }
    NEIGHBORHOOD.iter().all(|&(_, dx, dy)| {
        let (x, y) = (coord.tile_x + dx, coord.tile_y + dy);
        !level.tile_exists(x, y)
            || slide
                .tile_state(coord.scale, x, y)
                .is_some_and(|t| t.has_ll() && t.has_h())
    })
}

/// Reconstruct a tile, donate LL to its children and mark it loaded.
///
/// Returns the interleaved RGB8 pixels. Errors leave the tile unloaded and
/// every other tile's buffers untouched.
pub fn load_tile(slide: &Slide, coord: TileCoord) -> Result<Vec<u8>, TileError> {
    let geometry = slide.geometry();
    let state = slide
        .tile_state(coord.scale, coord.tile_x, coord.tile_y)
        .filter(|t| t.exists())
        .ok_or(TileError::NoSuchTile {
            scale: coord.scale,
            tile_x: coord.tile_x.max(0) as u32,
            tile_y: coord.tile_y.max(0) as u32,
        })?;
    let bw = geometry.block_width as usize;
    let bh = geometry.block_height as usize;

    let planes = synthesize(slide, coord, bw, bh)?;

    if coord.scale > 0 {
        donate_to_children(slide, coord, &planes, bw, bh)?;
    }

    let mut pixels = Vec::new();
    convert_to_rgb(&planes[0], &planes[1], &planes[2], &mut pixels);

    if state.mark_loaded() {
        if let Some(level) = slide.level_state(coord.scale) {
            if level.record_loaded() {
                info!(
                    scale = coord.scale,
                    tiles = level.existing_tiles(),
                    "Level fully loaded"
                );
            }
        }
    }

    for &(_, dx, dy) in NEIGHBORHOOD.iter() {
        retire_if_done(
            slide,
            TileCoord::new(coord.scale, coord.tile_x + dx, coord.tile_y + dy),
        );
    }
    Ok(pixels)
}

/// Release a loaded tile's coefficients once its whole existing
/// neighbourhood is loaded and nothing can read them any more.
pub(crate) fn retire_if_done(slide: &Slide, coord: TileCoord) {
    let Some(level) = slide.level(coord.scale) else {
        return;
    };
    let Some(state) = slide
        .tile_state(coord.scale, coord.tile_x, coord.tile_y)
        .filter(|t| t.exists() && t.is_loaded())
    else {
        return;
    };
    if !state.has_ll() && !state.has_h() {
        return;
    }
    let neighbourhood_loaded = NEIGHBORHOOD.iter().all(|&(_, dx, dy)| {
        let (x, y) = (coord.tile_x + dx, coord.tile_y + dy);
        !level.tile_exists(x, y)
            || slide
                .tile_state(coord.scale, x, y)
                .is_some_and(|t| t.is_loaded())
    });
    if neighbourhood_loaded {
        slide.release_tile_coefficients(state);
    }
}

fn missing(coord: TileCoord, position: usize) -> TileError {
    if position == CENTER {
        return TileError::MissingCoefficients {
            scale: coord.scale,
            tile_x: coord.tile_x as u32,
            tile_y: coord.tile_y as u32,
        };
    }
    let (_, dx, dy) = NEIGHBORHOOD[position];
    TileError::MissingNeighbor {
        scale: coord.scale,
        neighbor_x: (coord.tile_x + dx) as u32,
        neighbor_y: (coord.tile_y + dy) as u32,
    }
}

/// Run the inverse wavelet for all three channels and return the cropped
/// `2bw x 2bh` Y, Co, Cg planes.
fn synthesize(
    slide: &Slide,
    coord: TileCoord,
    bw: usize,
    bh: usize,
) -> Result<[Vec<i32>; 3], TileError> {
    let level = slide.level(coord.scale).ok_or_else(|| missing(coord, CENTER))?;

    let mut states: [Option<&TileState>; 9] = [None; 9];
    for (position, &(_, dx, dy)) in NEIGHBORHOOD.iter().enumerate() {
        let (x, y) = (coord.tile_x + dx, coord.tile_y + dy);
        if level.tile_exists(x, y) {
            states[position] = slide.tile_state(coord.scale, x, y);
        }
    }
    for (position, state) in states.iter().enumerate() {
        match state {
            Some(t) if t.has_ll() && t.has_h() => {}
            Some(_) => return Err(missing(coord, position)),
            None if position == CENTER => return Err(missing(coord, position)),
            None => {}
        }
    }

    let block_len = bw * bh;
    let canvas_w = 2 * (bw + 2 * IDWT_PAD);
    let canvas_h = 2 * (bh + 2 * IDWT_PAD);
    let mut canvases: [Vec<i32>; 3] = std::array::from_fn(|_| vec![0; canvas_w * canvas_h]);

    {
        // Raster order keeps lock acquisition consistent across workers
        let guards: Vec<Option<MutexGuard<'_, TileCoefficients>>> = states
            .iter()
            .map(|state| state.map(|t| t.coefficients()))
            .collect();

        for (color, canvas) in canvases.iter_mut().enumerate() {
            for (band, &(ox, oy)) in SUBBAND_OFFSETS.iter().enumerate() {
                let mut sources: [Option<&[Coeff]>; 9] = [None; 9];
                for (position, guard) in guards.iter().enumerate() {
                    let Some(guard) = guard else {
                        continue;
                    };
                    let channel = &guard.channels[color];
                    let slice = if band == 0 {
                        channel.ll.as_deref()
                    } else {
                        channel
                            .h
                            .as_deref()
                            .map(|h| &h[(band - 1) * block_len..band * block_len])
                    };
                    sources[position] = Some(slice.ok_or_else(|| missing(coord, position))?);
                }
                fill_subband(canvas, canvas_w, &sources, bw, bh, ox, oy);
            }
        }
    }

    let tile_w = 2 * bw;
    let tile_h = 2 * bh;
    let crop = 2 * IDWT_PAD;
    let mut planes: [Vec<i32>; 3] = Default::default();
    for (canvas, plane) in canvases.iter_mut().zip(planes.iter_mut()) {
        inverse_53_2d(canvas, canvas_w, canvas_h);
        plane.reserve_exact(tile_w * tile_h);
        for y in 0..tile_h {
            let row = (y + crop) * canvas_w + crop;
            plane.extend_from_slice(&canvas[row..row + tile_w]);
        }
    }
    Ok(planes)
}

/// Write one padded sub-band into its interleaved slots of the canvas.
fn fill_subband(
    canvas: &mut [i32],
    canvas_w: usize,
    sources: &[Option<&[Coeff]>; 9],
    bw: usize,
    bh: usize,
    ox: usize,
    oy: usize,
) {
    let Some(center) = sources[CENTER] else {
        return;
    };
    let pad = IDWT_PAD as isize;
    for cy in 0..bh + 2 * IDWT_PAD {
        let ty = cy as isize - pad;
        let (dy, sy) = split(ty, bh);
        for cx in 0..bw + 2 * IDWT_PAD {
            let tx = cx as isize - pad;
            let (dx, sx) = split(tx, bw);
            let position = ((dy + 1) * 3 + dx + 1) as usize;
            let value = match sources[position] {
                Some(source) => source[sy * bw + sx],
                None => center[mirror(ty, bh) * bw + mirror(tx, bw)],
            };
            canvas[(2 * cy + oy) * canvas_w + 2 * cx + ox] = value as i32;
        }
    }
}

/// Split a padded coordinate into a neighbour offset and a coordinate inside
/// that neighbour.
#[inline]
fn split(c: isize, n: usize) -> (isize, usize) {
    let n = n as isize;
    if c < 0 {
        (-1, (c + n) as usize)
    } else if c >= n {
        (1, (c - n) as usize)
    } else {
        (0, c as usize)
    }
}

/// Whole-sample mirror of a padded coordinate into `0..n`.
#[inline]
fn mirror(c: isize, n: usize) -> usize {
    let n = n as isize;
    let m = if c < 0 {
        -c
    } else if c >= n {
        2 * (n - 1) - c
    } else {
        c
    };
    m as usize
}

/// Hand each existing child the quadrant of the reconstruction it covers as
/// its LL coefficients.
fn donate_to_children(
    slide: &Slide,
    coord: TileCoord,
    planes: &[Vec<i32>; 3],
    bw: usize,
    bh: usize,
) -> Result<(), TileError> {
    let child_scale = coord.scale - 1;
    let tile_w = 2 * bw;

    for qy in 0..2usize {
        for qx in 0..2usize {
            let child_x = coord.tile_x * 2 + qx as i32;
            let child_y = coord.tile_y * 2 + qy as i32;
            let Some(child) = slide
                .tile_state(child_scale, child_x, child_y)
                .filter(|t| t.exists())
            else {
                continue;
            };
            if child.has_ll() {
                continue;
            }

            let mut blocks = Vec::with_capacity(3);
            for plane in planes {
                let mut block = match slide.ll_pool().acquire() {
                    Ok(block) => block,
                    Err(e) => {
                        for block in blocks {
                            slide.ll_pool().release(block);
                        }
                        return Err(e.into());
                    }
                };
                for j in 0..bh {
                    let start = (qy * bh + j) * tile_w + qx * bw;
                    let row = &plane[start..start + bw];
                    for (dst, &value) in block[j * bw..(j + 1) * bw].iter_mut().zip(row) {
                        *dst = value.clamp(Coeff::MIN as i32, Coeff::MAX as i32) as Coeff;
                    }
                }
                blocks.push(block);
            }

            let mut coefficients = child.coefficients();
            for (channel, block) in coefficients.channels.iter_mut().zip(blocks) {
                if let Some(old) = channel.ll.replace(block) {
                    slide.ll_pool().release(old);
                }
            }
            child.set_has_ll(true);
        }
    }
    Ok(())
}
