//! Chunk layout arithmetic and 3x3 adjacency masks.
//!
//! A data chunk is anchored at one tile and stores, per colour, the H
//! codeblocks of that tile and of its descendants down to two levels below:
//!
//! ```text
//! index in chunk   scale in chunk   tiles
//! ──────────────   ──────────────   ───────────────────────────────
//!        0               0          anchor tile
//!      1..=4             1          2x2 children, raster order
//!      5..=20            2          4x4 grandchildren, raster order
//!    last (top only)     0          anchor tile LL block
//! ```

use super::geometry::Level;

// =============================================================================
// Adjacency bits
// =============================================================================

pub const ADJ_TOP_LEFT: u32 = 0x001;
pub const ADJ_TOP_CENTER: u32 = 0x002;
pub const ADJ_TOP_RIGHT: u32 = 0x004;
pub const ADJ_CENTER_LEFT: u32 = 0x008;
pub const ADJ_CENTER: u32 = 0x010;
pub const ADJ_CENTER_RIGHT: u32 = 0x020;
pub const ADJ_BOTTOM_LEFT: u32 = 0x040;
pub const ADJ_BOTTOM_CENTER: u32 = 0x080;
pub const ADJ_BOTTOM_RIGHT: u32 = 0x100;

/// All nine cells of the neighbourhood.
pub const ADJ_ALL: u32 = 0x1FF;

/// The 3x3 neighbourhood in raster order: `(bit, dx, dy)`.
pub const NEIGHBORHOOD: [(u32, i32, i32); 9] = [
    (ADJ_TOP_LEFT, -1, -1),
    (ADJ_TOP_CENTER, 0, -1),
    (ADJ_TOP_RIGHT, 1, -1),
    (ADJ_CENTER_LEFT, -1, 0),
    (ADJ_CENTER, 0, 0),
    (ADJ_CENTER_RIGHT, 1, 0),
    (ADJ_BOTTOM_LEFT, -1, 1),
    (ADJ_BOTTOM_CENTER, 0, 1),
    (ADJ_BOTTOM_RIGHT, 1, 1),
];

/// The bit a neighbour at `(dx, dy)` uses to refer back to the centre tile.
pub fn opposite_bit(dx: i32, dy: i32) -> u32 {
    neighbor_bit(-dx, -dy)
}

/// The bit for the neighbour at `(dx, dy)`, each in `-1..=1`.
pub fn neighbor_bit(dx: i32, dy: i32) -> u32 {
    debug_assert!((-1..=1).contains(&dx) && (-1..=1).contains(&dy));
    1 << ((dy + 1) * 3 + (dx + 1))
}

/// Neighbourhood cells that fall inside the level grid.
pub fn adjacent_tiles_mask(level: &Level, tile_x: i32, tile_y: i32) -> u32 {
    NEIGHBORHOOD
        .iter()
        .filter(|(_, dx, dy)| level.tile_index(tile_x + dx, tile_y + dy).is_some())
        .fold(0, |mask, (bit, _, _)| mask | bit)
}

/// Neighbourhood cells that hold existing tiles.
pub fn adjacent_tiles_mask_only_existing(level: &Level, tile_x: i32, tile_y: i32) -> u32 {
    NEIGHBORHOOD
        .iter()
        .filter(|(_, dx, dy)| level.tile_exists(tile_x + dx, tile_y + dy))
        .fold(0, |mask, (bit, _, _)| mask | bit)
}

/// Narrow a child's edge mask to the edges that can touch its parent's
/// neighbours.
///
/// A child in the top-left quadrant of its parent only borrows from the
/// parent's top-left side; the other quadrants mirror this.
pub fn parent_edge_mask(child_mask: u32, child_x: i32, child_y: i32) -> u32 {
    let left = child_x % 2 == 0;
    let top = child_y % 2 == 0;
    let excluded = match (left, top) {
        (true, true) => {
            ADJ_TOP_RIGHT | ADJ_CENTER_RIGHT | ADJ_BOTTOM_RIGHT | ADJ_BOTTOM_CENTER | ADJ_BOTTOM_LEFT
        }
        (false, true) => {
            ADJ_TOP_LEFT | ADJ_CENTER_LEFT | ADJ_BOTTOM_LEFT | ADJ_BOTTOM_CENTER | ADJ_BOTTOM_RIGHT
        }
        (true, false) => {
            ADJ_TOP_LEFT | ADJ_TOP_CENTER | ADJ_TOP_RIGHT | ADJ_CENTER_RIGHT | ADJ_BOTTOM_RIGHT
        }
        (false, false) => {
            ADJ_TOP_LEFT | ADJ_TOP_CENTER | ADJ_TOP_RIGHT | ADJ_CENTER_LEFT | ADJ_BOTTOM_LEFT
        }
    };
    child_mask & !excluded
}

// =============================================================================
// Chunk layout
// =============================================================================

/// Number of pyramid levels stored in a chunk anchored at `chunk_scale`.
#[inline]
pub fn levels_in_chunk(chunk_scale: u32) -> u32 {
    chunk_scale % 3 + 1
}

/// Codeblocks per colour in a chunk covering `levels` levels.
///
/// Top chunks carry one extra LL block for the anchor tile.
pub fn codeblocks_per_color(levels: u32, has_ll: bool) -> usize {
    let h_blocks = match levels {
        1 => 1,
        2 => 1 + 4,
        _ => 1 + 4 + 16,
    };
    h_blocks + has_ll as usize
}

/// Index of a tile's H block within its chunk's per-colour run.
///
/// `scale_in_chunk` is the distance below the anchor scale; tile coordinates
/// are the tile's own level coordinates.
pub fn codeblock_index_in_chunk(scale_in_chunk: u32, tile_x: u32, tile_y: u32) -> Option<usize> {
    match scale_in_chunk {
        0 => Some(0),
        1 => Some(1 + (tile_y % 2) as usize * 2 + (tile_x % 2) as usize),
        2 => Some(5 + (tile_y % 4) as usize * 4 + (tile_x % 4) as usize),
        _ => None,
    }
}
