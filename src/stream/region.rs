//! Per-scale load regions and tile requirements.
//!
//! A load region is the padded tile-grid box the scheduler looks at on one
//! scale. Every tile in it carries a [`TileRequirement`] describing what the
//! current pass wants from it.
//!
//! ```text
//!   scale s+1      ┌───────────────┐   escalate: a tile that needs LL
//!                  │   ▲ parent    │   marks its parent for full loading
//!                  └───┼───────────┘
//!   scale s    ┌───────┼──────────────────┐
//!              │ pad   │                  │
//!              │   ┌───┴────────┐         │
//!              │   │  visible   │         │
//!              │   └────────────┘         │
//!              └──────────────────────────┘
//! ```

use super::viewport::{Bounds2i, Viewport};
use crate::slide::{
    adjacent_tiles_mask_only_existing, opposite_bit, parent_edge_mask, Level, Slide, ADJ_ALL,
    NEIGHBORHOOD,
};

/// What a pass wants from one tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileRequirement {
    /// Neighbourhood edges whose coefficients must be valid.
    pub need_ll_edges_mask: u32,
    /// Reconstruct and display the tile.
    pub want_full_load: bool,
    /// Reconstruct the tile so its children receive LL.
    pub want_partial_load: bool,
    pub need_h: bool,
    pub need_ll: bool,
}

/// The tiles considered on one scale during a pass.
#[derive(Debug, Clone)]
pub struct LoadRegion {
    pub scale: u32,
    /// Padded bounds, clipped to the level grid.
    pub bounds: Bounds2i,
    /// Visible bounds, always inside `bounds`.
    pub visible: Bounds2i,
    requirements: Vec<TileRequirement>,
}

impl LoadRegion {
    /// Build the region of `level` for a viewport.
    ///
    /// Returns `None` when nothing of the level is visible.
    pub fn new(level: &Level, viewport: &Viewport, padding: i32) -> Option<Self> {
        let visible = viewport.visible_tiles(level);
        if visible.is_empty() {
            return None;
        }
        let bounds = visible.pad(padding).clip(&Bounds2i::of_level(level));
        let len = bounds.width() as usize * bounds.height() as usize;
        Some(Self {
            scale: level.scale,
            bounds,
            visible,
            requirements: vec![TileRequirement::default(); len],
        })
    }

    fn local_index(&self, tile_x: i32, tile_y: i32) -> Option<usize> {
        if !self.bounds.contains(tile_x, tile_y) {
            return None;
        }
        let local_x = (tile_x - self.bounds.min_x) as usize;
        let local_y = (tile_y - self.bounds.min_y) as usize;
        Some(local_y * self.bounds.width() as usize + local_x)
    }

    pub fn contains(&self, tile_x: i32, tile_y: i32) -> bool {
        self.bounds.contains(tile_x, tile_y)
    }

    pub fn get(&self, tile_x: i32, tile_y: i32) -> Option<&TileRequirement> {
        self.local_index(tile_x, tile_y)
            .map(|i| &self.requirements[i])
    }

    pub fn get_mut(&mut self, tile_x: i32, tile_y: i32) -> Option<&mut TileRequirement> {
        self.local_index(tile_x, tile_y)
            .map(|i| &mut self.requirements[i])
    }

    /// Every tile of the region with its requirement, in raster order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32, &TileRequirement)> + '_ {
        self.bounds
            .iter()
            .zip(self.requirements.iter())
            .map(|((x, y), req)| (x, y, req))
    }

    /// Mark a tile for reconstruction and require its existing neighbours'
    /// coefficients.
    ///
    /// Each neighbour records the edge facing the tile in its edge mask.
    pub fn mark_for_full_loading(&mut self, level: &Level, tile_x: i32, tile_y: i32) {
        let adjacent = adjacent_tiles_mask_only_existing(level, tile_x, tile_y);
        if let Some(req) = self.get_mut(tile_x, tile_y) {
            req.want_full_load = true;
            req.want_partial_load = true;
            req.need_ll = true;
            req.need_h = true;
            req.need_ll_edges_mask = ADJ_ALL;
        }

        for &(bit, dx, dy) in NEIGHBORHOOD.iter() {
            if (dx, dy) == (0, 0) || adjacent & bit == 0 {
                continue;
            }
            if let Some(req) = self.get_mut(tile_x + dx, tile_y + dy) {
                req.need_ll = true;
                req.need_h = true;
                req.need_ll_edges_mask |= opposite_bit(dx, dy);
            }
        }
    }
}

/// Push LL requirements of `child` one scale up into `parent`.
///
/// Every existing tile that needs LL but has neither LL nor pixels gets its
/// parent marked for full loading; the parent inherits the child's edge
/// requirements narrowed to the edges outside the shared area. Returns the
/// number of tiles escalated.
pub fn escalate_ll_requirements(slide: &Slide, child: &LoadRegion, parent: &mut LoadRegion) -> usize {
    let Some(parent_level) = slide.level(parent.scale) else {
        return 0;
    };
    let mut escalated = 0;

    for (tile_x, tile_y, req) in child.iter() {
        if !req.need_ll {
            continue;
        }
        let Some(state) = slide
            .tile_state(child.scale, tile_x, tile_y)
            .filter(|t| t.exists())
        else {
            continue;
        };
        if state.has_ll() || state.is_loaded() {
            continue;
        }

        let (parent_x, parent_y) = (tile_x / 2, tile_y / 2);
        if !parent.contains(parent_x, parent_y) {
            tracing::debug!(
                scale = parent.scale,
                tile_x = parent_x,
                tile_y = parent_y,
                "Parent outside load region"
            );
            continue;
        }
        parent.mark_for_full_loading(parent_level, parent_x, parent_y);
        if let Some(parent_req) = parent.get_mut(parent_x, parent_y) {
            parent_req.need_ll_edges_mask |=
                parent_edge_mask(req.need_ll_edges_mask, tile_x, tile_y);
        }
        escalated += 1;
    }
    escalated
}
