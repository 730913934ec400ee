//! Viewport description and world-to-tile bounds conversion.
//!
//! World coordinates are micrometres on the slide; every level maps them to
//! its own tile grid through its physical tile size and origin offset.

use crate::slide::Level;

/// Integer tile bounds, `min` inclusive and `max` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds2i {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Bounds2i {
    pub fn new(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounds covering a whole level grid.
    pub fn of_level(level: &Level) -> Self {
        Self::new(0, 0, level.width_in_tiles as i32, level.height_in_tiles as i32)
    }

    pub fn width(&self) -> i32 {
        (self.max_x - self.min_x).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.max_y - self.min_y).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    /// Intersection with `other`. Disjoint bounds collapse to an empty box.
    pub fn clip(&self, other: &Bounds2i) -> Self {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        Self {
            min_x,
            min_y,
            max_x: self.max_x.min(other.max_x).max(min_x),
            max_y: self.max_y.min(other.max_y).max(min_y),
        }
    }

    /// Grow by `amount` tiles on every side.
    pub fn pad(&self, amount: i32) -> Self {
        Self::new(
            self.min_x - amount,
            self.min_y - amount,
            self.max_x + amount,
            self.max_y + amount,
        )
    }

    /// Tile coordinates in raster order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32)> {
        let (min_x, max_x) = (self.min_x, self.max_x);
        (self.min_y..self.max_y).flat_map(move |y| (min_x..max_x).map(move |x| (x, y)))
    }
}

/// Floating-point world bounds in micrometres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds2f {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl Bounds2f {
    pub fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min: [min_x, min_y],
            max: [max_x, max_y],
        }
    }

    pub fn center(&self) -> [f32; 2] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
        ]
    }
}

/// Convert world bounds to the tiles they touch on a grid.
///
/// Partially covered tiles are included.
pub fn world_bounds_to_tile_bounds(
    bounds: &Bounds2f,
    tile_width_um: f32,
    tile_height_um: f32,
    origin_offset: [f32; 2],
) -> Bounds2i {
    Bounds2i::new(
        ((bounds.min[0] - origin_offset[0]) / tile_width_um).floor() as i32,
        ((bounds.min[1] - origin_offset[1]) / tile_height_um).floor() as i32,
        ((bounds.max[0] - origin_offset[0]) / tile_width_um).ceil() as i32,
        ((bounds.max[1] - origin_offset[1]) / tile_height_um).ceil() as i32,
    )
}

/// What the viewer currently shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Camera centre in world coordinates.
    pub center: [f32; 2],
    /// Visible world bounds.
    pub bounds: Bounds2f,
    /// Scale implied by the current zoom; may be negative when zoomed past
    /// full resolution.
    pub zoom_level: i32,
    /// Optional crop rectangle; nothing outside it is loaded.
    pub crop: Option<Bounds2f>,
}

impl Viewport {
    /// A viewport showing `bounds`, centred on them.
    pub fn new(bounds: Bounds2f, zoom_level: i32) -> Self {
        Self {
            center: bounds.center(),
            bounds,
            zoom_level,
            crop: None,
        }
    }

    /// A viewport of `width x height` micrometres centred on `center`.
    pub fn centered(center: [f32; 2], width: f32, height: f32, zoom_level: i32) -> Self {
        let bounds = Bounds2f::new(
            center[0] - width * 0.5,
            center[1] - height * 0.5,
            center[0] + width * 0.5,
            center[1] + height * 0.5,
        );
        Self {
            center,
            bounds,
            zoom_level,
            crop: None,
        }
    }

    /// A viewport covering a whole level.
    pub fn whole_level(level: &Level, zoom_level: i32) -> Self {
        let [ox, oy] = level.origin_offset;
        Self::new(
            Bounds2f::new(
                ox,
                oy,
                ox + level.width_in_tiles as f32 * level.tile_width_um,
                oy + level.height_in_tiles as f32 * level.tile_height_um,
            ),
            zoom_level,
        )
    }

    pub fn with_crop(mut self, crop: Bounds2f) -> Self {
        self.crop = Some(crop);
        self
    }

    /// Visible tiles of a level, clipped to the level grid and the crop.
    pub fn visible_tiles(&self, level: &Level) -> Bounds2i {
        let to_tiles = |bounds: &Bounds2f| {
            world_bounds_to_tile_bounds(
                bounds,
                level.tile_width_um,
                level.tile_height_um,
                level.origin_offset,
            )
        };
        let mut visible = to_tiles(&self.bounds).clip(&Bounds2i::of_level(level));
        if let Some(crop) = &self.crop {
            visible = visible.clip(&to_tiles(crop));
        }
        visible
    }

    /// Squared distance from the camera centre to a tile's centre.
    pub fn distance_sq_to_tile(&self, level: &Level, tile_x: i32, tile_y: i32) -> f32 {
        let cx = level.origin_offset[0] + (tile_x as f32 + 0.5) * level.tile_width_um;
        let cy = level.origin_offset[1] + (tile_y as f32 + 0.5) * level.tile_height_um;
        let (dx, dy) = (self.center[0] - cx, self.center[1] - cy);
        dx * dx + dy * dy
    }
}
