use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Geographic rectangle in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Rectangle {
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Longitude span.
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Latitude span.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn contains(&self, longitude: f64, latitude: f64) -> bool {
        longitude >= self.west
            && longitude <= self.east
            && latitude >= self.south
            && latitude <= self.north
    }
}

/// Quad-tree tiling of a geographic rectangle.
///
/// One root tile covers the whole surface rectangle; every level doubles the
/// tile count per axis. Tile y counts from the south edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeographicTiling {
    rectangle: Rectangle,
}

impl GeographicTiling {
    pub fn new(rectangle: Rectangle) -> Self {
        Self { rectangle }
    }

    /// The full surface rectangle at the root.
    pub fn rectangle(&self) -> Rectangle {
        self.rectangle
    }

    /// Tiles per axis at `level`.
    pub fn tiles_at_level(&self, level: u32) -> u32 {
        1 << level
    }

    /// Geographic rectangle of tile (x, y) at `level`.
    pub fn tile_rectangle(&self, x: u32, y: u32, level: u32) -> Rectangle {
        let tiles = f64::from(self.tiles_at_level(level));
        let tile_width = self.rectangle.width() / tiles;
        let tile_height = self.rectangle.height() / tiles;
        let west = self.rectangle.west + f64::from(x) * tile_width;
        let south = self.rectangle.south + f64::from(y) * tile_height;
        Rectangle::new(west, south, west + tile_width, south + tile_height)
    }
}

impl Default for GeographicTiling {
    fn default() -> Self {
        Self::new(Rectangle::new(-PI, -PI / 2.0, PI, PI / 2.0))
    }
}
