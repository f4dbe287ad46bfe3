// Quad-tree addressing for the planetary terrain surface
//
// Tiles are addressed two ways: by (x, y, level) coordinates within the
// geographic tiling, and by a quad path (the digit sequence walking from the
// root to the node). The path form is what every cache and state map keys on.

pub mod directory;
pub mod origin;
pub mod path;
pub mod tiling;

pub use directory::{TileDirectory, TileInfo};
pub use origin::{child_corner_bit, Resolution, TileOrigin, TileOriginResolver};
pub use path::QuadPath;
pub use tiling::{GeographicTiling, Rectangle};
