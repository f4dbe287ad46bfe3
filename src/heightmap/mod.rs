// Heightmap terrain data
//
// A tile's elevation lives in one of two representations: the raw decoded
// sample grid, or the materialized mesh the tessellator builds from it.
// Exactly one is retained at a time; building the mesh consumes the grid.
// Interpolation and upsampling work over whichever representation is
// present, in the same raw encoded height domain.

pub mod codec;
pub mod mesh;
pub mod structure;
pub mod tile;
pub mod upsample;

pub use codec::{decode_height, encode_height};
pub use mesh::{BoundingSphere, MeshEncoding, TerrainMesh, TessellationInput, Tessellator};
pub use structure::{ElementKind, HeightmapStructure};
pub use tile::{HeightmapTile, TileBacking};
pub use upsample::upsample_from_parent;
