//! Quad-tree terrain elevation engine.
//!
//! Retrieves, decodes, caches, and resamples elevation data for a
//! quad-tree-tiled planetary surface. A tile request transparently handles
//! nodes whose elevation is stored at an ancestor, nodes with no elevation
//! at all, and payloads packed as multi-tile packets; the result is a
//! height grid that can be interpolated, handed to a mesh tessellator, and
//! upsampled into child grids.
//!
//! Network transport, directory metadata parsing, and the GPU tessellator
//! are collaborators behind traits; see [`provider::TileFetcher`],
//! [`quadtree::TileDirectory`], and [`heightmap::Tessellator`].

pub mod constants;
pub mod error;
pub mod heightmap;
pub mod provider;
pub mod quadtree;

pub use error::{TerrainError, TerrainResult};
pub use heightmap::{
    ElementKind, HeightmapStructure, HeightmapTile, MeshEncoding, TerrainMesh, Tessellator,
};
pub use provider::{CacheStats, ProviderConfig, TerrainCache, TerrainService, TileFetcher};
pub use quadtree::{
    GeographicTiling, QuadPath, Rectangle, TileDirectory, TileInfo, TileOrigin,
};
