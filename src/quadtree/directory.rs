use crate::quadtree::QuadPath;

/// Directory metadata for one quad-tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileInfo {
    /// The node stores its own elevation payload.
    pub has_own_terrain: bool,
    /// Some ancestor of the node stores an elevation payload.
    pub ancestor_has_terrain: bool,
    /// Version of the stored payload, used to address the fetch.
    pub terrain_version: i32,
    /// Directory-reported per-child availability bits (SW=0, SE=1, NW=2,
    /// NE=3). Only trustworthy on nodes that store their own payload.
    pub child_mask: u8,
}

/// Read access to the quad-tree directory metadata.
///
/// The directory format itself is parsed elsewhere; the request path only
/// needs per-node lookups. `None` means the directory has no entry for the
/// node at all.
pub trait TileDirectory: Send + Sync {
    fn tile_info(&self, path: &QuadPath) -> Option<TileInfo>;
}
