use std::sync::Arc;

use dashmap::DashMap;

use crate::quadtree::{QuadPath, TileDirectory};

/// Where a node's elevation data comes from.
///
/// A node only ever moves from `Unknown` into one of the other states; the
/// single exception is demotion to `Missing` when a fetch for the node
/// fails, so later requests fail fast instead of re-fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrigin {
    /// Not probed yet.
    Unknown,
    /// Confirmed absent at this node and throughout its ancestor chain.
    Missing,
    /// Elevation payload stored at the node itself.
    Local,
    /// Elevation inherited from the nearest ancestor holding a payload.
    Inherited,
}

/// Outcome of resolving a tile request against the directory and the
/// current origin states. Resolution never mutates state; the request
/// coordinator applies transitions when a fetch settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Terminal: no elevation for this node, fail without fetching.
    NotAvailable,
    /// No ancestor carries elevation at all: serve a synthetic constant
    /// tile without touching the network.
    SyntheticFlat,
    /// Fetch (or reuse the in-flight fetch of) the payload stored at
    /// `target`; `origin` is the state the requested node will hold once
    /// the payload lands.
    Fetch {
        target: QuadPath,
        version: i32,
        origin: TileOrigin,
    },
}

/// Bit position of a child tile in the availability mask: SW=0, SE=1,
/// NW=2, NE=3 (east adds one, north adds two).
pub fn child_corner_bit(x: u32, y: u32, child_x: u32, child_y: u32) -> u8 {
    debug_assert!(child_x == 2 * x || child_x == 2 * x + 1);
    debug_assert!(child_y == 2 * y || child_y == 2 * y + 1);
    let east = u8::from(child_x != 2 * x);
    let north = u8::from(child_y != 2 * y);
    east + 2 * north
}

/// Per-node origin state machine over the quad-tree.
pub struct TileOriginResolver {
    directory: Arc<dyn TileDirectory>,
    states: DashMap<QuadPath, TileOrigin>,
}

impl TileOriginResolver {
    pub fn new(directory: Arc<dyn TileDirectory>) -> Self {
        Self {
            directory,
            states: DashMap::new(),
        }
    }

    /// Current origin state of a node.
    pub fn origin(&self, path: &QuadPath) -> TileOrigin {
        self.states
            .get(path)
            .map(|state| *state)
            .unwrap_or(TileOrigin::Unknown)
    }

    /// Records a state transition. Transitions out of a terminal state are
    /// limited to demotion into `Missing`.
    pub fn mark(&self, path: &QuadPath, origin: TileOrigin) {
        let previous = self.states.insert(path.clone(), origin);
        if let Some(previous) = previous {
            if previous != origin && origin != TileOrigin::Missing {
                log::debug!("tile {path} origin moved {previous:?} -> {origin:?}");
            }
        }
    }

    /// Decides how a request for `path` should proceed.
    pub fn resolve(&self, path: &QuadPath) -> Resolution {
        match self.origin(path) {
            TileOrigin::Missing => Resolution::NotAvailable,
            TileOrigin::Local => match self.directory.tile_info(path) {
                Some(info) => Resolution::Fetch {
                    target: path.clone(),
                    version: info.terrain_version,
                    origin: TileOrigin::Local,
                },
                None => Resolution::NotAvailable,
            },
            TileOrigin::Inherited => match self.nearest_stored_ancestor(path) {
                Some((target, version)) => Resolution::Fetch {
                    target,
                    version,
                    origin: TileOrigin::Inherited,
                },
                None => Resolution::NotAvailable,
            },
            TileOrigin::Unknown => self.resolve_unprobed(path),
        }
    }

    fn resolve_unprobed(&self, path: &QuadPath) -> Resolution {
        let Some(info) = self.directory.tile_info(path) else {
            return Resolution::NotAvailable;
        };
        if info.has_own_terrain {
            return Resolution::Fetch {
                target: path.clone(),
                version: info.terrain_version,
                origin: TileOrigin::Local,
            };
        }
        if let Some((target, version)) = self.nearest_stored_ancestor(path) {
            return Resolution::Fetch {
                target,
                version,
                origin: TileOrigin::Inherited,
            };
        }
        if info.ancestor_has_terrain {
            // The directory claims an ancestor payload but none resolves to
            // a fetchable version; treat as absent rather than guessing.
            Resolution::NotAvailable
        } else {
            Resolution::SyntheticFlat
        }
    }

    /// Nearest ancestor that stores its own payload, walking rootward.
    fn nearest_stored_ancestor(&self, path: &QuadPath) -> Option<(QuadPath, i32)> {
        for ancestor in path.ancestors() {
            if self.origin(&ancestor) == TileOrigin::Local {
                let version = self
                    .directory
                    .tile_info(&ancestor)
                    .map(|info| info.terrain_version)
                    .unwrap_or(-1);
                return Some((ancestor, version));
            }
            if let Some(info) = self.directory.tile_info(&ancestor) {
                if info.has_own_terrain {
                    return Some((ancestor, info.terrain_version));
                }
            }
        }
        None
    }

    /// Availability mask for the four children of `path`.
    ///
    /// A node holding its own payload reports the directory mask directly.
    /// A node that inherited its data cannot trust the stored mask, so the
    /// mask is synthesized from each child's own directory flag.
    pub fn child_mask(&self, path: &QuadPath, origin: TileOrigin) -> u8 {
        match origin {
            TileOrigin::Local => self
                .directory
                .tile_info(path)
                .map(|info| info.child_mask)
                .unwrap_or(0),
            TileOrigin::Inherited => {
                let mut mask = 0u8;
                for digit in 0..4u8 {
                    let child = path.child(digit);
                    let child_has_data = self
                        .directory
                        .tile_info(&child)
                        .map(|info| info.has_own_terrain)
                        .unwrap_or(false);
                    if child_has_data {
                        mask |= 1 << digit;
                    }
                }
                mask
            }
            TileOrigin::Unknown | TileOrigin::Missing => 0,
        }
    }
}
