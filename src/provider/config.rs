use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::cache::TERRAIN_CACHE_TTL_MS;
use crate::constants::heightmap::{DEFAULT_TILE_SAMPLES, FLAT_TILE_SAMPLES};
use crate::error::{TerrainError, TerrainResult};
use crate::heightmap::{ElementKind, HeightmapStructure};
use crate::quadtree::GeographicTiling;

/// Provider configuration.
///
/// Defaults mirror the reference deployment; any subset can be overridden
/// from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Per-axis sample count of a decoded tile grid.
    pub tile_width: u32,
    pub tile_height: u32,
    /// Per-axis sample count of the synthetic constant-height tile.
    pub flat_tile_samples: u32,
    /// Sample layout of decoded buffers.
    pub structure: HeightmapStructure,
    /// Wire element type of packet sub-buffers.
    pub element_kind: ElementKind,
    /// Staleness window of the decoded-buffer cache, in milliseconds.
    pub cache_ttl_ms: u64,
    /// Demote a node to confirmed-absent when its fetch fails, so later
    /// requests fail fast instead of re-fetching a broken endpoint.
    pub demote_on_failure: bool,
    /// Quad-tree tiling of the surface.
    pub tiling: GeographicTiling,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SAMPLES,
            tile_height: DEFAULT_TILE_SAMPLES,
            flat_tile_samples: FLAT_TILE_SAMPLES,
            structure: HeightmapStructure::default(),
            element_kind: ElementKind::Uint8,
            cache_ttl_ms: TERRAIN_CACHE_TTL_MS,
            demote_on_failure: true,
            tiling: GeographicTiling::default(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> TerrainResult<()> {
        self.structure.validate()?;
        if self.tile_width < 2 || self.tile_height < 2 {
            return Err(TerrainError::InvalidConfig {
                reason: format!(
                    "tile grid {}x{} is smaller than 2x2",
                    self.tile_width, self.tile_height
                ),
            });
        }
        if self.flat_tile_samples < 2 {
            return Err(TerrainError::InvalidConfig {
                reason: "flat_tile_samples must be at least 2".into(),
            });
        }
        Ok(())
    }

    /// Loads and validates a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> TerrainResult<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            TerrainError::InvalidConfig {
                reason: format!("cannot read {}: {e}", path.as_ref().display()),
            }
        })?;
        let config: Self =
            toml::from_str(&text).map_err(|e| TerrainError::InvalidConfig {
                reason: format!("cannot parse {}: {e}", path.as_ref().display()),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}
