//! Child-tile resampling from a parent's materialized surface
//!
//! A child grid is produced by sampling the parent mesh at every child grid
//! point. The raw raster is not enough: continuous interpolation across the
//! parent needs the triangulated surface, so a parent without a mesh is
//! reported as busy and the caller retries after mesh materialization.

use std::sync::Arc;

use rayon::prelude::*;

use crate::error::{TerrainError, TerrainResult};
use crate::heightmap::codec::encode_height;
use crate::heightmap::tile::interpolate_mesh;
use crate::heightmap::{HeightmapStructure, HeightmapTile, TerrainMesh};
use crate::quadtree::{GeographicTiling, Rectangle};

/// A prepared resampling run, detached from the parent tile so it can move
/// to a worker thread.
pub(crate) struct UpsampleJob {
    mesh: Arc<TerrainMesh>,
    structure: HeightmapStructure,
    width: u32,
    height: u32,
    source_rectangle: Rectangle,
    target_rectangle: Rectangle,
}

impl UpsampleJob {
    /// Validates the parent/child relation and captures everything the
    /// resample needs.
    pub fn prepare(
        parent: &HeightmapTile,
        tiling: &GeographicTiling,
        x: u32,
        y: u32,
        level: u32,
        child_x: u32,
        child_y: u32,
        child_level: u32,
    ) -> TerrainResult<Self> {
        if child_level != level + 1 {
            return Err(TerrainError::Unsupported {
                message: format!(
                    "can only upsample to a direct child, not from level {level} to {child_level}"
                ),
            });
        }
        if child_x >> 1 != x || child_y >> 1 != y {
            return Err(TerrainError::Unsupported {
                message: format!(
                    "tile ({child_x}, {child_y}) at level {child_level} is not a child of \
                     ({x}, {y}) at level {level}"
                ),
            });
        }
        let Some(mesh) = parent.mesh() else {
            // The parent raster has not been tessellated yet; try again
            // once the mesh exists.
            return Err(TerrainError::TransientBusy);
        };
        Ok(Self {
            mesh: Arc::clone(mesh),
            structure: *parent.structure(),
            width: parent.width(),
            height: parent.height(),
            source_rectangle: tiling.tile_rectangle(x, y, level),
            target_rectangle: tiling.tile_rectangle(child_x, child_y, child_level),
        })
    }

    /// Runs the resample. CPU-bound; rows are filled in parallel.
    pub fn run(self) -> HeightmapTile {
        let w = self.width as usize;
        let h = self.height as usize;
        let stride = self.structure.stride as usize;
        let mut samples = vec![0.0f64; w * h * stride];

        samples
            .par_chunks_mut(w * stride)
            .enumerate()
            .for_each(|(j, row)| {
                let t = j as f64 / (h - 1) as f64;
                let latitude = lerp(self.target_rectangle.north, self.target_rectangle.south, t);
                for i in 0..w {
                    let s = i as f64 / (w - 1) as f64;
                    let longitude =
                        lerp(self.target_rectangle.west, self.target_rectangle.east, s);
                    let sample = interpolate_mesh(
                        &self.mesh,
                        &self.structure,
                        &self.source_rectangle,
                        self.width,
                        self.height,
                        longitude,
                        latitude,
                    );
                    encode_height(row, &self.structure, i, self.structure.clamp_encoded(sample));
                }
            });

        HeightmapTile::upsampled(samples, self.width, self.height, self.structure)
    }
}

/// Derives a direct child tile's height grid from a materialized parent.
pub fn upsample_from_parent(
    parent: &HeightmapTile,
    tiling: &GeographicTiling,
    x: u32,
    y: u32,
    level: u32,
    child_x: u32,
    child_y: u32,
    child_level: u32,
) -> TerrainResult<HeightmapTile> {
    let job = UpsampleJob::prepare(parent, tiling, x, y, level, child_x, child_y, child_level)?;
    Ok(job.run())
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}
