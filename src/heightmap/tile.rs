use std::sync::Arc;

use crate::error::{TerrainError, TerrainResult};
use crate::heightmap::codec::decode_height;
use crate::heightmap::{HeightmapStructure, TerrainMesh, TessellationInput, Tessellator};
use crate::quadtree::{child_corner_bit, Rectangle};

/// Which representation currently backs a tile.
///
/// The transition is one-way: building the mesh consumes the raster buffer,
/// so at most one representation is ever retained.
#[derive(Debug)]
pub enum TileBacking {
    /// Raw decoded sample grid, owned until the mesh is built.
    Raster(Vec<f64>),
    /// Materialized geometry superseding the raster buffer.
    Mesh(Arc<TerrainMesh>),
}

/// A tile's elevation data over its geographic rectangle.
///
/// Samples are stored row-major, north row first. The tile does not know
/// its own rectangle; callers supply it per query, which keeps one decoded
/// buffer usable for any tile that inherits it.
#[derive(Debug)]
pub struct HeightmapTile {
    width: u32,
    height: u32,
    structure: HeightmapStructure,
    child_mask: u8,
    water_mask: Option<Vec<u8>>,
    created_by_upsampling: bool,
    backing: TileBacking,
}

impl HeightmapTile {
    /// Wraps a decoded sample buffer.
    pub fn from_samples(
        samples: Vec<f64>,
        width: u32,
        height: u32,
        structure: HeightmapStructure,
        child_mask: u8,
    ) -> TerrainResult<Self> {
        structure.validate()?;
        if width < 2 || height < 2 {
            return Err(TerrainError::InvalidConfig {
                reason: format!("tile grid {width}x{height} is smaller than 2x2"),
            });
        }
        let expected = width as usize * height as usize * structure.stride as usize;
        if samples.len() != expected {
            return Err(TerrainError::DecodeFailed {
                reason: format!(
                    "sample buffer holds {} elements, tile needs {expected}",
                    samples.len()
                ),
            });
        }
        Ok(Self {
            width,
            height,
            structure,
            child_mask,
            water_mask: None,
            created_by_upsampling: false,
            backing: TileBacking::Raster(samples),
        })
    }

    /// A constant-height tile, used where no elevation data exists.
    pub fn constant(
        width: u32,
        height: u32,
        raw_height: f64,
        structure: HeightmapStructure,
    ) -> TerrainResult<Self> {
        let len = width as usize * height as usize * structure.stride as usize;
        let mut samples = vec![0.0; len];
        if raw_height != 0.0 {
            for index in 0..width as usize * height as usize {
                crate::heightmap::codec::encode_height(&mut samples, &structure, index, raw_height);
            }
        }
        Self::from_samples(samples, width, height, structure, 0)
    }

    pub(crate) fn upsampled(
        samples: Vec<f64>,
        width: u32,
        height: u32,
        structure: HeightmapStructure,
    ) -> Self {
        Self {
            width,
            height,
            structure,
            child_mask: 0,
            water_mask: None,
            created_by_upsampling: true,
            backing: TileBacking::Raster(samples),
        }
    }

    pub fn with_water_mask(mut self, water_mask: Vec<u8>) -> Self {
        self.water_mask = Some(water_mask);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn structure(&self) -> &HeightmapStructure {
        &self.structure
    }

    pub fn child_mask(&self) -> u8 {
        self.child_mask
    }

    pub fn water_mask(&self) -> Option<&[u8]> {
        self.water_mask.as_deref()
    }

    pub fn was_created_by_upsampling(&self) -> bool {
        self.created_by_upsampling
    }

    /// The raster buffer, while it is still owned.
    pub fn samples(&self) -> Option<&[f64]> {
        match &self.backing {
            TileBacking::Raster(samples) => Some(samples),
            TileBacking::Mesh(_) => None,
        }
    }

    /// The materialized mesh, once built.
    pub fn mesh(&self) -> Option<&Arc<TerrainMesh>> {
        match &self.backing {
            TileBacking::Raster(_) => None,
            TileBacking::Mesh(mesh) => Some(mesh),
        }
    }

    /// Whether the child tile at (child_x, child_y) has its own elevation
    /// payload, per the availability mask.
    pub fn is_child_available(&self, x: u32, y: u32, child_x: u32, child_y: u32) -> bool {
        let bit = child_corner_bit(x, y, child_x, child_y);
        self.child_mask & (1 << bit) != 0
    }

    /// Height in meters at (longitude, latitude), which must lie inside
    /// `rectangle`. Scale and offset are applied exactly once here, so the
    /// raster and mesh paths agree.
    pub fn interpolate_height(
        &self,
        rectangle: &Rectangle,
        longitude: f64,
        latitude: f64,
    ) -> f64 {
        let raw = match &self.backing {
            TileBacking::Raster(samples) => interpolate_raster(
                samples,
                &self.structure,
                rectangle,
                self.width,
                self.height,
                longitude,
                latitude,
            ),
            TileBacking::Mesh(mesh) => interpolate_mesh(
                mesh,
                &self.structure,
                rectangle,
                self.width,
                self.height,
                longitude,
                latitude,
            ),
        };
        raw * self.structure.height_scale + self.structure.height_offset
    }

    /// Derives the height grid of a direct child tile from this tile's
    /// materialized surface. See [`crate::heightmap::upsample_from_parent`].
    pub fn upsample(
        &self,
        tiling: &crate::quadtree::GeographicTiling,
        x: u32,
        y: u32,
        level: u32,
        child_x: u32,
        child_y: u32,
        child_level: u32,
    ) -> TerrainResult<HeightmapTile> {
        crate::heightmap::upsample::upsample_from_parent(
            self, tiling, x, y, level, child_x, child_y, child_level,
        )
    }

    /// Builds the renderable mesh, handing the raster buffer to the
    /// tessellator. On success the buffer is dropped and the mesh takes
    /// over; a busy tessellator leaves the tile untouched for a retry.
    pub fn build_mesh(
        &mut self,
        tessellator: &dyn Tessellator,
        rectangle: Rectangle,
        exaggeration: f64,
        skirt_height: f64,
    ) -> TerrainResult<()> {
        let samples = match &self.backing {
            TileBacking::Mesh(_) => {
                return Err(TerrainError::Unsupported {
                    message: "tile mesh was already built".into(),
                })
            }
            TileBacking::Raster(samples) => samples,
        };
        let mesh = tessellator.tessellate(TessellationInput {
            samples,
            width: self.width,
            height: self.height,
            structure: &self.structure,
            rectangle,
            exaggeration,
            skirt_height,
        })?;
        self.backing = TileBacking::Mesh(Arc::new(mesh));
        Ok(())
    }
}

/// Locates the grid cell containing a query point and the fractional
/// offsets within it. The last row/column reuses the last interior cell
/// instead of extrapolating past the edge.
struct GridCell {
    west: usize,
    east: usize,
    /// Storage row (north-to-south) of the cell's south edge.
    south_row: usize,
    /// Storage row of the cell's north edge.
    north_row: usize,
    dx: f64,
    dy: f64,
}

fn locate_cell(from_west: f64, from_south: f64, width: usize, height: usize) -> GridCell {
    let mut west = from_west.floor() as i64;
    let mut east = west + 1;
    if east >= width as i64 {
        east = width as i64 - 1;
        west = east - 1;
    }
    let mut south = from_south.floor() as i64;
    let mut north = south + 1;
    if north >= height as i64 {
        north = height as i64 - 1;
        south = north - 1;
    }
    GridCell {
        west: west as usize,
        east: east as usize,
        south_row: height - 1 - south as usize,
        north_row: height - 1 - north as usize,
        dx: from_west - west as f64,
        dy: from_south - south as f64,
    }
}

/// Interpolates within the cell's triangle pair. The quad is split along
/// its southwest-to-northeast diagonal; points strictly below the diagonal
/// use the lower-right triangle, everything else the upper-left. The
/// choice must match the tessellator's diagonal or seams appear.
fn triangle_interpolate(dx: f64, dy: f64, sw: f64, se: f64, nw: f64, ne: f64) -> f64 {
    if dy < dx {
        sw + dx * (se - sw) + dy * (ne - se)
    } else {
        sw + dx * (ne - nw) + dy * (nw - sw)
    }
}

/// Raw-domain interpolation over a raster sample grid.
pub(crate) fn interpolate_raster(
    samples: &[f64],
    structure: &HeightmapStructure,
    rectangle: &Rectangle,
    width: u32,
    height: u32,
    longitude: f64,
    latitude: f64,
) -> f64 {
    let from_west =
        (longitude - rectangle.west) * f64::from(width - 1) / rectangle.width();
    let from_south =
        (latitude - rectangle.south) * f64::from(height - 1) / rectangle.height();
    let cell = locate_cell(from_west, from_south, width as usize, height as usize);

    let w = width as usize;
    let sw = decode_height(samples, structure, cell.south_row * w + cell.west);
    let se = decode_height(samples, structure, cell.south_row * w + cell.east);
    let nw = decode_height(samples, structure, cell.north_row * w + cell.west);
    let ne = decode_height(samples, structure, cell.north_row * w + cell.east);
    triangle_interpolate(cell.dx, cell.dy, sw, se, nw, ne)
}

/// Raw-domain interpolation over a materialized mesh. With a skirt the
/// vertex grid grows by one ring on each side; query offsets shift into the
/// interior while decode indices address the full skirted grid.
pub(crate) fn interpolate_mesh(
    mesh: &TerrainMesh,
    structure: &HeightmapStructure,
    rectangle: &Rectangle,
    width: u32,
    height: u32,
    longitude: f64,
    latitude: f64,
) -> f64 {
    let mut from_west =
        (longitude - rectangle.west) * f64::from(width - 1) / rectangle.width();
    let mut from_south =
        (latitude - rectangle.south) * f64::from(height - 1) / rectangle.height();
    let mut grid_width = width as usize;
    let mut grid_height = height as usize;
    if mesh.skirt_height > 0.0 {
        from_west += 1.0;
        from_south += 1.0;
        grid_width += 2;
        grid_height += 2;
    }
    let cell = locate_cell(from_west, from_south, grid_width, grid_height);

    let raw_at = |row: usize, col: usize| {
        let world = mesh.height_at(row * grid_width + col);
        (world / mesh.exaggeration - structure.height_offset) / structure.height_scale
    };
    triangle_interpolate(
        cell.dx,
        cell.dy,
        raw_at(cell.south_row, cell.west),
        raw_at(cell.south_row, cell.east),
        raw_at(cell.north_row, cell.west),
        raw_at(cell.north_row, cell.east),
    )
}
