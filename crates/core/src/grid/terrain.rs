//! Heightfield terrain the avalanche flows over
//!
//! Implements an immutable elevation grid with per-cell texture coordinates,
//! finite-difference surface normals, ESRI ASCII grid ingestion and a few
//! synthetic builders (flat, ramp, hill) for tests and demos.

use crate::core_types::Vec3;
use crate::error::SimulationError;
use serde::{Deserialize, Serialize};

/// Clearance added on top of the ground when testing for and resolving contact
pub const GROUND_CLEARANCE: f32 = 1.0;

/// One sample of the heightfield
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TerrainCell {
    /// Elevation above the terrain minimum (m)
    pub height: f32,
    /// Texture u coordinate (0 at the first column, 1 at the last)
    pub tex_u: f32,
    /// Texture v coordinate (1 at the first row, 0 at the last)
    pub tex_v: f32,
    /// Normalized elevation (0 at the minimum, 1 at the maximum)
    pub aux: f32,
}

/// Triangle list for a renderer: two triangles per terrain quad
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerrainMesh {
    /// Vertex positions in world units
    pub positions: Vec<[f32; 3]>,
    /// Matching texture coordinates
    pub tex_coords: Vec<[f32; 2]>,
}

/// Immutable heightfield indexed `[row][col]`
///
/// Columns run along world `x`, rows along world `z`; `cell_size` is the
/// world distance between adjacent samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "TerrainRecord", try_from = "TerrainRecord")]
pub struct Terrain {
    /// Number of columns (x direction)
    width: usize,
    /// Number of rows (z direction)
    depth: usize,
    /// World units per cell
    cell_size: f32,
    /// Cells in row-major order: `[row * width + col]`
    cells: Vec<TerrainCell>,
    /// Highest shifted elevation
    max_height: f32,
}

/// Wire form of [`Terrain`]: dimensions plus shifted heights
///
/// Texture coordinates, `aux` and the maximum are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct TerrainRecord {
    width: usize,
    depth: usize,
    cell_size: f32,
    heights: Vec<f32>,
}

impl From<Terrain> for TerrainRecord {
    fn from(terrain: Terrain) -> Self {
        TerrainRecord {
            width: terrain.width,
            depth: terrain.depth,
            cell_size: terrain.cell_size,
            heights: terrain.cells.iter().map(|c| c.height).collect(),
        }
    }
}

impl TryFrom<TerrainRecord> for Terrain {
    type Error = SimulationError;

    fn try_from(record: TerrainRecord) -> Result<Self, Self::Error> {
        Terrain::from_elevations(record.width, record.depth, record.cell_size, &record.heights, None)
    }
}

impl Terrain {
    /// Build terrain from a row-major elevation grid
    ///
    /// Elevations at or below `no_data` are treated as zero, then every
    /// height is shifted so the minimum becomes zero.
    ///
    /// # Errors
    /// Returns [`SimulationError::InvalidConfiguration`] for a non-positive
    /// cell size and [`SimulationError::DegenerateInput`] for fewer than two
    /// rows or columns or a size mismatch.
    pub fn from_elevations(
        width: usize,
        depth: usize,
        cell_size: f32,
        elevations: &[f32],
        no_data: Option<f32>,
    ) -> Result<Self, SimulationError> {
        if !(cell_size.is_finite() && cell_size > 0.0) {
            return Err(SimulationError::non_positive("cell_size", cell_size));
        }
        if width < 2 || depth < 2 {
            return Err(SimulationError::DegenerateInput(format!(
                "terrain needs at least 2x2 cells, got {width}x{depth}"
            )));
        }
        if width.checked_mul(depth) != Some(elevations.len()) {
            return Err(SimulationError::DegenerateInput(format!(
                "expected {width}x{depth} elevations, got {}",
                elevations.len()
            )));
        }

        let cleaned: Vec<f32> = elevations
            .iter()
            .map(|&h| match no_data {
                Some(sentinel) if h <= sentinel => 0.0,
                _ if h.is_finite() => h,
                _ => 0.0,
            })
            .collect();

        let min_elev = cleaned.iter().copied().fold(f32::MAX, f32::min);
        let max_elev = cleaned.iter().copied().fold(f32::MIN, f32::max);
        let range = max_elev - min_elev;

        let u_span = (width - 1) as f32;
        let v_span = (depth - 1) as f32;

        let mut cells = Vec::with_capacity(width * depth);
        for row in 0..depth {
            for col in 0..width {
                let height = cleaned[row * width + col] - min_elev;
                cells.push(TerrainCell {
                    height,
                    tex_u: col as f32 / u_span,
                    tex_v: 1.0 - row as f32 / v_span,
                    aux: if range > 0.0 { height / range } else { 0.0 },
                });
            }
        }

        Ok(Terrain {
            width,
            depth,
            cell_size,
            cells,
            max_height: range,
        })
    }

    /// Parse an ESRI ASCII grid (`ncols`, `nrows`, ..., `cellsize`, `NODATA_value`)
    ///
    /// Header keys are case-insensitive; `xllcorner`/`yllcorner` are accepted
    /// and ignored since the engine works in local coordinates.
    ///
    /// # Errors
    /// Returns [`SimulationError::Parse`] for a malformed header or value, and
    /// any error [`Terrain::from_elevations`] reports for the parsed grid.
    pub fn from_ascii_grid(text: &str) -> Result<Self, SimulationError> {
        let mut ncols: Option<usize> = None;
        let mut nrows: Option<usize> = None;
        let mut cell_size: Option<f32> = None;
        let mut no_data: Option<f32> = None;
        let mut values = Vec::new();

        for (line_no, line) in text.lines().enumerate() {
            let mut tokens = line.split_whitespace().peekable();
            let Some(first) = tokens.peek().copied() else {
                continue;
            };

            if first.parse::<f32>().is_err() {
                // Header line: `key value`
                let key = first.to_ascii_lowercase();
                tokens.next();
                let raw = tokens.next().ok_or_else(|| {
                    SimulationError::Parse(format!("line {}: header '{key}' has no value", line_no + 1))
                })?;
                let bad_value =
                    || SimulationError::Parse(format!("line {}: bad value '{raw}' for '{key}'", line_no + 1));
                match key.as_str() {
                    "ncols" => ncols = Some(raw.parse::<usize>().map_err(|_| bad_value())?),
                    "nrows" => nrows = Some(raw.parse::<usize>().map_err(|_| bad_value())?),
                    "cellsize" => cell_size = Some(raw.parse::<f32>().map_err(|_| bad_value())?),
                    "nodata_value" => no_data = Some(raw.parse::<f32>().map_err(|_| bad_value())?),
                    "xllcorner" | "yllcorner" | "xllcenter" | "yllcenter" => {
                        raw.parse::<f64>().map_err(|_| bad_value())?;
                    }
                    other => {
                        return Err(SimulationError::Parse(format!(
                            "line {}: unknown header '{other}'",
                            line_no + 1
                        )));
                    }
                }
                continue;
            }

            for token in tokens {
                let value: f32 = token.parse().map_err(|_| {
                    SimulationError::Parse(format!("line {}: bad elevation '{token}'", line_no + 1))
                })?;
                values.push(value);
            }
        }

        let ncols = ncols.ok_or_else(|| SimulationError::Parse("missing 'ncols' header".into()))?;
        let nrows = nrows.ok_or_else(|| SimulationError::Parse("missing 'nrows' header".into()))?;
        let cell_size =
            cell_size.ok_or_else(|| SimulationError::Parse("missing 'cellsize' header".into()))?;

        let expected = ncols.checked_mul(nrows).ok_or_else(|| {
            SimulationError::Parse(format!("grid of {ncols}x{nrows} cells is too large"))
        })?;
        if values.len() < expected {
            return Err(SimulationError::Parse(format!(
                "expected {expected} elevations, found {}",
                values.len()
            )));
        }
        values.truncate(expected);

        Self::from_elevations(ncols, nrows, cell_size, &values, no_data)
    }

    /// Create flat terrain (height 0 everywhere)
    ///
    /// # Errors
    /// Same conditions as [`Terrain::from_elevations`].
    pub fn flat(width: usize, depth: usize, cell_size: f32) -> Result<Self, SimulationError> {
        Self::from_elevations(width, depth, cell_size, &vec![0.0; width * depth], None)
    }

    /// Create terrain whose height rises linearly with the column index
    ///
    /// # Errors
    /// Same conditions as [`Terrain::from_elevations`].
    pub fn ramp_x(
        width: usize,
        depth: usize,
        cell_size: f32,
        rise_per_cell: f32,
    ) -> Result<Self, SimulationError> {
        let mut elevations = Vec::with_capacity(width * depth);
        for _row in 0..depth {
            for col in 0..width {
                elevations.push(col as f32 * rise_per_cell);
            }
        }
        Self::from_elevations(width, depth, cell_size, &elevations, None)
    }

    /// Create terrain with a single Gaussian hill in the middle
    ///
    /// # Errors
    /// Same conditions as [`Terrain::from_elevations`].
    pub fn single_hill(
        width: usize,
        depth: usize,
        cell_size: f32,
        hill_height: f32,
        hill_radius: f32,
    ) -> Result<Self, SimulationError> {
        let center_col = (width as f32 - 1.0) / 2.0;
        let center_row = (depth as f32 - 1.0) / 2.0;
        let radius_sq = (hill_radius * hill_radius).max(f32::EPSILON);

        let mut elevations = Vec::with_capacity(width * depth);
        for row in 0..depth {
            for col in 0..width {
                let dx = (col as f32 - center_col) * cell_size;
                let dz = (row as f32 - center_row) * cell_size;
                elevations.push(hill_height * (-(dx * dx + dz * dz) / radius_sq).exp());
            }
        }
        Self::from_elevations(width, depth, cell_size, &elevations, None)
    }

    #[inline]
    fn index(&self, col: usize, row: usize) -> usize {
        row * self.width + col
    }

    /// Cell at `(col, row)`; indices must be in range
    #[inline]
    pub fn cell(&self, col: usize, row: usize) -> &TerrainCell {
        &self.cells[self.index(col, row)]
    }

    /// Elevation at `(col, row)`; indices must be in range
    #[inline]
    pub fn height(&self, col: usize, row: usize) -> f32 {
        self.cells[self.index(col, row)].height
    }

    /// Surface normal at `(col, row)` from central differences
    ///
    /// Cells on the outer ring return the zero vector: there is no usable
    /// normal there and callers must not treat it as flat ground.
    pub fn normal(&self, col: usize, row: usize) -> Vec3 {
        if col < 1 || row < 1 || col >= self.width - 1 || row >= self.depth - 1 {
            return Vec3::zeros();
        }

        let span = 2.0 * self.cell_size;
        let tangent_x = Vec3::new(
            span,
            self.height(col + 1, row) - self.height(col - 1, row),
            0.0,
        );
        let tangent_z = Vec3::new(
            0.0,
            self.height(col, row + 1) - self.height(col, row - 1),
            span,
        );

        // z × x keeps the normal pointing up (+y)
        tangent_z.cross(&tangent_x).normalize()
    }

    /// Whether `(col, row)` lies at least one cell inside the border
    #[inline]
    pub fn is_interior(&self, col: i64, row: i64) -> bool {
        col >= 1 && row >= 1 && col < self.width as i64 - 1 && row < self.depth as i64 - 1
    }

    /// Cell containing world position `(x, z)`, clamped into the grid
    pub fn cell_of(&self, x: f32, z: f32) -> (usize, usize) {
        let col = ((x / self.cell_size).floor() as i64).clamp(0, self.width as i64 - 1);
        let row = ((z / self.cell_size).floor() as i64).clamp(0, self.depth as i64 - 1);
        (col as usize, row as usize)
    }

    /// Elevation of the cell under world position `(x, z)`
    pub fn height_at_world(&self, x: f32, z: f32) -> f32 {
        let (col, row) = self.cell_of(x, z);
        self.height(col, row)
    }

    /// Normal of the cell under world position `(x, z)`
    pub fn normal_at_world(&self, x: f32, z: f32) -> Vec3 {
        let (col, row) = self.cell_of(x, z);
        self.normal(col, row)
    }

    /// Build a triangle list (two triangles per quad) for rendering
    pub fn mesh(&self) -> TerrainMesh {
        let quads = (self.width - 1) * (self.depth - 1);
        let mut mesh = TerrainMesh {
            positions: Vec::with_capacity(quads * 6),
            tex_coords: Vec::with_capacity(quads * 6),
        };

        for row in 0..self.depth - 1 {
            for col in 0..self.width - 1 {
                let corners = [
                    (col, row),
                    (col, row + 1),
                    (col + 1, row),
                    (col + 1, row),
                    (col + 1, row + 1),
                    (col, row + 1),
                ];
                for (c, r) in corners {
                    let cell = self.cell(c, r);
                    mesh.positions.push([
                        c as f32 * self.cell_size,
                        cell.height,
                        r as f32 * self.cell_size,
                    ]);
                    mesh.tex_coords.push([cell.tex_u, cell.tex_v]);
                }
            }
        }

        mesh
    }

    /// Number of columns (x direction)
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows (z direction)
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// World units per cell
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// World extent `(x, z)` covered by the samples
    pub fn extent(&self) -> (f32, f32) {
        (
            self.width as f32 * self.cell_size,
            self.depth as f32 * self.cell_size,
        )
    }

    /// Highest elevation after the minimum shift
    pub fn max_height(&self) -> f32 {
        self.max_height
    }
}
