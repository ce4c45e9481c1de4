//! Coarse 2D velocity grid coupling neighbouring particles
//!
//! The grid covers the terrain footprint at a resolution independent of the
//! terrain samples. It is double-buffered: particles register into the
//! *accumulation* buffer during a step while every query reads the
//! *completed* snapshot produced by the previous step's [`VelocityGrid::finalize`].
//! No read ever observes a write from the same step, so particle updates
//! within a step are order-independent.

use crate::core_types::Vec3;
use crate::error::SimulationError;
use crate::grid::Terrain;
use serde::Serialize;

/// Terrain sample count that maps to exactly `resolution` grid cells
///
/// A terrain 512 samples wide at resolution 128 gets 128 grid columns; a
/// terrain 256 samples wide at the same resolution gets 64.
pub const REFERENCE_EXTENT: f32 = 512.0;

/// Scales particles-per-square-metre into the range of the velocity terms
pub const DENSITY_NORMALIZATION: f32 = 100.0;

/// Dimensions of the grid and the world-to-cell mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridLayout {
    /// Cells along x
    size_x: usize,
    /// Cells along z
    size_z: usize,
    /// World width of one cell (m)
    cell_width: f32,
    /// World depth of one cell (m)
    cell_depth: f32,
}

impl GridLayout {
    /// Derive the layout from terrain extent and a resolution setting
    ///
    /// # Errors
    /// Returns [`SimulationError::InvalidConfiguration`] when `resolution` is zero.
    pub fn new(terrain: &Terrain, resolution: u32) -> Result<Self, SimulationError> {
        if resolution == 0 {
            return Err(SimulationError::InvalidConfiguration {
                parameter: "grid_resolution",
                reason: "must be positive, got 0".to_string(),
            });
        }

        let scale = resolution as f32 / REFERENCE_EXTENT;
        let size_x = ((terrain.width() as f32 * scale).floor() as usize).max(1);
        let size_z = ((terrain.depth() as f32 * scale).floor() as usize).max(1);
        let (extent_x, extent_z) = terrain.extent();

        Ok(GridLayout {
            size_x,
            size_z,
            cell_width: extent_x / size_x as f32,
            cell_depth: extent_z / size_z as f32,
        })
    }

    /// Cells along x
    pub fn size_x(&self) -> usize {
        self.size_x
    }

    /// Cells along z
    pub fn size_z(&self) -> usize {
        self.size_z
    }

    /// Total number of cells
    pub fn cell_count(&self) -> usize {
        self.size_x * self.size_z
    }

    /// World area of one cell (m²)
    pub fn cell_area(&self) -> f32 {
        self.cell_width * self.cell_depth
    }

    /// Continuous grid coordinates of a world position
    #[inline]
    pub fn grid_coords(&self, x: f32, z: f32) -> (f32, f32) {
        (x / self.cell_width, z / self.cell_depth)
    }

    #[inline]
    fn clamp_x(&self, ix: i64) -> usize {
        ix.clamp(0, self.size_x as i64 - 1) as usize
    }

    #[inline]
    fn clamp_z(&self, iz: i64) -> usize {
        iz.clamp(0, self.size_z as i64 - 1) as usize
    }

    /// Cell `(ix, iz)` containing a world position (floor, then clamp)
    pub fn primary_cell(&self, x: f32, z: f32) -> (usize, usize) {
        let (gx, gz) = self.grid_coords(x, z);
        (
            self.clamp_x(gx.floor() as i64),
            self.clamp_z(gz.floor() as i64),
        )
    }

    /// The four cells a particle at `(x, z)` splats into
    ///
    /// Per axis the secondary cell is the neighbour on the side of the cell
    /// centre the position falls on. Returned as
    /// `[(ix, iz), (x1, iz), (x1, z1), (ix, z1)]`; near the border clamping
    /// can make entries repeat.
    pub fn splat_footprint(&self, x: f32, z: f32) -> [(usize, usize); 4] {
        let (gx, gz) = self.grid_coords(x, z);
        let fx = gx.floor();
        let fz = gz.floor();

        let ix = fx as i64;
        let iz = fz as i64;
        let x1 = if gx - fx > 0.5 { ix + 1 } else { ix - 1 };
        let z1 = if gz - fz > 0.5 { iz + 1 } else { iz - 1 };

        let (ix, iz) = (self.clamp_x(ix), self.clamp_z(iz));
        let (x1, z1) = (self.clamp_x(x1), self.clamp_z(z1));

        [(ix, iz), (x1, iz), (x1, z1), (ix, z1)]
    }

    #[inline]
    fn index(&self, ix: usize, iz: usize) -> usize {
        iz * self.size_x + ix
    }
}

/// Double-buffered count/velocity grid
#[derive(Debug, Clone, Serialize)]
pub struct VelocityGrid {
    layout: GridLayout,
    /// Registrations this step
    acc_counts: Vec<u32>,
    /// Summed (not averaged) velocities this step
    acc_velocity: Vec<Vec3>,
    /// Counts from the last finalized step
    counts: Vec<u32>,
    /// Mean velocities from the last finalized step
    mean_velocity: Vec<Vec3>,
}

impl VelocityGrid {
    /// Create an empty grid (both buffers zeroed)
    pub fn new(layout: GridLayout) -> Self {
        let n = layout.cell_count();
        VelocityGrid {
            layout,
            acc_counts: vec![0; n],
            acc_velocity: vec![Vec3::zeros(); n],
            counts: vec![0; n],
            mean_velocity: vec![Vec3::zeros(); n],
        }
    }

    /// Grid layout
    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Zero the accumulation buffer; the completed snapshot is untouched
    pub fn reset(&mut self) {
        self.acc_counts.fill(0);
        self.acc_velocity.fill(Vec3::zeros());
    }

    /// Splat one particle into the accumulation buffer
    ///
    /// Each of the four footprint cells gets `+1` count and the full
    /// velocity, so a particle deliberately contributes to all four. Returns
    /// the footprint that was written.
    pub fn register(&mut self, position: &Vec3, velocity: &Vec3) -> [(usize, usize); 4] {
        let footprint = self.layout.splat_footprint(position.x, position.z);
        for &(ix, iz) in &footprint {
            let idx = self.layout.index(ix, iz);
            self.acc_counts[idx] += 1;
            self.acc_velocity[idx] += velocity;
        }
        footprint
    }

    /// Reduce the accumulation buffer into a new completed snapshot
    pub fn finalize(&mut self) {
        for idx in 0..self.layout.cell_count() {
            let count = self.acc_counts[idx];
            self.counts[idx] = count;
            self.mean_velocity[idx] = self.acc_velocity[idx] / count.max(1) as f32;
        }
    }

    /// Completed mean velocity at world `(x, z)`
    pub fn mean_velocity(&self, x: f32, z: f32) -> Vec3 {
        let (ix, iz) = self.layout.primary_cell(x, z);
        self.mean_velocity[self.layout.index(ix, iz)]
    }

    /// Completed particle count at world `(x, z)`
    pub fn count(&self, x: f32, z: f32) -> u32 {
        let (ix, iz) = self.layout.primary_cell(x, z);
        self.counts[self.layout.index(ix, iz)]
    }

    /// Completed density at world `(x, z)`: count per cell area, normalized
    pub fn density(&self, x: f32, z: f32) -> f32 {
        self.count(x, z) as f32 / self.layout.cell_area() * DENSITY_NORMALIZATION
    }

    /// Accumulated count of cell `(ix, iz)` in the current step
    pub fn accumulated_count(&self, ix: usize, iz: usize) -> u32 {
        self.acc_counts[self.layout.index(ix, iz)]
    }

    /// Accumulated velocity sum of cell `(ix, iz)` in the current step
    pub fn accumulated_velocity(&self, ix: usize, iz: usize) -> Vec3 {
        self.acc_velocity[self.layout.index(ix, iz)]
    }

    /// Completed count of cell `(ix, iz)`
    pub fn completed_count(&self, ix: usize, iz: usize) -> u32 {
        self.counts[self.layout.index(ix, iz)]
    }

    /// Completed mean velocity of cell `(ix, iz)`
    pub fn completed_mean(&self, ix: usize, iz: usize) -> Vec3 {
        self.mean_velocity[self.layout.index(ix, iz)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid_for(width: usize, depth: usize, resolution: u32) -> VelocityGrid {
        let terrain = Terrain::flat(width, depth, 1.0).unwrap();
        VelocityGrid::new(GridLayout::new(&terrain, resolution).unwrap())
    }

    #[test]
    fn test_layout_dimensions() {
        let terrain = Terrain::flat(256, 128, 2.0).unwrap();
        let layout = GridLayout::new(&terrain, 128).unwrap();
        assert_eq!(layout.size_x(), 64);
        assert_eq!(layout.size_z(), 32);
        assert_relative_eq!(layout.cell_area(), 64.0);
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let terrain = Terrain::flat(16, 16, 1.0).unwrap();
        assert!(matches!(
            GridLayout::new(&terrain, 0),
            Err(SimulationError::InvalidConfiguration {
                parameter: "grid_resolution",
                ..
            })
        ));
    }

    #[test]
    fn test_tiny_terrain_keeps_one_cell() {
        let terrain = Terrain::flat(4, 4, 1.0).unwrap();
        let layout = GridLayout::new(&terrain, 1).unwrap();
        assert_eq!(layout.cell_count(), 1);
    }

    #[test]
    fn test_footprint_sides() {
        // 512 wide at resolution 512: one grid cell per metre
        let grid = grid_for(512, 512, 512);
        let layout = grid.layout();

        // Upper half of the cell in both axes -> +1 neighbours
        assert_eq!(
            layout.splat_footprint(10.7, 20.9),
            [(10, 20), (11, 20), (11, 21), (10, 21)]
        );
        // Lower half -> -1 neighbours
        assert_eq!(
            layout.splat_footprint(10.2, 20.5),
            [(10, 20), (9, 20), (9, 19), (10, 19)]
        );
    }

    #[test]
    fn test_footprint_clamped_at_edges() {
        let grid = grid_for(512, 512, 512);
        let layout = grid.layout();

        let corner = layout.splat_footprint(0.1, 0.1);
        assert_eq!(corner, [(0, 0), (0, 0), (0, 0), (0, 0)]);

        let far = layout.splat_footprint(10_000.0, -50.0);
        for (ix, iz) in far {
            assert!(ix < layout.size_x());
            assert!(iz < layout.size_z());
        }
    }

    #[test]
    fn test_register_writes_four_cells() {
        let mut grid = grid_for(512, 512, 512);
        let v = Vec3::new(1.0, -2.0, 3.0);
        grid.register(&Vec3::new(10.7, 0.0, 20.9), &v);

        let total: u32 = (0..grid.layout().size_z())
            .flat_map(|iz| (0..grid.layout().size_x()).map(move |ix| (ix, iz)))
            .map(|(ix, iz)| grid.accumulated_count(ix, iz))
            .sum();
        assert_eq!(total, 4);
        assert_eq!(grid.accumulated_velocity(11, 21), v);
    }

    #[test]
    fn test_register_at_corner_stacks_counts() {
        let mut grid = grid_for(512, 512, 512);
        grid.register(&Vec3::new(0.1, 0.0, 0.1), &Vec3::new(2.0, 0.0, 0.0));
        assert_eq!(grid.accumulated_count(0, 0), 4);
        assert_eq!(grid.accumulated_velocity(0, 0), Vec3::new(8.0, 0.0, 0.0));
    }

    #[test]
    fn test_reads_see_previous_step_only() {
        let mut grid = grid_for(512, 512, 512);
        grid.register(&Vec3::new(5.7, 0.0, 5.7), &Vec3::new(4.0, 0.0, 0.0));

        // Not finalized yet: queries still see the empty snapshot
        assert_eq!(grid.count(5.7, 5.7), 0);
        assert_eq!(grid.mean_velocity(5.7, 5.7), Vec3::zeros());

        grid.finalize();
        assert_eq!(grid.count(5.7, 5.7), 1);
        assert_eq!(grid.mean_velocity(5.7, 5.7), Vec3::new(4.0, 0.0, 0.0));

        // A new step's writes don't leak into the snapshot
        grid.reset();
        grid.register(&Vec3::new(5.7, 0.0, 5.7), &Vec3::new(-100.0, 0.0, 0.0));
        assert_eq!(grid.mean_velocity(5.7, 5.7), Vec3::new(4.0, 0.0, 0.0));
    }

    #[test]
    fn test_finalize_averages() {
        let mut grid = grid_for(512, 512, 512);
        grid.register(&Vec3::new(5.7, 0.0, 5.7), &Vec3::new(2.0, 0.0, 0.0));
        grid.register(&Vec3::new(5.8, 0.0, 5.8), &Vec3::new(4.0, 0.0, 2.0));
        grid.finalize();

        for iz in 0..grid.layout().size_z() {
            for ix in 0..grid.layout().size_x() {
                let count = grid.accumulated_count(ix, iz);
                assert_eq!(grid.completed_count(ix, iz), count);
                assert_eq!(
                    grid.completed_mean(ix, iz),
                    grid.accumulated_velocity(ix, iz) / count.max(1) as f32
                );
            }
        }
        assert_eq!(grid.completed_mean(5, 5), Vec3::new(3.0, 0.0, 1.0));
        assert_eq!(grid.completed_mean(100, 100), Vec3::zeros());
    }

    #[test]
    fn test_density() {
        let mut grid = grid_for(512, 512, 256);
        // 2m cells -> area 4
        grid.register(&Vec3::new(3.0, 0.0, 3.0), &Vec3::zeros());
        grid.finalize();
        assert_relative_eq!(grid.density(3.0, 3.0), DENSITY_NORMALIZATION / 4.0);
        assert_eq!(grid.density(300.0, 300.0), 0.0);
    }
}
