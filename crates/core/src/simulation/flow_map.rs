//! Accumulated flow raster
//!
//! Records where the avalanche has travelled and how hard: every step each
//! active particle adds its horizontal speed times the local density to the
//! terrain cell beneath it.

use crate::core_types::Particle;
use crate::grid::Terrain;
use serde::Serialize;

/// Terrain-sized raster of accumulated flow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowMap {
    width: usize,
    depth: usize,
    cell_size: f32,
    values: Vec<f32>,
}

impl FlowMap {
    /// Create an all-zero map matching `terrain`
    pub fn new(terrain: &Terrain) -> Self {
        FlowMap {
            width: terrain.width(),
            depth: terrain.depth(),
            cell_size: terrain.cell_size(),
            values: vec![0.0; terrain.width() * terrain.depth()],
        }
    }

    /// Add one particle's contribution
    ///
    /// Positions outside the map are ignored.
    pub fn accumulate(&mut self, particle: &Particle, density: f32) {
        let col = (particle.position.x / self.cell_size).floor();
        let row = (particle.position.z / self.cell_size).floor();
        if col < 0.0 || row < 0.0 || col >= self.width as f32 || row >= self.depth as f32 {
            return;
        }

        let idx = row as usize * self.width + col as usize;
        self.values[idx] += particle.horizontal_speed() * density;
    }

    /// Accumulated flow at `(col, row)`
    pub fn value(&self, col: usize, row: usize) -> f32 {
        self.values[row * self.width + col]
    }

    /// Largest accumulated value (0 for an untouched map)
    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// Row-major values
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Clear all accumulated flow
    pub fn reset(&mut self) {
        self.values.fill(0.0);
    }
}
