//! Startzone seeding
//!
//! A [`StartZone`] is a weighted raster laid over the terrain. Denser pixels
//! receive proportionally more particles; each particle starts at rest a fixed
//! height above the ground with sub-cell jitter.

use crate::core_types::{Particle, Vec3};
use crate::error::SimulationError;
use crate::grid::Terrain;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Weighted release-area raster
///
/// Row 0 is the north edge of the zone and maps to the last terrain row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StartZoneRecord")]
pub struct StartZone {
    width: usize,
    height: usize,
    weights: Vec<f32>,
}

/// Unchecked wire form of [`StartZone`]
#[derive(Deserialize)]
struct StartZoneRecord {
    width: usize,
    height: usize,
    weights: Vec<f32>,
}

impl TryFrom<StartZoneRecord> for StartZone {
    type Error = SimulationError;

    fn try_from(record: StartZoneRecord) -> Result<Self, Self::Error> {
        StartZone::new(record.width, record.height, record.weights)
    }
}

impl StartZone {
    /// Create a zone from row-major weights
    ///
    /// # Errors
    /// Returns [`SimulationError::DegenerateInput`] for an empty raster or a
    /// weight count that does not match `width * height`.
    pub fn new(width: usize, height: usize, weights: Vec<f32>) -> Result<Self, SimulationError> {
        if width == 0 || height == 0 {
            return Err(SimulationError::DegenerateInput(format!(
                "startzone must be non-empty, got {width}x{height}"
            )));
        }
        if width.checked_mul(height) != Some(weights.len()) {
            return Err(SimulationError::DegenerateInput(format!(
                "startzone expects {width}x{height} weights, got {}",
                weights.len()
            )));
        }

        Ok(StartZone {
            width,
            height,
            weights,
        })
    }

    /// Zone with every pixel weighted equally
    ///
    /// # Errors
    /// Returns [`SimulationError::DegenerateInput`] for an empty raster.
    pub fn uniform(width: usize, height: usize) -> Result<Self, SimulationError> {
        Self::new(width, height, vec![1.0; width * height])
    }

    /// Pixels across
    pub fn width(&self) -> usize {
        self.width
    }

    /// Pixels down
    pub fn height(&self) -> usize {
        self.height
    }

    /// Weight of pixel `(x, y)`
    pub fn weight(&self, x: usize, y: usize) -> f32 {
        self.weights[y * self.width + x]
    }

    /// Terrain cell `(col, row)` covered by pixel `(x, y)`
    pub fn terrain_cell(&self, terrain: &Terrain, x: usize, y: usize) -> (usize, usize) {
        let col = (x * terrain.width() / self.width).min(terrain.width() - 1);
        let flipped = self.height - 1 - y;
        let row = (flipped * terrain.depth() / self.height).min(terrain.depth() - 1);
        (col, row)
    }
}

/// Split `target` into integer shares proportional to `weights`
///
/// Largest-remainder rounding: every share gets the floor of its quota and
/// the leftover units go to the largest fractional parts, earliest first on
/// ties. The shares always sum to `target`.
fn allocate(weights: &[f64], target: usize) -> Vec<usize> {
    let total: f64 = weights.iter().sum();
    let mut shares = vec![0usize; weights.len()];
    if total <= 0.0 {
        return shares;
    }

    let mut remainders = Vec::with_capacity(weights.len());
    let mut assigned = 0usize;
    for (i, &w) in weights.iter().enumerate() {
        let quota = target as f64 * w / total;
        let whole = quota.floor() as usize;
        shares[i] = whole;
        assigned += whole;
        remainders.push((i, quota - quota.floor()));
    }

    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    for &(i, _) in remainders.iter().take(target.saturating_sub(assigned)) {
        shares[i] += 1;
    }

    shares
}

/// Seed `target_count` particles over a startzone
///
/// # Arguments
/// * `terrain` - Ground the zone is draped over
/// * `zone` - Weighted release raster
/// * `target_count` - Exact number of particles to create
/// * `initial_height` - Height above the ground to release at
/// * `rng` - Source of the sub-cell jitter
///
/// # Errors
/// Returns [`SimulationError::DegenerateInput`] when `target_count` is zero
/// or the zone has no positive weight.
pub fn seed_particles<R: Rng>(
    terrain: &Terrain,
    zone: &StartZone,
    target_count: usize,
    initial_height: f32,
    rng: &mut R,
) -> Result<Vec<Particle>, SimulationError> {
    if target_count == 0 {
        return Err(SimulationError::DegenerateInput(
            "cannot seed zero particles".to_string(),
        ));
    }

    let mut ignored = 0usize;
    let weights: Vec<f64> = zone
        .weights
        .iter()
        .map(|&w| {
            if w.is_finite() && w >= 0.0 {
                f64::from(w)
            } else {
                ignored += 1;
                0.0
            }
        })
        .collect();
    if ignored > 0 {
        warn!("Ignoring {} startzone pixels with negative or non-finite weight", ignored);
    }

    if !weights.iter().any(|&w| w > 0.0) {
        return Err(SimulationError::DegenerateInput(
            "startzone has no positive weight".to_string(),
        ));
    }

    let shares = allocate(&weights, target_count);
    let cell_size = terrain.cell_size();
    let mut particles = Vec::with_capacity(target_count);

    for (idx, &share) in shares.iter().enumerate() {
        if share == 0 {
            continue;
        }
        let (col, row) = zone.terrain_cell(terrain, idx % zone.width, idx / zone.width);
        let ground = terrain.height(col, row);

        for _ in 0..share {
            let x = (col as f32 + rng.random_range(0.0f32..1.0)) * cell_size;
            let z = (row as f32 + rng.random_range(0.0f32..1.0)) * cell_size;
            particles.push(Particle::at_rest(Vec3::new(x, ground + initial_height, z)));
        }
    }

    info!(
        "Seeded {} particles over {} weighted pixels",
        particles.len(),
        shares.iter().filter(|&&s| s > 0).count()
    );

    Ok(particles)
}
