//! Avalanche simulation context
//!
//! [`Simulation`] owns the terrain, the velocity grid, the particles and the
//! configuration, and drives them one timestep at a time:
//!
//! 1. Zero the grid's accumulation buffer
//! 2. Advance every particle in parallel against the completed snapshot
//! 3. Register the surviving particles serially, in particle order
//! 4. Finalize the grid into the next snapshot and update the flow map
//!
//! Registration order is fixed, so results do not depend on thread count.

pub mod config;
pub mod flow_map;
pub mod seeding;

pub use config::SimulationConfig;
pub use flow_map::FlowMap;
pub use seeding::{seed_particles, StartZone};

use crate::core_types::{Particle, Vec3};
use crate::error::SimulationError;
use crate::grid::{GridLayout, Terrain, VelocityGrid};
use crate::physics::{StepIntegrator, StepOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Per-frame output for a renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Steps completed when the frame was taken
    pub step: u64,
    /// Particle positions in particle order
    pub positions: Vec<Vec3>,
    /// Completed-grid density under each particle
    pub densities: Vec<f32>,
}

/// Counters for one executed step
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Index of the step (0 for the first)
    pub step: u64,
    /// Particles in free flight
    pub free: usize,
    /// Particles that bounced
    pub collided: usize,
    /// Particles whose candidate left the domain
    pub out_of_domain: usize,
    /// Fastest registered particle
    pub max_speed: f32,
}

impl StepSummary {
    /// Particles that were registered into the grid this step
    pub fn active(&self) -> usize {
        self.free + self.collided
    }
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// Random stream for one particle in one step
fn particle_rng(seed: u64, step: u64, index: usize) -> StdRng {
    let mixed = splitmix64(splitmix64(seed ^ splitmix64(step)) ^ index as u64);
    StdRng::seed_from_u64(mixed)
}

/// A running avalanche
#[derive(Debug, Clone)]
pub struct Simulation {
    terrain: Terrain,
    grid: VelocityGrid,
    particles: Vec<Particle>,
    config: SimulationConfig,
    flow_map: FlowMap,
    step: u64,
}

impl Simulation {
    /// Create a simulation over `terrain` with pre-seeded particles
    ///
    /// # Errors
    /// Returns [`SimulationError::InvalidConfiguration`] if `config` fails
    /// validation and [`SimulationError::DegenerateInput`] for an empty
    /// particle list.
    pub fn new(
        terrain: Terrain,
        particles: Vec<Particle>,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        if particles.is_empty() {
            return Err(SimulationError::DegenerateInput(
                "simulation needs at least one particle".to_string(),
            ));
        }

        let layout = GridLayout::new(&terrain, config.grid_resolution)?;
        let flow_map = FlowMap::new(&terrain);

        info!(
            "Created avalanche simulation: {}x{} terrain, {} particles, {}x{} velocity grid",
            terrain.width(),
            terrain.depth(),
            particles.len(),
            layout.size_x(),
            layout.size_z()
        );

        Ok(Simulation {
            terrain,
            grid: VelocityGrid::new(layout),
            particles,
            config,
            flow_map,
            step: 0,
        })
    }

    /// Seed `particle_count` particles over a startzone and create a simulation
    ///
    /// Seeding jitter is drawn from `config.seed`.
    ///
    /// # Errors
    /// Any error from [`seed_particles`] or [`Simulation::new`].
    pub fn from_startzone(
        terrain: Terrain,
        zone: &StartZone,
        particle_count: usize,
        config: SimulationConfig,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let particles = seed_particles(&terrain, zone, particle_count, config.initial_height, &mut rng)?;
        Self::new(terrain, particles, config)
    }

    /// Advance every particle by one timestep
    ///
    /// Returns `None` without touching any state once the step ceiling has
    /// been reached.
    pub fn step(&mut self) -> Option<StepSummary> {
        if self.is_finished() {
            return None;
        }

        self.grid.reset();

        let seed = self.config.seed;
        let step = self.step;
        let integrator = StepIntegrator::new(&self.terrain, &self.grid, &self.config);
        let outcomes: Vec<StepOutcome> = self
            .particles
            .par_iter_mut()
            .enumerate()
            .map(|(index, particle)| {
                let mut rng = particle_rng(seed, step, index);
                integrator.advance(particle, &mut rng)
            })
            .collect();

        let mut summary = StepSummary {
            step,
            ..Default::default()
        };
        for (particle, outcome) in self.particles.iter().zip(&outcomes) {
            match outcome {
                StepOutcome::OutOfDomain => {
                    summary.out_of_domain += 1;
                    continue;
                }
                StepOutcome::Free => summary.free += 1,
                StepOutcome::Collided => summary.collided += 1,
            }
            self.grid.register(&particle.position, &particle.velocity);
            summary.max_speed = summary.max_speed.max(particle.speed());
        }

        self.grid.finalize();

        for (particle, outcome) in self.particles.iter().zip(&outcomes) {
            if outcome.is_active() {
                let density = self.grid.density(particle.position.x, particle.position.z);
                self.flow_map.accumulate(particle, density);
            }
        }

        self.step += 1;

        debug!(
            "Step {}: {} free, {} collided, {} out of domain, max speed {:.2}",
            summary.step, summary.free, summary.collided, summary.out_of_domain, summary.max_speed
        );
        if self.is_finished() {
            info!("Step ceiling of {} reached; simulation is now static", self.config.max_steps);
        }

        Some(summary)
    }

    /// Step up to `steps` times, stopping early at the ceiling
    ///
    /// Returns the number of steps actually executed.
    pub fn run(&mut self, steps: u64) -> u64 {
        let mut executed = 0;
        while executed < steps && self.step().is_some() {
            executed += 1;
        }
        executed
    }

    /// Whether the step ceiling has been reached
    pub fn is_finished(&self) -> bool {
        self.step >= self.config.max_steps
    }

    /// Replace the configuration between steps
    ///
    /// The velocity grid is rebuilt (and its history lost) only when the
    /// grid resolution changes.
    ///
    /// # Errors
    /// Returns [`SimulationError::InvalidConfiguration`] if `config` fails
    /// validation; the current configuration is kept in that case.
    pub fn set_config(&mut self, config: SimulationConfig) -> Result<(), SimulationError> {
        config.validate()?;

        if config.grid_resolution != self.config.grid_resolution {
            let layout = GridLayout::new(&self.terrain, config.grid_resolution)?;
            info!(
                "Grid resolution {} -> {}: rebuilding velocity grid as {}x{}",
                self.config.grid_resolution,
                config.grid_resolution,
                layout.size_x(),
                layout.size_z()
            );
            self.grid = VelocityGrid::new(layout);
        }

        self.config = config;
        info!("Simulation configuration updated at step {}", self.step);
        Ok(())
    }

    /// Discard all grid history, keeping the current layout
    pub fn reset_grid(&mut self) {
        self.grid = VelocityGrid::new(*self.grid.layout());
        debug!("Velocity grid cleared at step {}", self.step);
    }

    /// Snapshot of particle positions and densities
    pub fn frame(&self) -> Frame {
        Frame {
            step: self.step,
            positions: self.particle_positions(),
            densities: self
                .particles
                .iter()
                .map(|p| self.grid.density(p.position.x, p.position.z))
                .collect(),
        }
    }

    /// Current particle positions in particle order
    pub fn particle_positions(&self) -> Vec<Vec3> {
        self.particles.iter().map(|p| p.position).collect()
    }

    /// Particles in seeding order
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Number of particles, active or not
    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Terrain the particles flow over
    pub fn terrain(&self) -> &Terrain {
        &self.terrain
    }

    /// Velocity grid (completed snapshot plus the last accumulation)
    pub fn grid(&self) -> &VelocityGrid {
        &self.grid
    }

    /// Active configuration
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Flow accumulated over every completed step
    pub fn flow_map(&self) -> &FlowMap {
        &self.flow_map
    }

    /// Steps completed so far
    pub fn current_step(&self) -> u64 {
        self.step
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            max_steps: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_empty_particles() {
        let terrain = Terrain::flat(16, 16, 1.0).unwrap();
        let err = Simulation::new(terrain, Vec::new(), small_config()).unwrap_err();
        assert!(matches!(err, SimulationError::DegenerateInput(_)));
    }

    #[test]
    fn test_rejects_invalid_config() {
        let terrain = Terrain::flat(16, 16, 1.0).unwrap();
        let config = SimulationConfig {
            timestep: 0.0,
            ..Default::default()
        };
        let particles = vec![Particle::at_rest(Vec3::new(8.0, 10.0, 8.0))];
        assert!(Simulation::new(terrain, particles, config).is_err());
    }

    #[test]
    fn test_step_counts_outcomes() {
        let terrain = Terrain::flat(32, 32, 1.0).unwrap();
        let particles = vec![
            Particle::at_rest(Vec3::new(10.0, 20.0, 10.0)),
            Particle::new(Vec3::new(15.5, 0.9, 15.5), Vec3::new(0.0, -5.0, 0.0)),
            Particle::new(Vec3::new(30.5, 20.0, 10.0), Vec3::new(10.0, 0.0, 0.0)),
        ];
        let mut sim = Simulation::new(terrain, particles, small_config()).unwrap();

        let summary = sim.step().unwrap();
        assert_eq!(summary.step, 0);
        assert_eq!(summary.free, 1);
        assert_eq!(summary.collided, 1);
        assert_eq!(summary.out_of_domain, 1);
        assert_eq!(summary.active(), 2);
        assert_eq!(sim.current_step(), 1);
    }

    #[test]
    fn test_out_of_domain_particle_not_registered() {
        let terrain = Terrain::flat(32, 32, 1.0).unwrap();
        let start = Particle::new(Vec3::new(30.5, 20.0, 10.0), Vec3::new(10.0, 0.0, 0.0));
        let mut sim = Simulation::new(terrain, vec![start], small_config()).unwrap();

        let summary = sim.step().unwrap();
        assert_eq!(summary.out_of_domain, 1);
        assert_eq!(summary.active(), 0);
        assert_eq!(sim.particles()[0], start);

        let grid = sim.grid();
        assert_eq!(grid.count(start.position.x, start.position.z), 0);
        let layout = *grid.layout();
        for iz in 0..layout.size_z() {
            for ix in 0..layout.size_x() {
                assert_eq!(grid.accumulated_count(ix, iz), 0);
                assert_eq!(grid.completed_count(ix, iz), 0);
            }
        }
        assert_eq!(sim.flow_map().max_value(), 0.0);
    }

    #[test]
    fn test_step_ceiling() {
        let terrain = Terrain::flat(32, 32, 1.0).unwrap();
        let particles = vec![Particle::at_rest(Vec3::new(10.0, 30.0, 10.0))];
        let mut sim = Simulation::new(terrain, particles, small_config()).unwrap();

        assert_eq!(sim.run(100), 5);
        assert!(sim.is_finished());

        let frozen = sim.particle_positions();
        assert!(sim.step().is_none());
        assert_eq!(sim.particle_positions(), frozen);
        assert_eq!(sim.current_step(), 5);
    }

    #[test]
    fn test_set_config_rebuilds_grid_on_resolution_change() {
        let terrain = Terrain::flat(64, 64, 1.0).unwrap();
        let particles = vec![Particle::at_rest(Vec3::new(20.0, 5.0, 20.0))];
        let mut sim = Simulation::new(terrain, particles, small_config()).unwrap();
        assert_eq!(sim.grid().layout().size_x(), 16);

        sim.set_config(SimulationConfig {
            viscosity: 0.5,
            ..small_config()
        })
        .unwrap();
        assert_eq!(sim.grid().layout().size_x(), 16);
        assert_eq!(sim.config().viscosity, 0.5);

        sim.set_config(SimulationConfig {
            grid_resolution: 256,
            ..small_config()
        })
        .unwrap();
        assert_eq!(sim.grid().layout().size_x(), 32);

        let bad = SimulationConfig {
            grid_resolution: 0,
            ..small_config()
        };
        assert!(sim.set_config(bad).is_err());
        assert_eq!(sim.config().grid_resolution, 256);
    }

    #[test]
    fn test_frame_matches_particles() {
        let terrain = Terrain::flat(32, 32, 1.0).unwrap();
        let particles = vec![
            Particle::at_rest(Vec3::new(10.0, 30.0, 10.0)),
            Particle::at_rest(Vec3::new(12.0, 30.0, 12.0)),
        ];
        let mut sim = Simulation::new(terrain, particles, small_config()).unwrap();
        sim.step();

        let frame = sim.frame();
        assert_eq!(frame.step, 1);
        assert_eq!(frame.positions, sim.particle_positions());
        assert_eq!(frame.densities.len(), 2);
        assert!(frame.densities.iter().all(|&d| d > 0.0));
    }

    #[test]
    fn test_reset_grid_clears_history() {
        let terrain = Terrain::flat(32, 32, 1.0).unwrap();
        let particles = vec![Particle::at_rest(Vec3::new(10.0, 30.0, 10.0))];
        let mut sim = Simulation::new(terrain, particles, small_config()).unwrap();
        sim.step();
        assert_eq!(sim.grid().count(10.0, 10.0), 1);

        sim.reset_grid();
        assert_eq!(sim.grid().count(10.0, 10.0), 0);
    }

    #[test]
    fn test_particle_rng_streams_differ() {
        use rand::Rng;

        let a: u64 = particle_rng(1, 0, 0).random();
        let b: u64 = particle_rng(1, 0, 1).random();
        let c: u64 = particle_rng(1, 1, 0).random();
        let again: u64 = particle_rng(1, 0, 0).random();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, again);
    }
}
