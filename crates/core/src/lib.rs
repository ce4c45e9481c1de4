//! Avalanche Simulation Core Library
//!
//! Particle-based avalanche flow over a heightfield terrain. Each timestep
//! particles fall under gravity, are ray-marched against the terrain, bounce
//! with restitution and turbulence, and are pulled toward the mean flow of
//! their neighbourhood through a coarse velocity grid.
//!
//! ## Layout
//!
//! - [`grid`]: the [`Terrain`] heightfield and the double-buffered [`VelocityGrid`]
//! - [`physics`]: the [`CollisionTracer`] and the per-particle [`StepIntegrator`]
//! - [`simulation`]: the [`Simulation`] context, configuration, seeding and flow map
//!
//! ```no_run
//! use avalanche_sim_core::{Simulation, SimulationConfig, StartZone, Terrain};
//!
//! let terrain = Terrain::single_hill(128, 128, 2.0, 60.0, 80.0)?;
//! let zone = StartZone::uniform(8, 8)?;
//! let mut sim = Simulation::from_startzone(terrain, &zone, 5_000, SimulationConfig::default())?;
//! while let Some(summary) = sim.step() {
//!     if summary.active() == 0 {
//!         break;
//!     }
//! }
//! # Ok::<(), avalanche_sim_core::SimulationError>(())
//! ```

// Core types and utilities
pub mod core_types;
pub mod error;

// Terrain and velocity grid
pub mod grid;

// Collision and integration
pub mod physics;

// Simulation context
pub mod simulation;

// Re-export core types
pub use core_types::{Particle, Vec3};
pub use error::SimulationError;

// Re-export grid types
pub use grid::{GridLayout, Terrain, TerrainCell, TerrainMesh, VelocityGrid};

// Re-export physics types
pub use physics::{CollisionTracer, Impact, StepIntegrator, StepOutcome, Trace};

// Re-export simulation types
pub use simulation::{
    seed_particles, FlowMap, Frame, Simulation, SimulationConfig, StartZone, StepSummary,
};
