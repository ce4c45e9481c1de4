//! Particle physics: collision tracing against the heightfield and
//! per-step integration

pub mod collision;
pub mod integrator;

pub use collision::*;
pub use integrator::*;
