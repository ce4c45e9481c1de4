//! Core types shared across the engine

pub mod particle;
pub mod vec3;

pub use particle::Particle;
pub use vec3::Vec3;
