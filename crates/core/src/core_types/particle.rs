//! Point-mass particle carried by the flow

use crate::core_types::vec3::{self, Vec3};
use serde::{Deserialize, Serialize};

/// A single snow/debris particle
///
/// Particles are created in bulk when a startzone is seeded and live for the
/// whole run. Only the step integrator mutates them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// World position (m)
    pub position: Vec3,
    /// Velocity (m/s)
    pub velocity: Vec3,
}

impl Particle {
    /// Create a particle at rest
    pub fn at_rest(position: Vec3) -> Self {
        Particle {
            position,
            velocity: Vec3::zeros(),
        }
    }

    /// Create a particle with an initial velocity
    pub fn new(position: Vec3, velocity: Vec3) -> Self {
        Particle { position, velocity }
    }

    /// Magnitude of the velocity vector
    #[inline]
    pub fn speed(&self) -> f32 {
        self.velocity.norm()
    }

    /// Horizontal (x/z) speed, used for flow accumulation
    #[inline]
    pub fn horizontal_speed(&self) -> f32 {
        vec3::horizontal_norm(&self.velocity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed() {
        let p = Particle::new(Vec3::zeros(), Vec3::new(3.0, 12.0, 4.0));
        assert_eq!(p.speed(), 13.0);
        assert_eq!(p.horizontal_speed(), 5.0);
    }

    #[test]
    fn test_at_rest() {
        let p = Particle::at_rest(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(p.velocity, Vec3::zeros());
        assert_eq!(p.position.y, 2.0);
    }
}
