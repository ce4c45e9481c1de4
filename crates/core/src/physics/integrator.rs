//! Per-particle timestep integration
//!
//! One call to [`StepIntegrator::advance`] moves a single particle through a
//! whole timestep: gravity, a candidate Euler position, the domain check,
//! then either free flight or a collision response against the terrain.
//!
//! The integrator only reads the velocity grid's completed snapshot, so any
//! number of particles can be advanced concurrently. Registration of the
//! result into the grid is left to the caller.

use crate::core_types::{vec3, Particle, Vec3};
use crate::grid::{Terrain, VelocityGrid, GROUND_CLEARANCE};
use crate::physics::collision::{CollisionTracer, Impact, Trace};
use crate::simulation::SimulationConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// What happened to a particle during one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// Candidate position left the interior; nothing was committed
    OutOfDomain,
    /// No contact with the ground; position committed and velocity damped
    Free,
    /// Bounced off the terrain
    Collided,
}

impl StepOutcome {
    /// Whether the particle should be registered into the grid
    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self, StepOutcome::OutOfDomain)
    }
}

/// Mirror `v` about the plane with unit normal `n`: `v - 2(v·n)n`
#[inline]
pub fn reflect(v: &Vec3, n: &Vec3) -> Vec3 {
    v - n * (2.0 * v.dot(n))
}

/// Bounce a velocity off a surface
///
/// The direction is reflected about `normal` and the magnitude scaled by
/// `restitution`. A zero velocity stays zero.
pub fn reflect_velocity(velocity: &Vec3, normal: &Vec3, restitution: f32) -> Vec3 {
    let speed = velocity.norm();
    if speed <= 0.0 || !speed.is_finite() {
        return Vec3::zeros();
    }

    reflect(&(velocity / speed), normal) * (speed * restitution)
}

/// Split a timestep at an impact
///
/// # Arguments
/// * `hit_distance` - Distance from the particle to the impact point
/// * `total_distance` - Distance the particle would travel this step
/// * `dt` - Step duration
///
/// # Returns
/// `(pre_impact, post_impact)` times. A zero travel distance yields `(0, 0)`.
pub fn split_timestep(hit_distance: f32, total_distance: f32, dt: f32) -> (f32, f32) {
    if total_distance <= 0.0 || !total_distance.is_finite() {
        return (0.0, 0.0);
    }

    let pre = dt * hit_distance / total_distance;
    let post = dt * (total_distance - hit_distance).abs() / total_distance;
    (pre, post)
}

/// Advances particles one timestep against a terrain and grid snapshot
#[derive(Debug, Clone, Copy)]
pub struct StepIntegrator<'a> {
    terrain: &'a Terrain,
    grid: &'a VelocityGrid,
    config: &'a SimulationConfig,
}

impl<'a> StepIntegrator<'a> {
    /// Bind an integrator to the state of the current step
    pub fn new(terrain: &'a Terrain, grid: &'a VelocityGrid, config: &'a SimulationConfig) -> Self {
        StepIntegrator {
            terrain,
            grid,
            config,
        }
    }

    /// Move one particle through a timestep
    ///
    /// `rng` drives the turbulence jitter on impact. On
    /// [`StepOutcome::OutOfDomain`] the particle is left exactly as it was.
    pub fn advance<R: Rng>(&self, particle: &mut Particle, rng: &mut R) -> StepOutcome {
        let dt = self.config.timestep;
        let cell_size = self.terrain.cell_size();

        let mut velocity = particle.velocity;
        velocity.y += self.config.gravity * dt;
        let candidate = particle.position + velocity * dt;

        let col = (candidate.x / cell_size).floor() as i64;
        let row = (candidate.z / cell_size).floor() as i64;
        if !vec3::is_finite(&candidate) || !self.terrain.is_interior(col, row) {
            return StepOutcome::OutOfDomain;
        }

        let tracer = CollisionTracer::new(self.terrain);
        match tracer.trace(&particle.position, &candidate) {
            Trace::Miss => {
                particle.position = candidate;
                particle.velocity = velocity - velocity * self.config.damping;
                StepOutcome::Free
            }
            Trace::Hit(impact) => {
                self.respond(particle, velocity, &candidate, &impact, rng);
                StepOutcome::Collided
            }
        }
    }

    fn respond<R: Rng>(
        &self,
        particle: &mut Particle,
        velocity: Vec3,
        candidate: &Vec3,
        impact: &Impact,
        rng: &mut R,
    ) {
        let dt = self.config.timestep;

        // Neighbourhood state is sampled where the particle started the step
        let origin = particle.position;
        let density = self.grid.density(origin.x, origin.z);
        let grid_velocity = self.grid.mean_velocity(origin.x, origin.z);
        let count = self.grid.count(origin.x, origin.z).max(1);

        let mut position = particle.position;
        if candidate.y < impact.position.y {
            position.y += 0.5 * (impact.position.y - candidate.y);
        }

        let mut normal = self.terrain.normal(impact.col, impact.row);
        if normal == Vec3::zeros() {
            normal = Vec3::y();
        }

        let speed = velocity.norm();
        let hit_distance = (impact.position - position).norm();
        let (_, post_impact) = split_timestep(hit_distance, speed * dt, dt);

        let mut new_velocity = reflect_velocity(&velocity, &normal, self.config.restitution);
        let mut new_position = impact.position + new_velocity * post_impact;

        let jitter = Vec3::new(
            rng.random_range(-0.5f32..0.5),
            0.0,
            rng.random_range(-0.5f32..0.5),
        );
        new_velocity += jitter * (self.config.turbulence * density);

        let clumping = self.config.clumping;
        let viscosity = self.config.viscosity / count as f32;
        new_velocity =
            (new_velocity - grid_velocity * viscosity) * (1.0 - clumping) + grid_velocity * clumping;

        if self.config.stickiness > 0.0 && speed * dt < self.config.stickiness {
            new_velocity = Vec3::zeros();
        }

        let floor = self.terrain.height(impact.col, impact.row) + GROUND_CLEARANCE;
        if new_position.y < floor {
            new_position.y = floor;
        }

        particle.position = new_position;
        particle.velocity = new_velocity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn still_config() -> SimulationConfig {
        SimulationConfig {
            turbulence: 0.0,
            clumping: 0.0,
            viscosity: 0.0,
            ..Default::default()
        }
    }

    fn empty_grid(terrain: &Terrain) -> VelocityGrid {
        VelocityGrid::new(GridLayout::new(terrain, 128).unwrap())
    }

    #[test]
    fn test_reflect_flat_surface() {
        let r = reflect(&Vec3::new(1.0, -1.0, 0.0), &Vec3::y());
        assert_relative_eq!(r, Vec3::new(1.0, 1.0, 0.0));
    }

    #[test]
    fn test_reflect_velocity_scales_by_restitution() {
        let v = Vec3::new(3.0, -4.0, 0.0);
        let r = reflect_velocity(&v, &Vec3::y(), 0.5);
        assert_relative_eq!(r.norm(), 2.5, epsilon = 1e-5);
        assert!(r.y > 0.0);

        assert_eq!(reflect_velocity(&Vec3::zeros(), &Vec3::y(), 0.5), Vec3::zeros());
    }

    #[test]
    fn test_split_timestep() {
        let (pre, post) = split_timestep(1.0, 4.0, 0.2);
        assert_relative_eq!(pre, 0.05);
        assert_relative_eq!(post, 0.15);

        // Impact beyond the travel distance still yields a positive remainder
        let (_, post) = split_timestep(6.0, 4.0, 0.2);
        assert_relative_eq!(post, 0.1);

        assert_eq!(split_timestep(1.0, 0.0, 0.2), (0.0, 0.0));
    }

    #[test]
    fn test_free_flight_is_euler_step() {
        let terrain = Terrain::flat(64, 64, 1.0).unwrap();
        let grid = empty_grid(&terrain);
        let config = still_config();
        let integrator = StepIntegrator::new(&terrain, &grid, &config);
        let mut rng = StdRng::seed_from_u64(1);

        let mut particle = Particle::new(Vec3::new(20.0, 40.0, 20.0), Vec3::new(2.0, 0.0, -1.0));
        let before = particle;
        let outcome = integrator.advance(&mut particle, &mut rng);

        assert_eq!(outcome, StepOutcome::Free);
        let dt = config.timestep;
        let v = before.velocity + Vec3::new(0.0, config.gravity * dt, 0.0);
        assert_relative_eq!(particle.position, before.position + v * dt, epsilon = 1e-5);
        assert_relative_eq!(particle.velocity, v * (1.0 - config.damping), epsilon = 1e-5);
    }

    #[test]
    fn test_out_of_domain_leaves_particle_untouched() {
        let terrain = Terrain::flat(32, 32, 1.0).unwrap();
        let grid = empty_grid(&terrain);
        let config = still_config();
        let integrator = StepIntegrator::new(&terrain, &grid, &config);
        let mut rng = StdRng::seed_from_u64(1);

        // Heading into the outer ring
        let mut particle = Particle::new(Vec3::new(30.5, 20.0, 10.0), Vec3::new(6.0, 0.0, 0.0));
        let before = particle;
        assert_eq!(integrator.advance(&mut particle, &mut rng), StepOutcome::OutOfDomain);
        assert_eq!(particle, before);

        let mut particle = Particle::new(Vec3::new(0.5, 20.0, 10.0), Vec3::zeros());
        assert_eq!(integrator.advance(&mut particle, &mut rng), StepOutcome::OutOfDomain);
    }

    #[test]
    fn test_ground_bounce() {
        let terrain = Terrain::flat(64, 64, 1.0).unwrap();
        let grid = empty_grid(&terrain);
        let config = still_config();
        let integrator = StepIntegrator::new(&terrain, &grid, &config);
        let mut rng = StdRng::seed_from_u64(7);

        let mut particle = Particle::new(Vec3::new(10.5, 0.9, 10.5), Vec3::new(0.0, -10.0, 0.0));
        let incoming = (particle.velocity + Vec3::new(0.0, config.gravity * config.timestep, 0.0)).norm();

        assert_eq!(integrator.advance(&mut particle, &mut rng), StepOutcome::Collided);
        assert!(particle.velocity.y > 0.0);
        assert!(particle.velocity.norm() <= incoming * config.restitution + 1e-4);
        assert!(particle.position.y >= GROUND_CLEARANCE);
    }

    #[test]
    fn test_boundary_normal_falls_back_to_up() {
        // Contact on the outer ring where the terrain has no normal
        let terrain = Terrain::flat(16, 16, 1.0).unwrap();
        let grid = empty_grid(&terrain);
        let config = still_config();
        let integrator = StepIntegrator::new(&terrain, &grid, &config);
        let mut rng = StdRng::seed_from_u64(3);

        let mut particle = Particle::new(Vec3::new(0.5, 0.5, 5.5), Vec3::new(8.0, -1.0, 0.0));
        assert_eq!(integrator.advance(&mut particle, &mut rng), StepOutcome::Collided);
        assert!(vec3::is_finite(&particle.velocity));
        assert!(particle.velocity.y > 0.0);
    }

    #[test]
    fn test_stickiness_stops_slow_impacts() {
        let terrain = Terrain::flat(64, 64, 1.0).unwrap();
        let grid = empty_grid(&terrain);
        let config = SimulationConfig {
            stickiness: 5.0,
            ..still_config()
        };
        let integrator = StepIntegrator::new(&terrain, &grid, &config);
        let mut rng = StdRng::seed_from_u64(11);

        let mut particle = Particle::new(Vec3::new(10.5, 0.9, 10.5), Vec3::new(0.5, -1.0, 0.0));
        assert_eq!(integrator.advance(&mut particle, &mut rng), StepOutcome::Collided);
        assert_eq!(particle.velocity, Vec3::zeros());
        assert!(particle.position.y >= GROUND_CLEARANCE);
    }

    #[test]
    fn test_clumping_pulls_toward_grid_mean() {
        let terrain = Terrain::flat(64, 64, 1.0).unwrap();
        let mut grid = empty_grid(&terrain);
        let flow = Vec3::new(10.0, 0.0, 0.0);
        grid.register(&Vec3::new(10.5, 0.9, 10.5), &flow);
        grid.finalize();

        let config = SimulationConfig {
            clumping: 1.0,
            ..still_config()
        };
        let integrator = StepIntegrator::new(&terrain, &grid, &config);
        let mut rng = StdRng::seed_from_u64(5);

        let mut particle = Particle::new(Vec3::new(10.5, 0.9, 10.5), Vec3::new(0.0, -10.0, 0.0));
        assert_eq!(integrator.advance(&mut particle, &mut rng), StepOutcome::Collided);
        assert_relative_eq!(particle.velocity, flow, epsilon = 1e-5);
    }

    #[test]
    fn test_turbulence_is_horizontal_and_seeded() {
        let terrain = Terrain::flat(64, 64, 1.0).unwrap();
        let mut grid = empty_grid(&terrain);
        for _ in 0..50 {
            grid.register(&Vec3::new(10.5, 0.9, 10.5), &Vec3::zeros());
        }
        grid.finalize();

        let config = SimulationConfig {
            turbulence: 1.0,
            clumping: 0.0,
            viscosity: 0.0,
            ..Default::default()
        };
        let integrator = StepIntegrator::new(&terrain, &grid, &config);

        let start = Particle::new(Vec3::new(10.5, 0.9, 10.5), Vec3::new(0.0, -10.0, 0.0));
        let mut a = start;
        let mut b = start;
        integrator.advance(&mut a, &mut StdRng::seed_from_u64(99));
        integrator.advance(&mut b, &mut StdRng::seed_from_u64(99));
        assert_eq!(a, b);

        let mut calm = start;
        let calm_config = still_config();
        StepIntegrator::new(&terrain, &grid, &calm_config).advance(&mut calm, &mut StdRng::seed_from_u64(99));
        assert_relative_eq!(a.velocity.y, calm.velocity.y, epsilon = 1e-5);
        assert!(a.velocity.x != calm.velocity.x || a.velocity.z != calm.velocity.z);
    }
}
