//! Ray-marching collision test against the heightfield
//!
//! A particle's displacement over one step is walked cell by cell along its
//! dominant horizontal axis. At each probe the straight-line height of the
//! path is compared with the terrain (plus [`GROUND_CLEARANCE`]); the first
//! probe where the ground reaches the path is the impact.

use crate::core_types::Vec3;
use crate::grid::{Terrain, GROUND_CLEARANCE};

/// Point where a traced path met the ground
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Impact {
    /// World position of the contact, at ground height plus clearance
    pub position: Vec3,
    /// Terrain column of the probed cell
    pub col: usize,
    /// Terrain row of the probed cell
    pub row: usize,
}

/// Result of tracing a displacement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trace {
    /// The path reached the ground
    Hit(Impact),
    /// The path stayed above the ground for every probe
    Miss,
}

impl Trace {
    /// Whether the trace reported a contact
    pub fn is_hit(&self) -> bool {
        matches!(self, Trace::Hit(_))
    }

    /// The contact, if any
    pub fn impact(&self) -> Option<&Impact> {
        match self {
            Trace::Hit(impact) => Some(impact),
            Trace::Miss => None,
        }
    }
}

/// Horizontal axis a ray is marched along
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MajorAxis {
    X,
    Z,
}

/// How a displacement will be probed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayPlan {
    /// Whole cells crossed along x (at least 1 when both axes are 0)
    pub steps_x: u32,
    /// Whole cells crossed along z (at least 1 when both axes are 0)
    pub steps_z: u32,
    /// Axis advanced by one cell per probe
    pub major: MajorAxis,
    /// Direction of travel along the major axis (-1, 0 or 1)
    pub sign: f32,
    /// Minor-axis advance per probe
    pub slope: f32,
}

impl RayPlan {
    /// Number of probes
    pub fn steps(&self) -> u32 {
        self.steps_x.max(self.steps_z)
    }
}

/// `signum` that maps zero to zero
#[inline]
fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Traces particle displacements against a terrain
#[derive(Debug, Clone, Copy)]
pub struct CollisionTracer<'a> {
    terrain: &'a Terrain,
}

impl<'a> CollisionTracer<'a> {
    /// Create a tracer over `terrain`
    pub fn new(terrain: &'a Terrain) -> Self {
        CollisionTracer { terrain }
    }

    /// Work out step counts, major axis and slope for a displacement
    pub fn plan(&self, start: &Vec3, end: &Vec3) -> RayPlan {
        let cell_size = self.terrain.cell_size();
        let dx = (end.x - start.x) / cell_size;
        let dz = (end.z - start.z) / cell_size;

        let mut steps_x = dx.abs().floor() as u32;
        let mut steps_z = dz.abs().floor() as u32;

        // Near-vertical motion still gets one probe
        if steps_x == 0 && steps_z == 0 {
            steps_x = 1;
            steps_z = 1;
        }

        let (major, major_delta, minor_delta) = if steps_x >= steps_z {
            (MajorAxis::X, dx, dz)
        } else {
            (MajorAxis::Z, dz, dx)
        };
        let sign = sign(major_delta);

        // A zero major delta (including the 0/0 vertical case) walks straight
        let slope = if major_delta == 0.0 || !major_delta.is_finite() {
            0.0
        } else {
            let s = sign * minor_delta / major_delta;
            if s.is_finite() {
                s
            } else {
                0.0
            }
        };

        RayPlan {
            steps_x,
            steps_z,
            major,
            sign,
            slope,
        }
    }

    /// Trace the straight path from `start` to `end`
    ///
    /// Probes outside the terrain interior are skipped rather than ending the
    /// trace. The first probe whose ground height (plus clearance) reaches the
    /// interpolated path height wins.
    pub fn trace(&self, start: &Vec3, end: &Vec3) -> Trace {
        let cell_size = self.terrain.cell_size();
        let plan = self.plan(start, end);
        let steps = plan.steps();

        let start_x = start.x / cell_size;
        let start_z = start.z / cell_size;
        let y_step = (end.y - start.y) / steps as f32;

        let max_col = self.terrain.width() as i64 - 1;
        let max_row = self.terrain.depth() as i64 - 1;

        for i in 0..steps {
            let t = i as f32;
            let (col, row) = match plan.major {
                MajorAxis::X => (
                    (start_x.floor() + plan.sign * t) as i64,
                    (plan.slope * t + start_z).floor() as i64,
                ),
                MajorAxis::Z => (
                    (plan.slope * t + start_x).floor() as i64,
                    (start_z.floor() + plan.sign * t) as i64,
                ),
            };

            if col < 0 || row < 0 || col >= max_col || row >= max_row {
                continue;
            }

            let (col, row) = (col as usize, row as usize);
            let ground = self.terrain.height(col, row) + GROUND_CLEARANCE;
            let path_y = start.y + t * y_step;

            if ground >= path_y {
                return Trace::Hit(Impact {
                    position: Vec3::new(col as f32 * cell_size, ground, row as f32 * cell_size),
                    col,
                    row,
                });
            }
        }

        Trace::Miss
    }
}
