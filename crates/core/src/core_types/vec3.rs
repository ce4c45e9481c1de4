//! Vector type alias for positions, velocities and normals.

use nalgebra::Vector3;

/// 3D vector used for world positions, velocities and surface normals.
///
/// The engine is y-up: `x` runs along terrain columns, `z` along terrain
/// rows and `y` is elevation.
pub type Vec3 = Vector3<f32>;

/// Length of the x/z (ground-plane) part of `v`
#[inline]
pub fn horizontal_norm(v: &Vec3) -> f32 {
    (v.x * v.x + v.z * v.z).sqrt()
}

/// Whether every component of `v` is finite
#[inline]
pub fn is_finite(v: &Vec3) -> bool {
    v.x.is_finite() && v.y.is_finite() && v.z.is_finite()
}
