//! Grid-based modules: the terrain heightfield and the particle velocity grid

pub mod terrain;
pub mod velocity_grid;

// Re-export main types
pub use terrain::*;
pub use velocity_grid::*;
