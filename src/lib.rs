//! Uniform-grid neighbor search for particle methods.
//!
//! [`grid::Grid`] is built from a coordinate snapshot and a validity mask and answers, for any
//! particle, which other valid particles lie within the grid width. [`search::NeighborSearch`]
//! drives it the way a solver would, one rebuild per step.

pub mod cell_layout;
pub mod grid;
pub mod particles;
pub mod search;

pub use grid::Grid;
pub use particles::{CoordinateProvider, ParticleState};
pub use search::NeighborSearch;
