use serde::{Serialize, Deserialize};
use crate::vecmath::Vec3;

/// Neighbor statistics of one search step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborSnapshot {
    /// Step number at which the snapshot was taken.
    pub step: u32,
    /// Number of particles that took part in the search (ghosts excluded).
    pub valid_particle_count: u32,
    /// Number of grid cells holding at least one particle.
    pub occupied_cells: u32,
    pub mean_neighbors: f64,
    pub max_neighbors: u32,
    /// `neighbor_counts_distribution[n]` is the number of valid particles with exactly `n` neighbors.
    pub neighbor_counts_distribution: Vec<u32>,
    /// Wall time of grid construction, in milliseconds.
    pub build_ms: f64,
    /// Wall time of the parallel query loop, in milliseconds.
    pub query_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<Vec3>>,
}
