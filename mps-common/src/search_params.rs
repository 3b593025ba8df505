use serde::{Deserialize, Serialize};
use crate::dimension::Dimension;
use crate::vecmath::Vec3;

/// Runtime parameters derived from the configuration, used on every search step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub dimension: Dimension,
    // Domain
    pub domain_min: Vec3,
    pub domain_max: Vec3,
    // Grid
    pub influence_radius: f64, // Cell width and neighbor cutoff
    // Motion
    pub step_sigma: f64, // Random-walk standard deviation per step
}
