use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::dimension::Dimension;
use crate::search_params::SearchParams;
use crate::vecmath::Vec3;
use std::path::Path;

// Extent of the region particles are placed in
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    pub dimension: Dimension,
    pub width: f64,
    pub height: f64,
    // Ignored for 2D analyses
    #[serde(default = "default_depth")]
    pub depth: f64,
}

// Particle population, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ParticlesConfig {
    pub count: u32,
    #[serde(default)]
    pub ghost_fraction: f64,
    pub placement_seed: u64,
    // Standard deviation of the per-step random walk, as a fraction of the influence radius
    #[serde(default = "default_step_displacement")]
    pub step_displacement: f64,
}

// Neighbor search settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SearchConfig {
    pub influence_radius: f64,
    pub steps: u32,
    #[serde(default = "default_record_interval")]
    pub record_interval_steps: u32,
    // 0 disables the brute-force cross check
    #[serde(default)]
    pub verify_interval_steps: u32,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    pub base_filename: String,
    #[serde(default)]
    pub save_neighbor_counts: bool,
    #[serde(default)]
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

fn default_depth() -> f64 {
    0.0
}

fn default_step_displacement() -> f64 {
    0.1
}

fn default_record_interval() -> u32 {
    1
}

// Main configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NeighborSearchConfig {
    pub domain: DomainConfig,
    pub particles: ParticlesConfig,
    pub search: SearchConfig,
    pub output: OutputConfig,
}

impl NeighborSearchConfig {
    /// Loads the configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;

        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: NeighborSearchConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let radius = self.search.influence_radius;
        if !(radius.is_finite() && radius > 0.0) {
            anyhow::bail!("influence_radius must be positive, got {}.", radius);
        }
        if !(self.domain.width > 0.0 && self.domain.height > 0.0) {
            anyhow::bail!("domain width and height must be positive.");
        }
        if self.domain.dimension == Dimension::Three && !(self.domain.depth > 0.0) {
            anyhow::bail!("domain depth must be positive for a 3D analysis.");
        }
        if !(0.0..1.0).contains(&self.particles.ghost_fraction) {
            anyhow::bail!("ghost_fraction must be in [0, 1), got {}.", self.particles.ghost_fraction);
        }
        if self.particles.step_displacement < 0.0 {
            anyhow::bail!("step_displacement must not be negative.");
        }
        Ok(())
    }

    /// Converts the configuration into parameters used at runtime.
    pub fn get_search_params(&self) -> SearchParams {
        let dimension = self.domain.dimension;
        let depth = match dimension {
            Dimension::Two => 0.0,
            Dimension::Three => self.domain.depth,
        };
        let influence_radius = self.search.influence_radius;

        SearchParams {
            dimension,
            domain_min: Vec3::zero(),
            domain_max: Vec3::new(self.domain.width, self.domain.height, depth),
            influence_radius,
            step_sigma: self.particles.step_displacement * influence_radius,
        }
    }
}
