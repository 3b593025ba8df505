pub mod config;
pub mod dimension;
pub mod search_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{NeighborSearchConfig, DomainConfig, ParticlesConfig, SearchConfig, OutputConfig};
pub use dimension::Dimension;
pub use search_params::SearchParams;
pub use snapshot::NeighborSnapshot;
pub use vecmath::{Vec3, clamp};
