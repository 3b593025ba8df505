use serde::{Deserialize, Serialize};
use std::fmt;

/// Spatial dimension of an analysis. Fixed for the lifetime of a grid or particle set.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Dimension {
    Two,
    Three,
}

impl Dimension {
    /// Number of coordinate axes that take part in hashing and distance tests.
    #[inline(always)]
    pub fn active_axes(self) -> usize {
        match self {
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }
}

impl TryFrom<u32> for Dimension {
    type Error = anyhow::Error;

    fn try_from(value: u32) -> anyhow::Result<Self> {
        match value {
            2 => Ok(Dimension::Two),
            3 => Ok(Dimension::Three),
            other => anyhow::bail!("dimension must be 2 or 3, got {}.", other),
        }
    }
}

impl From<Dimension> for u32 {
    fn from(dimension: Dimension) -> u32 {
        dimension.active_axes() as u32
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}D", self.active_axes())
    }
}
