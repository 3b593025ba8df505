use anyhow::Result;
use mps_common::{Dimension, Vec3};

/// Supplies a coordinate snapshot and the validity mask a [`crate::grid::Grid`] is built from.
pub trait CoordinateProvider {
    fn dimension(&self) -> Dimension;
    /// One row per particle, ghosts included.
    fn coordinates(&self) -> &[Vec3];
    /// `true` for particles taking part in the neighbor search.
    fn valid_mask(&self) -> Vec<bool>;
}

/// Particle positions plus ghost flags.
#[derive(Debug)] // Not Clone: large state shouldn't be cloned casually
pub struct ParticleState {
    dimension: Dimension,
    positions: Vec<Vec3>,
    ghost: Vec<bool>,
}

impl ParticleState {
    /// Creates a state with every particle active.
    pub fn new(dimension: Dimension, positions: Vec<Vec3>) -> Self {
        let ghost = vec![false; positions.len()];
        Self { dimension, positions, ghost }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Positions for in-place updates. The particle count cannot change through this.
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.positions
    }

    pub fn is_ghost(&self, index: usize) -> bool {
        self.ghost.get(index).copied().unwrap_or(true)
    }

    pub fn valid_count(&self) -> usize {
        self.ghost.iter().filter(|&&g| !g).count()
    }

    /// Appends `extra_size` particles. New slots start as ghosts at the origin until a caller places them.
    pub fn extend_storage(&mut self, extra_size: usize) {
        if extra_size == 0 {
            return;
        }
        let new_len = self.positions.len() + extra_size;
        log::info!(
            "Resizing particle storage from {} to {} particles.",
            self.positions.len(),
            new_len
        );
        self.positions.resize(new_len, Vec3::zero());
        self.ghost.resize(new_len, true);
    }

    /// Excludes a particle from subsequent grids. Its position is kept but no longer meaningful.
    pub fn set_ghost_particle(&mut self, index: usize) -> Result<()> {
        match self.ghost.get_mut(index) {
            Some(flag) => {
                *flag = true;
                Ok(())
            }
            None => anyhow::bail!(
                "Cannot mark particle {} as ghost: only {} particles exist.",
                index,
                self.ghost.len()
            ),
        }
    }

    /// Places a particle and makes it active again.
    pub fn activate_particle(&mut self, index: usize, position: Vec3) -> Result<()> {
        if index >= self.positions.len() {
            anyhow::bail!(
                "Cannot activate particle {}: only {} particles exist.",
                index,
                self.positions.len()
            );
        }
        self.positions[index] = position;
        self.ghost[index] = false;
        Ok(())
    }
}

impl CoordinateProvider for ParticleState {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn coordinates(&self) -> &[Vec3] {
        &self.positions
    }

    fn valid_mask(&self) -> Vec<bool> {
        self.ghost.iter().map(|&g| !g).collect()
    }
}
