use crate::grid::Grid;
use crate::particles::{CoordinateProvider, ParticleState};
use anyhow::Result;
use log::{debug, error, info, trace};
use mps_common::{Dimension, NeighborSearchConfig, NeighborSnapshot, SearchParams, Vec3};
use rand::distr::Uniform;
use rand::prelude::*;
use rand::seq::SliceRandom;
use rand_distr::Normal;
use rayon::prelude::*;
use std::time::Instant;

/// Drives the grid the way a particle solver does: move particles, rebuild, query every active particle.
pub struct NeighborSearch {
    /// The configuration this run was created from.
    pub config: NeighborSearchConfig,
    params: SearchParams,
    /// Particle positions and ghost flags.
    pub state: ParticleState,
    /// Host-side RNG for placement and ghost selection.
    pub rng: StdRng,
    /// Number of completed steps.
    pub current_step: u32,
    /// Neighbor count per particle from the latest step. Ghosts hold 0.
    neighbor_counts: Vec<u32>,
    occupied_cells: usize,
    build_ms: f64,
    query_ms: f64,
    recorded_snapshots: Vec<NeighborSnapshot>,
}

impl NeighborSearch {
    /// Places the configured particles, marks the ghost fraction and runs the first search.
    pub fn new(config: NeighborSearchConfig) -> Result<Self> {
        config.validate()?;
        let params = config.get_search_params();
        let mut rng = StdRng::seed_from_u64(config.particles.placement_seed);

        let positions = place_initial_particles(&params, config.particles.count as usize, &mut rng)?;
        let mut state = ParticleState::new(params.dimension, positions);

        // Ghosts are a random subset, chosen once.
        let ghost_count = (state.len() as f64 * config.particles.ghost_fraction).floor() as usize;
        let mut order: Vec<usize> = (0..state.len()).collect();
        order.shuffle(&mut rng);
        for &index in &order[..ghost_count] {
            state.set_ghost_particle(index)?;
        }
        info!(
            "Placed {} particles ({} ghosts) in a {} domain {:?}.",
            state.len(),
            ghost_count,
            params.dimension,
            params.domain_max
        );

        let neighbor_counts = vec![0; state.len()];
        let mut search = Self {
            config,
            params,
            state,
            rng,
            current_step: 0,
            neighbor_counts,
            occupied_cells: 0,
            build_ms: 0.0,
            query_ms: 0.0,
            recorded_snapshots: Vec::new(),
        };
        search.search()?;
        Ok(search)
    }

    /// Moves the particles, then rebuilds the grid and recounts neighbors.
    pub fn step(&mut self) -> Result<()> {
        self.current_step += 1;
        self.move_particles_parallel()?;
        self.search()
    }

    // Builds a fresh grid over the current positions and queries every active particle in parallel.
    fn search(&mut self) -> Result<()> {
        let build_start = Instant::now();
        let grid = Grid::from_provider(self.params.influence_radius, &self.state)?;
        self.build_ms = build_start.elapsed().as_secs_f64() * 1000.0;
        self.occupied_cells = grid.occupied_cell_count();

        let query_start = Instant::now();
        let state = &self.state;
        self.neighbor_counts = (0..state.len())
            .into_par_iter()
            .map(|idx| -> Result<u32> {
                if state.is_ghost(idx) {
                    return Ok(0);
                }
                let mut neighbor_count = 0u32;
                grid.for_each_neighbor(idx, |_| neighbor_count += 1)?;
                Ok(neighbor_count)
            })
            .collect::<Result<Vec<u32>>>()?;
        self.query_ms = query_start.elapsed().as_secs_f64() * 1000.0;

        trace!(
            "Step {}: grid built in {:.2} ms, queries took {:.2} ms.",
            self.current_step,
            self.build_ms,
            self.query_ms
        );

        let interval = self.config.search.verify_interval_steps;
        if interval > 0 && self.current_step % interval == 0 {
            let mismatches = verify_against_brute_force(&grid, &self.state)?;
            if mismatches > 0 {
                error!("Step {}: {} particles disagree with the brute-force search.", self.current_step, mismatches);
                anyhow::bail!("Grid neighbor search disagrees with brute force at step {}.", self.current_step);
            }
            debug!("Step {}: grid results match brute force.", self.current_step);
        }
        Ok(())
    }

    /// Random-walk update of every active particle, clamped to the domain.
    fn move_particles_parallel(&mut self) -> Result<()> {
        let sigma = self.params.step_sigma;
        if sigma <= 0.0 {
            return Ok(());
        }
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| anyhow::anyhow!("Invalid step displacement {}: {}", sigma, e))?;
        let seed = self.config.particles.placement_seed;
        let step = self.current_step;
        let params = &self.params;
        let ghost: Vec<bool> = (0..self.state.len()).map(|i| self.state.is_ghost(i)).collect();

        self.state
            .positions_mut()
            .par_iter_mut()
            .enumerate()
            .filter(|(idx, _)| !ghost[*idx])
            .for_each(|(idx, position)| {
                // Per-particle stream, so results do not depend on thread scheduling
                let mut rng = StdRng::seed_from_u64(
                    seed.wrapping_add((idx as u64).wrapping_mul(0x9E37_79B9))
                        .wrapping_add(step as u64),
                );
                let mut moved = *position
                    + Vec3::new(rng.sample(&normal), rng.sample(&normal), rng.sample(&normal));
                if params.dimension == Dimension::Two {
                    moved.z = 0.0;
                }
                *position = moved.clamp(params.domain_min, params.domain_max);
            });
        Ok(())
    }

    /// Collects statistics of the latest step and stores them.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let valid: Vec<u32> = (0..self.state.len())
            .filter(|&i| !self.state.is_ghost(i))
            .map(|i| self.neighbor_counts[i])
            .collect();

        let max_neighbors = valid.iter().copied().max().unwrap_or(0);
        let mut distribution = vec![0u32; max_neighbors as usize + 1];
        for &count in &valid {
            distribution[count as usize] += 1;
        }
        let mean_neighbors = if valid.is_empty() {
            0.0
        } else {
            valid.iter().map(|&c| c as f64).sum::<f64>() / valid.len() as f64
        };

        let positions = self
            .config
            .output
            .save_positions_in_snapshot
            .then(|| self.state.coordinates().to_vec());

        let snapshot = NeighborSnapshot {
            step: self.current_step,
            valid_particle_count: valid.len() as u32,
            occupied_cells: self.occupied_cells as u32,
            mean_neighbors,
            max_neighbors,
            neighbor_counts_distribution: distribution,
            build_ms: self.build_ms,
            query_ms: self.query_ms,
            positions,
        };
        debug!(
            "Snapshot at step {}: mean {:.2} neighbors, max {}, {} occupied cells.",
            snapshot.step, snapshot.mean_neighbors, snapshot.max_neighbors, snapshot.occupied_cells
        );
        self.recorded_snapshots.push(snapshot);
        Ok(())
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<NeighborSnapshot> {
        &self.recorded_snapshots
    }

    /// Neighbor count per particle from the latest step.
    pub fn neighbor_counts(&self) -> &[u32] {
        &self.neighbor_counts
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    pub fn config(&self) -> &NeighborSearchConfig {
        &self.config
    }

    pub fn last_timings_ms(&self) -> (f64, f64) {
        (self.build_ms, self.query_ms)
    }
}

/// O(N²) cross check of a grid. Returns how many active particles got a different neighbor set.
pub fn verify_against_brute_force(grid: &Grid, state: &ParticleState) -> Result<usize> {
    let positions = state.coordinates();
    let dimension = grid.dimension();
    let radius_sq = grid.grid_width() * grid.grid_width();

    let mismatches = (0..state.len())
        .into_par_iter()
        .filter(|&i| !state.is_ghost(i))
        .map(|i| -> Result<usize> {
            let mut found = grid.neighbors(i)?;
            found.sort_unstable();
            let expected: Vec<usize> = (0..positions.len())
                .filter(|&j| j != i && !state.is_ghost(j))
                .filter(|&j| positions[i].distance_squared_in(positions[j], dimension) < radius_sq)
                .collect();
            Ok(usize::from(found != expected))
        })
        .collect::<Result<Vec<usize>>>()?;
    Ok(mismatches.into_iter().sum())
}

/// Jittered placement: the domain is split into bins, bins are shuffled and one particle is sampled per bin.
fn place_initial_particles(params: &SearchParams, count: usize, rng: &mut StdRng) -> Result<Vec<Vec3>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let axes = params.dimension.active_axes();
    let per_axis = ((count as f64).powf(1.0 / axes as f64).ceil() as usize).max(1);
    let total_bins = per_axis.pow(axes as u32);

    let mut bins: Vec<usize> = (0..total_bins).collect();
    bins.shuffle(rng);
    bins.truncate(count);

    let extent = params.domain_max - params.domain_min;
    let bin_size = extent * (1.0 / per_axis as f64);
    let mut positions = Vec::with_capacity(count);
    for bin in bins {
        let mut position = Vec3::zero();
        let mut rest = bin;
        for axis in 0..axes {
            let slot = rest % per_axis;
            rest /= per_axis;
            let start = params.domain_min.axis(axis) + slot as f64 * bin_size.axis(axis);
            let dist = Uniform::new(start, start + bin_size.axis(axis))?;
            let value = rng.sample(dist);
            match axis {
                0 => position.x = value,
                1 => position.y = value,
                _ => position.z = value,
            }
        }
        positions.push(position);
    }
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dimension: u32, count: u32, ghost_fraction: f64) -> NeighborSearchConfig {
        let toml = format!(
            r#"
            [domain]
            dimension = {dimension}
            width = 6.0
            height = 4.0
            depth = 3.0

            [particles]
            count = {count}
            ghost_fraction = {ghost_fraction:?}
            placement_seed = 42
            step_displacement = 0.2

            [search]
            influence_radius = 0.5
            steps = 3
            verify_interval_steps = 1

            [output]
            base_filename = "test_run"
            "#
        );
        NeighborSearchConfig::from_toml_str(&toml).unwrap()
    }

    #[test]
    fn test_particles_stay_inside_domain() {
        for dimension in [2, 3] {
            let mut search = NeighborSearch::new(config(dimension, 400, 0.0)).unwrap();
            for _ in 0..3 {
                search.step().unwrap();
            }
            let max = search.params().domain_max;
            for p in search.state.coordinates() {
                assert!(p.x >= 0.0 && p.x <= max.x && p.y >= 0.0 && p.y <= max.y);
                assert!(p.z >= 0.0 && p.z <= max.z);
            }
        }
    }

    #[test]
    fn test_ghost_fraction_is_applied_and_ghosts_have_no_neighbors() {
        let search = NeighborSearch::new(config(3, 500, 0.2)).unwrap();
        assert_eq!(search.state.valid_count(), 400);
        for i in (0..search.state.len()).filter(|&i| search.state.is_ghost(i)) {
            assert_eq!(search.neighbor_counts()[i], 0);
        }
    }

    #[test]
    fn test_steps_pass_brute_force_verification() {
        let mut search = NeighborSearch::new(config(2, 700, 0.1)).unwrap();
        for _ in 0..3 {
            search.step().unwrap();
        }
        assert_eq!(search.current_step, 3);
    }

    #[test]
    fn test_snapshot_histogram_counts_valid_particles() {
        let mut search = NeighborSearch::new(config(3, 300, 0.1)).unwrap();
        search.record_snapshot().unwrap();
        let snapshot = &search.get_recorded_snapshots()[0];
        assert_eq!(snapshot.valid_particle_count, 270);
        assert_eq!(snapshot.neighbor_counts_distribution.iter().sum::<u32>(), 270);
        assert_eq!(snapshot.neighbor_counts_distribution.len(), snapshot.max_neighbors as usize + 1);
        assert!(snapshot.positions.is_none());
    }

    #[test]
    fn test_same_seed_gives_same_counts() {
        let mut a = NeighborSearch::new(config(3, 250, 0.05)).unwrap();
        let mut b = NeighborSearch::new(config(3, 250, 0.05)).unwrap();
        a.step().unwrap();
        b.step().unwrap();
        assert_eq!(a.neighbor_counts(), b.neighbor_counts());
        assert_eq!(a.state.coordinates(), b.state.coordinates());
    }

    #[test]
    fn test_empty_population() {
        let mut search = NeighborSearch::new(config(2, 0, 0.0)).unwrap();
        search.step().unwrap();
        search.record_snapshot().unwrap();
        assert_eq!(search.get_recorded_snapshots()[0].neighbor_counts_distribution, vec![0]);
    }
}
