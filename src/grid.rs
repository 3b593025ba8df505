use crate::cell_layout::{CellIndex, CellLayout};
use crate::particles::CoordinateProvider;
use anyhow::Result;
use mps_common::{Dimension, Vec3};
use rayon::prelude::*;
use std::collections::HashMap;

/// Uniform grid over one coordinate snapshot, used to find particles within `grid_width` of each other.
///
/// Cells are `grid_width` wide, so all neighbors of a particle lie in its own cell or one of the
/// 8 (2D) or 26 (3D) adjacent cells. The grid owns a copy of the coordinates and mask and is never
/// updated: build a new one after particles move.
///
/// ```ignore
/// let grid = Grid::new(radius, &positions, &valid, Dimension::Three)?;
/// for i in 0..grid.size() {
///     if !valid[i] { continue; }
///     for j in grid.neighbors(i)? {
///         interaction(i, j);
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Grid {
    dimension: Dimension,
    size: usize,
    grid_width: f64,
    grid_width_sq: f64,
    coordinates: Vec<Vec3>,
    // Only valid coordinates occupy cells.
    valid_coordinates: Vec<bool>,
    lower_bounds: Vec3,
    higher_bounds: Vec3,
    layout: CellLayout,
    /// (hash, particle index), stably sorted by hash
    grid_hash: Vec<(u64, usize)>,
    /// hash -> half-open range into `grid_hash`
    begin_hash: HashMap<u64, (usize, usize)>,
}

impl Grid {
    /// Builds the grid. Fails if `grid_width` is not a positive finite number or the mask length
    /// differs from the coordinate count. An empty or all-invalid input yields an empty grid.
    pub fn new(
        grid_width: f64,
        coordinates: &[Vec3],
        valid_coordinates: &[bool],
        dimension: Dimension,
    ) -> Result<Self> {
        if !(grid_width.is_finite() && grid_width > 0.0) {
            anyhow::bail!("Grid width must be positive and finite, got {}.", grid_width);
        }
        if coordinates.len() != valid_coordinates.len() {
            anyhow::bail!(
                "Coordinate count ({}) does not match validity mask length ({}).",
                coordinates.len(),
                valid_coordinates.len()
            );
        }

        let (lower_bounds, higher_bounds) = valid_bounds(coordinates, valid_coordinates, dimension)?;
        let layout = CellLayout::new(dimension, lower_bounds, higher_bounds, grid_width)?;

        let mut grid = Self {
            dimension,
            size: coordinates.len(),
            grid_width,
            grid_width_sq: grid_width * grid_width,
            coordinates: coordinates.to_vec(),
            valid_coordinates: valid_coordinates.to_vec(),
            lower_bounds,
            higher_bounds,
            layout,
            grid_hash: Vec::new(),
            begin_hash: HashMap::new(),
        };
        grid.set_hash();

        log::debug!(
            "Built {} grid: {} particles, {} valid, {} occupied cells, grid number {:?}.",
            dimension,
            grid.size,
            grid.grid_hash.len(),
            grid.begin_hash.len(),
            grid.layout.grid_number()
        );
        Ok(grid)
    }

    /// Builds a grid from a provider's current coordinates and mask.
    pub fn from_provider<P: CoordinateProvider + ?Sized>(grid_width: f64, provider: &P) -> Result<Self> {
        Self::new(grid_width, provider.coordinates(), &provider.valid_mask(), provider.dimension())
    }

    // Hashes every valid particle, sorts by hash and records each bucket's range.
    fn set_hash(&mut self) {
        self.grid_hash = self
            .coordinates
            .iter()
            .zip(&self.valid_coordinates)
            .enumerate()
            .filter(|(_, (_, &valid))| valid)
            .map(|(index, (&position, _))| (self.layout.hash(self.layout.cell_of(position)), index))
            .collect();
        // Stable, so particles inside a bucket stay in index order.
        self.grid_hash.sort_by_key(|&(hash, _)| hash);

        self.begin_hash.clear();
        let mut begin = 0;
        for end in 1..=self.grid_hash.len() {
            if end == self.grid_hash.len() || self.grid_hash[end].0 != self.grid_hash[begin].0 {
                self.begin_hash.insert(self.grid_hash[begin].0, (begin, end));
                begin = end;
            }
        }
    }

    #[inline(always)]
    fn bucket(&self, hash: u64) -> Option<&[(u64, usize)]> {
        self.begin_hash
            .get(&hash)
            .map(|&(begin, end)| &self.grid_hash[begin..end])
    }

    /// Calls `f` for every valid particle other than `index` in the cell block around `index`.
    /// With `exact` set, only particles closer than `grid_width` are passed on.
    ///
    /// `index` itself is not checked against the mask: querying a ghost uses whatever coordinates
    /// its row holds.
    #[inline(always)]
    fn scan<F>(&self, index: usize, exact: bool, mut f: F) -> Result<()>
    where
        F: FnMut(usize),
    {
        if index >= self.size {
            anyhow::bail!("Particle index {} out of range for grid of size {}.", index, self.size);
        }
        if self.begin_hash.is_empty() {
            return Ok(());
        }

        let position = self.coordinates[index];
        let center = self.layout.cell_of(position);
        self.layout.for_each_adjacent_hash(center, |hash| {
            let Some(bucket) = self.bucket(hash) else { return };
            for &(_, neighbor_idx) in bucket {
                // Don't compare particle to itself
                if neighbor_idx == index {
                    continue;
                }
                if exact {
                    let dist_sq = position.distance_squared_in(self.coordinates[neighbor_idx], self.dimension);
                    if dist_sq >= self.grid_width_sq {
                        continue;
                    }
                }
                f(neighbor_idx);
            }
        });
        Ok(())
    }

    /// Calls `f` for every valid particle within `grid_width` of particle `index`.
    pub fn for_each_neighbor<F>(&self, index: usize, f: F) -> Result<()>
    where
        F: FnMut(usize),
    {
        self.scan(index, true, f)
    }

    /// Indices of the valid particles strictly closer than `grid_width` to particle `index`,
    /// in bucket scan order.
    pub fn neighbors(&self, index: usize) -> Result<Vec<usize>> {
        let mut neighbors = Vec::new();
        self.neighbors_into(index, &mut neighbors)?;
        Ok(neighbors)
    }

    /// Like [`Grid::neighbors`], but reuses `neighbors`. The buffer is cleared first.
    pub fn neighbors_into(&self, index: usize, neighbors: &mut Vec<usize>) -> Result<()> {
        neighbors.clear();
        self.scan(index, true, |j| neighbors.push(j))
    }

    /// Valid particles in the cells adjacent to particle `index`, without the distance filter.
    /// Always a superset of [`Grid::neighbors`].
    pub fn neighbors_in_box(&self, index: usize) -> Result<Vec<usize>> {
        let mut neighbors = Vec::new();
        self.neighbors_in_box_into(index, &mut neighbors)?;
        Ok(neighbors)
    }

    pub fn neighbors_in_box_into(&self, index: usize, neighbors: &mut Vec<usize>) -> Result<()> {
        neighbors.clear();
        self.scan(index, false, |j| neighbors.push(j))
    }

    /// Neighbor lists for every particle, computed in parallel. Invalid particles get an empty list.
    pub fn neighbor_lists(&self) -> Vec<Vec<usize>> {
        (0..self.size)
            .into_par_iter()
            .map(|index| {
                let mut neighbors = Vec::new();
                if self.valid_coordinates[index] {
                    if let Err(e) = self.neighbors_into(index, &mut neighbors) {
                        log::error!("Neighbor query for particle {} failed: {}", index, e);
                    }
                }
                neighbors
            })
            .collect()
    }

    /// Occupied cells with the particles in each, in ascending hash order.
    pub fn occupied_cells(&self) -> impl Iterator<Item = (CellIndex, Vec<usize>)> + '_ {
        let mut ranges: Vec<(usize, usize)> = self.begin_hash.values().copied().collect();
        ranges.sort_unstable();
        ranges.into_iter().map(move |(begin, end)| {
            let hash = self.grid_hash[begin].0;
            let members = self.grid_hash[begin..end].iter().map(|&(_, i)| i).collect();
            (self.layout.unhash(hash), members)
        })
    }

    pub fn occupied_cell_count(&self) -> usize {
        self.begin_hash.len()
    }

    /// Cell holding `position`, or `None` if it falls outside the grid.
    pub fn cell_of(&self, position: Vec3) -> Option<CellIndex> {
        let cell = self.layout.cell_of(position);
        self.layout.contains(cell).then_some(cell)
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    #[inline]
    pub fn grid_width(&self) -> f64 {
        self.grid_width
    }

    pub fn grid_number(&self) -> [u64; 3] {
        self.layout.grid_number()
    }

    pub fn lower_bounds(&self) -> Vec3 {
        self.lower_bounds
    }

    pub fn higher_bounds(&self) -> Vec3 {
        self.higher_bounds
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.valid_coordinates.get(index).copied().unwrap_or(false)
    }
}

/// Per-axis min/max over the valid rows. Inactive axes stay 0; no valid rows gives a zero box.
fn valid_bounds(coordinates: &[Vec3], valid: &[bool], dimension: Dimension) -> Result<(Vec3, Vec3)> {
    let mut bounds: Option<(Vec3, Vec3)> = None;
    for (index, (&position, _)) in coordinates.iter().zip(valid).enumerate().filter(|(_, (_, &v))| v) {
        let position = match dimension {
            Dimension::Two => Vec3::planar(position.x, position.y),
            Dimension::Three => position,
        };
        if !(position.x.is_finite() && position.y.is_finite() && position.z.is_finite()) {
            anyhow::bail!("Valid particle {} has a non-finite coordinate {:?}.", index, position);
        }
        bounds = Some(match bounds {
            None => (position, position),
            Some((lower, higher)) => (lower.min(position), higher.max(position)),
        });
    }
    Ok(bounds.unwrap_or((Vec3::zero(), Vec3::zero())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::distr::Uniform;
    use std::collections::BTreeSet;

    fn sorted(mut v: Vec<usize>) -> Vec<usize> {
        v.sort_unstable();
        v
    }

    fn random_points(n: usize, extent: f64, seed: u64) -> Vec<Vec3> {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Uniform::new(-extent, extent).unwrap();
        (0..n)
            .map(|_| Vec3::new(rng.sample(dist), rng.sample(dist), rng.sample(dist)))
            .collect()
    }

    fn brute_force(points: &[Vec3], valid: &[bool], index: usize, radius: f64, dimension: Dimension) -> Vec<usize> {
        (0..points.len())
            .filter(|&j| j != index && valid[j])
            .filter(|&j| points[index].distance_squared_in(points[j], dimension) < radius * radius)
            .collect()
    }

    fn example_points() -> Vec<Vec3> {
        vec![
            Vec3::planar(0.0, 0.0),
            Vec3::planar(0.5, 0.0),
            Vec3::planar(0.0, 0.5),
            Vec3::planar(5.0, 5.0),
            Vec3::planar(5.5, 5.0),
        ]
    }

    #[test]
    fn test_planar_example_scenario() {
        let points = example_points();
        let grid = Grid::new(1.0, &points, &[true; 5], Dimension::Two).unwrap();
        assert_eq!(sorted(grid.neighbors(0).unwrap()), vec![1, 2]);
        // (0.5, 0) and (0, 0.5) are sqrt(0.5) apart, inside the radius.
        assert_eq!(sorted(grid.neighbors(1).unwrap()), vec![0, 2]);
        assert_eq!(sorted(grid.neighbors(2).unwrap()), vec![0, 1]);
        assert_eq!(grid.neighbors(3).unwrap(), vec![4]);
        assert_eq!(grid.neighbors(4).unwrap(), vec![3]);

        assert_eq!(grid.size(), 5);
        assert_eq!(grid.dimension(), Dimension::Two);
        assert_eq!(grid.grid_width(), 1.0);
    }

    #[test]
    fn test_construction_errors() {
        let points = example_points();
        assert!(Grid::new(0.0, &points, &[true; 5], Dimension::Two).is_err());
        assert!(Grid::new(-1.0, &points, &[true; 5], Dimension::Two).is_err());
        assert!(Grid::new(f64::NAN, &points, &[true; 5], Dimension::Two).is_err());
        assert!(Grid::new(1.0, &points, &[true; 4], Dimension::Two).is_err());
    }

    #[test]
    fn test_out_of_range_query_is_an_error() {
        let grid = Grid::new(1.0, &example_points(), &[true; 5], Dimension::Two).unwrap();
        assert!(grid.neighbors(5).is_err());
        assert!(grid.neighbors_in_box(usize::MAX).is_err());
    }

    #[test]
    fn test_empty_and_all_invalid_grids() {
        let empty = Grid::new(1.0, &[], &[], Dimension::Three).unwrap();
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.occupied_cell_count(), 0);
        assert!(empty.neighbors(0).is_err());

        let points = example_points();
        let grid = Grid::new(1.0, &points, &[false; 5], Dimension::Two).unwrap();
        assert_eq!(grid.occupied_cell_count(), 0);
        for i in 0..5 {
            assert!(grid.neighbors(i).unwrap().is_empty());
            assert!(grid.neighbors_in_box(i).unwrap().is_empty());
        }
        assert!(grid.neighbor_lists().iter().all(Vec::is_empty));
    }

    #[test]
    fn test_invalid_particle_is_excluded_everywhere() {
        let points = example_points();
        let valid = [true, false, true, true, true];
        let grid = Grid::new(1.0, &points, &valid, Dimension::Two).unwrap();
        assert_eq!(grid.neighbors(0).unwrap(), vec![2]);
        assert_eq!(grid.neighbors(2).unwrap(), vec![0]);
        // Queried as a source anyway: it still sees its neighbors but never itself.
        assert_eq!(grid.neighbors(1).unwrap(), vec![0, 2]);
        assert!(grid.neighbor_lists()[1].is_empty());
        assert!(grid.occupied_cells().all(|(_, members)| !members.contains(&1)));
    }

    #[test]
    fn test_invalid_rows_do_not_widen_bounds() {
        let points = vec![
            Vec3::planar(1.0, 1.0),
            Vec3::planar(2.0, 3.0),
            Vec3::planar(f64::NAN, -1.0e12),
        ];
        let grid = Grid::new(0.5, &points, &[true, true, false], Dimension::Two).unwrap();
        assert_eq!(grid.lower_bounds(), Vec3::planar(1.0, 1.0));
        assert_eq!(grid.higher_bounds(), Vec3::planar(2.0, 3.0));
        assert_eq!(grid.grid_number(), [3, 5, 0]);
        // Ghost row lies far outside the grid; querying it finds nothing and does not panic.
        assert!(grid.neighbors(2).unwrap().is_empty());
    }

    #[test]
    fn test_non_finite_valid_coordinate_is_rejected() {
        let points = vec![Vec3::planar(0.0, 0.0), Vec3::planar(f64::INFINITY, 0.0)];
        assert!(Grid::new(1.0, &points, &[true, true], Dimension::Two).is_err());
    }

    #[test]
    fn test_unrepresentable_cell_counts_are_rejected() {
        // Extent / width overflows to infinity along x.
        let huge_extent = vec![Vec3::zero(), Vec3::new(1e300, 0.0, 0.0)];
        assert!(Grid::new(1e-300, &huge_extent, &[true; 2], Dimension::Three).is_err());

        // Each axis fits, but (1e7 + 1)^3 cells overflow u64.
        let huge_box = vec![Vec3::zero(), Vec3::new(1e7, 1e7, 1e7)];
        assert!(Grid::new(1.0, &huge_box, &[true; 2], Dimension::Three).is_err());

        // The same box in 2D stays within range.
        let planar = Grid::new(1.0, &huge_box, &[true; 2], Dimension::Two).unwrap();
        assert_eq!(planar.grid_number(), [10_000_001, 10_000_001, 0]);
    }

    #[test]
    fn test_distance_cutoff_is_strict() {
        let points = vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.999, 0.0)];
        let grid = Grid::new(1.0, &points, &[true; 3], Dimension::Three).unwrap();
        assert_eq!(grid.neighbors(0).unwrap(), vec![2]);
        assert!(grid.neighbors_in_box(0).unwrap().contains(&1));
    }

    #[test]
    fn test_matches_brute_force_in_both_dimensions() {
        for (dimension, seed) in [(Dimension::Two, 11), (Dimension::Three, 12)] {
            let points = random_points(1500, 4.0, seed);
            let mut rng = StdRng::seed_from_u64(seed + 100);
            let valid: Vec<bool> = (0..points.len()).map(|_| rng.random_bool(0.9)).collect();
            let radius = 0.45;
            let grid = Grid::new(radius, &points, &valid, dimension).unwrap();

            for i in (0..points.len()).filter(|&i| valid[i]) {
                let found = grid.neighbors(i).unwrap();
                let unique: BTreeSet<usize> = found.iter().copied().collect();
                assert_eq!(unique.len(), found.len(), "duplicate neighbor for particle {}", i);
                assert_eq!(sorted(found), brute_force(&points, &valid, i, radius, dimension), "particle {}", i);
            }
        }
    }

    #[test]
    fn test_symmetry_and_box_superset() {
        let points = random_points(800, 3.0, 5);
        let valid = vec![true; points.len()];
        let grid = Grid::new(0.6, &points, &valid, Dimension::Three).unwrap();
        let lists = grid.neighbor_lists();

        for (i, list) in lists.iter().enumerate() {
            assert!(!list.contains(&i));
            let boxed: BTreeSet<usize> = grid.neighbors_in_box(i).unwrap().into_iter().collect();
            for &j in list {
                assert!(lists[j].contains(&i), "{} sees {} but not the reverse", i, j);
                assert!(boxed.contains(&j));
                assert!(points[i].distance_in(points[j], Dimension::Three) < 0.6);
            }
        }
    }

    #[test]
    fn test_planar_grid_ignores_third_axis() {
        let points = random_points(400, 2.0, 21);
        let flattened: Vec<Vec3> = points.iter().map(|p| Vec3::planar(p.x, p.y)).collect();
        let valid = vec![true; points.len()];

        let noisy = Grid::new(0.3, &points, &valid, Dimension::Two).unwrap();
        let flat = Grid::new(0.3, &flattened, &valid, Dimension::Two).unwrap();
        assert_eq!(noisy.grid_number(), flat.grid_number());
        assert_eq!(noisy.neighbor_lists(), flat.neighbor_lists());
    }

    #[test]
    fn test_construction_is_deterministic() {
        let points = random_points(600, 2.0, 33);
        let valid = vec![true; points.len()];
        let a = Grid::new(0.4, &points, &valid, Dimension::Three).unwrap();
        let b = Grid::new(0.4, &points, &valid, Dimension::Three).unwrap();
        assert_eq!(a.neighbor_lists(), b.neighbor_lists());
        for i in 0..points.len() {
            assert_eq!(a.neighbors_in_box(i).unwrap(), b.neighbors_in_box(i).unwrap());
        }
    }

    #[test]
    fn test_occupied_cells_partition_valid_particles() {
        let points = random_points(300, 1.5, 8);
        let valid: Vec<bool> = (0..points.len()).map(|i| i % 7 != 0).collect();
        let grid = Grid::new(0.5, &points, &valid, Dimension::Three).unwrap();

        let mut seen = Vec::new();
        for (cell, members) in grid.occupied_cells() {
            for &i in &members {
                assert_eq!(grid.cell_of(points[i]), Some(cell));
            }
            seen.extend(members);
        }
        let expected: Vec<usize> = (0..points.len()).filter(|&i| valid[i]).collect();
        assert_eq!(sorted(seen), expected);
    }

    #[test]
    fn test_grid_is_a_snapshot() {
        let mut points = example_points();
        let grid = Grid::new(1.0, &points, &[true; 5], Dimension::Two).unwrap();
        points[1] = Vec3::planar(100.0, 100.0);
        assert_eq!(sorted(grid.neighbors(0).unwrap()), vec![1, 2]);
    }

    #[test]
    fn test_buffer_is_cleared_between_queries() {
        let grid = Grid::new(1.0, &example_points(), &[true; 5], Dimension::Two).unwrap();
        let mut buffer = vec![99, 98];
        grid.neighbors_into(3, &mut buffer).unwrap();
        assert_eq!(buffer, vec![4]);
        grid.neighbors_in_box_into(4, &mut buffer).unwrap();
        assert_eq!(buffer, vec![3]);
    }

    #[test]
    fn test_from_provider_uses_ghost_mask() {
        let mut state = crate::particles::ParticleState::new(Dimension::Two, example_points());
        state.set_ghost_particle(4).unwrap();
        let grid = Grid::from_provider(1.0, &state).unwrap();
        assert!(grid.neighbors(3).unwrap().is_empty());
        assert!(!grid.is_valid(4));
    }
}
