use anyhow::Result;
use mps_common::{Dimension, Vec3};

/// Integer cell coordinates `(dx, dy, dz)`. `dz` is always 0 in 2D.
pub type CellIndex = [i64; 3];

/// Cell arithmetic for one grid: coordinate to cell, cell to hash and back, range checks.
/// Every 2D/3D distinction in the grid goes through `dimension` here.
#[derive(Debug, Clone)]
pub struct CellLayout {
    dimension: Dimension,
    lower_bounds: Vec3,
    grid_width: f64,
    // Cells along each axis. The z entry is 0 for 2D.
    grid_number: [u64; 3],
}

impl CellLayout {
    /// Sizes the layout so that every point inside `[lower_bounds, higher_bounds]` maps to an in-range cell.
    pub fn new(dimension: Dimension, lower_bounds: Vec3, higher_bounds: Vec3, grid_width: f64) -> Result<Self> {
        let mut layout = Self {
            dimension,
            lower_bounds,
            grid_width,
            grid_number: [0; 3],
        };

        // The upper corner uses the same rounding as the particles, so it bounds their indices.
        let top = layout.cell_of(higher_bounds);
        let mut total: u64 = 1;
        for axis in 0..dimension.active_axes() {
            if top[axis] < 0 || top[axis] == i64::MAX {
                anyhow::bail!(
                    "Grid extent along axis {} is not representable (width {}, bounds {:?}..{:?}).",
                    axis, grid_width, lower_bounds, higher_bounds
                );
            }
            let count = top[axis] as u64 + 1;
            total = total.checked_mul(count).ok_or_else(|| {
                anyhow::anyhow!("Grid cell count overflows for width {} over bounds {:?}..{:?}.", grid_width, lower_bounds, higher_bounds)
            })?;
            layout.grid_number[axis] = count;
        }

        Ok(layout)
    }

    #[inline(always)]
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    #[inline(always)]
    pub fn grid_number(&self) -> [u64; 3] {
        self.grid_number
    }

    /// Cell containing `position`: `ceil((x - lower) / width)` on each active axis.
    #[inline(always)]
    pub fn cell_of(&self, position: Vec3) -> CellIndex {
        let mut cell = [0i64; 3];
        for (axis, slot) in cell.iter_mut().enumerate().take(self.dimension.active_axes()) {
            // `as` saturates, and maps NaN to 0
            *slot = ((position.axis(axis) - self.lower_bounds.axis(axis)) / self.grid_width).ceil() as i64;
        }
        cell
    }

    #[inline(always)]
    pub fn contains(&self, cell: CellIndex) -> bool {
        (0..self.dimension.active_axes())
            .all(|axis| cell[axis] >= 0 && (cell[axis] as u64) < self.grid_number[axis])
    }

    /// Folds an in-range cell into its bucket key: `dx + dy * nx (+ dz * nx * ny)`.
    #[inline(always)]
    pub fn hash(&self, cell: CellIndex) -> u64 {
        let [nx, ny, _] = self.grid_number;
        let planar = cell[0] as u64 + cell[1] as u64 * nx;
        match self.dimension {
            Dimension::Two => planar,
            Dimension::Three => planar + cell[2] as u64 * ny * nx,
        }
    }

    /// Exact inverse of [`CellLayout::hash`] for every hash of an in-range cell.
    #[inline(always)]
    pub fn unhash(&self, hash: u64) -> CellIndex {
        let [nx, ny, _] = self.grid_number;
        match self.dimension {
            Dimension::Two => [(hash % nx) as i64, (hash / nx) as i64, 0],
            Dimension::Three => {
                let layer = ny * nx;
                let rest = hash % layer;
                [(rest % nx) as i64, (rest / nx) as i64, (hash / layer) as i64]
            }
        }
    }

    /// Calls `f` with the hash of every in-range cell in the 3x3 (2D) or 3x3x3 (3D) block around `center`,
    /// in ascending (z, y, x) offset order.
    #[inline(always)]
    pub fn for_each_adjacent_hash<F>(&self, center: CellIndex, mut f: F)
    where
        F: FnMut(u64),
    {
        let z_offsets = match self.dimension {
            Dimension::Two => 0..=0,
            Dimension::Three => -1..=1,
        };
        for oz in z_offsets {
            for oy in -1..=1i64 {
                for ox in -1..=1i64 {
                    let cell = [
                        center[0].saturating_add(ox),
                        center[1].saturating_add(oy),
                        center[2].saturating_add(oz),
                    ];
                    if self.contains(cell) {
                        f(self.hash(cell));
                    }
                }
            }
        }
    }
}
