//! Uniform 3D cell grid used by the proximity search.
//!
//! A [`GridSpec`] fixes the geometry (bounds, cell counts, periodicity) and is
//! shared by every grid built for one search call, so cell coordinates from
//! two grids refer to the same region of space.

use rustc_hash::FxHashSet;

use crate::periodic_box::PeriodicBox;
use crate::selection::error::SelectionError;

/// Upper bound on the total number of cells in one grid.
pub const MAX_GRID_CELLS: usize = 1 << 24;

/// Initial per-axis estimate never exceeds this before cutoff adjustment.
const MAX_INITIAL_AXIS: usize = 256;

/// Half of the 26 neighbor directions: every direction whose first
/// non-zero component is positive.
const HALF_SHELL: [[i64; 3]; 13] = [
    [1, 0, 0],
    [1, 1, 0],
    [1, -1, 0],
    [1, 0, 1],
    [1, 0, -1],
    [1, 1, 1],
    [1, 1, -1],
    [1, -1, 1],
    [1, -1, -1],
    [0, 1, 0],
    [0, 1, 1],
    [0, 1, -1],
    [0, 0, 1],
];

// ============================================================================
// PARTICLE SETS
// ============================================================================

/// A subset of particles: positions `indices` into a coordinate array.
///
/// Searches address members by *local* position `k` in `0..len()`; the
/// particle index of member `k` is `indices[k]`.
#[derive(Debug, Clone, Copy)]
pub struct ParticleSet<'a> {
    coords: &'a [[f64; 3]],
    indices: &'a [usize],
}

impl<'a> ParticleSet<'a> {
    pub fn new(coords: &'a [[f64; 3]], indices: &'a [usize]) -> Result<Self, SelectionError> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= coords.len()) {
            return Err(SelectionError::index(format!(
                "Particle index {} out of range ({} coordinates)",
                bad,
                coords.len()
            )));
        }
        Ok(Self { coords, indices })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline(always)]
    pub fn position(&self, k: usize) -> &'a [f64; 3] {
        &self.coords[self.indices[k]]
    }

    #[inline(always)]
    pub fn index(&self, k: usize) -> usize {
        self.indices[k]
    }

    pub fn indices(&self) -> &'a [usize] {
        self.indices
    }

    /// Fails with an index error if any particle appears twice.
    pub fn check_unique(&self) -> Result<(), SelectionError> {
        let mut seen = FxHashSet::default();
        match self.indices.iter().find(|&&i| !seen.insert(i)) {
            Some(&dup) => Err(SelectionError::index(format!(
                "Particle index {} appears more than once in the selection",
                dup
            ))),
            None => Ok(()),
        }
    }

    /// Sorted, duplicate-free copy of the member indices.
    pub fn sorted_indices(&self) -> Vec<usize> {
        let mut v = self.indices.to_vec();
        crate::util::sort_unique(&mut v);
        v
    }

    /// Tight axis-aligned bounding box, `None` for an empty set.
    pub fn bounding_box(&self) -> Option<([f64; 3], [f64; 3])> {
        if self.is_empty() {
            return None;
        }
        let mut min = [f64::MAX; 3];
        let mut max = [f64::MIN; 3];
        for k in 0..self.len() {
            let p = self.position(k);
            for d in 0..3 {
                min[d] = min[d].min(p[d]);
                max[d] = max[d].max(p[d]);
            }
        }
        Some((min, max))
    }
}

/// Intersection of two intervals, `None` if they do not overlap.
pub fn overlap_1d(a1: f64, a2: f64, b1: f64, b2: f64) -> Option<(f64, f64)> {
    let lo = a1.max(b1);
    let hi = a2.min(b2);
    if lo < hi {
        Some((lo, hi))
    } else {
        None
    }
}

// ============================================================================
// GRID SIZING
// ============================================================================

/// Choose cell counts for a region `[min, max)` holding `n_particles`.
///
/// The initial estimate gives roughly one particle per cell with cells close
/// to cubic. Each axis is then adjusted until a cell's lab-space thickness
/// lies in `[cutoff, 2 * cutoff]` (or the axis has one cell). With `pbox`
/// set, `min`/`max` are box coordinates and the thickness is measured
/// perpendicular to the other two box vectors.
pub fn set_grid_size(
    min: &[f64; 3],
    max: &[f64; 3],
    n_particles: usize,
    cutoff: f64,
    pbox: Option<&PeriodicBox>,
) -> [usize; 3] {
    let ext = [max[0] - min[0], max[1] - min[1], max[2] - min[2]];
    let n = n_particles.max(1) as f64;

    let mut dims = [1usize; 3];
    for a in 0..3 {
        let (b, c) = ((a + 1) % 3, (a + 2) % 3);
        let v = (n * ext[a] * ext[a] / (ext[b] * ext[c])).cbrt().floor();
        if v.is_finite() && v >= 1.0 {
            dims[a] = (v as usize).min(MAX_INITIAL_AXIS);
        }
    }

    if !(cutoff > 0.0) || ext.iter().any(|&e| !(e > 0.0)) {
        return dims;
    }

    let lab_edge = |axis: usize, cells: usize| -> f64 {
        let len = ext[axis] / cells as f64;
        match pbox {
            Some(b) => b.box_to_lab_length(axis, len),
            None => len,
        }
    };

    for a in 0..3 {
        while dims[a] > 1 && lab_edge(a, dims[a]) < cutoff {
            dims[a] -= 1;
        }
        if lab_edge(a, dims[a]) > 2.0 * cutoff {
            let others: usize = (0..3).filter(|&o| o != a).map(|o| dims[o]).product();
            let limit = (MAX_GRID_CELLS / others.max(1)).max(1);
            let needed = (lab_edge(a, 1) / (2.0 * cutoff)).ceil() as usize;
            dims[a] = needed.max(dims[a]).min(limit);
            while dims[a] < limit && lab_edge(a, dims[a]) > 2.0 * cutoff {
                dims[a] += 1;
            }
            if dims[a] == limit && lab_edge(a, dims[a]) > 2.0 * cutoff {
                log::warn!(
                    "Grid axis {} capped at {} cells; cells are larger than twice the cutoff",
                    a,
                    limit
                );
            }
        }
    }
    dims
}

// ============================================================================
// GRID GEOMETRY
// ============================================================================

/// Geometry shared by the grids of one search.
#[derive(Debug, Clone)]
pub struct GridSpec {
    dims: [usize; 3],
    min: [f64; 3],
    max: [f64; 3],
    periodic: bool,
    pbox: PeriodicBox,
}

impl GridSpec {
    /// Grid over a lab-space region `[min, max]` without wrap-around.
    pub fn bounded(min: [f64; 3], max: [f64; 3], cutoff: f64, n_particles: usize) -> Self {
        let dims = set_grid_size(&min, &max, n_particles, cutoff, None);
        Self {
            dims,
            min,
            max,
            periodic: false,
            pbox: PeriodicBox::none(),
        }
    }

    /// Grid over the periodic unit cell.
    pub fn periodic(
        pbox: &PeriodicBox,
        cutoff: f64,
        n_particles: usize,
    ) -> Result<Self, SelectionError> {
        if !pbox.is_periodic() {
            return Err(SelectionError::configuration(
                "Periodic search requested, but there is no periodic box",
            ));
        }
        let min = [0.0; 3];
        let max = pbox.extents();
        let dims = set_grid_size(&min, &max, n_particles, cutoff, Some(pbox));
        Ok(Self {
            dims,
            min,
            max,
            periodic: true,
            pbox: pbox.clone(),
        })
    }

    /// Grid over the region enclosing both sets, padded by `cutoff`.
    ///
    /// Returns `None` when the padded regions do not overlap, in which case
    /// no pair can be within `cutoff`.
    pub fn bounded_pair(a: &ParticleSet, b: &ParticleSet, cutoff: f64) -> Option<Self> {
        let (amin, amax) = a.bounding_box()?;
        let (bmin, bmax) = b.bounding_box()?;
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for d in 0..3 {
            let (lo, hi) = overlap_1d(
                amin[d] - cutoff,
                amax[d] + cutoff,
                bmin[d] - cutoff,
                bmax[d] + cutoff,
            )?;
            min[d] = lo;
            max[d] = hi;
        }
        Some(Self::bounded(min, max, cutoff, a.len() + b.len()))
    }

    /// Grid around one set padded by `cutoff`; `None` for an empty set or a
    /// degenerate region.
    pub fn bounded_single(set: &ParticleSet, cutoff: f64) -> Option<Self> {
        let (mut min, mut max) = set.bounding_box()?;
        for d in 0..3 {
            min[d] -= cutoff;
            max[d] += cutoff;
            if !(max[d] > min[d]) {
                return None;
            }
        }
        Some(Self::bounded(min, max, cutoff, set.len()))
    }

    /// Periodic grid with caller-chosen cell counts over an orthogonal box.
    pub fn custom(dims: [usize; 3], pbox: &PeriodicBox) -> Result<Self, SelectionError> {
        if !pbox.is_periodic() {
            return Err(SelectionError::configuration(
                "Custom grid requires a periodic box",
            ));
        }
        if pbox.is_triclinic() {
            return Err(SelectionError::configuration(
                "Custom grids are not implemented for triclinic boxes",
            ));
        }
        if dims.iter().any(|&n| n == 0) {
            return Err(SelectionError::configuration(
                "Custom grid needs at least one cell per axis",
            ));
        }
        Ok(Self {
            dims,
            min: [0.0; 3],
            max: pbox.extents(),
            periodic: true,
            pbox: pbox.clone(),
        })
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn num_cells(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Lab-space thickness of a cell along each axis.
    pub fn cell_edges(&self) -> [f64; 3] {
        let mut e = [0.0; 3];
        for a in 0..3 {
            let len = (self.max[a] - self.min[a]) / self.dims[a] as f64;
            e[a] = if self.periodic {
                self.pbox.box_to_lab_length(a, len)
            } else {
                len
            };
        }
        e
    }

    #[inline(always)]
    pub fn linear(&self, c: [usize; 3]) -> usize {
        (c[0] * self.dims[1] + c[1]) * self.dims[2] + c[2]
    }

    /// Cell holding point `p`, `None` if it lies outside a bounded grid.
    pub fn cell_of(&self, p: &[f64; 3]) -> Option<[usize; 3]> {
        let q = if self.periodic {
            self.pbox.lab_to_box(p)
        } else {
            *p
        };
        let mut cell = [0usize; 3];
        for a in 0..3 {
            let n = self.dims[a];
            let t = (q[a] - self.min[a]) / (self.max[a] - self.min[a]) * n as f64;
            if self.periodic {
                cell[a] = (t.floor() as i64).rem_euclid(n as i64) as usize;
            } else {
                if !(t >= 0.0 && t <= n as f64) {
                    return None;
                }
                cell[a] = (t.floor() as usize).min(n - 1);
            }
        }
        Some(cell)
    }

    /// Bucket the members of `set` into cells.
    ///
    /// Entries carry the member's local position, or its particle index when
    /// `absolute_index` is set. Members outside a bounded grid are dropped.
    pub fn populate(&self, set: &ParticleSet, absolute_index: bool) -> Grid {
        let mut grid = Grid::new(self.dims);
        for k in 0..set.len() {
            let pos = set.position(k);
            if let Some(c) = self.cell_of(pos) {
                let index = if absolute_index { set.index(k) } else { k };
                let id = self.linear(c);
                grid.cells[id].push(GridEntry { index, pos: *pos });
            }
        }
        grid
    }

    /// Cell reached from `c` by offset `d`, wrapping on periodic grids.
    fn offset(&self, c: [usize; 3], d: [i64; 3]) -> Option<[usize; 3]> {
        let mut out = [0usize; 3];
        for a in 0..3 {
            let n = self.dims[a] as i64;
            let v = c[a] as i64 + d[a];
            out[a] = if self.periodic {
                v.rem_euclid(n) as usize
            } else if v < 0 || v >= n {
                return None;
            } else {
                v as usize
            };
        }
        Some(out)
    }

    /// All distinct cells adjacent to `c` (up to 26), excluding `c` itself.
    ///
    /// On periodic grids with fewer than three cells along an axis, several
    /// directions land on the same cell; each is reported once.
    pub fn neighbors(&self, c: [usize; 3]) -> Vec<[usize; 3]> {
        let mut out = Vec::with_capacity(26);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    if let Some(m) = self.offset(c, [dx, dy, dz]) {
                        if m != c && !out.contains(&m) {
                            out.push(m);
                        }
                    }
                }
            }
        }
        out
    }

    /// Neighbors of `c` such that every unordered pair of distinct adjacent
    /// cells is produced from exactly one of its two cells.
    pub fn forward_neighbors(&self, c: [usize; 3]) -> Vec<[usize; 3]> {
        if self.periodic && self.dims.iter().any(|&n| n < 3) {
            let lc = self.linear(c);
            self.neighbors(c)
                .into_iter()
                .filter(|&m| self.linear(m) > lc)
                .collect()
        } else {
            HALF_SHELL
                .iter()
                .filter_map(|&d| self.offset(c, d))
                .collect()
        }
    }
}

// ============================================================================
// GRID STORAGE
// ============================================================================

/// One bucketed particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEntry {
    pub index: usize,
    pub pos: [f64; 3],
}

/// Dense 3D array of cells.
#[derive(Debug, Clone)]
pub struct Grid {
    dims: [usize; 3],
    cells: Vec<Vec<GridEntry>>,
}

impl Grid {
    pub fn new(dims: [usize; 3]) -> Self {
        Self {
            dims,
            cells: vec![Vec::new(); dims[0] * dims[1] * dims[2]],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    #[inline(always)]
    pub fn cell(&self, c: [usize; 3]) -> &[GridEntry] {
        &self.cells[(c[0] * self.dims[1] + c[1]) * self.dims[2] + c[2]]
    }

    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

}

/// Periodic grid with caller-chosen dimensions, for binning rather than
/// cutoff search.
#[derive(Debug, Clone)]
pub struct CustomGrid {
    spec: GridSpec,
    grid: Grid,
}

impl CustomGrid {
    pub fn new(dims: [usize; 3], pbox: &PeriodicBox) -> Result<Self, SelectionError> {
        let spec = GridSpec::custom(dims, pbox)?;
        let grid = Grid::new(dims);
        Ok(Self { spec, grid })
    }

    /// Replace the grid contents with the members of `set`, wrapped into the box.
    pub fn fill(&mut self, set: &ParticleSet, absolute_index: bool) {
        self.grid = self.spec.populate(set, absolute_index);
    }

    pub fn dims(&self) -> [usize; 3] {
        self.spec.dims()
    }

    pub fn cell(&self, x: usize, y: usize, z: usize) -> &[GridEntry] {
        self.grid.cell([x, y, z])
    }
}
