//! Grid-based proximity search.
//!
//! Three call shapes share one grid geometry per call:
//!
//! * [`find_within`]: which candidates lie within the cutoff of any target.
//!   The candidate grid is split into slabs along its longest axis and the
//!   slabs are searched in parallel with rayon.
//! * [`WithinSearcher`]: the source grid is built once and queried with many
//!   target sets or points ([`find_within_point`] is the one-shot form).
//! * [`find_contacts`] / [`find_contacts_between`]: every pair within the
//!   cutoff, inside one selection or across two.
//!
//! Distances are compared squared. Periodic searches use minimum-image
//! distances from the frame's [`PeriodicBox`].

use std::ops::Range;

use rayon::prelude::*;

use crate::grid::{Grid, GridEntry, GridSpec, ParticleSet};
use crate::periodic_box::{PeriodicBox, PBC_FULL};
use crate::selection::error::SelectionError;
use crate::util::{difference_sorted, distance_squared, sort_unique, union_sorted};

/// Parameters of one proximity search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchConfig {
    /// Inclusive distance cutoff. A non-positive cutoff finds nothing.
    pub cutoff: f64,
    /// Use minimum-image distances over the frame's periodic box.
    pub periodic: bool,
    /// Upper bound on parallel slabs; defaults to the rayon pool size.
    pub max_threads: Option<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.0,
            periodic: false,
            max_threads: None,
        }
    }
}

impl SearchConfig {
    pub fn new(cutoff: f64) -> Self {
        Self {
            cutoff,
            ..Default::default()
        }
    }

    pub fn periodic(mut self, periodic: bool) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = Some(n);
        self
    }

    fn thread_budget(&self) -> usize {
        self.max_threads
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    fn is_degenerate(&self) -> bool {
        !(self.cutoff > 0.0)
    }

    fn check_box(&self, pbox: &PeriodicBox) -> Result<(), SelectionError> {
        if self.periodic && !pbox.is_periodic() {
            return Err(SelectionError::configuration(
                "Periodic search requested, but there is no periodic box",
            ));
        }
        Ok(())
    }
}

/// Pairs found by a contact search, sorted by pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contacts {
    pub pairs: Vec<[usize; 2]>,
    /// Distance of each pair, when requested.
    pub distances: Option<Vec<f64>>,
}

impl Contacts {
    fn empty(with_distances: bool) -> Self {
        Self {
            pairs: Vec::new(),
            distances: with_distances.then(Vec::new),
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

// ============================================================================
// DISTANCE KERNEL AND WORK PARTITIONING
// ============================================================================

struct Metric<'a> {
    pbox: Option<&'a PeriodicBox>,
    cutoff_sq: f64,
}

impl<'a> Metric<'a> {
    fn new(config: &SearchConfig, pbox: &'a PeriodicBox) -> Self {
        Self {
            pbox: config.periodic.then_some(pbox),
            cutoff_sq: config.cutoff * config.cutoff,
        }
    }

    #[inline(always)]
    fn distance_squared(&self, p: &[f64; 3], q: &[f64; 3]) -> f64 {
        match self.pbox {
            Some(b) => b.distance_squared(p, q, PBC_FULL),
            None => distance_squared(p, q),
        }
    }

    /// Squared distance if within the cutoff.
    #[inline(always)]
    fn check(&self, p: &[f64; 3], q: &[f64; 3]) -> Option<f64> {
        let d = self.distance_squared(p, q);
        (d <= self.cutoff_sq).then_some(d)
    }
}

/// Split the longest grid axis into at most `threads` contiguous slabs.
fn partition(dims: [usize; 3], threads: usize) -> (usize, Vec<Range<usize>>) {
    let mut axis = 0;
    for a in 1..3 {
        if dims[a] > dims[axis] {
            axis = a;
        }
    }
    let len = dims[axis];
    let nt = threads.min(len).max(1);
    let slabs = (0..nt).map(|t| t * len / nt..(t + 1) * len / nt).collect();
    (axis, slabs)
}

fn for_each_cell(dims: [usize; 3], axis: usize, slab: Range<usize>, mut f: impl FnMut([usize; 3])) {
    let (o1, o2) = ((axis + 1) % 3, (axis + 2) % 3);
    for s in slab {
        for i in 0..dims[o1] {
            for j in 0..dims[o2] {
                let mut c = [0usize; 3];
                c[axis] = s;
                c[o1] = i;
                c[o2] = j;
                f(c);
            }
        }
    }
}

/// Run `work` over every slab and concatenate the per-slab buffers.
///
/// A single slab runs on the calling thread.
fn run_slabs<T, F>(dims: [usize; 3], threads: usize, work: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize, Range<usize>) -> Vec<T> + Sync,
{
    let (axis, slabs) = partition(dims, threads);
    log::debug!(
        "Grid {:?}: searching {} slab(s) along axis {}",
        dims,
        slabs.len(),
        axis
    );
    if slabs.len() == 1 {
        return slabs
            .into_iter()
            .flat_map(|slab| work(axis, slab))
            .collect();
    }
    slabs
        .into_par_iter()
        .map(|slab| work(axis, slab))
        .flatten()
        .collect()
}

/// Cell `c` followed by its distinct neighbors.
fn neighborhood(spec: &GridSpec, c: [usize; 3]) -> Vec<[usize; 3]> {
    let mut around = spec.neighbors(c);
    around.push(c);
    around
}

// ============================================================================
// WITHIN
// ============================================================================

/// Candidates within `config.cutoff` of any target.
///
/// With `include_self` the target indices are added to the result, otherwise
/// they are removed from it. The result is sorted and duplicate-free.
pub fn find_within(
    config: &SearchConfig,
    candidates: &ParticleSet,
    targets: &ParticleSet,
    pbox: &PeriodicBox,
    include_self: bool,
) -> Result<Vec<usize>, SelectionError> {
    let found = near_candidates(config, candidates, targets, pbox)?;
    let own = targets.sorted_indices();
    Ok(if include_self {
        union_sorted(&found, &own)
    } else {
        difference_sorted(&found, &own)
    })
}

fn near_candidates(
    config: &SearchConfig,
    candidates: &ParticleSet,
    targets: &ParticleSet,
    pbox: &PeriodicBox,
) -> Result<Vec<usize>, SelectionError> {
    config.check_box(pbox)?;
    if config.is_degenerate() || candidates.is_empty() || targets.is_empty() {
        return Ok(Vec::new());
    }
    let spec = if config.periodic {
        GridSpec::periodic(pbox, config.cutoff, candidates.len() + targets.len())?
    } else {
        match GridSpec::bounded_pair(candidates, targets, config.cutoff) {
            Some(spec) => spec,
            None => return Ok(Vec::new()),
        }
    };

    let cand_grid = spec.populate(candidates, false);
    let target_grid = spec.populate(targets, false);
    let metric = Metric::new(config, pbox);

    let local = run_slabs(spec.dims(), config.thread_budget(), |axis, slab| {
        let mut found = Vec::new();
        for_each_cell(spec.dims(), axis, slab, |c| {
            let here = cand_grid.cell(c);
            if here.is_empty() {
                return;
            }
            let around = neighborhood(&spec, c);
            for entry in here {
                let hit = around.iter().any(|&m| {
                    target_grid
                        .cell(m)
                        .iter()
                        .any(|t| metric.check(&entry.pos, &t.pos).is_some())
                });
                if hit {
                    found.push(entry.index);
                }
            }
        });
        found
    });

    let mut out: Vec<usize> = local.into_iter().map(|k| candidates.index(k)).collect();
    sort_unique(&mut out);
    Ok(out)
}

/// Candidates within `config.cutoff` of a single point.
pub fn find_within_point(
    config: &SearchConfig,
    candidates: &ParticleSet,
    point: &[f64; 3],
    pbox: &PeriodicBox,
) -> Result<Vec<usize>, SelectionError> {
    let searcher = WithinSearcher::new(*config, *candidates, pbox)?;
    Ok(searcher.search_within_point(point))
}

/// A source grid built once and searched against many targets.
///
/// Each query marks source particles as consumed so none is reported twice;
/// the marks live only for that query, so the grid is reusable.
pub struct WithinSearcher<'a> {
    config: SearchConfig,
    source: ParticleSet<'a>,
    pbox: PeriodicBox,
    spec: Option<GridSpec>,
    grid: Grid,
}

impl<'a> WithinSearcher<'a> {
    pub fn new(
        config: SearchConfig,
        source: ParticleSet<'a>,
        pbox: &PeriodicBox,
    ) -> Result<Self, SelectionError> {
        config.check_box(pbox)?;
        let spec = if config.is_degenerate() || source.is_empty() {
            None
        } else if config.periodic {
            Some(GridSpec::periodic(pbox, config.cutoff, source.len())?)
        } else {
            GridSpec::bounded_single(&source, config.cutoff)
        };
        let grid = match &spec {
            Some(spec) => {
                log::debug!(
                    "Source grid {:?} for {} particles (cutoff {})",
                    spec.dims(),
                    source.len(),
                    config.cutoff
                );
                spec.populate(&source, false)
            }
            None => Grid::new([1, 1, 1]),
        };
        Ok(Self {
            config,
            source,
            pbox: pbox.clone(),
            spec,
            grid,
        })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Source particles within the cutoff of any target particle.
    pub fn search_within(&self, target: &ParticleSet, include_self: bool) -> Vec<usize> {
        let found = self.collect_near(target);
        let own = target.sorted_indices();
        if include_self {
            union_sorted(&found, &own)
        } else {
            difference_sorted(&found, &own)
        }
    }

    /// Source particles within the cutoff of `point`.
    pub fn search_within_point(&self, point: &[f64; 3]) -> Vec<usize> {
        let coords = [*point];
        let index = [0usize];
        ParticleSet::new(&coords, &index)
            .map(|target| self.collect_near(&target))
            .unwrap_or_default()
    }

    fn collect_near(&self, target: &ParticleSet) -> Vec<usize> {
        let Some(spec) = &self.spec else {
            return Vec::new();
        };
        let target_grid = spec.populate(target, false);
        if target_grid.is_empty() {
            return Vec::new();
        }
        let metric = Metric::new(&self.config, &self.pbox);
        let mut used = vec![false; self.source.len()];
        let mut found = Vec::new();

        let dims = spec.dims();
        for_each_cell(dims, 0, 0..dims[0], |c| {
            let targets = target_grid.cell(c);
            if targets.is_empty() {
                return;
            }
            for m in neighborhood(spec, c) {
                for s in self.grid.cell(m) {
                    if used[s.index] {
                        continue;
                    }
                    if targets
                        .iter()
                        .any(|t| metric.check(&s.pos, &t.pos).is_some())
                    {
                        used[s.index] = true;
                        found.push(self.source.index(s.index));
                    }
                }
            }
        });
        sort_unique(&mut found);
        found
    }
}

// ============================================================================
// CONTACTS
// ============================================================================

#[inline(always)]
fn ordered(a: usize, b: usize) -> [usize; 2] {
    if a < b {
        [a, b]
    } else {
        [b, a]
    }
}

fn finish_contacts(mut found: Vec<([usize; 2], f64)>, with_distances: bool) -> Contacts {
    found.sort_unstable_by(|x, y| x.0.cmp(&y.0));
    let pairs = found.iter().map(|(p, _)| *p).collect();
    let distances = with_distances.then(|| found.iter().map(|(_, d)| d.sqrt()).collect());
    Contacts { pairs, distances }
}

/// All unordered pairs within one selection closer than the cutoff.
///
/// Pairs hold particle indices when `absolute_index` is set, otherwise
/// positions within `selection`; each pair is `[lower, higher]` and appears
/// once. No particle is paired with itself; a selection listing a particle
/// twice is an index error.
pub fn find_contacts(
    config: &SearchConfig,
    selection: &ParticleSet,
    pbox: &PeriodicBox,
    absolute_index: bool,
    with_distances: bool,
) -> Result<Contacts, SelectionError> {
    config.check_box(pbox)?;
    selection.check_unique()?;
    if config.is_degenerate() || selection.len() < 2 {
        return Ok(Contacts::empty(with_distances));
    }
    let spec = if config.periodic {
        GridSpec::periodic(pbox, config.cutoff, selection.len())?
    } else {
        match GridSpec::bounded_single(selection, config.cutoff) {
            Some(spec) => spec,
            None => return Ok(Contacts::empty(with_distances)),
        }
    };
    let grid = spec.populate(selection, absolute_index);
    let metric = Metric::new(config, pbox);

    let found = run_slabs(spec.dims(), config.thread_budget(), |axis, slab| {
        let mut out = Vec::new();
        let mut emit = |a: &GridEntry, b: &GridEntry| {
            if let Some(d) = metric.check(&a.pos, &b.pos) {
                out.push((ordered(a.index, b.index), d));
            }
        };
        for_each_cell(spec.dims(), axis, slab, |c| {
            let here = grid.cell(c);
            if here.is_empty() {
                return;
            }
            for (i, a) in here.iter().enumerate() {
                for b in &here[i + 1..] {
                    emit(a, b);
                }
            }
            for m in spec.forward_neighbors(c) {
                for a in here {
                    for b in grid.cell(m) {
                        emit(a, b);
                    }
                }
            }
        });
        out
    });

    Ok(finish_contacts(found, with_distances))
}

/// All pairs `[a, b]` with `a` from `first` and `b` from `second` closer
/// than the cutoff.
///
/// A particle present in both selections pairs with itself at distance 0.
/// Each selection must list a particle at most once.
pub fn find_contacts_between(
    config: &SearchConfig,
    first: &ParticleSet,
    second: &ParticleSet,
    pbox: &PeriodicBox,
    absolute_index: bool,
    with_distances: bool,
) -> Result<Contacts, SelectionError> {
    config.check_box(pbox)?;
    first.check_unique()?;
    second.check_unique()?;
    if config.is_degenerate() || first.is_empty() || second.is_empty() {
        return Ok(Contacts::empty(with_distances));
    }
    let spec = if config.periodic {
        GridSpec::periodic(pbox, config.cutoff, first.len() + second.len())?
    } else {
        match GridSpec::bounded_pair(first, second, config.cutoff) {
            Some(spec) => spec,
            None => return Ok(Contacts::empty(with_distances)),
        }
    };
    let grid1 = spec.populate(first, absolute_index);
    let grid2 = spec.populate(second, absolute_index);
    let metric = Metric::new(config, pbox);

    let found = run_slabs(spec.dims(), config.thread_budget(), |axis, slab| {
        let mut out = Vec::new();
        for_each_cell(spec.dims(), axis, slab, |c| {
            let here = grid1.cell(c);
            if here.is_empty() {
                return;
            }
            for m in neighborhood(&spec, c) {
                for b in grid2.cell(m) {
                    for a in here {
                        if let Some(d) = metric.check(&a.pos, &b.pos) {
                            out.push(([a.index, b.index], d));
                        }
                    }
                }
            }
        });
        out
    });

    Ok(finish_contacts(found, with_distances))
}
