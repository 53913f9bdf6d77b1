//! Evaluator for selection expressions against a particle store.

use std::borrow::Cow;

use rustc_hash::FxHashSet;

use crate::grid::ParticleSet;
use crate::periodic_box::PBC_FULL;
use crate::search::{find_within, SearchConfig};
use crate::selection::ast::*;
use crate::selection::error::SelectionError;
use crate::system::ParticleStore;
use crate::util::{complement_sorted, dot, intersect_sorted, norm, sort_unique, sub, union_sorted};

/// A particle store bound to one frame.
pub struct SelectionContext<'a, S: ParticleStore + ?Sized> {
    store: &'a S,
    frame: usize,
    max_threads: Option<usize>,
}

impl<'a, S: ParticleStore + ?Sized> SelectionContext<'a, S> {
    /// Bind `store` at `frame`.
    ///
    /// Fails with an index error if the frame does not exist or its
    /// coordinate count differs from the particle count.
    pub fn new(store: &'a S, frame: usize) -> Result<Self, SelectionError> {
        if frame >= store.num_frames() {
            return Err(SelectionError::index(format!(
                "Frame {} out of range ({} frames)",
                frame,
                store.num_frames()
            )));
        }
        let n_coords = store.coords(frame).len();
        if n_coords != store.num_particles() {
            return Err(SelectionError::index(format!(
                "Frame {} has {} coordinates for {} particles",
                frame,
                n_coords,
                store.num_particles()
            )));
        }
        Ok(Self {
            store,
            frame,
            max_threads: None,
        })
    }

    /// Bound the number of threads used by `within` searches.
    pub fn with_max_threads(mut self, max_threads: Option<usize>) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn num_particles(&self) -> usize {
        self.store.num_particles()
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    fn candidates<'s>(&self, subspace: Option<&'s [usize]>) -> Cow<'s, [usize]> {
        match subspace {
            Some(s) => Cow::Borrowed(s),
            None => Cow::Owned((0..self.num_particles()).collect()),
        }
    }

    /// Evaluate `expr`, restricted to `subspace` when given.
    ///
    /// `subspace` must be sorted. The result is sorted and duplicate-free.
    pub fn eval(
        &self,
        expr: &Expr,
        subspace: Option<&[usize]>,
    ) -> Result<Vec<usize>, SelectionError> {
        let n = self.num_particles();
        match expr {
            Expr::Or(lhs, rhs) => {
                let a = self.eval(lhs, subspace)?;
                let b = self.eval(rhs, subspace)?;
                Ok(union_sorted(&a, &b))
            }
            Expr::And(lhs, rhs) => {
                let a = self.eval(lhs, subspace)?;
                if a.is_empty() {
                    return Ok(a);
                }
                let b = self.eval(rhs, Some(a.as_slice()))?;
                Ok(intersect_sorted(&a, &b))
            }
            // Complement over the whole system; an enclosing AND narrows it.
            Expr::Not(inner) => {
                let a = self.eval(inner, None)?;
                Ok(complement_sorted(&a, n))
            }
            Expr::All => Ok(self.candidates(subspace).into_owned()),
            Expr::Precomputed(cached) => Ok(match subspace {
                Some(s) => intersect_sorted(cached, s),
                None => cached.clone(),
            }),
            Expr::TextMatch { field, patterns } => Ok(self
                .candidates(subspace)
                .iter()
                .copied()
                .filter(|&i| self.text_matches(*field, patterns, i))
                .collect()),
            Expr::IntMatch { field, ranges } => Ok(self.int_match(*field, ranges, subspace)),
            Expr::Compare { op, lhs, rhs } => {
                let cands = self.candidates(subspace);
                let a = self.eval_numeric(lhs, &cands)?;
                let b = self.eval_numeric(rhs, &cands)?;
                Ok(cands
                    .iter()
                    .zip(a.iter().zip(&b))
                    .filter(|(_, (x, y))| op.compare(**x, **y))
                    .map(|(&i, _)| i)
                    .collect())
            }
            Expr::Within {
                cutoff,
                periodic,
                inner,
            } => self.within(*cutoff, *periodic, inner, subspace),
            Expr::ByResidue(inner) => {
                let a = self.eval(inner, subspace)?;
                let residues: FxHashSet<usize> =
                    a.iter().map(|&i| self.store.resindex(i)).collect();
                Ok((0..n)
                    .filter(|&i| residues.contains(&self.store.resindex(i)))
                    .collect())
            }
        }
    }

    fn text_matches(&self, field: TextField, patterns: &[TextPattern], i: usize) -> bool {
        let value = match field {
            TextField::Name => self.store.name(i),
            TextField::Resname => self.store.resname(i),
            TextField::Tag => self.store.tag(i),
            TextField::Chain => {
                let c = self.store.chain(i);
                return patterns.iter().any(|p| p.matches_char(c));
            }
        };
        patterns.iter().any(|p| p.matches(value))
    }

    fn int_match(
        &self,
        field: IntField,
        ranges: &[RangeSpec],
        subspace: Option<&[usize]>,
    ) -> Vec<usize> {
        let n = self.num_particles();
        if field == IntField::Index && subspace.is_none() {
            // Out-of-range indices are dropped
            let mut out = Vec::new();
            for r in ranges {
                let (lo, hi) = r.bounds();
                let lo = lo.max(0);
                let hi = hi.min(n as i64 - 1);
                if lo <= hi {
                    out.extend(lo as usize..=hi as usize);
                }
            }
            sort_unique(&mut out);
            return out;
        }
        let value = |i: usize| -> i64 {
            match field {
                IntField::Resid => self.store.resid(i),
                IntField::Resindex => self.store.resindex(i) as i64,
                IntField::Index => i as i64,
            }
        };
        self.candidates(subspace)
            .iter()
            .copied()
            .filter(|&i| {
                let v = value(i);
                ranges.iter().any(|r| r.contains(v))
            })
            .collect()
    }

    fn within(
        &self,
        cutoff: f64,
        periodic: bool,
        inner: &Expr,
        subspace: Option<&[usize]>,
    ) -> Result<Vec<usize>, SelectionError> {
        let targets = self.eval(inner, None)?;
        let cands = self.candidates(subspace);
        let coords = self.store.coords(self.frame);
        let pbox = self.store.periodic_box(self.frame);

        let config = SearchConfig {
            cutoff,
            periodic,
            max_threads: self.max_threads,
        };
        let found = find_within(
            &config,
            &ParticleSet::new(coords, &cands)?,
            &ParticleSet::new(coords, &targets)?,
            pbox,
            true,
        )?;
        Ok(match subspace {
            Some(s) => intersect_sorted(&found, s),
            None => found,
        })
    }

    /// Evaluate a numeric expression for each particle of `cands`.
    pub fn eval_numeric(
        &self,
        expr: &NumExpr,
        cands: &[usize],
    ) -> Result<Vec<f64>, SelectionError> {
        match expr {
            NumExpr::Literal(v) => Ok(vec![*v; cands.len()]),
            NumExpr::Field(field) => {
                let coords = self.store.coords(self.frame);
                Ok(cands
                    .iter()
                    .map(|&i| match field {
                        NumField::X => coords[i][0],
                        NumField::Y => coords[i][1],
                        NumField::Z => coords[i][2],
                        NumField::Beta => self.store.beta(i),
                        NumField::Occupancy => self.store.occupancy(i),
                    })
                    .collect())
            }
            NumExpr::Neg(inner) => {
                let mut v = self.eval_numeric(inner, cands)?;
                v.iter_mut().for_each(|x| *x = -*x);
                Ok(v)
            }
            NumExpr::Binary { op, lhs, rhs } => {
                let a = self.eval_numeric(lhs, cands)?;
                let b = self.eval_numeric(rhs, cands)?;
                if *op == ArithOp::Div && b.iter().any(|&y| y == 0.0) {
                    return Err(SelectionError::DivisionByZero);
                }
                Ok(a.iter()
                    .zip(&b)
                    .map(|(&x, &y)| match op {
                        ArithOp::Add => x + y,
                        ArithOp::Sub => x - y,
                        ArithOp::Mul => x * y,
                        ArithOp::Div => x / y,
                    })
                    .collect())
            }
            NumExpr::Distance(d) => self.distance(d, cands),
        }
    }

    fn distance(&self, d: &DistanceExpr, cands: &[usize]) -> Result<Vec<f64>, SelectionError> {
        let pbox = self.store.periodic_box(self.frame);
        if d.periodic && !pbox.is_periodic() {
            return Err(SelectionError::configuration(
                "Periodic distance requested, but there is no periodic box",
            ));
        }
        let args = d
            .args
            .iter()
            .map(|a| self.eval_numeric(a, cands))
            .collect::<Result<Vec<_>, _>>()?;
        let coords = self.store.coords(self.frame);

        let mut out = Vec::with_capacity(cands.len());
        for (k, &i) in cands.iter().enumerate() {
            let origin = [args[0][k], args[1][k], args[2][k]];
            let r = if d.periodic {
                pbox.shortest_vector(&coords[i], &origin, PBC_FULL)
            } else {
                sub(&coords[i], &origin)
            };
            let value = match d.kind {
                DistanceKind::Point => norm(&r),
                DistanceKind::Vector => {
                    let dir = [args[3][k], args[4][k], args[5][k]];
                    let len = norm(&dir);
                    if len == 0.0 {
                        return Err(SelectionError::DivisionByZero);
                    }
                    let t = dot(&r, &dir) / len;
                    (dot(&r, &r) - t * t).max(0.0).sqrt()
                }
                DistanceKind::Plane => {
                    let normal = [args[3][k], args[4][k], args[5][k]];
                    let len = norm(&normal);
                    if len == 0.0 {
                        return Err(SelectionError::DivisionByZero);
                    }
                    dot(&r, &normal).abs() / len
                }
            };
            out.push(value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periodic_box::PeriodicBox;
    use crate::selection::parser::parse_selection;
    use crate::system::System;
    use crate::testing::make_test_system;

    fn run(sys: &System, query: &str) -> Result<Vec<usize>, SelectionError> {
        let ctx = SelectionContext::new(sys, 0)?;
        ctx.eval(&parse_selection(query)?, None)
    }

    fn sel(query: &str) -> Vec<usize> {
        run(&make_test_system(), query).unwrap()
    }

    #[test]
    fn test_text_fields() {
        assert_eq!(sel("name CA"), vec![1, 4]);
        assert_eq!(sel("resname ALA GLY"), vec![0, 1, 2, 3, 4]);
        assert_eq!(sel("chain W"), vec![5, 6, 7]);
        assert_eq!(sel("tag SOL"), vec![5, 6, 7]);
        assert_eq!(sel("name 'H.*'"), vec![6, 7]);
        assert_eq!(sel("name N \"C.?\""), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_int_fields() {
        assert_eq!(sel("resid 1-2"), vec![0, 1, 2, 3, 4]);
        assert_eq!(sel("index 2 to 4"), vec![2, 3, 4]);
        assert_eq!(sel("index 6-100 0"), vec![0, 6, 7]);
        assert_eq!(sel("resindex 2"), vec![5, 6, 7]);
        assert_eq!(sel("resid 3 and index 7 5"), vec![5, 7]);
    }

    #[test]
    fn test_logic() {
        assert_eq!(sel("not name CA"), vec![0, 2, 3, 5, 6, 7]);
        assert_eq!(sel("resname ALA and not name CA"), vec![0, 2]);
        assert_eq!(sel("name CA or chain W"), vec![1, 4, 5, 6, 7]);
        assert_eq!(sel("all"), (0..8).collect::<Vec<_>>());
        assert_eq!(sel("name CA and all"), vec![1, 4]);
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(sel("beta > 0.4"), vec![1, 4, 5, 6, 7]);
        assert_eq!(sel("beta = 0.5"), vec![5, 6, 7]);
        assert_eq!(sel("x >= 2 and x < 5"), vec![2, 3, 4]);
        assert_eq!(sel("x * 2 + 1 > 9"), vec![5, 6, 7]);
        assert_eq!(sel("-x > -2"), vec![0, 1]);
        assert_eq!(sel("occupancy != 1"), Vec::<usize>::new());
    }

    #[test]
    fn test_division_by_zero() {
        let sys = make_test_system();
        assert!(matches!(
            run(&sys, "x / 0 > 1"),
            Err(SelectionError::DivisionByZero)
        ));
        assert!(matches!(
            run(&sys, "1 / (x - 3) > 0"),
            Err(SelectionError::DivisionByZero)
        ));
        // The zero operand is never seen when the candidate set excludes it
        assert_eq!(run(&sys, "index 0 1 and 1 / (x - 3) < 0").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_within() {
        assert_eq!(sel("within 1.5 of name O"), vec![4, 5, 6]);
        assert_eq!(sel("within 1 of index 0"), vec![0, 1]);
        assert_eq!(sel("name CA and within 1 of index 0"), vec![1]);
        assert_eq!(sel("within 2 of name XYZ"), Vec::<usize>::new());
    }

    #[test]
    fn test_within_periodic() {
        let mut sys = make_test_system();
        sys.frame_mut(0).unwrap().pbox = PeriodicBox::orthogonal([8.0, 8.0, 8.0]);
        assert_eq!(run(&sys, "within 1 of index 7").unwrap(), vec![6, 7]);
        assert_eq!(run(&sys, "within 1 pbc of index 7").unwrap(), vec![0, 6, 7]);
        assert_eq!(run(&sys, "within 1 nopbc of index 7").unwrap(), vec![6, 7]);

        sys.frame_mut(0).unwrap().pbox = PeriodicBox::none();
        assert!(matches!(
            run(&sys, "within 1 periodic of index 7"),
            Err(SelectionError::Configuration(_))
        ));
    }

    #[test]
    fn test_by_residue() {
        assert_eq!(sel("by residue name CA"), vec![0, 1, 2, 3, 4]);
        assert_eq!(sel("by res name H1"), vec![5, 6, 7]);
        // Expansion reaches outside the enclosing subspace
        assert_eq!(sel("index 0 and by residue index 0"), vec![0]);
        assert_eq!(sel("by residue (index 0 and name N)"), vec![0, 1, 2]);
    }

    #[test]
    fn test_distance_primitives() {
        assert_eq!(sel("dist point 0 0 0 < 2.5"), vec![0, 1, 2]);
        assert_eq!(sel("dist vector 0 1 0 1 0 0 < 0.5"), Vec::<usize>::new());
        assert_eq!(sel("dist vector 0 0 0 2 0 0 < 0.5").len(), 8);
        assert_eq!(sel("dist plane 3 0 0 1 0 0 <= 1"), vec![2, 3, 4]);
        assert_eq!(sel("distance pbc point 19 0 0 < 1.5"), vec![0]);
        assert!(matches!(
            run(&make_test_system(), "dist vector 0 0 0 0 0 0 < 1"),
            Err(SelectionError::DivisionByZero)
        ));
    }

    #[test]
    fn test_distance_periodic_requires_box() {
        let mut sys = make_test_system();
        sys.frame_mut(0).unwrap().pbox = PeriodicBox::none();
        assert!(matches!(
            run(&sys, "dist pbc point 0 0 0 < 1"),
            Err(SelectionError::Configuration(_))
        ));
        assert_eq!(run(&sys, "dist point 0 0 0 < 1.5").unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_frame_out_of_range() {
        let sys = make_test_system();
        assert!(matches!(
            SelectionContext::new(&sys, 1),
            Err(SelectionError::Index(_))
        ));
    }
}
