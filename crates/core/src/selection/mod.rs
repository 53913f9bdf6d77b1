//! Selection language for choosing particles by attributes and geometry.
//!
//! # Examples
//!
//! ```ignore
//! use molsel_core::selection::{compile, select};
//!
//! let backbone = select(&system, "name CA C N and resid 1-50", 0)?;
//!
//! let mut near = compile("within 5.0 pbc of resname LIG")?;
//! for frame in 0..system.num_frames() {
//!     let indices = near.evaluate(&system, frame)?;
//! }
//! ```
//!
//! Queries are compiled once. Queries that read coordinates are optimized
//! on their first evaluation: parts that do not read coordinates are cached
//! and reused for every later frame.

pub mod ast;
pub mod error;
pub mod eval;
pub mod optimize;
pub mod parser;
pub mod token;

pub use error::{SelectionError, SyntaxError};
pub use eval::SelectionContext;

use crate::system::ParticleStore;
use crate::util::sort_unique;
use ast::Expr;
use parser::parse_selection;

/// A parsed query, ready to be evaluated against any frame.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    text: String,
    ast: Expr,
    frame_dependent: bool,
    /// Particle count the cached subtrees were computed for.
    optimized_for: Option<usize>,
    max_threads: Option<usize>,
}

impl CompiledQuery {
    pub fn compile(text: &str) -> Result<Self, SelectionError> {
        let ast = parse_selection(text)?;
        let frame_dependent = ast.is_frame_dependent();
        log::trace!(
            "Compiled '{}': {} nodes, frame dependent: {}",
            text,
            ast.node_count(),
            frame_dependent
        );
        Ok(Self {
            text: text.to_string(),
            ast,
            frame_dependent,
            optimized_for: None,
            max_threads: None,
        })
    }

    /// The query text this was compiled from.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_frame_dependent(&self) -> bool {
        self.frame_dependent
    }

    pub fn ast(&self) -> &Expr {
        &self.ast
    }

    /// Bound the number of threads used by `within` searches.
    pub fn set_max_threads(&mut self, max_threads: Option<usize>) {
        self.max_threads = max_threads;
    }

    /// Evaluate against `frame` of `store`, returning sorted particle indices.
    pub fn evaluate<S: ParticleStore + ?Sized>(
        &mut self,
        store: &S,
        frame: usize,
    ) -> Result<Vec<usize>, SelectionError> {
        let ctx = SelectionContext::new(store, frame)?.with_max_threads(self.max_threads);
        let n = store.num_particles();
        if self.frame_dependent && self.optimized_for != Some(n) {
            match self.optimized_for {
                Some(m) => log::debug!(
                    "Particle count changed ({} -> {}), re-optimizing '{}'",
                    m,
                    n,
                    self.text
                ),
                None => log::debug!("Optimizing '{}' on first evaluation", self.text),
            }
            // `self.ast` changes only when the pass succeeds.
            let mut ast = parse_selection(&self.text)?;
            optimize::optimize(&mut ast, &ctx)?;
            self.ast = ast;
            self.optimized_for = Some(n);
        }
        let mut out = ctx.eval(&self.ast, None)?;
        sort_unique(&mut out);
        Ok(out)
    }
}

/// Compile a query.
pub fn compile(text: &str) -> Result<CompiledQuery, SelectionError> {
    CompiledQuery::compile(text)
}

/// Compile and evaluate `query` against one frame.
pub fn select<S: ParticleStore + ?Sized>(
    store: &S,
    query: &str,
    frame: usize,
) -> Result<Vec<usize>, SelectionError> {
    compile(query)?.evaluate(store, frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::periodic_box::PeriodicBox;
    use crate::system::{Atom, Frame, System};
    use crate::testing::{make_test_system, random_cloud, Lcg};

    const NAMES: [&str; 5] = ["N", "CA", "C", "O", "CB"];
    const RESNAMES: [&str; 4] = ["ALA", "GLY", "LIG", "WAT"];

    /// Random system of 5-atom residues in a 20 A box, with two frames.
    fn random_system(seed: u64, n_res: usize) -> System {
        let mut rng = Lcg(seed);
        let mut atoms = Vec::new();
        for r in 0..n_res {
            let resname = RESNAMES[rng.below(RESNAMES.len())];
            let chain = if r < n_res / 2 { 'A' } else { 'B' };
            for name in NAMES {
                atoms.push(Atom {
                    beta: rng.next_f64(),
                    ..Atom::new(name, resname, r as i64 + 1, chain)
                });
            }
        }
        let n = atoms.len();
        let mut sys = System::new(atoms);
        sys.assign_resindex();
        for _ in 0..2 {
            sys.add_frame(Frame {
                coords: random_cloud(&mut rng, n, 0.0, 20.0),
                pbox: PeriodicBox::orthogonal([20.0, 20.0, 20.0]),
                time: 0.0,
            })
            .unwrap();
        }
        sys
    }

    const QUERIES: [&str; 12] = [
        "name CA",
        "resname LIG or chain B",
        "resid 3-10 and not name O",
        "x < 10",
        "beta > 0.5 and z > 4",
        "within 3 of resname LIG",
        "within 2.5 pbc of (name CA and resid 1-5)",
        "name CA and within 4 of resname WAT",
        "by residue within 2 of name O",
        "not within 3 of resname LIG and chain A",
        "dist pbc point 10 10 10 < 6 or index 0-9",
        "(x + y) / 2 > 10 and resname ALA GLY",
    ];

    /// Evaluate without the optimizer.
    fn reference(sys: &System, query: &str, frame: usize) -> Vec<usize> {
        let ctx = SelectionContext::new(sys, frame).unwrap();
        let mut out = ctx.eval(&parse_selection(query).unwrap(), None).unwrap();
        sort_unique(&mut out);
        out
    }

    #[test]
    fn test_optimized_matches_reference_on_every_frame() {
        let sys = random_system(1, 60);
        for q in QUERIES {
            let mut query = compile(q).unwrap();
            for frame in [0, 1, 0] {
                assert_eq!(
                    query.evaluate(&sys, frame).unwrap(),
                    reference(&sys, q, frame),
                    "query '{}' frame {}",
                    q,
                    frame
                );
            }
        }
    }

    #[test]
    fn test_results_sorted_and_deterministic() {
        let sys = random_system(2, 40);
        for q in QUERIES {
            let mut query = compile(q).unwrap();
            let a = query.evaluate(&sys, 0).unwrap();
            let b = query.evaluate(&sys, 0).unwrap();
            assert_eq!(a, b);
            assert!(a.windows(2).all(|w| w[0] < w[1]), "'{}' not strictly sorted", q);
            let c = compile(q).unwrap().evaluate(&sys, 0).unwrap();
            assert_eq!(a, c);
        }
    }

    #[test]
    fn test_double_negation() {
        let sys = random_system(3, 40);
        for q in QUERIES {
            let plain = select(&sys, q, 1).unwrap();
            let twice = select(&sys, &format!("not (not ({}))", q), 1).unwrap();
            assert_eq!(plain, twice, "query '{}'", q);
        }
    }

    #[test]
    fn test_or_and_are_union_and_intersection() {
        let sys = random_system(4, 40);
        let parts = ["name CA", "resname LIG", "chain B", "within 3 of name O", "x > 12"];
        for a in parts {
            for b in parts {
                let sa = select(&sys, a, 0).unwrap();
                let sb = select(&sys, b, 0).unwrap();
                let or = select(&sys, &format!("({}) or ({})", a, b), 0).unwrap();
                let and = select(&sys, &format!("({}) and ({})", a, b), 0).unwrap();
                assert_eq!(or, crate::util::union_sorted(&sa, &sb));
                assert_eq!(and, crate::util::intersect_sorted(&sa, &sb));
            }
        }
    }

    #[test]
    fn test_index_range_and_all() {
        let sys = make_test_system();
        assert_eq!(select(&sys, "index 0-4", 0).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(select(&sys, "all", 0).unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_within_includes_targets() {
        let sys = make_test_system();
        let inner = select(&sys, "resname GLY", 0).unwrap();
        let near = select(&sys, "within 0.5 of resname GLY", 0).unwrap();
        assert_eq!(near, inner);
    }

    #[test]
    fn test_frame_flag() {
        assert!(!compile("name CA and resid 1").unwrap().is_frame_dependent());
        assert!(compile("name CA and x > 1").unwrap().is_frame_dependent());
        assert!(compile("within 3 of name CA").unwrap().is_frame_dependent());
        assert!(compile("dist point 0 0 0 < 1").unwrap().is_frame_dependent());
        assert_eq!(compile("name CA").unwrap().text(), "name CA");
    }

    #[test]
    fn test_reoptimizes_when_particle_count_changes() {
        let small = make_test_system();
        let large = random_system(5, 30);
        let q = "within 2 of name CA and resname GLY ALA";
        let mut query = compile(q).unwrap();
        assert_eq!(query.evaluate(&small, 0).unwrap(), reference(&small, q, 0));
        assert_eq!(query.evaluate(&large, 0).unwrap(), reference(&large, q, 0));
        assert_eq!(query.evaluate(&small, 0).unwrap(), reference(&small, q, 0));
    }

    #[test]
    fn test_failed_optimization_leaves_no_cache() {
        // Zero betas in the first store make the pure subtree fail.
        let first = make_test_system();
        let q = "within 0.5 of name CA or 1 / beta < 0";
        let mut query = compile(q).unwrap();
        assert!(matches!(
            query.evaluate(&first, 0),
            Err(SelectionError::DivisionByZero)
        ));

        let atoms = ["CA", "N", "C", "O", "CB"]
            .iter()
            .map(|&name| Atom {
                beta: 1.0,
                ..Atom::new(name, "ALA", 1, 'A')
            })
            .collect();
        let mut second = System::new(atoms);
        second.assign_resindex();
        second
            .add_frame(Frame {
                coords: (0..5).map(|i| [i as f64 * 3.0, 0.0, 0.0]).collect(),
                pbox: PeriodicBox::orthogonal([20.0, 20.0, 20.0]),
                time: 0.0,
            })
            .unwrap();
        assert_eq!(query.evaluate(&second, 0).unwrap(), vec![0]);
        assert_eq!(query.evaluate(&second, 0).unwrap(), reference(&second, q, 0));
    }

    #[test]
    fn test_errors_surface() {
        let sys = make_test_system();
        let err = compile("name CA and (resid 1").unwrap_err();
        assert!(err.is_syntax());
        assert!(matches!(
            select(&sys, "name CA", 3),
            Err(SelectionError::Index(_))
        ));
        let mut nobox = make_test_system();
        nobox.frame_mut(0).unwrap().pbox = PeriodicBox::none();
        assert!(matches!(
            select(&nobox, "within 2 pbc of name CA", 0),
            Err(SelectionError::Configuration(_))
        ));
    }

    #[test]
    fn test_max_threads_does_not_change_result() {
        let sys = random_system(6, 80);
        let q = "within 2.5 pbc of resname LIG";
        let mut serial = compile(q).unwrap();
        serial.set_max_threads(Some(1));
        let mut parallel = compile(q).unwrap();
        parallel.set_max_threads(Some(4));
        assert_eq!(serial.evaluate(&sys, 1).unwrap(), parallel.evaluate(&sys, 1).unwrap());
    }
}
