//! One-time rewrite of a frame-dependent query.
//!
//! Subtrees that never read coordinates are evaluated once and replaced by
//! [`Expr::Precomputed`]. For `A and B` where only `A` reads coordinates, the
//! operands are swapped so the cached side restricts the search of the other.

use std::mem;

use crate::selection::ast::{Expr, NumExpr};
use crate::selection::error::SelectionError;
use crate::selection::eval::SelectionContext;
use crate::system::ParticleStore;

/// What one optimizer pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OptimizeStats {
    pub precomputed: usize,
    pub swapped: usize,
    pub folded: usize,
}

/// Rewrite `expr` in place against the particle store bound to `ctx`.
pub fn optimize<S: ParticleStore + ?Sized>(
    expr: &mut Expr,
    ctx: &SelectionContext<'_, S>,
) -> Result<OptimizeStats, SelectionError> {
    let mut stats = OptimizeStats::default();
    let before = expr.node_count();
    rewrite(expr, ctx, &mut stats)?;
    log::debug!(
        "Optimized query: {} -> {} nodes ({} precomputed, {} swapped, {} folded)",
        before,
        expr.node_count(),
        stats.precomputed,
        stats.swapped,
        stats.folded
    );
    Ok(stats)
}

fn rewrite<S: ParticleStore + ?Sized>(
    expr: &mut Expr,
    ctx: &SelectionContext<'_, S>,
    stats: &mut OptimizeStats,
) -> Result<(), SelectionError> {
    if !expr.is_frame_dependent() {
        if !matches!(expr, Expr::Precomputed(_) | Expr::All) {
            let cached = ctx.eval(expr, None)?;
            *expr = Expr::Precomputed(cached);
            stats.precomputed += 1;
        }
        return Ok(());
    }

    match expr {
        Expr::And(lhs, rhs) => {
            if lhs.is_frame_dependent() && !rhs.is_frame_dependent() {
                mem::swap(lhs, rhs);
                stats.swapped += 1;
            }
            rewrite(lhs, ctx, stats)?;
            rewrite(rhs, ctx, stats)?;
        }
        Expr::Or(lhs, rhs) => {
            rewrite(lhs, ctx, stats)?;
            rewrite(rhs, ctx, stats)?;
        }
        Expr::Not(inner) | Expr::ByResidue(inner) | Expr::Within { inner, .. } => {
            rewrite(inner, ctx, stats)?;
        }
        Expr::Compare { lhs, rhs, .. } => {
            fold(lhs, stats);
            fold(rhs, stats);
        }
        _ => {}
    }
    Ok(())
}

/// Fold negated literals in a numeric tree.
fn fold(expr: &mut NumExpr, stats: &mut OptimizeStats) {
    match expr {
        NumExpr::Neg(inner) => {
            fold(inner, stats);
            let literal = match **inner {
                NumExpr::Literal(v) => Some(v),
                _ => None,
            };
            if let Some(v) = literal {
                *expr = NumExpr::Literal(-v);
                stats.folded += 1;
            }
        }
        NumExpr::Binary { lhs, rhs, .. } => {
            fold(lhs, stats);
            fold(rhs, stats);
        }
        NumExpr::Distance(d) => {
            for arg in d.args.iter_mut() {
                fold(arg, stats);
            }
        }
        NumExpr::Literal(_) | NumExpr::Field(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::parser::parse_selection;
    use crate::testing::make_test_system;

    fn optimized(query: &str) -> (Expr, OptimizeStats) {
        let sys = make_test_system();
        let ctx = SelectionContext::new(&sys, 0).unwrap();
        let mut expr = parse_selection(query).unwrap();
        let stats = optimize(&mut expr, &ctx).unwrap();
        (expr, stats)
    }

    #[test]
    fn test_pure_subtree_is_precomputed() {
        let (expr, stats) = optimized("x > 2 or (name CA and resid 1)");
        match expr {
            Expr::Or(_, rhs) => assert!(matches!(*rhs, Expr::Precomputed(ref v) if v == &vec![1])),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(stats.precomputed, 1);
    }

    #[test]
    fn test_and_puts_pure_operand_first() {
        let (expr, stats) = optimized("within 1.5 of name O and resname WAT");
        assert_eq!(stats.swapped, 1);
        match expr {
            Expr::And(lhs, rhs) => {
                assert!(matches!(*lhs, Expr::Precomputed(_)));
                assert!(matches!(*rhs, Expr::Within { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_within_inner_is_precomputed() {
        let (expr, _) = optimized("within 2 of resid 2");
        match expr {
            Expr::Within { inner, .. } => {
                assert!(matches!(*inner, Expr::Precomputed(ref v) if v == &vec![3, 4]))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_negated_literal_folded() {
        let (expr, stats) = optimized("x > -1");
        assert_eq!(stats.folded, 1);
        match expr {
            Expr::Compare { rhs, .. } => assert!(matches!(rhs, NumExpr::Literal(v) if v == -1.0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_all_is_left_alone() {
        let (expr, stats) = optimized("all and x < 3");
        assert_eq!(stats.precomputed, 0);
        assert!(matches!(expr, Expr::And(ref lhs, _) if matches!(**lhs, Expr::All)));
    }
}
