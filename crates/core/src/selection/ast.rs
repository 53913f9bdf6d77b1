//! AST node types for the selection language.
//!
//! The tree is exclusively owned by its compiled query. Logical nodes
//! ([`Expr`]) produce index sets, numeric nodes ([`NumExpr`]) produce one
//! `f64` per particle.

use regex::Regex;

/// Logical (index-set valued) expression node.
#[derive(Debug, Clone)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    All,
    TextMatch {
        field: TextField,
        patterns: Vec<TextPattern>,
    },
    IntMatch {
        field: IntField,
        ranges: Vec<RangeSpec>,
    },
    Compare {
        op: CmpOp,
        lhs: NumExpr,
        rhs: NumExpr,
    },
    Within {
        cutoff: f64,
        periodic: bool,
        inner: Box<Expr>,
    },
    ByResidue(Box<Expr>),
    /// Cached result of a frame-independent subtree, sorted and unique.
    Precomputed(Vec<usize>),
}

impl Expr {
    /// True if evaluating this node reads coordinates.
    pub fn is_frame_dependent(&self) -> bool {
        match self {
            Expr::Or(a, b) | Expr::And(a, b) => a.is_frame_dependent() || b.is_frame_dependent(),
            Expr::Not(e) | Expr::ByResidue(e) => e.is_frame_dependent(),
            Expr::Compare { lhs, rhs, .. } => lhs.is_frame_dependent() || rhs.is_frame_dependent(),
            Expr::Within { .. } => true,
            Expr::All | Expr::TextMatch { .. } | Expr::IntMatch { .. } | Expr::Precomputed(_) => {
                false
            }
        }
    }

    /// Number of nodes in the tree, used for diagnostics.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Or(a, b) | Expr::And(a, b) => 1 + a.node_count() + b.node_count(),
            Expr::Not(e) | Expr::ByResidue(e) | Expr::Within { inner: e, .. } => 1 + e.node_count(),
            Expr::Compare { lhs, rhs, .. } => 1 + lhs.node_count() + rhs.node_count(),
            _ => 1,
        }
    }
}

/// Fields matched against text literals or regexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Name,
    Resname,
    Tag,
    /// Single character; literals compare against their first character.
    Chain,
}

/// A literal string or an anchored regular expression.
#[derive(Debug, Clone)]
pub enum TextPattern {
    Literal(String),
    Regex(Regex),
}

impl TextPattern {
    /// Build a regex pattern that must match the whole value.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{pattern})$")).map(TextPattern::Regex)
    }

    pub fn matches(&self, s: &str) -> bool {
        match self {
            TextPattern::Literal(lit) => s == lit,
            TextPattern::Regex(re) => re.is_match(s),
        }
    }

    pub fn matches_char(&self, c: char) -> bool {
        match self {
            TextPattern::Literal(lit) => lit.chars().next() == Some(c),
            TextPattern::Regex(re) => {
                let mut buf = [0u8; 4];
                re.is_match(c.encode_utf8(&mut buf))
            }
        }
    }
}

/// Fields for integer and range selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntField {
    Resid,
    /// Zero-based residue group index
    Resindex,
    /// Zero-based particle index
    Index,
}

/// A single value or an inclusive range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeSpec {
    Single(i64),
    Range(i64, i64),
}

impl RangeSpec {
    pub fn contains(&self, value: i64) -> bool {
        match self {
            RangeSpec::Single(v) => *v == value,
            RangeSpec::Range(lo, hi) => value >= *lo && value <= *hi,
        }
    }

    /// Inclusive bounds.
    pub fn bounds(&self) -> (i64, i64) {
        match self {
            RangeSpec::Single(v) => (*v, *v),
            RangeSpec::Range(lo, hi) => (*lo, *hi),
        }
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn compare(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CmpOp::Gt => lhs > rhs,
            CmpOp::Lt => lhs < rhs,
            CmpOp::Ge => lhs >= rhs,
            CmpOp::Le => lhs <= rhs,
            CmpOp::Eq => (lhs - rhs).abs() < 1e-9,
            CmpOp::Ne => (lhs - rhs).abs() >= 1e-9,
        }
    }
}

/// Numeric (per-particle) expression node.
#[derive(Debug, Clone)]
pub enum NumExpr {
    Literal(f64),
    Field(NumField),
    Neg(Box<NumExpr>),
    Binary {
        op: ArithOp,
        lhs: Box<NumExpr>,
        rhs: Box<NumExpr>,
    },
    Distance(Box<DistanceExpr>),
}

impl NumExpr {
    pub fn is_frame_dependent(&self) -> bool {
        match self {
            NumExpr::Literal(_) => false,
            NumExpr::Field(f) => f.is_coordinate(),
            NumExpr::Neg(e) => e.is_frame_dependent(),
            NumExpr::Binary { lhs, rhs, .. } => lhs.is_frame_dependent() || rhs.is_frame_dependent(),
            NumExpr::Distance(_) => true,
        }
    }

    pub fn node_count(&self) -> usize {
        match self {
            NumExpr::Neg(e) => 1 + e.node_count(),
            NumExpr::Binary { lhs, rhs, .. } => 1 + lhs.node_count() + rhs.node_count(),
            NumExpr::Distance(d) => 1 + d.args.iter().map(NumExpr::node_count).sum::<usize>(),
            _ => 1,
        }
    }
}

/// Per-particle numeric fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumField {
    X,
    Y,
    Z,
    Beta,
    Occupancy,
}

impl NumField {
    pub fn is_coordinate(&self) -> bool {
        matches!(self, NumField::X | NumField::Y | NumField::Z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceKind {
    /// Distance to a point: 3 arguments.
    Point,
    /// Distance to an infinite line through a point along a direction: 6 arguments.
    Vector,
    /// Distance to a plane through a point with a normal: 6 arguments.
    Plane,
}

impl DistanceKind {
    pub fn arity(&self) -> usize {
        match self {
            DistanceKind::Point => 3,
            DistanceKind::Vector | DistanceKind::Plane => 6,
        }
    }
}

/// `dist [periodic] point|vector|plane args...`
#[derive(Debug, Clone)]
pub struct DistanceExpr {
    pub kind: DistanceKind,
    pub periodic: bool,
    pub args: Vec<NumExpr>,
}
