//! Periodic simulation box: minimum-image distances, wrapping, and
//! lab <-> box coordinate transforms for orthogonal and triclinic cells.

use nalgebra::{Matrix3, Vector3};

/// Per-axis periodicity flags.
pub type PbcDims = [bool; 3];

pub const PBC_FULL: PbcDims = [true, true, true];
pub const PBC_NONE: PbcDims = [false, false, false];

const TRICLINIC_EPS: f64 = 1e-9;

/// Snapshot of a (possibly triclinic) periodic box.
///
/// Box vectors are stored as matrix columns. Box-space coordinates are
/// expressed in the basis of the *normalized* box vectors, so a point inside
/// the cell has box coordinates in `[0, extents[i])`.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicBox {
    basis: Matrix3<f64>,
    basis_inv: Matrix3<f64>,
    unit: Matrix3<f64>,
    unit_inv: Matrix3<f64>,
    extents: [f64; 3],
    /// Distance between opposite faces of the unit-edge cell, per axis.
    widths: [f64; 3],
    periodic: bool,
    triclinic: bool,
}

impl Default for PeriodicBox {
    fn default() -> Self {
        Self::none()
    }
}

impl PeriodicBox {
    /// Build a box from its three vectors `[a, b, c]`.
    ///
    /// A box with a zero-length or linearly dependent vector is kept as a
    /// non-periodic box rather than rejected.
    pub fn new(vectors: [[f64; 3]; 3]) -> Self {
        let cols: Vec<Vector3<f64>> = vectors.iter().map(|v| Vector3::from(*v)).collect();
        let basis = Matrix3::from_columns(&cols);
        let extents = [cols[0].norm(), cols[1].norm(), cols[2].norm()];

        let inverses = if extents.iter().all(|&e| e > 0.0) {
            let unit = Matrix3::from_columns(&[
                cols[0] / extents[0],
                cols[1] / extents[1],
                cols[2] / extents[2],
            ]);
            match (basis.try_inverse(), unit.try_inverse()) {
                (Some(bi), Some(ui)) => Some((bi, unit, ui)),
                _ => None,
            }
        } else {
            None
        };

        match inverses {
            Some((basis_inv, unit, unit_inv)) => {
                let triclinic = (0..3)
                    .flat_map(|r| (0..3).map(move |c| (r, c)))
                    .any(|(r, c)| r != c && basis[(r, c)].abs() > TRICLINIC_EPS);
                let det = unit.determinant().abs();
                let mut widths = [1.0; 3];
                for (a, w) in widths.iter_mut().enumerate() {
                    let (b, c) = ((a + 1) % 3, (a + 2) % 3);
                    let (ub, uc): (Vector3<f64>, Vector3<f64>) =
                        (unit.column(b).into_owned(), unit.column(c).into_owned());
                    *w = det / ub.cross(&uc).norm();
                }
                Self {
                    basis,
                    basis_inv,
                    unit,
                    unit_inv,
                    extents,
                    widths,
                    periodic: true,
                    triclinic,
                }
            }
            None => Self {
                basis,
                basis_inv: Matrix3::identity(),
                unit: Matrix3::identity(),
                unit_inv: Matrix3::identity(),
                extents,
                widths: [1.0; 3],
                periodic: false,
                triclinic: false,
            },
        }
    }

    /// Rectangular box with edge lengths `[a, b, c]`.
    pub fn orthogonal(dims: [f64; 3]) -> Self {
        Self::new([
            [dims[0], 0.0, 0.0],
            [0.0, dims[1], 0.0],
            [0.0, 0.0, dims[2]],
        ])
    }

    /// A box without periodicity.
    pub fn none() -> Self {
        Self::new([[0.0; 3]; 3])
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn is_triclinic(&self) -> bool {
        self.triclinic
    }

    /// Lengths of the three box vectors.
    pub fn extents(&self) -> [f64; 3] {
        self.extents
    }

    pub fn volume(&self) -> f64 {
        if self.periodic {
            self.basis.determinant().abs()
        } else {
            0.0
        }
    }

    /// Box vectors `[a, b, c]`.
    pub fn vectors(&self) -> [[f64; 3]; 3] {
        let c = |i: usize| {
            let v = self.basis.column(i);
            [v[0], v[1], v[2]]
        };
        [c(0), c(1), c(2)]
    }

    /// Lab coordinates to box coordinates (normalized box basis).
    pub fn lab_to_box(&self, p: &[f64; 3]) -> [f64; 3] {
        if !self.triclinic {
            return *p;
        }
        let v = self.unit_inv * Vector3::from(*p);
        [v[0], v[1], v[2]]
    }

    /// Box coordinates to lab coordinates.
    pub fn box_to_lab(&self, p: &[f64; 3]) -> [f64; 3] {
        if !self.triclinic {
            return *p;
        }
        let v = self.unit * Vector3::from(*p);
        [v[0], v[1], v[2]]
    }

    /// Lab-space thickness of a slab that spans `len` box units along `axis`,
    /// measured perpendicular to the other two box vectors.
    pub fn box_to_lab_length(&self, axis: usize, len: f64) -> f64 {
        if !self.triclinic {
            return len;
        }
        self.widths[axis] * len
    }

    /// Minimum-image vector from `q` to `p` along the periodic dimensions.
    pub fn shortest_vector(&self, p: &[f64; 3], q: &[f64; 3], dims: PbcDims) -> [f64; 3] {
        let mut d = [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
        if !self.periodic || dims == PBC_NONE {
            return d;
        }

        if !self.triclinic {
            for (axis, &on) in dims.iter().enumerate() {
                if on {
                    let len = self.extents[axis];
                    d[axis] -= len * (d[axis] / len).round();
                }
            }
            return d;
        }

        // Reduce in fractional space, then check neighboring images since
        // rounding alone is not exact for skewed cells.
        let mut f = self.basis_inv * Vector3::from(d);
        for axis in 0..3 {
            if dims[axis] {
                f[axis] -= f[axis].round();
            }
        }
        let base = self.basis * f;
        let mut best = base;
        let mut best_sq = base.norm_squared();
        let range = |on: bool| if on { -1i32..=1 } else { 0..=0 };
        for i in range(dims[0]) {
            for j in range(dims[1]) {
                for k in range(dims[2]) {
                    if i == 0 && j == 0 && k == 0 {
                        continue;
                    }
                    let shift = self.basis * Vector3::new(i as f64, j as f64, k as f64);
                    let cand = base + shift;
                    let sq = cand.norm_squared();
                    if sq < best_sq {
                        best_sq = sq;
                        best = cand;
                    }
                }
            }
        }
        d = [best[0], best[1], best[2]];
        d
    }

    /// Minimum-image squared distance.
    #[inline]
    pub fn distance_squared(&self, p: &[f64; 3], q: &[f64; 3], dims: PbcDims) -> f64 {
        let d = self.shortest_vector(p, q, dims);
        d[0] * d[0] + d[1] * d[1] + d[2] * d[2]
    }

    /// Minimum-image distance.
    #[inline]
    pub fn distance(&self, p: &[f64; 3], q: &[f64; 3], dims: PbcDims) -> f64 {
        self.distance_squared(p, q, dims).sqrt()
    }

    /// Fold a point into the primary cell along the periodic dimensions.
    pub fn wrap_point(&self, p: &[f64; 3], dims: PbcDims) -> [f64; 3] {
        if !self.periodic {
            return *p;
        }
        let mut f = self.basis_inv * Vector3::from(*p);
        for axis in 0..3 {
            if dims[axis] {
                f[axis] -= f[axis].floor();
            }
        }
        let v = self.basis * f;
        [v[0], v[1], v[2]]
    }
}
