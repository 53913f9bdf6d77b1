//! Shared fixtures for unit tests.

use crate::periodic_box::PeriodicBox;
use crate::system::{Atom, Frame, System};

/// Deterministic pseudo-random generator for test point clouds.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_f64(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn below(&mut self, n: usize) -> usize {
        ((self.next_f64() * n as f64) as usize).min(n.saturating_sub(1))
    }
}

/// `n` points uniformly spread over `[lo, hi)` on every axis.
pub fn random_cloud(rng: &mut Lcg, n: usize, lo: f64, hi: f64) -> Vec<[f64; 3]> {
    (0..n)
        .map(|_| {
            [
                lo + rng.next_f64() * (hi - lo),
                lo + rng.next_f64() * (hi - lo),
                lo + rng.next_f64() * (hi - lo),
            ]
        })
        .collect()
}

/// Mini system: ALA (N, CA, C), GLY (N, CA), WAT (O, H1, H2) on chains A, A, W,
/// laid out along x at 1.0 spacing, one frame in a 20 A orthogonal box.
pub fn make_test_system() -> System {
    let spec: [(&str, &str, i64, char, f64); 8] = [
        ("N", "ALA", 1, 'A', 0.0),
        ("CA", "ALA", 1, 'A', 1.0),
        ("C", "ALA", 1, 'A', 0.0),
        ("N", "GLY", 2, 'A', 0.0),
        ("CA", "GLY", 2, 'A', 2.0),
        ("O", "WAT", 3, 'W', 0.5),
        ("H1", "WAT", 3, 'W', 0.5),
        ("H2", "WAT", 3, 'W', 0.5),
    ];
    let atoms = spec
        .iter()
        .map(|&(name, resname, resid, chain, beta)| Atom {
            beta,
            tag: if resname == "WAT" { "SOL".into() } else { "PROT".into() },
            ..Atom::new(name, resname, resid, chain)
        })
        .collect();
    let mut sys = System::new(atoms);
    sys.assign_resindex();
    let coords = (0..8).map(|i| [i as f64, 0.0, 0.0]).collect();
    sys.add_frame(Frame {
        coords,
        pbox: PeriodicBox::orthogonal([20.0, 20.0, 20.0]),
        time: 0.0,
    })
    .unwrap();
    sys
}
