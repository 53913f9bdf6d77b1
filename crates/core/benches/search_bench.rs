//! Criterion benchmarks for proximity search and query evaluation.
//!
//! Uses a synthetic jittered lattice in a cubic periodic box, close to the
//! density of liquid water (one particle per ~10 A^3).
//!
//! Run with: cargo bench -p molsel-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use molsel_core::{
    compile, find_contacts, find_within, Atom, Frame, ParticleSet, PeriodicBox, SearchConfig,
    System,
};

/// `n_side^3` particles on a lattice with 2.15 A spacing, jittered by up to
/// 0.4 A per axis. Returns the coordinates and the box edge.
fn build_synthetic_coords(n_side: usize) -> (Vec<[f64; 3]>, f64) {
    let spacing = 2.15;
    let mut coords = Vec::with_capacity(n_side * n_side * n_side);
    for i in 0..n_side {
        for j in 0..n_side {
            for k in 0..n_side {
                let t = (coords.len() + 1) as f64;
                coords.push([
                    (i as f64 + 0.5) * spacing + 0.4 * (t * 12.9898).sin(),
                    (j as f64 + 0.5) * spacing + 0.4 * (t * 78.233).sin(),
                    (k as f64 + 0.5) * spacing + 0.4 * (t * 37.719).sin(),
                ]);
            }
        }
    }
    (coords, n_side as f64 * spacing)
}

/// Three-particle "water" residues with a solute of 10% of the residues.
fn build_synthetic_system(n_side: usize) -> System {
    let (coords, edge) = build_synthetic_coords(n_side);
    let n = coords.len();
    let atoms = (0..n)
        .map(|i| {
            let res = i / 3;
            let resname = if res % 10 == 0 { "LIG" } else { "SOL" };
            let name = ["O", "H1", "H2"][i % 3];
            Atom::new(name, resname, res as i64 + 1, 'A')
        })
        .collect();
    let mut sys = System::new(atoms);
    sys.assign_resindex();
    sys.add_frame(Frame {
        coords,
        pbox: PeriodicBox::orthogonal([edge; 3]),
        time: 0.0,
    })
    .unwrap();
    sys
}

fn bench_find_within(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_within");
    for &n_side in &[20usize, 40] {
        let (coords, edge) = build_synthetic_coords(n_side);
        let pbox = PeriodicBox::orthogonal([edge; 3]);
        let all: Vec<usize> = (0..coords.len()).collect();
        let targets: Vec<usize> = (0..coords.len()).step_by(50).collect();
        let label = format!("{}atoms", coords.len());

        for &(periodic, threads) in &[(false, 1usize), (true, 1), (true, 8)] {
            let config = SearchConfig::new(5.0)
                .periodic(periodic)
                .max_threads(threads);
            let id = format!(
                "{}_t{}",
                if periodic { "pbc" } else { "nopbc" },
                threads
            );
            group.bench_with_input(
                BenchmarkId::new(id, &label),
                &(&coords, &all, &targets),
                |b, &(coords, all, targets)| {
                    let cand = ParticleSet::new(coords, all).unwrap();
                    let targ = ParticleSet::new(coords, targets).unwrap();
                    b.iter(|| find_within(&config, black_box(&cand), black_box(&targ), &pbox, true));
                },
            );
        }
    }
    group.finish();
}

fn bench_find_contacts(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_contacts");
    for &n_side in &[20usize, 30] {
        let (coords, edge) = build_synthetic_coords(n_side);
        let pbox = PeriodicBox::orthogonal([edge; 3]);
        let all: Vec<usize> = (0..coords.len()).collect();
        let label = format!("{}atoms", coords.len());
        let config = SearchConfig::new(3.5).periodic(true);

        group.bench_with_input(
            BenchmarkId::new("pbc_3.5", &label),
            &(&coords, &all),
            |b, &(coords, all)| {
                let set = ParticleSet::new(coords, all).unwrap();
                b.iter(|| find_contacts(&config, black_box(&set), &pbox, true, false));
            },
        );
    }
    group.finish();
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let sys = build_synthetic_system(30);
    let label = format!("{}atoms", sys.atoms.len());
    for query in [
        "name O and resname SOL",
        "within 5 of resname LIG",
        "name O and within 3.5 pbc of resname LIG",
    ] {
        let mut compiled = compile(query).unwrap();
        group.bench_with_input(BenchmarkId::new(query, &label), &sys, |b, sys| {
            b.iter(|| compiled.evaluate(black_box(sys), 0).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_find_within, bench_find_contacts, bench_query);
criterion_main!(benches);
