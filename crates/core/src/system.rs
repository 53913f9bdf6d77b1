//! Particle storage consumed by the selection evaluator.
//!
//! The evaluator only needs read access by linear index and frame number,
//! expressed by [`ParticleStore`]. [`System`] is a plain in-memory store.

use crate::periodic_box::PeriodicBox;
use crate::selection::error::SelectionError;

/// Read-only per-particle attributes and per-frame coordinates.
///
/// `coords` and `periodic_box` are only called with `frame < num_frames()`.
pub trait ParticleStore {
    fn num_particles(&self) -> usize;
    fn num_frames(&self) -> usize;

    fn name(&self, i: usize) -> &str;
    fn resname(&self, i: usize) -> &str;
    fn tag(&self, i: usize) -> &str;
    fn chain(&self, i: usize) -> char;
    fn resid(&self, i: usize) -> i64;
    /// Zero-based residue group identifier, unique per residue.
    fn resindex(&self, i: usize) -> usize;
    fn beta(&self, i: usize) -> f64;
    fn occupancy(&self, i: usize) -> f64;

    fn coords(&self, frame: usize) -> &[[f64; 3]];
    fn periodic_box(&self, frame: usize) -> &PeriodicBox;
}

/// Static attributes of one particle.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub name: String,
    pub resname: String,
    pub tag: String,
    pub chain: char,
    pub resid: i64,
    pub resindex: usize,
    pub beta: f64,
    pub occupancy: f64,
}

impl Default for Atom {
    fn default() -> Self {
        Self {
            name: String::new(),
            resname: String::new(),
            tag: String::new(),
            chain: ' ',
            resid: 0,
            resindex: 0,
            beta: 0.0,
            occupancy: 1.0,
        }
    }
}

impl Atom {
    pub fn new(name: &str, resname: &str, resid: i64, chain: char) -> Self {
        Self {
            name: name.to_string(),
            resname: resname.to_string(),
            resid,
            chain,
            ..Default::default()
        }
    }
}

/// One time-sampled snapshot of coordinates plus its box.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub coords: Vec<[f64; 3]>,
    pub pbox: PeriodicBox,
    pub time: f64,
}

/// In-memory particle store.
#[derive(Debug, Clone, Default)]
pub struct System {
    pub atoms: Vec<Atom>,
    frames: Vec<Frame>,
}

impl System {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self {
            atoms,
            frames: Vec::new(),
        }
    }

    /// Append a frame; its coordinate count must match the atom count.
    pub fn add_frame(&mut self, frame: Frame) -> Result<usize, SelectionError> {
        if frame.coords.len() != self.atoms.len() {
            return Err(SelectionError::index(format!(
                "Coordinate count ({}) doesn't match atom count ({})",
                frame.coords.len(),
                self.atoms.len()
            )));
        }
        self.frames.push(frame);
        Ok(self.frames.len() - 1)
    }

    pub fn frame(&self, i: usize) -> Result<&Frame, SelectionError> {
        self.frames.get(i).ok_or_else(|| {
            SelectionError::index(format!(
                "Frame {} out of range (system has {} frames)",
                i,
                self.frames.len()
            ))
        })
    }

    pub fn frame_mut(&mut self, i: usize) -> Result<&mut Frame, SelectionError> {
        let n = self.frames.len();
        self.frames.get_mut(i).ok_or_else(|| {
            SelectionError::index(format!("Frame {} out of range (system has {} frames)", i, n))
        })
    }

    /// Number residues by contiguous runs of (resid, chain).
    pub fn assign_resindex(&mut self) {
        let mut current: Option<(i64, char)> = None;
        let mut index = 0usize;
        for atom in self.atoms.iter_mut() {
            let key = (atom.resid, atom.chain);
            match current {
                Some(prev) if prev == key => {}
                Some(_) => {
                    index += 1;
                    current = Some(key);
                }
                None => current = Some(key),
            }
            atom.resindex = index;
        }
    }
}

impl ParticleStore for System {
    fn num_particles(&self) -> usize {
        self.atoms.len()
    }

    fn num_frames(&self) -> usize {
        self.frames.len()
    }

    fn name(&self, i: usize) -> &str {
        &self.atoms[i].name
    }

    fn resname(&self, i: usize) -> &str {
        &self.atoms[i].resname
    }

    fn tag(&self, i: usize) -> &str {
        &self.atoms[i].tag
    }

    fn chain(&self, i: usize) -> char {
        self.atoms[i].chain
    }

    fn resid(&self, i: usize) -> i64 {
        self.atoms[i].resid
    }

    fn resindex(&self, i: usize) -> usize {
        self.atoms[i].resindex
    }

    fn beta(&self, i: usize) -> f64 {
        self.atoms[i].beta
    }

    fn occupancy(&self, i: usize) -> f64 {
        self.atoms[i].occupancy
    }

    fn coords(&self, frame: usize) -> &[[f64; 3]] {
        &self.frames[frame].coords
    }

    fn periodic_box(&self, frame: usize) -> &PeriodicBox {
        &self.frames[frame].pbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_resindex() {
        let mut sys = System::new(vec![
            Atom::new("N", "ALA", 1, 'A'),
            Atom::new("CA", "ALA", 1, 'A'),
            Atom::new("N", "GLY", 2, 'A'),
            Atom::new("N", "GLY", 2, 'B'),
            Atom::new("O", "WAT", 1, 'W'),
        ]);
        sys.assign_resindex();
        let idx: Vec<usize> = sys.atoms.iter().map(|a| a.resindex).collect();
        assert_eq!(idx, vec![0, 0, 1, 2, 3]);
    }

    #[test]
    fn test_add_frame_checks_size() {
        let mut sys = System::new(vec![Atom::new("CA", "ALA", 1, 'A')]);
        let bad = Frame {
            coords: vec![[0.0; 3]; 2],
            ..Default::default()
        };
        assert!(matches!(sys.add_frame(bad), Err(SelectionError::Index(_))));

        let good = Frame {
            coords: vec![[1.0, 2.0, 3.0]],
            ..Default::default()
        };
        assert_eq!(sys.add_frame(good).unwrap(), 0);
        assert_eq!(sys.num_frames(), 1);
        assert!(sys.frame(1).is_err());
        assert_eq!(sys.coords(0)[0], [1.0, 2.0, 3.0]);
    }
}
