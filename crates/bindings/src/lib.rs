#![allow(clippy::useless_conversion)]
#![allow(clippy::too_many_arguments)]

use ndarray::Array2;
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::{PyIndexError, PyValueError};
use pyo3::prelude::*;

use molsel_core::{
    find_contacts, find_contacts_between, find_within, Atom, CompiledQuery, Contacts, Frame,
    ParticleSet, ParticleStore, PeriodicBox, SearchConfig, SelectionError, System,
};

// ============================================================================
// Helpers
// ============================================================================

fn to_py_err(e: SelectionError) -> PyErr {
    match e {
        SelectionError::Index(_) => PyIndexError::new_err(e.to_string()),
        _ => PyValueError::new_err(e.to_string()),
    }
}

fn array2_to_coords(arr: &ndarray::ArrayView2<f64>) -> PyResult<Vec<[f64; 3]>> {
    if arr.shape()[1] != 3 {
        return Err(PyValueError::new_err(format!(
            "Expected coordinates of shape (n, 3), got {:?}",
            arr.shape()
        )));
    }
    let n = arr.shape()[0];
    Ok((0..n)
        .map(|i| [arr[[i, 0]], arr[[i, 1]], arr[[i, 2]]])
        .collect())
}

/// Box vectors as rows of a (3, 3) array; `None` means no periodic box.
fn array2_to_box(arr: Option<&ndarray::ArrayView2<f64>>) -> PyResult<PeriodicBox> {
    let Some(arr) = arr else {
        return Ok(PeriodicBox::none());
    };
    if arr.dim() != (3, 3) {
        return Err(PyValueError::new_err(format!(
            "Expected box vectors of shape (3, 3), got {:?}",
            arr.dim()
        )));
    }
    let mut vectors = [[0.0; 3]; 3];
    for (i, row) in vectors.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = arr[[i, j]];
        }
    }
    Ok(PeriodicBox::new(vectors))
}

fn to_indices(arr: &PyReadonlyArray1<'_, i64>) -> PyResult<Vec<usize>> {
    arr.as_array()
        .iter()
        .map(|&i| {
            usize::try_from(i)
                .map_err(|_| PyIndexError::new_err(format!("Negative particle index {}", i)))
        })
        .collect()
}

fn indices_to_py<'py>(py: Python<'py>, indices: &[usize]) -> Bound<'py, PyArray1<i64>> {
    let v: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    PyArray1::from_vec_bound(py, v)
}

fn contacts_to_py<'py>(
    py: Python<'py>,
    contacts: &Contacts,
) -> (Bound<'py, PyArray2<i64>>, Bound<'py, PyArray1<f64>>) {
    let mut pairs = Array2::<i64>::zeros((contacts.len(), 2));
    for (k, p) in contacts.pairs.iter().enumerate() {
        pairs[[k, 0]] = p[0] as i64;
        pairs[[k, 1]] = p[1] as i64;
    }
    let distances = contacts.distances.clone().unwrap_or_default();
    (
        pairs.to_pyarray_bound(py),
        PyArray1::from_vec_bound(py, distances),
    )
}

// ============================================================================
// PARTICLE TABLE
// ============================================================================

/// Particle attributes plus any number of coordinate frames.
#[pyclass(name = "ParticleTable")]
struct PyParticleTable {
    inner: System,
}

#[pymethods]
impl PyParticleTable {
    #[new]
    #[pyo3(signature = (names, resnames, resids, chains=None, tags=None, beta=None, occupancy=None))]
    fn new(
        names: Vec<String>,
        resnames: Vec<String>,
        resids: PyReadonlyArray1<'_, i64>,
        chains: Option<Vec<String>>,
        tags: Option<Vec<String>>,
        beta: Option<PyReadonlyArray1<'_, f64>>,
        occupancy: Option<PyReadonlyArray1<'_, f64>>,
    ) -> PyResult<Self> {
        let n = names.len();
        let resids = resids.as_array();
        let beta = beta.as_ref().map(|b| b.as_array());
        let occupancy = occupancy.as_ref().map(|o| o.as_array());

        let lengths = [
            Some(resnames.len()),
            Some(resids.len()),
            chains.as_ref().map(Vec::len),
            tags.as_ref().map(Vec::len),
            beta.as_ref().map(|b| b.len()),
            occupancy.as_ref().map(|o| o.len()),
        ];
        if lengths.iter().flatten().any(|&len| len != n) {
            return Err(PyValueError::new_err(format!(
                "All per-particle arrays must have length {}",
                n
            )));
        }

        let atoms = (0..n)
            .map(|i| {
                let chain = chains
                    .as_ref()
                    .and_then(|c| c[i].chars().next())
                    .unwrap_or(' ');
                let mut atom = Atom::new(&names[i], &resnames[i], resids[i], chain);
                if let Some(t) = &tags {
                    atom.tag = t[i].clone();
                }
                if let Some(b) = &beta {
                    atom.beta = b[i];
                }
                if let Some(o) = &occupancy {
                    atom.occupancy = o[i];
                }
                atom
            })
            .collect();
        let mut inner = System::new(atoms);
        inner.assign_resindex();
        Ok(Self { inner })
    }

    #[getter]
    fn n_particles(&self) -> usize {
        self.inner.atoms.len()
    }

    #[getter]
    fn n_frames(&self) -> usize {
        self.inner.num_frames()
    }

    /// Append a frame and return its index.
    #[pyo3(signature = (coords, box_vectors=None, time=0.0))]
    fn add_frame(
        &mut self,
        coords: PyReadonlyArray2<'_, f64>,
        box_vectors: Option<PyReadonlyArray2<'_, f64>>,
        time: f64,
    ) -> PyResult<usize> {
        let coords = array2_to_coords(&coords.as_array())?;
        let pbox = array2_to_box(box_vectors.as_ref().map(|b| b.as_array()).as_ref())?;
        self.inner
            .add_frame(Frame { coords, pbox, time })
            .map_err(to_py_err)
    }

    fn resindex<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray1<i64>> {
        let v: Vec<i64> = self.inner.atoms.iter().map(|a| a.resindex as i64).collect();
        PyArray1::from_vec_bound(py, v)
    }
}

// ============================================================================
// QUERIES
// ============================================================================

#[pyclass(name = "Query")]
struct PyQuery {
    inner: CompiledQuery,
}

#[pymethods]
impl PyQuery {
    #[getter]
    fn text(&self) -> &str {
        self.inner.text()
    }

    fn is_frame_dependent(&self) -> bool {
        self.inner.is_frame_dependent()
    }

    #[pyo3(signature = (table, frame=0, max_threads=None))]
    fn evaluate<'py>(
        &mut self,
        py: Python<'py>,
        table: PyRef<'py, PyParticleTable>,
        frame: usize,
        max_threads: Option<usize>,
    ) -> PyResult<Bound<'py, PyArray1<i64>>> {
        self.inner.set_max_threads(max_threads);
        let indices = self
            .inner
            .evaluate(&table.inner, frame)
            .map_err(to_py_err)?;
        Ok(indices_to_py(py, &indices))
    }

    fn __repr__(&self) -> String {
        format!("Query({:?})", self.inner.text())
    }
}

#[pyfunction]
#[pyo3(name = "compile")]
fn compile_py(query: &str) -> PyResult<PyQuery> {
    let inner = CompiledQuery::compile(query).map_err(to_py_err)?;
    Ok(PyQuery { inner })
}

#[pyfunction]
#[pyo3(name = "select", signature = (table, query, frame=0))]
fn select_py<'py>(
    py: Python<'py>,
    table: PyRef<'py, PyParticleTable>,
    query: &str,
    frame: usize,
) -> PyResult<Bound<'py, PyArray1<i64>>> {
    let indices = molsel_core::select(&table.inner, query, frame).map_err(to_py_err)?;
    Ok(indices_to_py(py, &indices))
}

// ============================================================================
// PROXIMITY SEARCH
// ============================================================================

#[pyfunction]
#[pyo3(
    name = "find_within",
    signature = (cutoff, coords, candidates, targets, box_vectors=None, periodic=false, include_self=true, max_threads=None)
)]
fn find_within_py<'py>(
    py: Python<'py>,
    cutoff: f64,
    coords: PyReadonlyArray2<'py, f64>,
    candidates: PyReadonlyArray1<'py, i64>,
    targets: PyReadonlyArray1<'py, i64>,
    box_vectors: Option<PyReadonlyArray2<'py, f64>>,
    periodic: bool,
    include_self: bool,
    max_threads: Option<usize>,
) -> PyResult<Bound<'py, PyArray1<i64>>> {
    let coords = array2_to_coords(&coords.as_array())?;
    let pbox = array2_to_box(box_vectors.as_ref().map(|b| b.as_array()).as_ref())?;
    let candidates = to_indices(&candidates)?;
    let targets = to_indices(&targets)?;

    let mut config = SearchConfig::new(cutoff).periodic(periodic);
    config.max_threads = max_threads;
    let found = py
        .allow_threads(|| {
            let cand = ParticleSet::new(&coords, &candidates)?;
            let targ = ParticleSet::new(&coords, &targets)?;
            find_within(&config, &cand, &targ, &pbox, include_self)
        })
        .map_err(to_py_err)?;
    Ok(indices_to_py(py, &found))
}

#[pyfunction]
#[pyo3(
    name = "find_contacts",
    signature = (cutoff, coords, selection, selection2=None, box_vectors=None, periodic=false, absolute_index=true, max_threads=None)
)]
fn find_contacts_py<'py>(
    py: Python<'py>,
    cutoff: f64,
    coords: PyReadonlyArray2<'py, f64>,
    selection: PyReadonlyArray1<'py, i64>,
    selection2: Option<PyReadonlyArray1<'py, i64>>,
    box_vectors: Option<PyReadonlyArray2<'py, f64>>,
    periodic: bool,
    absolute_index: bool,
    max_threads: Option<usize>,
) -> PyResult<(Bound<'py, PyArray2<i64>>, Bound<'py, PyArray1<f64>>)> {
    let coords = array2_to_coords(&coords.as_array())?;
    let pbox = array2_to_box(box_vectors.as_ref().map(|b| b.as_array()).as_ref())?;
    let first = to_indices(&selection)?;
    let second = selection2.as_ref().map(to_indices).transpose()?;

    let mut config = SearchConfig::new(cutoff).periodic(periodic);
    config.max_threads = max_threads;
    let contacts = py
        .allow_threads(|| {
            let set1 = ParticleSet::new(&coords, &first)?;
            match &second {
                Some(second) => {
                    let set2 = ParticleSet::new(&coords, second)?;
                    find_contacts_between(&config, &set1, &set2, &pbox, absolute_index, true)
                }
                None => find_contacts(&config, &set1, &pbox, absolute_index, true),
            }
        })
        .map_err(to_py_err)?;
    Ok(contacts_to_py(py, &contacts))
}

#[pymodule]
fn molsel(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Selection language
    m.add_class::<PyParticleTable>()?;
    m.add_class::<PyQuery>()?;
    m.add_function(wrap_pyfunction!(compile_py, m)?)?;
    m.add_function(wrap_pyfunction!(select_py, m)?)?;

    // Proximity search
    m.add_function(wrap_pyfunction!(find_within_py, m)?)?;
    m.add_function(wrap_pyfunction!(find_contacts_py, m)?)?;

    Ok(())
}
