//! Core library for molsel.
//!
//! Pure Rust implementations with no Python dependencies.
//! Provides the atom selection language (tokenizer, parser, optimizer and
//! evaluator), periodic boxes, and the grid-based proximity search that
//! answers `within` queries and contact searches.

pub mod grid;
pub mod periodic_box;
pub mod search;
pub mod selection;
pub mod system;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use grid::{CustomGrid, ParticleSet};
pub use periodic_box::PeriodicBox;
pub use search::{
    find_contacts, find_contacts_between, find_within, find_within_point, Contacts, SearchConfig,
    WithinSearcher,
};
pub use selection::{compile, select, CompiledQuery, SelectionError};
pub use system::{Atom, Frame, ParticleStore, System};
