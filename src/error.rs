//! Error type shared by all fallible operations of this crate.
//!
//! Two kinds of failures travel through [`Error`]:
//! internal consistency failures (see [`Error::is_internal()`]) mean the cell grid itself is corrupted
//! and must never be retried or ignored, everything else is caused by bad input or configuration.
//! Recoverable conditions (e.g. a stale neighbor cache lookup) are not errors at all;
//! they are logged and answered with an empty result.
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid [`GridConfig`](crate::GridConfig), e.g. zero worker threads or a negative skin.
    #[error("configuration error: {0}")]
    Config(String),

    /// The simulation box has a non-positive or non-finite edge length.
    #[error("invalid simulation box: {0}")]
    InvalidBox(String),

    /// A negative or non-finite interaction radius was registered.
    #[error("invalid interaction radius {0}")]
    InvalidRadius(f64),

    /// Building the worker pool failed.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The slot is out of range or its particle has already been removed.
    #[error("no active particle in slot {0}")]
    InactiveParticle(usize),

    /// A computed contiguous cell index is not part of the grid.
    #[error("cell index {index} out of range for a grid of {n_cells} cells")]
    CellIndexOutOfRange { index: usize, n_cells: usize },

    /// A particle was not found in the cell it was recorded in.
    #[error("particle {particle} is not listed in its recorded cell {cell}")]
    ParticleNotInCell { particle: usize, cell: usize },
}

impl Error {
    /// Returns `true` for violations of the grid's own invariants.
    ///
    /// These are programming errors: continuing with the grid risks silently missed interactions.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::CellIndexOutOfRange { .. } | Error::ParticleNotInCell { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_classification() {
        assert!(Error::CellIndexOutOfRange {
            index: 8,
            n_cells: 8
        }
        .is_internal());
        assert!(Error::ParticleNotInCell {
            particle: 3,
            cell: 1
        }
        .is_internal());
        assert!(!Error::Config("threads".into()).is_internal());
        assert!(!Error::InactiveParticle(0).is_internal());
    }
}
