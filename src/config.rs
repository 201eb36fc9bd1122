//! Tunables of a [`CellGrid`](crate::CellGrid).
//!
//! Geometry (box, periodicity, interaction ranges) is not configured here,
//! it is read from the [`Context`](crate::Context) on every rebuild.
use crate::error::{Error, Result};

/// Ring radius used unless configured otherwise, i.e. a 5×5×5 stencil.
pub const DEFAULT_RADIUS: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridConfig {
    /// Verlet skin added to the maximum cutoff.
    pub skin: f64,
    /// Number of neighbor cell rings around each cell.
    /// Cells have a width of `(cutoff + skin) / radius`.
    pub radius: u8,
    /// Worker threads used for rebuilding.
    pub threads: usize,
    /// Maintain per-particle neighbor lists in addition to cell lists.
    pub cache_neighbors: bool,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            skin: 0.0,
            radius: DEFAULT_RADIUS,
            threads: rayon::current_num_threads(),
            cache_neighbors: false,
        }
    }
}

impl GridConfig {
    pub fn with_skin(mut self, skin: f64) -> Self {
        self.skin = skin;
        self
    }

    pub fn with_radius(mut self, radius: u8) -> Self {
        self.radius = radius;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_neighbor_cache(mut self, enabled: bool) -> Self {
        self.cache_neighbors = enabled;
        self
    }

    /// Checks the configuration, failing on values a grid can't be built with.
    ///
    /// A radius of `0` is accepted but degenerates the grid into a single cell.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(Error::Config("at least one worker thread is required".into()));
        }
        if !(self.skin.is_finite() && self.skin >= 0.0) {
            return Err(Error::Config(format!(
                "skin must be non-negative and finite, got {}",
                self.skin
            )));
        }
        if self.radius == 0 {
            log::warn!("cell ring radius is 0, every particle will share a single cell");
        }
        Ok(())
    }
}
