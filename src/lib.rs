//! `zellhaut`[^etymology] provides __cell lists with Verlet skins__ for particle simulations.
//!
//! Particle simulations usually require to compute interactions between those particles.
//! Considering all _pairwise_ interactions of _`n`_ particles would be of time complexity _`O(n²)`_.\
//! Cell lists facilitate _linear-time_ enumeration of particle pairs closer than a certain
//! cutoff distance by dividing the simulation box into cuboid grid cells.
//! Adding a _skin_ to the cutoff keeps the cells valid for several integration steps:
//! only cells whose neighborhood moved by more than the skin have to be rebuilt.
//!
//! # Overview
//!
//! - the simulation box is fixed, centered at the origin, and periodic per axis ([`SimBox`])
//! - the cutoff is the largest interaction range registered with the [`Context`]
//! - particles live in an index-stable [`ParticleStore`], the [`CellGrid`] only stores slots
//! - cells are `(cutoff + skin) / radius` wide, pairs are searched within `radius` rings of cells
//!   (`radius = 2` by default, i.e. a `5×5×5` neighborhood)
//! - rebuilds run on a dedicated `rayon` pool with [`GridConfig::threads`] workers,
//!   either fully ([`Mode::Full`]) or restricted to dirty cells ([`Mode::Incremental`])
//! - optionally, per-particle neighbor lists are cached alongside the cells
//!
//! # Usage
//!
//! The general pattern in which this crate is intended to be used is roughly:
//!
//! 1. register interaction ranges with a [`Context`] and fill a [`ParticleStore`]
//! 2. build a [`CellGrid`] with [`Mode::Full`]
//! 3. enumerate pairs in order to compute particle interactions
//! 4. move particles through [`ParticleStore::displace()`], which tracks their displacement
//! 5. rebuild with [`Mode::Incremental`] and continue with 3.
//!
//! This crate only provides iteration over candidate pairs.
//! It is left to the user to filter (eg. by distance) and compute interaction potentials.
//!
//! Library code never installs a logger, diagnostics are emitted through the [`log`] facade.
//!
//! # Examples
//! ```
//! use zellhaut::{CellGrid, Context, GridConfig, Mode, ParticleKind, ParticleStore, SimBox};
//! # fn main() -> zellhaut::Result<()> {
//! let mut ctx = Context::new(SimBox::periodic_cube(10.0)?);
//! ctx.register_potential(1.0)?;
//!
//! let mut store = ParticleStore::new();
//! for point in [[0.0, 0.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.1, 0.2]] {
//!     store.add(point, ParticleKind(0));
//! }
//!
//! let mut grid = CellGrid::new(GridConfig::default().with_skin(0.2))?;
//! grid.rebuild(&ctx, &mut store, Mode::Full)?;
//!
//! for (i, j) in grid.pairs() {
//!     /* do some work */
//! }
//!
//! grid.rebuild(&ctx, &mut store, Mode::Incremental)?;
//! # Ok(())
//! # }
//! ```
//!
//! [^etymology]: German _Zelle_ (cell) + _Haut_ (skin).
pub mod cellgrid;
pub mod config;
pub mod context;
pub mod error;
pub mod particles;

pub mod rayon {
    //! Re-export of the [`ParallelIterator`] trait.
    pub use rayon::prelude::ParallelIterator;
}

// inlined re-exports
#[doc(inline)]
pub use crate::cellgrid::{
    CellGrid, GridCell, GridState, Mode, Neighbor, RebuildStats, Traversal,
};
#[doc(inline)]
pub use crate::config::GridConfig;
#[doc(inline)]
pub use crate::context::{Context, SimBox};
#[doc(inline)]
pub use crate::error::{Error, Result};
#[doc(inline)]
pub use crate::particles::{Entry, ParticleKind, ParticleStore, ParticleUpdate};

/// Particle data trait.
///
/// This trait is required for types handed to [`ParticleStore`] which needs to know how to get coordinate data.\
/// Only [`Copy`] types can be used.
///
/// A blanket implementation for `Into<T> + Copy` types is provided.
/// Therefore, fixed-size float arrays and [`nalgebra::Vector3`] can be directly used.
///
/// # Examples
/// ```
/// # use zellhaut::{Particle, ParticleKind, ParticleStore};
/// #[derive(Clone, Copy)]
/// struct Bead {
///     charge: f32,
///     coords: [f64; 3],
/// }
///
/// impl Particle for Bead {
///     #[inline]
///     fn coords(&self) -> [f64; 3] {
///         self.coords
///     }
/// }
///
/// let mut store = ParticleStore::new();
/// let slot = store.add(Bead { charge: -1.0, coords: [0.5; 3] }, ParticleKind(0));
/// assert_eq!(store.position(slot).unwrap().x, 0.5);
/// ```
pub trait Particle<T = [f64; 3]>: Copy {
    /// Return a copy of this particle's coordinates
    fn coords(&self) -> T;
}

impl<P, T> Particle<T> for P
where
    P: Into<T> + Copy,
{
    #[inline]
    fn coords(&self) -> T {
        <P as Into<T>>::into(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_impl_particle() {
        let points = [[0.0, 1.0, 2.0]; 4];
        let vectors: Vec<Vector3<f64>> = points.iter().map(|p| Vector3::from(*p)).collect();

        let from_arrays: Vec<[f64; 3]> = points.iter().map(|p| p.coords()).collect();
        let from_vectors: Vec<[f64; 3]> = vectors.iter().map(|p| p.coords()).collect();
        assert_eq!(from_arrays, from_vectors);
    }

    #[test]
    fn test_impl_particle_ref() {
        #[derive(Clone, Copy)]
        struct ParticleRef<'p>(&'p [f64; 3]);

        impl Particle<[f64; 3]> for ParticleRef<'_> {
            #[inline]
            fn coords(&self) -> [f64; 3] {
                (*self.0).coords() // equivalent to *self.0
            }
        }

        let points = vec![[0.0; 3], [1.0; 3], [2.0; 3]];
        let mut store = ParticleStore::new();
        for point in &points {
            store.add(ParticleRef(point), ParticleKind(0));
        }
        assert_eq!(store.position(2).unwrap(), &Vector3::new(2.0, 2.0, 2.0));
    }
}
