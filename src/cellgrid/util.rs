use crate::context::SimBox;
use crate::error::{Error, Result};
use nalgebra::Vector3;

/// Upper bound on the number of cells. Finer lattices are coarsened until they fit.
pub const MAX_CELLS: usize = 1 << 21;

/// Geometry of the cell lattice covering a [`SimBox`].
///
/// Cells are at least `(cutoff + skin) / radius` wide along every axis,
/// so all partners within `cutoff + skin` of a particle lie in the `radius` rings around its cell.
/// Cell sizes are stretched such that an integral number of cells fills the box exactly.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridInfo {
    pub(crate) sim_box: SimBox,
    pub(crate) cutoff: f64,
    pub(crate) skin: f64,
    pub(crate) radius: u8,
    shape: [usize; 3],
    cell_size: Vector3<f64>,
    coarsened: bool,
}

fn count_cells(shape: [usize; 3]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n))
}

/// Halves the longest axis until at most [`MAX_CELLS`] cells remain.
/// Cells only grow, so the lattice still covers `reach` within its rings.
fn coarsen(mut shape: [usize; 3]) -> ([usize; 3], bool) {
    let mut coarsened = false;
    while count_cells(shape).map_or(true, |n| n > MAX_CELLS) {
        let axis = if shape[0] >= shape[1] && shape[0] >= shape[2] {
            0
        } else if shape[1] >= shape[2] {
            1
        } else {
            2
        };
        shape[axis] = (shape[axis] / 2).max(1);
        coarsened = true;
    }
    (shape, coarsened)
}

impl GridInfo {
    pub fn new(sim_box: SimBox, cutoff: f64, skin: f64, radius: u8) -> Self {
        let size = Vector3::from(sim_box.size());
        let reach = cutoff + skin;

        let (shape, coarsened) = if reach > 0.0 && radius > 0 {
            let width = reach / f64::from(radius);
            let counts =
                size.map(|len| (len / width).floor().clamp(1.0, MAX_CELLS as f64) as usize);
            coarsen(counts.into())
        } else {
            // nothing interacts or no rings: one cell spanning the whole box
            ([1; 3], false)
        };

        let cell_size = size.component_div(&Vector3::from(shape.map(|n| n as f64)));

        Self {
            sim_box,
            cutoff,
            skin,
            radius,
            shape,
            cell_size,
            coarsened,
        }
    }

    /// Whether the lattice was coarsened to stay within [`MAX_CELLS`].
    pub fn is_coarsened(&self) -> bool {
        self.coarsened
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn n_cells(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn cell_size(&self) -> [f64; 3] {
        self.cell_size.into()
    }

    pub fn sim_box(&self) -> &SimBox {
        &self.sim_box
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    pub fn skin(&self) -> f64 {
        self.skin
    }

    pub fn radius(&self) -> u8 {
        self.radius
    }

    /// Maximum distance neighbor candidates are guaranteed to be found within.
    pub fn reach(&self) -> f64 {
        self.cutoff + self.skin
    }

    /// Returns the lattice coordinates of the cell containing `pos`,
    /// or `None` if `pos` lies outside the box along a non-periodic axis.
    pub fn cell_coords(&self, pos: &Vector3<f64>) -> Option<[usize; 3]> {
        let periodic = self.sim_box.periodic();
        let half = 0.5 * Vector3::from(self.sim_box.size());
        let mut coords = [0; 3];

        for a in 0..3 {
            let n = self.shape[a] as i64;
            let idx = ((pos[a] + half[a]) / self.cell_size[a]).floor() as i64;

            coords[a] = if periodic[a] {
                idx.rem_euclid(n) as usize
            } else if -half[a] <= pos[a] && pos[a] < half[a] {
                // rounding may push points right below the upper boundary onto `n`
                idx.clamp(0, n - 1) as usize
            } else {
                return None;
            };
        }

        Some(coords)
    }

    /// Row-major contiguous index, i.e. `k + j * nz + i * ny * nz`.
    pub fn flatten(&self, [i, j, k]: [usize; 3]) -> Result<usize> {
        let [_, ny, nz] = self.shape;
        let index = k + j * nz + i * ny * nz;

        if i < self.shape[0] && j < ny && k < nz {
            Ok(index)
        } else {
            log::error!(
                "cell {:?} (index {}) is not part of the {:?} grid",
                [i, j, k],
                index,
                self.shape
            );
            Err(Error::CellIndexOutOfRange {
                index,
                n_cells: self.n_cells(),
            })
        }
    }

    pub fn unflatten(&self, index: usize) -> [usize; 3] {
        let [_, ny, nz] = self.shape;
        [index / (ny * nz), (index / nz) % ny, index % nz]
    }

    /// Contiguous index of the cell containing `pos`, see [`GridInfo::cell_coords()`].
    pub fn cell_index(&self, pos: &Vector3<f64>) -> Result<Option<usize>> {
        self.cell_coords(pos)
            .map(|coords| self.flatten(coords))
            .transpose()
    }
}
