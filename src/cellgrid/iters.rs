//! Read-only traversal of cells, their neighborhoods and candidate pairs.
//!
//! Nothing in here locks: iterators borrow the [`CellGrid`] immutably while rebuilding requires `&mut`.
use super::{Cell, CellGrid};
use core::iter::FusedIterator;
use rayon::prelude::*;

/// Which cells a [`Cursor`] visits, starting from its focal cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Traversal {
    /// Only the particles of the focal cell ("box").
    #[default]
    OwnCell,
    /// The focal cell followed by every neighbor cell in ascending order ("macro box").
    CellAndNeighbors,
    /// Like [`Traversal::CellAndNeighbors`] but omitting the given number of leading neighbor cells.
    CellAndNeighborsSkip(usize),
}

impl Traversal {
    fn first_neighbor(&self) -> Option<usize> {
        match self {
            Traversal::OwnCell => None,
            Traversal::CellAndNeighbors => Some(0),
            Traversal::CellAndNeighborsSkip(skip) => Some(*skip),
        }
    }
}

/// Iterates over particle indices of a focal cell and, depending on its [`Traversal`], its neighbors.
///
/// Cursors are restartable by cloning and compare by position.
/// Exhausted cursors of the same traversal compare equal regardless of where they started,
/// so any exhausted cursor can serve as the end-of-sequence sentinel.
#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Cursor<'g> {
    cells: &'g [Cell],
    focal: usize,
    traversal: Traversal,
    // `None` while in the focal cell, otherwise position in the focal cell's adjacency
    neighbor: Option<usize>,
    offset: usize,
}

impl<'g> Cursor<'g> {
    pub(crate) fn new(cells: &'g [Cell], focal: usize, traversal: Traversal) -> Self {
        Self {
            cells,
            focal,
            traversal,
            neighbor: None,
            offset: 0,
        }
    }

    /// Starts inside the focal cell, right after its first `offset` particles.
    pub(crate) fn starting_at(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn focal(&self) -> usize {
        self.focal
    }

    pub fn traversal(&self) -> Traversal {
        self.traversal
    }

    pub fn is_exhausted(&self) -> bool {
        let mut probe = *self;
        probe.settle().is_none()
    }

    fn current_list(&self) -> Option<&'g [usize]> {
        let focal = self.cells.get(self.focal)?;
        match self.neighbor {
            None => Some(&focal.particles),
            Some(k) => {
                let cell = focal.neighbors.get(k)?;
                self.cells.get(*cell).map(|cell| cell.particles.as_slice())
            }
        }
    }

    /// Advances past exhausted lists, returning the list the cursor points into.
    fn settle(&mut self) -> Option<&'g [usize]> {
        loop {
            let list = self.current_list()?;
            if self.offset < list.len() {
                return Some(list);
            }

            self.neighbor = match self.neighbor {
                None => Some(self.traversal.first_neighbor().unwrap_or(usize::MAX)),
                Some(k) => Some(k.saturating_add(1)),
            };
            self.offset = 0;
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let list = self.settle()?;
        let index = list[self.offset];
        self.offset += 1;
        Some(index)
    }
}

impl FusedIterator for Cursor<'_> {}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        if self.traversal != other.traversal {
            return false;
        }
        // compare settled positions, the end of one list equals the start of the next
        let (mut lhs, mut rhs) = (*self, *other);
        match (lhs.settle().is_some(), rhs.settle().is_some()) {
            (false, false) => true,
            (true, true) => {
                core::ptr::eq(lhs.cells, rhs.cells)
                    && lhs.focal == rhs.focal
                    && lhs.neighbor == rhs.neighbor
                    && lhs.offset == rhs.offset
            }
            _ => false,
        }
    }
}

/// A cell of a [`CellGrid`] together with the grid it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct GridCell<'g> {
    pub(crate) cells: &'g [Cell],
    pub(crate) index: usize,
}

impl<'g> GridCell<'g> {
    fn cell(&self) -> &'g Cell {
        &self.cells[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn coords(&self) -> [usize; 3] {
        self.cell().coords
    }

    pub fn particles(&self) -> &'g [usize] {
        &self.cell().particles
    }

    /// Indices of adjacent cells, ascending.
    pub fn neighbors(&self) -> &'g [usize] {
        &self.cell().neighbors
    }

    pub fn max_displacements(&self) -> [f64; 2] {
        self.cell().max_displacements
    }

    /// Whether the last dirty check found this cell's neighborhood moved by more than the skin.
    pub fn is_dirty(&self) -> bool {
        self.cell().dirty
    }

    pub fn is_empty(&self) -> bool {
        self.cell().particles.is_empty()
    }

    /// Particles of this cell.
    pub fn iter(&self) -> Cursor<'g> {
        Cursor::new(self.cells, self.index, Traversal::OwnCell)
    }

    /// Particles of this cell followed by those of all neighbor cells.
    pub fn macro_iter(&self) -> Cursor<'g> {
        Cursor::new(self.cells, self.index, Traversal::CellAndNeighbors)
    }

    /// Every particle of this cell paired with every particle of its macro box, including itself.
    ///
    /// Each unordered pair across two cells shows up twice when this is done for all cells,
    /// pairs within a cell even show up in both orders here.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn candidate_pairs(&self) -> impl Iterator<Item = (usize, usize)> + Clone + 'g {
        let inner = self.macro_iter();
        self.particles()
            .iter()
            .flat_map(move |&i| inner.map(move |j| (i, j)))
    }

    /// Number of neighbors with a lower cell index, i.e. the skip that restricts
    /// a macro box to the upper half of its neighborhood.
    pub fn lower_neighbors(&self) -> usize {
        self.neighbors().partition_point(|&neighbor| neighbor < self.index)
    }

    /// Unique unordered pairs this cell is responsible for:
    /// pairs within the cell and pairs with neighbor cells of a higher index.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + Clone + 'g {
        let upper = Cursor::new(
            self.cells,
            self.index,
            Traversal::CellAndNeighborsSkip(self.lower_neighbors()),
        );
        self.particles()
            .iter()
            .enumerate()
            .flat_map(move |(k, &i)| upper.starting_at(k + 1).map(move |j| (i, j)))
    }
}

impl CellGrid {
    /// Returns an iterator over all [`GridCell`]s in this `CellGrid`, including empty cells.
    ///
    /// Yields nothing before the grid has been built.
    pub fn iter(&self) -> impl Iterator<Item = GridCell<'_>> + Clone {
        let cells = self.cells.as_slice();
        (0..cells.len()).map(move |index| GridCell { cells, index })
    }

    pub fn par_iter(&self) -> impl IndexedParallelIterator<Item = GridCell<'_>> {
        let cells = self.cells.as_slice();
        (0..cells.len())
            .into_par_iter()
            .map(move |index| GridCell { cells, index })
    }

    pub fn cursor(&self, cell: usize, traversal: Traversal) -> Cursor<'_> {
        Cursor::new(&self.cells, cell, traversal)
    }

    /// Particles in `cell`. Empty for unknown cells.
    pub fn box_iter(&self, cell: usize) -> Cursor<'_> {
        self.cursor(cell, Traversal::OwnCell)
    }

    /// Particles in `cell` and its neighbors, see [`Traversal::CellAndNeighborsSkip`].
    pub fn macro_iter(&self, cell: usize, skip: usize) -> Cursor<'_> {
        let traversal = match skip {
            0 => Traversal::CellAndNeighbors,
            skip => Traversal::CellAndNeighborsSkip(skip),
        };
        self.cursor(cell, traversal)
    }

    /// See [`GridCell::candidate_pairs()`]. Empty for unknown cells.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn candidate_pairs(&self, cell: usize) -> impl Iterator<Item = (usize, usize)> + Clone + '_ {
        self.cell(cell)
            .into_iter()
            .flat_map(|cell| cell.candidate_pairs())
    }

    /// Iterate over all unique unordered pairs of particles in the same or adjacent cells.
    ///
    /// Distances are not checked, filtering by cutoff is up to the caller:
    /// ```
    /// # use zellhaut::{CellGrid, Context, GridConfig, Mode, ParticleKind, ParticleStore, SimBox};
    /// # let mut ctx = Context::new(SimBox::periodic_cube(10.0).unwrap());
    /// # ctx.register_potential(1.0).unwrap();
    /// # let mut store = ParticleStore::new();
    /// # store.add([0.0, 0.0, 0.0], ParticleKind(0));
    /// # store.add([0.5, 0.0, 0.0], ParticleKind(0));
    /// # let mut grid = CellGrid::new(GridConfig::default()).unwrap();
    /// # grid.rebuild(&ctx, &mut store, Mode::Full).unwrap();
    /// let sim_box = ctx.sim_box();
    /// let close = grid
    ///     .pairs()
    ///     .filter(|&(i, j)| {
    ///         let (p, q) = (store.position(i).unwrap(), store.position(j).unwrap());
    ///         sim_box.distance_squared(p, q) <= 1.0
    ///     })
    ///     .count();
    /// assert_eq!(close, 1);
    /// ```
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + Clone + '_ {
        self.iter().flat_map(|cell| cell.pairs())
    }

    /// Parallel version of [`CellGrid::pairs()`].
    ///
    /// This is a [`ParallelIterator`] driven by the current (usually global) rayon pool,
    /// not by the rebuild workers of this grid.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn par_pairs(&self) -> impl ParallelIterator<Item = (usize, usize)> + '_ {
        self.par_iter().flat_map_iter(|cell| cell.pairs())
    }

    pub fn for_each_pair<F: FnMut(usize, usize)>(&self, mut f: F) {
        self.pairs().for_each(|(i, j)| f(i, j));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // cells 0 and 1 are adjacent, 2 is isolated
    fn cells() -> Vec<Cell> {
        let mut cells = vec![
            Cell::new([0, 0, 0], vec![1]),
            Cell::new([1, 0, 0], vec![0]),
            Cell::new([2, 0, 0], vec![]),
        ];
        cells[0].particles = vec![0, 2];
        cells[1].particles = vec![1];
        cells[2].particles = vec![3, 4];
        cells
    }

    #[test]
    fn test_cursor_traversals() {
        let cells = cells();

        let own: Vec<_> = Cursor::new(&cells, 0, Traversal::OwnCell).collect();
        assert_eq!(own, vec![0, 2]);

        let full: Vec<_> = Cursor::new(&cells, 0, Traversal::CellAndNeighbors).collect();
        assert_eq!(full, vec![0, 2, 1]);

        let skipped: Vec<_> = Cursor::new(&cells, 1, Traversal::CellAndNeighborsSkip(1)).collect();
        assert_eq!(skipped, vec![1]);

        // skipping more than there is
        let skipped: Vec<_> = Cursor::new(&cells, 0, Traversal::CellAndNeighborsSkip(5)).collect();
        assert_eq!(skipped, vec![0, 2]);

        // unknown focal cell
        assert_eq!(Cursor::new(&cells, 9, Traversal::CellAndNeighbors).count(), 0);
    }

    #[test]
    fn test_cursor_skips_empty_cells() {
        let mut cells = cells();
        cells[0].particles.clear();

        let full: Vec<_> = Cursor::new(&cells, 0, Traversal::CellAndNeighbors).collect();
        assert_eq!(full, vec![1]);
    }

    #[test]
    fn test_cursor_equality() {
        let cells = cells();
        let a = Cursor::new(&cells, 0, Traversal::CellAndNeighbors);
        let mut b = a;
        assert_eq!(a, b);

        b.next();
        assert_ne!(a, b);

        // restartable
        let restarted = a;
        assert_eq!(restarted.collect::<Vec<_>>(), a.collect::<Vec<_>>());

        // exhausted cursors of the same traversal are all equal
        let mut end_0 = Cursor::new(&cells, 0, Traversal::CellAndNeighbors);
        end_0.by_ref().for_each(drop);
        let mut end_2 = Cursor::new(&cells, 2, Traversal::CellAndNeighbors);
        end_2.by_ref().for_each(drop);
        assert!(end_0.is_exhausted());
        assert_eq!(end_0, end_2);
        assert_eq!(end_0.next(), None);

        let mut own_end = Cursor::new(&cells, 0, Traversal::OwnCell);
        own_end.by_ref().for_each(drop);
        assert_ne!(own_end, end_0);
    }

    #[test]
    fn test_cell_pairs() {
        let cells = cells();
        let cell = GridCell {
            cells: &cells,
            index: 0,
        };
        assert_eq!(cell.lower_neighbors(), 0);
        assert_eq!(cell.pairs().collect::<Vec<_>>(), vec![(0, 2), (0, 1), (2, 1)]);

        let cell = GridCell {
            cells: &cells,
            index: 1,
        };
        assert_eq!(cell.lower_neighbors(), 1);
        assert_eq!(cell.pairs().count(), 0);

        let cell = GridCell {
            cells: &cells,
            index: 2,
        };
        assert_eq!(cell.pairs().collect::<Vec<_>>(), vec![(3, 4)]);
        assert_eq!(cell.candidate_pairs().count(), 4);
    }
}
