//! Lock-free binning of particles into cells.
//!
//! Every cell owns the head of a singly linked list threaded through one `next` slot per particle.
//! Links are stored 1-based so that `0` marks an empty head or the end of a list.
//! Inserting is a single atomic exchange on the cell's head, so any number of threads can bin
//! particles into the same cell concurrently. Reading the chains is only sound once all
//! writers have been joined, which [`CellGrid`](super::CellGrid) guarantees by draining
//! them after the binning scope has closed.
use core::iter::FusedIterator;
use std::sync::atomic::{AtomicUsize, Ordering};

const EMPTY: usize = 0;

#[derive(Debug, Default)]
pub struct AtomicBins {
    heads: Vec<AtomicUsize>,
    next: Vec<AtomicUsize>,
}

impl AtomicBins {
    #[cfg(test)]
    fn new(n_cells: usize, n_slots: usize) -> Self {
        let mut bins = Self::default();
        bins.reset(n_cells, n_slots);
        bins
    }

    /// Empties all bins, keeping allocations where possible.
    pub fn reset(&mut self, n_cells: usize, n_slots: usize) {
        self.heads.truncate(n_cells);
        self.heads
            .iter_mut()
            .for_each(|head| *head.get_mut() = EMPTY);
        self.heads.resize_with(n_cells, || AtomicUsize::new(EMPTY));

        self.next.truncate(n_slots);
        self.next
            .iter_mut()
            .for_each(|link| *link.get_mut() = EMPTY);
        self.next.resize_with(n_slots, || AtomicUsize::new(EMPTY));
    }

    #[cfg(test)]
    fn n_cells(&self) -> usize {
        self.heads.len()
    }

    /// Prepends `slot` to the chain of `cell`.
    ///
    /// # Panics
    /// Panics if `cell` or `slot` exceed the sizes this was reset to.
    /// Each slot may be pushed at most once per reset.
    pub fn push(&self, cell: usize, slot: usize) {
        let previous = self.heads[cell].swap(slot + 1, Ordering::AcqRel);
        self.next[slot].store(previous, Ordering::Release);
    }

    /// Iterates over the slots binned into `cell`, most recent first.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn chain(&self, cell: usize) -> Chain<'_> {
        Chain {
            bins: self,
            cursor: self
                .heads
                .get(cell)
                .map_or(EMPTY, |head| head.load(Ordering::Acquire)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chain<'b> {
    bins: &'b AtomicBins,
    cursor: usize,
}

impl Iterator for Chain<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor.checked_sub(1)?;
        self.cursor = self
            .bins
            .next
            .get(slot)
            .map_or(EMPTY, |link| link.load(Ordering::Acquire));
        Some(slot)
    }
}

impl FusedIterator for Chain<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_push_chain() {
        let bins = AtomicBins::new(3, 5);
        bins.push(1, 0);
        bins.push(1, 3);
        bins.push(2, 4);

        assert_eq!(bins.chain(0).count(), 0);
        assert_eq!(bins.chain(1).collect::<Vec<_>>(), vec![3, 0]);
        assert_eq!(bins.chain(2).collect::<Vec<_>>(), vec![4]);
        // unknown cells are empty
        assert_eq!(bins.chain(7).count(), 0);
    }

    #[test]
    fn test_reset() {
        let mut bins = AtomicBins::new(2, 2);
        bins.push(0, 0);
        bins.push(0, 1);

        bins.reset(4, 3);
        assert_eq!(bins.n_cells(), 4);
        assert!((0..4).all(|cell| bins.chain(cell).next().is_none()));

        bins.push(3, 2);
        assert_eq!(bins.chain(3).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_concurrent_push() {
        let n_cells = 7;
        let n_slots = 10_000;
        let bins = AtomicBins::new(n_cells, n_slots);

        (0..n_slots)
            .into_par_iter()
            .for_each(|slot| bins.push(slot % n_cells, slot));

        let mut total = 0;
        for cell in 0..n_cells {
            let mut slots: Vec<_> = bins.chain(cell).collect();
            slots.sort_unstable();
            let expected: Vec<_> = (cell..n_slots).step_by(n_cells).collect();
            assert_eq!(slots, expected);
            total += slots.len();
        }
        assert_eq!(total, n_slots);
    }
}
