//! Per-particle Verlet lists built from the cell lists.
//!
//! Each active, binned particle lists every other particle within `cutoff + skin`, sorted by slot.
//! Lists are recomputed for exactly those particles whose displacement is reset during a rebuild,
//! so every cached pair stays valid until the dirty tracker invalidates one of its cells.
use super::Cell;
use crate::context::SimBox;
use crate::error::{Error, Result};
use crate::particles::Entry;
use hashbrown::HashSet;
use parking_lot::RwLock;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance_squared: f64,
}

/// Read access to cell particle lists, wherever they currently live.
pub(crate) trait CellLists: Sync {
    fn for_each_in(&self, cell: usize, f: &mut dyn FnMut(usize)) -> Result<()>;
}

impl CellLists for [Cell] {
    fn for_each_in(&self, cell: usize, f: &mut dyn FnMut(usize)) -> Result<()> {
        let list = self.get(cell).ok_or(Error::CellIndexOutOfRange {
            index: cell,
            n_cells: self.len(),
        })?;
        list.particles.iter().for_each(|&slot| f(slot));
        Ok(())
    }
}

impl CellLists for [RwLock<Vec<usize>>] {
    fn for_each_in(&self, cell: usize, f: &mut dyn FnMut(usize)) -> Result<()> {
        let lock = self.get(cell).ok_or(Error::CellIndexOutOfRange {
            index: cell,
            n_cells: self.len(),
        })?;
        lock.read().iter().for_each(|&slot| f(slot));
        Ok(())
    }
}

/// Collects the partners of `slot` (living in `cell`) from the cell and its neighbors.
pub(crate) fn collect_neighbors<L: CellLists + ?Sized>(
    slot: usize,
    cell: usize,
    cells: &[Cell],
    lists: &L,
    entries: &[Entry],
    sim_box: &SimBox,
    reach: f64,
) -> Result<Vec<Neighbor>> {
    let Some(entry) = entries.get(slot).filter(|entry| !entry.deactivated) else {
        return Ok(Vec::new());
    };
    let neighbors = cells
        .get(cell)
        .map(|cell| cell.neighbors.as_slice())
        .ok_or(Error::CellIndexOutOfRange {
            index: cell,
            n_cells: cells.len(),
        })?;

    let reach_squared = reach * reach;
    let mut found = Vec::new();

    for other in core::iter::once(cell).chain(neighbors.iter().copied()) {
        lists.for_each_in(other, &mut |partner| {
            if partner == slot {
                return;
            }
            if let Some(partner_entry) = entries.get(partner).filter(|e| !e.deactivated) {
                let distance_squared =
                    sim_box.distance_squared(&entry.position, &partner_entry.position);
                if distance_squared <= reach_squared {
                    found.push(Neighbor {
                        index: partner,
                        distance_squared,
                    });
                }
            }
        })?;
    }

    found.sort_unstable_by_key(|neighbor| neighbor.index);
    Ok(found)
}

fn upsert(list: &mut Vec<Neighbor>, neighbor: Neighbor) {
    match list.binary_search_by_key(&neighbor.index, |n| n.index) {
        Ok(pos) => list[pos] = neighbor,
        Err(pos) => list.insert(pos, neighbor),
    }
}

fn excise(list: &mut Vec<Neighbor>, index: usize) {
    if let Ok(pos) = list.binary_search_by_key(&index, |n| n.index) {
        list.remove(pos);
    }
}

#[derive(Clone, Debug, Default)]
pub struct NeighborCache {
    lists: Vec<Vec<Neighbor>>,
    built: bool,
}

impl NeighborCache {
    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Cached partners of `slot` within `cutoff + skin`.
    ///
    /// Unknown slots, or a cache that hasn't been built, yield an empty slice.
    pub fn get(&self, slot: usize) -> &[Neighbor] {
        match self.lists.get(slot).filter(|_| self.built) {
            Some(list) => list,
            None => {
                log::debug!("no cached neighbors for particle {slot}");
                &[]
            }
        }
    }

    /// Total number of list entries, i.e. twice the number of cached pairs.
    pub fn n_entries(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.lists.clear();
        self.built = false;
    }

    pub(crate) fn replace_all(&mut self, lists: Vec<Vec<Neighbor>>) {
        self.lists = lists;
        self.built = true;
    }

    pub(crate) fn resize(&mut self, n_slots: usize) {
        if self.lists.len() < n_slots {
            self.lists.resize_with(n_slots, Vec::new);
        }
    }

    /// Replaces the lists of all updated particles and mirrors the changes into their partners' lists.
    ///
    /// Pairs between two updated particles are symmetric already since both were computed
    /// from the same positions.
    pub(crate) fn apply(&mut self, updates: Vec<(usize, Vec<Neighbor>)>) {
        let updated: HashSet<usize> = updates.iter().map(|(slot, _)| *slot).collect();
        if let Some(max) = updated.iter().max() {
            self.resize(max + 1);
        }

        let previous: Vec<(usize, Vec<Neighbor>)> = updates
            .into_iter()
            .map(|(slot, list)| (slot, core::mem::replace(&mut self.lists[slot], list)))
            .collect();

        for (slot, old) in previous {
            for stale in old.iter().filter(|n| !updated.contains(&n.index)) {
                let still_listed = self.lists[slot]
                    .binary_search_by_key(&stale.index, |n| n.index)
                    .is_ok();
                if !still_listed {
                    if let Some(partner) = self.lists.get_mut(stale.index) {
                        excise(partner, slot);
                    }
                }
            }
            self.mirror(slot, &updated);
        }
    }

    /// Sets the list of a newly binned particle.
    pub(crate) fn insert(&mut self, slot: usize, list: Vec<Neighbor>) {
        self.resize(slot + 1);
        self.lists[slot] = list;
        self.mirror(slot, &HashSet::new());
    }

    /// Drops `slot` from the cache, including every back reference.
    pub(crate) fn remove(&mut self, slot: usize) {
        let Some(list) = self.lists.get_mut(slot).map(core::mem::take) else {
            return;
        };
        for neighbor in list {
            if let Some(partner) = self.lists.get_mut(neighbor.index) {
                excise(partner, slot);
            }
        }
    }

    fn mirror(&mut self, slot: usize, skip: &HashSet<usize>) {
        for k in 0..self.lists[slot].len() {
            let Neighbor {
                index,
                distance_squared,
            } = self.lists[slot][k];
            if skip.contains(&index) {
                continue;
            }
            self.resize(index + 1);
            upsert(
                &mut self.lists[index],
                Neighbor {
                    index: slot,
                    distance_squared,
                },
            );
        }
    }
}
