//! Verlet-skin bookkeeping: which cells have to be rebuilt.
//!
//! Every cell tracks the two largest displacements of its particles since they were last placed.
//! Two particles within the cutoff of each other always sit in the same or in adjacent cells,
//! so if the sum of the two largest displacements over a cell and its neighbors stays within the skin,
//! no pair around that cell can have closed in from beyond `cutoff + skin`.
use super::util::GridInfo;
use super::{Cell, Placement};
use crate::error::Result;
use crate::particles::Entry;
use hashbrown::{HashMap, HashSet};
use rayon::prelude::*;

/// A particle whose recorded cell differs from the one its position maps to,
/// or a slot that was handed to a new particle since it was placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Departure {
    pub slot: usize,
    pub from: Option<usize>,
    pub to: Option<usize>,
    /// The slot now holds a different particle than the one placed in `from`.
    pub reused: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DirtyScan {
    /// Cells to rebuild, sorted.
    pub dirty: Vec<usize>,
    /// Cells whose own displacements exceeded the skin.
    pub n_own_dirty: usize,
    /// True cell of every departed particle.
    pub moved: HashMap<usize, Option<usize>>,
    /// Previously unbinned particles by the cell they have to be placed in.
    pub arrivals: HashMap<usize, Vec<usize>>,
    /// First departure that skipped over the source cell's neighborhood, if any.
    pub overrun: Option<Departure>,
}

/// Two largest values, the larger one first. Empty input yields zeros.
pub fn top_two(values: impl IntoIterator<Item = f64>) -> [f64; 2] {
    values.into_iter().fold([0.0; 2], |[first, second], value| {
        if value > first {
            [value, first]
        } else if value > second {
            [first, value]
        } else {
            [first, second]
        }
    })
}

fn merge_top_two(lhs: [f64; 2], rhs: [f64; 2]) -> [f64; 2] {
    top_two(lhs.into_iter().chain(rhs))
}

/// Refreshes the per-cell maximum displacements from the particle entries.
pub(crate) fn track_displacements(cells: &mut [Cell], entries: &[Entry]) {
    cells.par_iter_mut().for_each(|cell| {
        cell.max_displacements = top_two(
            cell.particles
                .iter()
                .filter_map(|&slot| entries.get(slot))
                .map(|entry| entry.displacement),
        );
    });
}

/// Flags cells whose neighborhood moved by more than `skin`. Every cell is dirty if `skin` is zero.
pub(crate) fn mark_dirty(cells: &mut [Cell], skin: f64) -> usize {
    let flags: Vec<bool> = cells
        .par_iter()
        .map(|cell| {
            if skin <= 0.0 {
                return true;
            }
            let [first, second] = cell
                .neighbors
                .iter()
                .filter_map(|&neighbor| cells.get(neighbor))
                .fold(cell.max_displacements, |acc, neighbor| {
                    merge_top_two(acc, neighbor.max_displacements)
                });
            first + second > skin
        })
        .collect();

    cells
        .iter_mut()
        .zip(&flags)
        .for_each(|(cell, &dirty)| cell.dirty = dirty);
    flags.iter().filter(|&&dirty| dirty).count()
}

/// Finds particles that are no longer listed in the cell their position maps to.
///
/// Inactive particles map to no cell at all, so stale entries of removed particles show up here as well.
/// Slots reused by [`ParticleStore::add()`](crate::ParticleStore::add) are reported even if
/// the new particle maps to the same cell as the previous one.
pub(crate) fn departures(
    info: &GridInfo,
    cell_of: &[Option<Placement>],
    entries: &[Entry],
) -> Result<Vec<Departure>> {
    entries
        .par_iter()
        .enumerate()
        .filter_map(|(slot, entry)| {
            let placed = cell_of.get(slot).copied().flatten();
            let from = placed.map(|placed| placed.cell);
            let reused = !entry.deactivated && placed.is_some_and(|placed| placed.id != entry.id);
            let to = if entry.deactivated {
                Ok(None)
            } else {
                info.cell_index(&entry.position)
            };

            match to {
                Ok(to) if to == from && !reused => None,
                Ok(to) => Some(Ok(Departure {
                    slot,
                    from,
                    to,
                    reused,
                })),
                Err(err) => Some(Err(err)),
            }
        })
        .collect()
}

/// Determines the set of cells an incremental rebuild has to process.
///
/// These are the cells flagged by [`mark_dirty()`], their neighbors,
/// and both ends of every [`Departure`].
pub(crate) fn scan(
    cells: &mut [Cell],
    cell_of: &[Option<Placement>],
    info: &GridInfo,
    entries: &[Entry],
) -> Result<DirtyScan> {
    track_displacements(cells, entries);
    let n_own_dirty = mark_dirty(cells, info.skin());
    let departures = departures(info, cell_of, entries)?;

    let mut dirty = HashSet::new();
    for (index, cell) in cells.iter().enumerate().filter(|(_, cell)| cell.dirty) {
        dirty.insert(index);
        dirty.extend(cell.neighbors.iter().copied());
    }

    let mut scan = DirtyScan {
        n_own_dirty,
        ..Default::default()
    };

    for departure in departures {
        let Departure {
            slot,
            from,
            to,
            reused,
        } = departure;
        let active = entries.get(slot).is_some_and(|entry| !entry.deactivated);

        match (from, to) {
            // a new occupant is placed from scratch, wherever the previous one was
            (_, Some(to)) if reused => scan.arrivals.entry(to).or_default().push(slot),
            (Some(from), Some(to)) => {
                let adjacent = cells
                    .get(from)
                    .is_some_and(|cell| cell.neighbors.binary_search(&to).is_ok());
                if !adjacent && scan.overrun.is_none() {
                    scan.overrun = Some(departure);
                }
            }
            (None, Some(to)) => scan.arrivals.entry(to).or_default().push(slot),
            (Some(from), None) if active && !reused => {
                log::warn!("particle {slot} left the simulation box through cell {from}");
            }
            _ => {}
        }

        dirty.extend(from);
        dirty.extend(to);
        scan.moved.insert(slot, to);
    }

    scan.dirty = dirty.into_iter().collect();
    scan.dirty.sort_unstable();
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cellgrid::neighbors::adjacency;
    use crate::context::SimBox;
    use crate::particles::ParticleKind;
    use nalgebra::Vector3;

    fn entry(position: [f64; 3], displacement: f64) -> Entry {
        Entry {
            position: Vector3::from(position),
            kind: ParticleKind(0),
            displacement,
            deactivated: false,
            id: 0,
        }
    }

    fn placed(cell: usize, id: u64) -> Option<Placement> {
        Some(Placement { cell, id })
    }

    fn cells_for(info: &GridInfo) -> Vec<Cell> {
        adjacency(info)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(index, neighbors)| Cell::new(info.unflatten(index), neighbors))
            .collect()
    }

    #[test]
    fn test_top_two() {
        assert_eq!(top_two([]), [0.0, 0.0]);
        assert_eq!(top_two([0.3]), [0.3, 0.0]);
        assert_eq!(top_two([0.1, 0.5, 0.2, 0.4]), [0.5, 0.4]);
        assert_eq!(top_two([0.5, 0.5]), [0.5, 0.5]);
        assert_eq!(merge_top_two([0.9, 0.1], [0.3, 0.2]), [0.9, 0.3]);
    }

    #[test]
    fn test_mark_dirty() {
        // 10 x 1 x 1 cells along x, one ring
        let sim_box = SimBox::new([10.0, 1.0, 1.0], [false; 3]).unwrap();
        let info = GridInfo::new(sim_box, 1.0, 0.5, 1);
        assert_eq!(info.shape(), [6, 1, 1]);
        let mut cells = cells_for(&info);

        cells[1].max_displacements = [0.3, 0.0];
        cells[2].max_displacements = [0.25, 0.1];
        assert_eq!(mark_dirty(&mut cells, 0.5), 2);
        // cell 1 and 2 see 0.3 + 0.25 in their neighborhoods
        assert_eq!(
            cells.iter().map(|cell| cell.dirty).collect::<Vec<_>>(),
            vec![false, true, true, false, false, false]
        );

        assert_eq!(mark_dirty(&mut cells, 0.6), 0);
        // zero skin marks everything
        assert_eq!(mark_dirty(&mut cells, 0.0), cells.len());
    }

    #[test]
    fn test_scan_departures() {
        let sim_box = SimBox::new([4.0, 1.0, 1.0], [true, false, false]).unwrap();
        let info = GridInfo::new(sim_box, 1.0, 1.0, 2);
        assert_eq!(info.shape(), [4, 1, 1]);
        let mut cells = cells_for(&info);

        let entries = vec![
            entry([-1.5, 0.0, 0.0], 0.1), // stays in 0
            entry([-0.4, 0.0, 0.0], 0.2), // 0 -> 1
            entry([1.5, 0.0, 0.0], 0.0),  // unbinned -> 3
            entry([0.5, 3.0, 0.0], 0.0),  // 2 -> outside
        ];
        let cell_of = vec![placed(0, 0), placed(0, 0), None, placed(2, 0)];
        cells[0].particles = vec![0, 1];
        cells[2].particles = vec![3];

        let scan = scan(&mut cells, &cell_of, &info, &entries).unwrap();
        assert_eq!(scan.n_own_dirty, 0);
        assert_eq!(scan.dirty, vec![0, 1, 2, 3]);
        assert_eq!(scan.moved.len(), 3);
        assert_eq!(scan.moved[&1], Some(1));
        assert_eq!(scan.moved[&3], None);
        assert_eq!(scan.arrivals[&3], vec![2]);
        assert!(scan.overrun.is_none());
        assert_eq!(cells[0].max_displacements, [0.2, 0.1]);
    }

    #[test]
    fn test_scan_reused_slot() {
        let sim_box = SimBox::new([4.0, 1.0, 1.0], [true, false, false]).unwrap();
        let info = GridInfo::new(sim_box, 1.0, 1.0, 2);
        let mut cells = cells_for(&info);

        // slot 1 was handed to a new particle (id 5) in the same cell, slot 2 to one far away
        let mut entries = vec![entry([-1.5, 0.0, 0.0], 0.0); 3];
        entries[1].id = 5;
        entries[2] = Entry {
            id: 6,
            ..entry([1.5, 0.0, 0.0], 0.0)
        };
        let cell_of = vec![placed(0, 0), placed(0, 1), placed(0, 2)];
        cells[0].particles = vec![0, 1, 2];

        let scan = scan(&mut cells, &cell_of, &info, &entries).unwrap();
        assert_eq!(scan.moved.len(), 2);
        assert_eq!(scan.moved[&1], Some(0));
        assert_eq!(scan.moved[&2], Some(3));
        assert_eq!(scan.arrivals[&0], vec![1]);
        assert_eq!(scan.arrivals[&3], vec![2]);
        assert_eq!(scan.dirty, vec![0, 3]);
        // a new occupant is no overrun, however far it is from the old one
        assert!(scan.overrun.is_none());
    }

    #[test]
    fn test_scan_overrun() {
        // 8 cells along x, neighbors within one ring only
        let sim_box = SimBox::new([8.0, 1.0, 1.0], [false; 3]).unwrap();
        let info = GridInfo::new(sim_box, 1.0, 0.0, 1);
        let mut cells = cells_for(&info);

        let entries = vec![entry([3.5, 0.0, 0.0], 4.0)];
        cells[0].particles = vec![0];

        let scan = scan(&mut cells, &[placed(0, 0)], &info, &entries).unwrap();
        assert_eq!(
            scan.overrun,
            Some(Departure {
                slot: 0,
                from: Some(0),
                to: Some(7),
                reused: false,
            })
        );
    }
}
