// In order to enumerate all neighboring cells of a cell we iterate through a (2r+1)^3 box centered around it.
// Starting at a corner of that box, each relative offset is a 3-digit number in balanced base 2r+1,
// i.e. every digit runs from -r to r (for r = 1 these are balanced trits).
// Enumerating the offsets is simply done by incrementing that number with carry,
// starting from [-r; 3] until the upper corner [r; 3] has been emitted.
//
// This is equivalent to the cartesian product (-r..=r)^3 for which we could use itertools,
// but an odometer over a fixed-size array doesn't allocate.
use super::util::GridInfo;
use crate::error::Result;
use core::iter::FusedIterator;
use rayon::prelude::*;

/// Relative offsets of all cells within `radius` rings around a center cell, the center excluded.
#[derive(Debug, Clone, Copy)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct RelativeNeighborIndices {
    radius: i32,
    // `None` once the upper corner has been emitted
    state: Option<[i32; 3]>,
}

impl RelativeNeighborIndices {
    pub fn new(radius: u8) -> Self {
        let radius = i32::from(radius);
        Self {
            radius,
            state: Some([-radius; 3]),
        }
    }

    /// Number of offsets, i.e. `(2r + 1)^3 - 1`.
    pub fn stencil_len(radius: u8) -> usize {
        (2 * radius as usize + 1).pow(3) - 1
    }

    fn increment(&mut self) {
        self.state = self.state.and_then(|mut digits| {
            // least significant digit last, so offsets come out in row-major order
            for digit in digits.iter_mut().rev() {
                if *digit < self.radius {
                    *digit += 1;
                    return Some(digits);
                }
                *digit = -self.radius;
            }
            None
        });
    }
}

impl Iterator for RelativeNeighborIndices {
    type Item = [i32; 3];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.state?;
            self.increment();
            // skip the center cell
            if current != [0; 3] {
                return Some(current);
            }
        }
    }
}

impl FusedIterator for RelativeNeighborIndices {}

/// Cell indices adjacent to `index`, sorted ascending and without duplicates or `index` itself.
///
/// Offsets wrap around periodic axes and are dropped beyond non-periodic boundaries.
/// In grids with fewer than `2r + 1` cells along a periodic axis, several offsets wrap onto the same cell.
pub fn neighbor_cells(info: &GridInfo, index: usize) -> Result<Vec<usize>> {
    let center = info.unflatten(index);
    let shape = info.shape();
    let periodic = info.sim_box().periodic();

    let mut neighbors = Vec::with_capacity(RelativeNeighborIndices::stencil_len(info.radius()));

    'offsets: for offset in RelativeNeighborIndices::new(info.radius()) {
        let mut coords = [0; 3];
        for a in 0..3 {
            let n = shape[a] as i64;
            let c = center[a] as i64 + i64::from(offset[a]);
            coords[a] = if periodic[a] {
                c.rem_euclid(n) as usize
            } else if (0..n).contains(&c) {
                c as usize
            } else {
                continue 'offsets;
            };
        }

        let neighbor = info.flatten(coords)?;
        if neighbor != index {
            neighbors.push(neighbor);
        }
    }

    neighbors.sort_unstable();
    neighbors.dedup();
    Ok(neighbors)
}

/// Adjacency lists for every cell of the grid, computed in parallel.
pub fn adjacency(info: &GridInfo) -> Result<Vec<Vec<usize>>> {
    (0..info.n_cells())
        .into_par_iter()
        .map(|index| neighbor_cells(info, index))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SimBox;

    #[test]
    fn test_relative_neighbor_indices() {
        let offsets: Vec<_> = RelativeNeighborIndices::new(1).collect();
        assert_eq!(offsets.len(), 26);
        assert_eq!(offsets.first(), Some(&[-1, -1, -1]));
        assert_eq!(offsets.last(), Some(&[1, 1, 1]));
        assert!(!offsets.contains(&[0, 0, 0]));

        let offsets: Vec<_> = RelativeNeighborIndices::new(2).collect();
        assert_eq!(offsets.len(), RelativeNeighborIndices::stencil_len(2));
        assert_eq!(offsets.len(), 124);

        let mut sorted = offsets.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, offsets, "offsets should be unique and ordered");

        assert_eq!(RelativeNeighborIndices::new(0).count(), 0);
    }

    #[test]
    fn test_adjacency_symmetric() {
        for periodic in [[false; 3], [true; 3], [true, false, true]] {
            let sim_box = SimBox::new([6.0, 5.0, 7.0], periodic).unwrap();
            let info = GridInfo::new(sim_box, 1.0, 0.0, 2);
            let adjacency = adjacency(&info).unwrap();

            for (cell, neighbors) in adjacency.iter().enumerate() {
                assert!(!neighbors.contains(&cell), "self excluded");
                assert!(neighbors.windows(2).all(|w| w[0] < w[1]), "sorted and unique");

                for &neighbor in neighbors {
                    assert!(
                        adjacency[neighbor].binary_search(&cell).is_ok(),
                        "{neighbor} lists {cell} ({periodic:?})"
                    );
                }
            }
        }
    }

    #[test]
    fn test_adjacency_boundaries() {
        // 10x10x10 cells of width 0.5
        let info = GridInfo::new(SimBox::new([5.0; 3], [false; 3]).unwrap(), 1.0, 0.0, 2);
        let corner = neighbor_cells(&info, 0).unwrap();
        assert_eq!(corner.len(), 3 * 3 * 3 - 1);

        let center = info.flatten([5, 5, 5]).unwrap();
        assert_eq!(neighbor_cells(&info, center).unwrap().len(), 124);

        let info = GridInfo::new(SimBox::periodic_cube(5.0).unwrap(), 1.0, 0.0, 2);
        assert_eq!(neighbor_cells(&info, 0).unwrap().len(), 124);
        assert!(neighbor_cells(&info, 0)
            .unwrap()
            .contains(&info.flatten([9, 9, 9]).unwrap()));
    }

    #[test]
    fn test_small_periodic_grid_dedup() {
        // 2 x 3 x 1 cells, stencil wraps onto the same cells several times
        let sim_box = SimBox::new([2.0, 3.0, 1.0], [true; 3]).unwrap();
        let info = GridInfo::new(sim_box, 1.0, 0.0, 1);
        assert_eq!(info.shape(), [2, 3, 1]);

        for index in 0..info.n_cells() {
            assert_eq!(neighbor_cells(&info, index).unwrap().len(), info.n_cells() - 1);
        }

        // single cell has no neighbors at all
        let info = GridInfo::new(sim_box, 0.0, 0.0, 2);
        assert!(neighbor_cells(&info, 0).unwrap().is_empty());
    }
}
