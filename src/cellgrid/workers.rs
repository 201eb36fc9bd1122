//! Static work distribution for the rebuild workers.
use core::ops::Range;

/// Splits `0..total` into `workers` contiguous ranges of `total / workers` items,
/// the last range additionally takes the remainder.
///
/// Always returns exactly `max(workers, 1)` ranges, some of which may be empty.
pub fn partition(total: usize, workers: usize) -> Vec<Range<usize>> {
    let workers = workers.max(1);
    let share = total / workers;

    (0..workers)
        .map(|worker| {
            let start = worker * share;
            let end = if worker + 1 == workers {
                total
            } else {
                start + share
            };
            start..end
        })
        .collect()
}

/// Splits `slice` into consecutive disjoint sub-slices with the lengths of `ranges`.
///
/// # Panics
/// Panics if the ranges cover more than `slice.len()` items.
pub fn split_mut<'s, T>(mut slice: &'s mut [T], ranges: &[Range<usize>]) -> Vec<&'s mut [T]> {
    ranges
        .iter()
        .map(|range| {
            let (head, tail) = core::mem::take(&mut slice).split_at_mut(range.len());
            slice = tail;
            head
        })
        .collect()
}
