pub mod cache;
pub(crate) mod dirty;
pub mod iters;
pub mod neighbors;
pub mod storage;
pub mod util;
pub(crate) mod workers;

pub use cache::{Neighbor, NeighborCache};
pub use iters::*;
pub use util::*;

use crate::config::GridConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::particles::{Entry, ParticleStore, ParticleUpdate};
use dirty::{Departure, DirtyScan};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rayon::prelude::*;
use std::sync::{Arc, Barrier};
use storage::AtomicBins;

/// A single cell of the lattice.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cell {
    pub(crate) coords: [usize; 3],
    /// Slots of the particles in this cell, ascending.
    pub(crate) particles: Vec<usize>,
    /// Adjacent cells, ascending, without duplicates or the cell itself.
    pub(crate) neighbors: Vec<usize>,
    pub(crate) max_displacements: [f64; 2],
    pub(crate) dirty: bool,
}

/// Cell a slot was placed in, and the occupant it was placed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Placement {
    pub cell: usize,
    pub id: u64,
}

impl Cell {
    pub(crate) fn new(coords: [usize; 3], neighbors: Vec<usize>) -> Self {
        Self {
            coords,
            neighbors,
            ..Default::default()
        }
    }
}

/// How [`CellGrid::rebuild()`] brings the cells up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Re-bin every particle.
    Full,
    /// Only rebuild cells whose neighborhood moved by more than the skin,
    /// or that particles left or entered.
    #[default]
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    /// Never built, or cleared.
    Uninitialized,
    /// Cell contents reflect the particle store.
    Built,
    /// The particle store changed since the last rebuild.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildStats {
    /// Mode that was actually used, incremental rebuilds may fall back to full ones.
    pub mode: Mode,
    pub n_cells: usize,
    pub rebuilt_cells: usize,
    /// Particles (re-)placed into cells.
    pub placed: usize,
    /// Active particles outside the box along a non-periodic axis.
    pub outside: usize,
}

#[derive(Debug, Default)]
struct WorkerOutput {
    error: Option<Error>,
    neighbors: Vec<(usize, Vec<Neighbor>)>,
}

/// Cell lists over a fixed, possibly periodic, simulation box.
///
/// The grid does not own particle data. It indexes the slots of a [`ParticleStore`]
/// and has to be told about insertions and removals, or rebuilt after them.
#[derive(Debug)]
pub struct CellGrid {
    config: GridConfig,
    pool: Arc<rayon::ThreadPool>,
    info: Option<GridInfo>,
    pub(crate) cells: Vec<Cell>,
    cell_of: Vec<Option<Placement>>,
    bins: AtomicBins,
    cache: NeighborCache,
    last_dirty: Vec<usize>,
    generation: Option<u64>,
}

impl CellGrid {
    /// Creates an empty grid and its worker pool. Nothing is indexed before the first [`CellGrid::rebuild()`].
    pub fn new(config: GridConfig) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("zellhaut-worker-{i}"))
            .build()?;

        Ok(Self {
            config,
            pool: Arc::new(pool),
            info: None,
            cells: Vec::new(),
            cell_of: Vec::new(),
            bins: AtomicBins::default(),
            cache: NeighborCache::default(),
            last_dirty: Vec::new(),
            generation: None,
        })
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Geometry of the last rebuild, `None` before the first one.
    pub fn info(&self) -> Option<&GridInfo> {
        self.info.as_ref()
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Option<GridCell<'_>> {
        (index < self.cells.len()).then_some(GridCell {
            cells: &self.cells,
            index,
        })
    }

    /// Cell the particle in `slot` has been placed in.
    pub fn cell_of(&self, slot: usize) -> Option<usize> {
        self.cell_of
            .get(slot)
            .copied()
            .flatten()
            .map(|placed| placed.cell)
    }

    pub fn state(&self, store: &ParticleStore) -> GridState {
        match (self.info, self.generation) {
            (Some(_), Some(generation)) if generation == store.generation() => GridState::Built,
            (Some(_), Some(_)) => GridState::Stale,
            _ => GridState::Uninitialized,
        }
    }

    /// Cells processed by the last incremental rebuild, ascending. Empty after a full rebuild.
    pub fn dirty_cells(&self) -> &[usize] {
        &self.last_dirty
    }

    /// Cached partners of `slot` within `cutoff + skin`, see [`GridConfig::cache_neighbors`].
    pub fn neighbors(&self, slot: usize) -> &[Neighbor] {
        if !self.config.cache_neighbors {
            log::debug!("neighbor cache is disabled, no neighbors for particle {slot}");
            return &[];
        }
        self.cache.get(slot)
    }

    pub fn neighbor_cache(&self) -> &NeighborCache {
        &self.cache
    }

    /// Drops all cells. The next rebuild re-establishes the geometry.
    pub fn clear(&mut self) {
        self.info = None;
        self.cells.clear();
        self.cell_of.clear();
        self.cache.clear();
        self.last_dirty.clear();
        self.generation = None;
    }

    /// Brings the cells up to date with `store`.
    ///
    /// Changes in geometry (box, periodicity, cutoff) always lead to a full rebuild,
    /// as does an incremental rebuild of an uninitialized grid.
    /// Returns only once all workers are done and the grid is consistent.
    pub fn rebuild(
        &mut self,
        ctx: &Context,
        store: &mut ParticleStore,
        mode: Mode,
    ) -> Result<RebuildStats> {
        let info = GridInfo::new(
            *ctx.sim_box(),
            ctx.max_cutoff(),
            self.config.skin,
            self.config.radius,
        );

        let mut mode = mode;
        if self.info != Some(info) {
            self.establish(info)?;
            mode = Mode::Full;
        }

        let stats = match mode {
            Mode::Full => self.rebuild_full(&info, store),
            Mode::Incremental => {
                let (cells, cell_of) = (&mut self.cells, &self.cell_of);
                let scan = self
                    .pool
                    .install(|| dirty::scan(cells, cell_of, &info, store.entries()));

                match scan {
                    Ok(DirtyScan {
                        overrun: Some(Departure { slot, from, to, .. }),
                        ..
                    }) => {
                        log::warn!(
                            "particle {slot} moved from cell {from:?} to non-adjacent cell {to:?}, \
                             falling back to a full rebuild (skin too small for the step size?)"
                        );
                        self.rebuild_full(&info, store)
                    }
                    Ok(scan) => self.rebuild_incremental(&info, store, scan),
                    Err(err) => Err(err),
                }
            }
        };

        match stats {
            Ok(stats) => {
                self.generation = Some(store.generation());
                Ok(stats)
            }
            Err(err) => {
                log::error!("rebuilding cell grid failed: {err}");
                self.clear();
                Err(err)
            }
        }
    }

    fn establish(&mut self, info: GridInfo) -> Result<()> {
        if info.reach() <= 0.0 {
            log::warn!("no interaction range registered, using a single cell");
        }
        if info.is_coarsened() {
            log::warn!(
                "cell lattice exceeds {} cells, coarsened to {:?}",
                MAX_CELLS,
                info.shape()
            );
        }
        log::info!(
            "cell grid of {:?} cells with size {:?} (cutoff {}, skin {}, {} ring(s))",
            info.shape(),
            info.cell_size(),
            info.cutoff(),
            info.skin(),
            info.radius()
        );

        let adjacency = self.pool.install(|| neighbors::adjacency(&info))?;
        self.cells = adjacency
            .into_iter()
            .enumerate()
            .map(|(index, neighbors)| Cell::new(info.unflatten(index), neighbors))
            .collect();
        self.cell_of.clear();
        self.cache.clear();
        self.info = Some(info);
        Ok(())
    }

    fn rebuild_full(&mut self, info: &GridInfo, store: &mut ParticleStore) -> Result<RebuildStats> {
        let threads = self.config.threads;
        let n_cells = self.cells.len();
        let n_slots = store.n_slots();

        self.bins.reset(n_cells, n_slots);
        self.cell_of.clear();
        self.cell_of.resize(n_slots, None);

        // bin particles, every worker owns a contiguous range of slots
        let slot_ranges = workers::partition(n_slots, threads);
        let mut results: Vec<Result<()>> = slot_ranges.iter().map(|_| Ok(())).collect();
        {
            let entries = store.entries();
            let bins = &self.bins;
            let chunks = workers::split_mut(&mut self.cell_of, &slot_ranges);

            self.pool.scope(|s| {
                for ((range, chunk), result) in slot_ranges.iter().zip(chunks).zip(&mut results) {
                    s.spawn(move |_| {
                        *result = range.clone().zip(chunk.iter_mut()).try_for_each(
                            |(slot, cell)| {
                                let entry = &entries[slot];
                                if !entry.deactivated {
                                    if let Some(index) = info.cell_index(&entry.position)? {
                                        bins.push(index, slot);
                                        *cell = Some(Placement {
                                            cell: index,
                                            id: entry.id,
                                        });
                                    }
                                }
                                Ok(())
                            },
                        );
                    });
                }
            });
        }
        results.into_iter().collect::<Result<()>>()?;

        // drain bins, every worker owns a contiguous range of cells
        let cell_ranges = workers::partition(n_cells, threads);
        {
            let bins = &self.bins;
            let chunks = workers::split_mut(&mut self.cells, &cell_ranges);

            self.pool.scope(|s| {
                for (range, chunk) in cell_ranges.iter().zip(chunks) {
                    s.spawn(move |_| {
                        for (index, cell) in range.clone().zip(chunk.iter_mut()) {
                            cell.particles.clear();
                            cell.particles.extend(bins.chain(index));
                            cell.particles.sort_unstable();
                            cell.max_displacements = [0.0; 2];
                            cell.dirty = false;
                        }
                    });
                }
            });
        }

        let mut placed = 0;
        for (slot, cell) in self.cell_of.iter().enumerate() {
            if cell.is_some() {
                store.reset_displacement(slot);
                placed += 1;
            }
        }
        let outside = store.len() - placed;
        if outside > 0 {
            log::warn!("{outside} particles are outside of the simulation box and not binned");
        }

        if self.config.cache_neighbors {
            let (cells, cell_of) = (self.cells.as_slice(), self.cell_of.as_slice());
            let entries = store.entries();
            let lists = self.pool.install(|| {
                cell_of
                    .par_iter()
                    .enumerate()
                    .map(|(slot, placed)| match placed {
                        Some(placed) => cache::collect_neighbors(
                            slot,
                            placed.cell,
                            cells,
                            cells,
                            entries,
                            info.sim_box(),
                            info.reach(),
                        ),
                        None => Ok(Vec::new()),
                    })
                    .collect::<Result<Vec<_>>>()
            })?;
            self.cache.replace_all(lists);
        }

        self.last_dirty.clear();
        log::debug!("full rebuild placed {placed} particles into {n_cells} cells");

        Ok(RebuildStats {
            mode: Mode::Full,
            n_cells,
            rebuilt_cells: n_cells,
            placed,
            outside,
        })
    }

    fn rebuild_incremental(
        &mut self,
        info: &GridInfo,
        store: &mut ParticleStore,
        scan: DirtyScan,
    ) -> Result<RebuildStats> {
        let DirtyScan {
            dirty,
            n_own_dirty,
            moved,
            arrivals,
            ..
        } = scan;
        log::debug!(
            "got dirty cells {} ({} exceeding the skin) vs total cells {}",
            dirty.len(),
            n_own_dirty,
            self.cells.len()
        );

        let with_cache = self.config.cache_neighbors;
        let ranges = workers::partition(dirty.len(), self.config.threads);
        let mut outputs: Vec<WorkerOutput> =
            ranges.iter().map(|_| WorkerOutput::default()).collect();

        // cell lists are only shared behind locks while workers are running
        let locked: Vec<RwLock<Vec<usize>>> = self
            .cells
            .iter_mut()
            .map(|cell| RwLock::new(core::mem::take(&mut cell.particles)))
            .collect();
        {
            let cells = self.cells.as_slice();
            let entries = store.entries();
            let barrier = Barrier::new(ranges.len());
            let (locked, moved, arrivals, barrier) = (&locked, &moved, &arrivals, &barrier);

            self.pool.scope(|s| {
                for (range, output) in ranges.iter().zip(&mut outputs) {
                    let share = &dirty[range.clone()];

                    s.spawn(move |_| {
                        // phase 1: collect new members, shared state is read only
                        let gathered: Result<Vec<Vec<usize>>> = share
                            .iter()
                            .map(|&cell| gather(cell, cells, locked, moved, arrivals))
                            .collect();
                        barrier.wait();

                        // phase 2: publish
                        match gathered {
                            Ok(lists) => {
                                for (&cell, list) in share.iter().zip(lists) {
                                    *locked[cell].write() = list;
                                }
                            }
                            Err(err) => output.error = Some(err),
                        }
                        barrier.wait();

                        // phase 3: neighbor lists of everything placed by this worker
                        if with_cache && output.error.is_none() {
                            output.error = share
                                .iter()
                                .try_for_each(|&cell| {
                                    let members = locked[cell].read().clone();
                                    for slot in members {
                                        let found = cache::collect_neighbors(
                                            slot,
                                            cell,
                                            cells,
                                            locked.as_slice(),
                                            entries,
                                            info.sim_box(),
                                            info.reach(),
                                        )?;
                                        output.neighbors.push((slot, found));
                                    }
                                    Ok(())
                                })
                                .err();
                        }
                    });
                }
            });
        }

        for (cell, list) in self.cells.iter_mut().zip(locked) {
            cell.particles = list.into_inner();
        }
        if let Some(err) = outputs.iter_mut().find_map(|output| output.error.take()) {
            return Err(err);
        }

        if self.cell_of.len() < store.n_slots() {
            self.cell_of.resize(store.n_slots(), None);
        }
        let entries = store.entries();
        for (&slot, &to) in &moved {
            self.cell_of[slot] = to.zip(entries.get(slot)).map(|(cell, entry)| Placement {
                cell,
                id: entry.id,
            });
        }

        let mut placed = 0;
        for &index in &dirty {
            let cell = &mut self.cells[index];
            cell.max_displacements = [0.0; 2];
            cell.dirty = false;
            for &slot in &cell.particles {
                store.reset_displacement(slot);
                placed += 1;
            }
        }

        if with_cache {
            self.cache.resize(store.n_slots());
            for (&slot, _) in moved.iter().filter(|(_, to)| to.is_none()) {
                self.cache.remove(slot);
            }
            self.cache.apply(
                outputs
                    .into_iter()
                    .flat_map(|output| output.neighbors)
                    .collect(),
            );
        }

        let outside = store
            .iter()
            .filter(|(slot, _)| self.cell_of(*slot).is_none())
            .count();
        let rebuilt_cells = dirty.len();
        self.last_dirty = dirty;

        Ok(RebuildStats {
            mode: Mode::Incremental,
            n_cells: self.cells.len(),
            rebuilt_cells,
            placed,
            outside,
        })
    }

    /// Places a particle that was just added to `store` without rebuilding.
    ///
    /// Before the first rebuild, or if the geometry in `ctx` changed since, this does nothing
    /// and the particle is placed by the next rebuild.
    pub fn insert(&mut self, ctx: &Context, store: &ParticleStore, slot: usize) -> Result<()> {
        let entry: Entry = *store.entry(slot).ok_or(Error::InactiveParticle(slot))?;
        let Some(info) = self.info else {
            return Ok(());
        };
        let current = GridInfo::new(
            *ctx.sim_box(),
            ctx.max_cutoff(),
            self.config.skin,
            self.config.radius,
        );
        if current != info {
            log::info!("geometry changed, particle {slot} is placed on the next rebuild");
            return Ok(());
        }
        // `ParticleStore::add()` bumps the generation by one
        let in_sync = self
            .generation
            .is_some_and(|generation| generation + 1 == store.generation());

        if self.cell_of.len() < store.n_slots() {
            self.cell_of.resize(store.n_slots(), None);
        }
        // the slot may still be listed for a previous occupant
        if let Some(previous) = self.cell_of[slot].take() {
            if let Some(cell) = self.cells.get_mut(previous.cell) {
                cell.particles.retain(|&other| other != slot);
            }
            self.cache.remove(slot);
        }

        match info.cell_index(&entry.position)? {
            Some(index) => {
                let list = &mut self.cells[index].particles;
                if let Err(pos) = list.binary_search(&slot) {
                    list.insert(pos, slot);
                }
                self.cell_of[slot] = Some(Placement {
                    cell: index,
                    id: entry.id,
                });

                if self.config.cache_neighbors {
                    let found = cache::collect_neighbors(
                        slot,
                        index,
                        &self.cells,
                        self.cells.as_slice(),
                        store.entries(),
                        info.sim_box(),
                        info.reach(),
                    )?;
                    self.cache.insert(slot, found);
                }
            }
            None => log::warn!("particle {slot} inserted outside of the simulation box"),
        }

        if in_sync {
            self.generation = Some(store.generation());
        }
        Ok(())
    }

    /// Removes a particle from its cell, the neighbor cache, and finally from `store`.
    pub fn remove(&mut self, store: &mut ParticleStore, slot: usize) -> Result<Entry> {
        if !store.is_active(slot) {
            return Err(Error::InactiveParticle(slot));
        }
        let in_sync = self.state(store) == GridState::Built;

        if let Some(index) = self.cell_of(slot) {
            let n_cells = self.cells.len();
            let list = &mut self
                .cells
                .get_mut(index)
                .ok_or(Error::CellIndexOutOfRange { index, n_cells })?
                .particles;

            match list.binary_search(&slot) {
                Ok(pos) => {
                    list.remove(pos);
                }
                Err(_) => {
                    log::error!("particle {slot} is not listed in its cell {index}");
                    return Err(Error::ParticleNotInCell {
                        particle: slot,
                        cell: index,
                    });
                }
            }
            self.cell_of[slot] = None;
        }
        self.cache.remove(slot);

        let entry = store.remove(slot)?;
        if in_sync {
            self.generation = Some(store.generation());
        }
        Ok(entry)
    }

    /// Applies a batch of removals and insertions to `store` and this grid.
    /// Returns the slots of the inserted particles.
    pub fn update(
        &mut self,
        ctx: &Context,
        store: &mut ParticleStore,
        update: ParticleUpdate,
    ) -> Result<Vec<usize>> {
        store.check_removals(&update.removed)?;
        for slot in update.removed {
            self.remove(store, slot)?;
        }

        update
            .added
            .into_iter()
            .map(|(position, kind)| {
                let slot = store.add(position, kind);
                self.insert(ctx, store, slot).map(|_| slot)
            })
            .collect()
    }
}

/// New members of `cell`: its own particles that stayed, and particles that moved in.
fn gather(
    cell: usize,
    cells: &[Cell],
    lists: &[RwLock<Vec<usize>>],
    moved: &HashMap<usize, Option<usize>>,
    arrivals: &HashMap<usize, Vec<usize>>,
) -> Result<Vec<usize>> {
    use cache::CellLists;

    let neighbors = &cells
        .get(cell)
        .ok_or(Error::CellIndexOutOfRange {
            index: cell,
            n_cells: cells.len(),
        })?
        .neighbors;

    let mut members = Vec::new();
    lists.for_each_in(cell, &mut |slot| {
        if moved.get(&slot).map_or(true, |to| *to == Some(cell)) {
            members.push(slot);
        }
    })?;
    for &neighbor in neighbors {
        lists.for_each_in(neighbor, &mut |slot| {
            if moved.get(&slot) == Some(&Some(cell)) {
                members.push(slot);
            }
        })?;
    }
    if let Some(incoming) = arrivals.get(&cell) {
        members.extend_from_slice(incoming);
    }

    // a reused slot may be both listed and arriving
    members.sort_unstable();
    members.dedup();
    Ok(members)
}
