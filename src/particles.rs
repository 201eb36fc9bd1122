//! Index-stable particle storage.
//!
//! Slots are never physically removed: removing a particle deactivates its entry
//! and pushes the slot onto a free list, the next insertion reuses it.
//! Cell lists and neighbor caches refer to particles by slot.
use crate::context::SimBox;
use crate::error::{Error, Result};
use crate::Particle;
use nalgebra::Vector3;

/// Particle type identifier, opaque to the neighbor search.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleKind(pub u16);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Entry {
    pub position: Vector3<f64>,
    pub kind: ParticleKind,
    /// Path length travelled since the particle's cell was last rebuilt.
    pub displacement: f64,
    pub deactivated: bool,
    /// Unique per insertion, tells a reused slot apart from its previous occupant.
    pub id: u64,
}

/// Batch of removals (by slot) and insertions, applied in that order.
#[derive(Clone, Debug, Default)]
pub struct ParticleUpdate {
    pub removed: Vec<usize>,
    pub added: Vec<(Vector3<f64>, ParticleKind)>,
}

impl ParticleUpdate {
    pub fn remove(mut self, slot: usize) -> Self {
        self.removed.push(slot);
        self
    }

    pub fn add<P: Particle>(mut self, particle: P, kind: ParticleKind) -> Self {
        self.added.push((Vector3::from(particle.coords()), kind));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ParticleStore {
    entries: Vec<Entry>,
    free: Vec<usize>,
    next_id: u64,
    generation: u64,
}

impl ParticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    /// Stores a particle and returns its slot, reusing the most recently freed slot if there is one.
    ///
    /// Positions are stored as given; wrapping into the box happens on displacement.
    pub fn add<P: Particle>(&mut self, particle: P, kind: ParticleKind) -> usize {
        let entry = Entry {
            position: Vector3::from(particle.coords()),
            kind,
            displacement: 0.0,
            deactivated: false,
            id: self.next_id,
        };
        self.next_id += 1;
        self.generation += 1;

        match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = entry;
                slot
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        }
    }

    pub fn remove(&mut self, slot: usize) -> Result<Entry> {
        let entry = self.active_mut(slot)?;
        entry.deactivated = true;
        let removed = *entry;

        self.free.push(slot);
        self.generation += 1;
        Ok(removed)
    }

    /// Moves a particle by `delta`, wrapping it back into `sim_box` along periodic axes.
    pub fn displace(&mut self, slot: usize, delta: &Vector3<f64>, sim_box: &SimBox) -> Result<()> {
        let entry = self.active_mut(slot)?;
        entry.position = sim_box.wrap(entry.position + delta);
        entry.displacement += delta.norm();
        self.generation += 1;
        Ok(())
    }

    /// Teleports a particle. Accumulates the minimum-image distance as displacement.
    pub fn set_position<P: Particle>(
        &mut self,
        slot: usize,
        position: P,
        sim_box: &SimBox,
    ) -> Result<()> {
        let entry = self.active_mut(slot)?;
        let position = sim_box.wrap(Vector3::from(position.coords()));
        entry.displacement += sim_box
            .shortest_difference(&entry.position, &position)
            .norm();
        entry.position = position;
        self.generation += 1;
        Ok(())
    }

    pub fn position(&self, slot: usize) -> Option<&Vector3<f64>> {
        self.entry(slot).map(|entry| &entry.position)
    }

    /// Returns the entry in `slot` if it holds an active particle.
    pub fn entry(&self, slot: usize) -> Option<&Entry> {
        self.entries.get(slot).filter(|entry| !entry.deactivated)
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.entry(slot).is_some()
    }

    /// Iterates over active particles and their slots.
    #[must_use = "iterators are lazy and do nothing unless consumed"]
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Entry)> + Clone + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.deactivated)
    }

    /// All slots, active or not.
    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of active particles.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn n_slots(&self) -> usize {
        self.entries.len()
    }

    pub fn n_deactivated(&self) -> usize {
        self.free.len()
    }

    /// Counter bumped by every mutation: insertion, removal and movement.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Applies removals first, then insertions. Returns the slots of inserted particles.
    ///
    /// Fails without applying anything if a removal refers to an inactive slot.
    pub fn update(&mut self, update: ParticleUpdate) -> Result<Vec<usize>> {
        self.check_removals(&update.removed)?;
        for slot in update.removed {
            self.remove(slot)?;
        }
        Ok(update
            .added
            .into_iter()
            .map(|(position, kind)| self.add(position, kind))
            .collect())
    }

    pub(crate) fn check_removals(&self, slots: &[usize]) -> Result<()> {
        let mut seen = hashbrown::HashSet::with_capacity(slots.len());
        match slots
            .iter()
            .find(|&&slot| !self.is_active(slot) || !seen.insert(slot))
        {
            Some(&slot) => Err(Error::InactiveParticle(slot)),
            None => Ok(()),
        }
    }

    pub(crate) fn reset_displacement(&mut self, slot: usize) {
        if let Some(entry) = self.entries.get_mut(slot) {
            entry.displacement = 0.0;
        }
    }

    fn active_mut(&mut self, slot: usize) -> Result<&mut Entry> {
        self.entries
            .get_mut(slot)
            .filter(|entry| !entry.deactivated)
            .ok_or(Error::InactiveParticle(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_reuse() {
        let mut store = ParticleStore::new();
        let a = store.add([0.0, 0.0, 0.0], ParticleKind(0));
        let b = store.add([1.0, 0.0, 0.0], ParticleKind(1));
        assert_eq!((a, b), (0, 1));

        let removed = store.remove(a).unwrap();
        assert_eq!(removed.kind, ParticleKind(0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.n_deactivated(), 1);
        assert!(store.entry(a).is_none());

        let c = store.add([2.0, 0.0, 0.0], ParticleKind(2));
        assert_eq!(c, a, "freed slot should be reused");
        assert_eq!(store.n_slots(), 2);
        assert_ne!(store.entry(c).unwrap().id, removed.id);
        assert_eq!(store.iter().count(), 2);
    }

    #[test]
    fn test_remove_inactive() {
        let mut store = ParticleStore::new();
        let a = store.add([0.0; 3], ParticleKind(0));
        store.remove(a).unwrap();

        assert!(matches!(store.remove(a), Err(Error::InactiveParticle(0))));
        assert!(matches!(store.remove(17), Err(Error::InactiveParticle(17))));
    }

    #[test]
    fn test_displacement() {
        let sim_box = SimBox::periodic_cube(4.0).unwrap();
        let mut store = ParticleStore::new();
        let a = store.add([1.5, 0.0, 0.0], ParticleKind(0));
        let generation = store.generation();

        store
            .displace(a, &Vector3::new(1.0, 0.0, 0.0), &sim_box)
            .unwrap();
        let entry = store.entry(a).unwrap();
        assert!((entry.position.x - -1.5).abs() < 1e-12, "wrapped around");
        assert!((entry.displacement - 1.0).abs() < 1e-12);
        assert!(store.generation() > generation);

        // minimum image distance from -1.5 to 1.5 is 1.0 through the boundary
        store.set_position(a, [1.5, 0.0, 0.0], &sim_box).unwrap();
        assert!((store.entry(a).unwrap().displacement - 2.0).abs() < 1e-12);

        store.reset_displacement(a);
        assert_eq!(store.entry(a).unwrap().displacement, 0.0);
    }

    #[test]
    fn test_batch_update() {
        let mut store = ParticleStore::new();
        let slots: Vec<_> = (0..4)
            .map(|i| store.add([i as f64, 0.0, 0.0], ParticleKind(0)))
            .collect();

        let update = ParticleUpdate::default()
            .remove(slots[1])
            .remove(slots[1])
            .add([9.0, 0.0, 0.0], ParticleKind(3));
        assert!(store.update(update).is_err());
        assert_eq!(store.len(), 4, "failed update must not apply removals");

        let update = ParticleUpdate::default()
            .remove(slots[1])
            .remove(slots[2])
            .add([9.0, 0.0, 0.0], ParticleKind(3));
        let added = store.update(update).unwrap();
        assert_eq!(added, vec![slots[2]]);
        assert_eq!(store.len(), 3);
        assert_eq!(store.n_deactivated(), 1);
    }
}
