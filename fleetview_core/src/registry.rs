//! Canonical store of tracked entities.
//!
//! The registry is the single point of mutation for entity state. It owns no
//! timers; writers (the kinematic simulator, location fixes, operators) call
//! into it and the reconciler reads from it once the writes of a period are
//! done.
//!
//! # Timestamp discipline
//!
//! `last_updated` is strictly increasing per entity. A write that carries an
//! equal or earlier stamp still succeeds, but the registry replaces the
//! stamp with a fresh one:
//!
//! ```text
//! fresh = max(clock.unix_millis(), stored + 1)
//! ```

use crate::entity::{Entity, NewEntity};
use fleetview_env::{Clock, EntityId};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Keyed store of entities, ordered by id.
pub struct EntityRegistry {
    entities: BTreeMap<EntityId, Entity>,
    clock: Arc<dyn Clock>,
}

impl EntityRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entities: BTreeMap::new(),
            clock,
        }
    }

    /// Adds a new entity under a freshly generated id.
    pub fn create(&mut self, draft: NewEntity) -> EntityId {
        let mut id = EntityId::generate();
        while self.entities.contains_key(&id) {
            id = EntityId::generate();
        }
        self.upsert(draft.into_entity(id.clone()));
        id
    }

    /// Inserts or replaces an entity as a whole.
    ///
    /// Heading and speed are normalized into their invariants. A zero
    /// `last_updated` means "stamp it for me".
    ///
    /// # Returns
    /// The `last_updated` value actually stored.
    pub fn upsert(&mut self, mut entity: Entity) -> u64 {
        entity.normalize();
        let stored = self.entities.get(&entity.id).map(|e| e.last_updated);
        entity.last_updated = self.stamp(entity.last_updated, stored);

        let stamp = entity.last_updated;
        self.entities.insert(entity.id.clone(), entity);
        stamp
    }

    /// Applies `f` to a copy of the entity and writes the copy back whole.
    ///
    /// The id cannot be changed through `f`. Leaving `last_updated`
    /// untouched yields a fresh stamp.
    ///
    /// # Returns
    /// * `Some(stamp)` - The entity existed and was rewritten
    /// * `None` - Unknown id; nothing happened
    pub fn modify<F>(&mut self, id: &EntityId, f: F) -> Option<u64>
    where
        F: FnOnce(&mut Entity),
    {
        let mut copy = self.entities.get(id)?.clone();
        f(&mut copy);
        copy.id = id.clone();
        Some(self.upsert(copy))
    }

    /// Removes an entity. Missing ids are a no-op.
    pub fn remove(&mut self, id: &EntityId) -> Option<Entity> {
        let removed = self.entities.remove(id);
        if removed.is_some() {
            debug!("registry: removed {}", id);
        }
        removed
    }

    pub fn get(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// All entities in id order.
    pub fn list(&self) -> impl ExactSizeIterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Replaces the whole contents, e.g. from a persisted snapshot.
    ///
    /// Stored stamps are kept so monotonicity carries across restarts.
    pub fn restore(&mut self, entities: Vec<Entity>) {
        self.entities.clear();
        for mut entity in entities {
            entity.normalize();
            self.entities.insert(entity.id.clone(), entity);
        }
    }

    /// Copies of all entities, for persistence and export.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    fn stamp(&self, incoming: u64, stored: Option<u64>) -> u64 {
        let now = self.clock.unix_millis();
        let candidate = if incoming == 0 { now } else { incoming };
        match stored {
            Some(previous) if candidate <= previous => now.max(previous + 1),
            _ => candidate,
        }
    }
}
