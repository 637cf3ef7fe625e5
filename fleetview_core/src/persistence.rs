//! Flat key-value persistence of the fleet and the last session.
//!
//! Two keys, each holding a JSON document:
//!
//! | Key              | Value                        |
//! |------------------|------------------------------|
//! | `fleet.entities` | `Vec<Entity>`                |
//! | `fleet.session`  | `SessionIdentity` (optional) |
//!
//! Loading never fails. Missing keys give defaults; malformed values are
//! logged, removed, and replaced by defaults.

use crate::entity::Entity;
use crate::error::FleetError;
use fleetview_env::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

pub const ENTITIES_KEY: &str = "fleet.entities";
pub const SESSION_KEY: &str = "fleet.session";

/// Who was signed in when the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SessionIdentity {
    /// A driver whose device position is published as `entity`
    Driver {
        driver_id: String,
        bus_label: String,
        entity: EntityId,
    },
    /// A control-room operator
    Operator {
        user_id: String,
        name: String,
        role: String,
    },
}

/// Everything persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub entities: Vec<Entity>,
    pub session: Option<SessionIdentity>,
}

/// Byte-oriented key-value storage.
///
/// Implementations must be thread-safe and persist data across restarts.
pub trait SnapshotStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FleetError>;

    fn put(&self, key: &str, value: &[u8]) -> Result<(), FleetError>;

    fn delete(&self, key: &str) -> Result<(), FleetError>;
}

/// Sled-backed store.
pub struct SledSnapshotStore {
    db: sled::Db,
}

impl SledSnapshotStore {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FleetError> {
        let db = sled::open(path)
            .map_err(|e| FleetError::storage(format!("Failed to open sled DB: {}", e)))?;
        Ok(Self { db })
    }

    /// Create a temporary store (for testing)
    #[cfg(test)]
    pub fn open_temp() -> Result<Self, FleetError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| FleetError::storage(format!("Failed to open temp DB: {}", e)))?;
        Ok(Self { db })
    }
}

impl SnapshotStore for SledSnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FleetError> {
        self.db
            .get(key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| FleetError::storage(format!("Get failed: {}", e)))
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), FleetError> {
        self.db
            .insert(key, value)
            .map_err(|e| FleetError::storage(format!("Insert failed: {}", e)))?;
        self.db
            .flush()
            .map_err(|e| FleetError::storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), FleetError> {
        self.db
            .remove(key)
            .map_err(|e| FleetError::storage(format!("Remove failed: {}", e)))?;
        Ok(())
    }
}

/// Volatile store for tests and the simulator.
#[derive(Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, FleetError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), FleetError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), FleetError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Reads the last snapshot; defaults on anything unreadable.
pub fn load_snapshot<S>(store: &S) -> FleetSnapshot
where
    S: SnapshotStore + ?Sized,
{
    let snapshot = FleetSnapshot {
        entities: load_key(store, ENTITIES_KEY).unwrap_or_default(),
        session: load_key(store, SESSION_KEY),
    };
    debug!(
        "persistence: loaded {} entities, session: {}",
        snapshot.entities.len(),
        snapshot.session.is_some()
    );
    snapshot
}

/// Writes the snapshot; a `None` session clears the stored one.
pub fn save_snapshot<S>(store: &S, snapshot: &FleetSnapshot) -> Result<(), FleetError>
where
    S: SnapshotStore + ?Sized,
{
    store.put(ENTITIES_KEY, &serde_json::to_vec(&snapshot.entities)?)?;
    match &snapshot.session {
        Some(session) => store.put(SESSION_KEY, &serde_json::to_vec(session)?)?,
        None => store.delete(SESSION_KEY)?,
    }
    Ok(())
}

fn load_key<S, T>(store: &S, key: &str) -> Option<T>
where
    S: SnapshotStore + ?Sized,
    T: for<'de> Deserialize<'de>,
{
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("persistence: cannot read {} ({}), using defaults", key, e);
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("persistence: malformed {} ({}), discarding", key, e);
            if let Err(e) = store.delete(key) {
                warn!("persistence: cannot discard {} ({})", key, e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntitySource;
    use fleetview_env::GeoPoint;

    fn sample() -> FleetSnapshot {
        FleetSnapshot {
            entities: vec![
                Entity::new(EntityId::new("PB-001"), "Amritsar ↔ Ludhiana", GeoPoint::new(31.6340, 75.8573))
                    .with_motion(45.0, 45.0)
                    .with_occupancy(24, 45),
                Entity::new(EntityId::new("driver-7"), "PB-200", GeoPoint::new(31.1471, 75.3412))
                    .with_source(EntitySource::External),
            ],
            session: Some(SessionIdentity::Driver {
                driver_id: "D-7".to_string(),
                bus_label: "PB-200".to_string(),
                entity: EntityId::new("driver-7"),
            }),
        }
    }

    #[test]
    fn test_empty_store_loads_defaults() {
        let store = MemorySnapshotStore::new();
        assert_eq!(load_snapshot(&store), FleetSnapshot::default());
    }

    #[test]
    fn test_sled_store_keeps_snapshot() {
        let store = SledSnapshotStore::open_temp().unwrap();
        save_snapshot(&store, &sample()).unwrap();

        assert_eq!(load_snapshot(&store), sample());
    }

    #[test]
    fn test_malformed_session_is_discarded() {
        let store = MemorySnapshotStore::new();
        save_snapshot(&store, &sample()).unwrap();
        store.put(SESSION_KEY, b"{not json").unwrap();

        let loaded = load_snapshot(&store);
        assert!(loaded.session.is_none());
        assert_eq!(loaded.entities.len(), 2);
        assert!(store.get(SESSION_KEY).unwrap().is_none());
    }

    #[test]
    fn test_saving_without_session_clears_it() {
        let store = MemorySnapshotStore::new();
        save_snapshot(&store, &sample()).unwrap();

        let logged_out = FleetSnapshot {
            session: None,
            ..sample()
        };
        save_snapshot(&store, &logged_out).unwrap();
        assert!(load_snapshot(&store).session.is_none());
    }

    #[test]
    fn test_operator_session_serializes_tagged() {
        let session = SessionIdentity::Operator {
            user_id: "op-1".to_string(),
            name: "Control Room".to_string(),
            role: "admin".to_string(),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["kind"], "operator");
        assert_eq!(json["role"], "admin");
    }
}
