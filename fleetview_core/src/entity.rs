//! Tracked entity model.

use fleetview_env::{EntityId, GeoPoint};
use serde::{Deserialize, Serialize};

/// Schedule adherence shown on the badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    OnTime,
    Delayed,
    Early,
}

impl std::fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EntityStatus::OnTime => "On Time",
            EntityStatus::Delayed => "Delayed",
            EntityStatus::Early => "Early",
        })
    }
}

/// Passenger load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub current: u32,
    pub capacity: u32,
}

impl std::fmt::Display for Occupancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.current, self.capacity)
    }
}

/// Who is authoritative for an entity's position.
///
/// The simulator only writes `Simulated` entities; an `External` entity is
/// written exclusively by the location source bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    #[default]
    Simulated,
    External,
}

/// A tracked vehicle or driver session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Assigned at creation, never changes
    pub id: EntityId,

    /// Route / fleet number shown to operators
    pub label: String,

    pub position: GeoPoint,

    /// Degrees in [0, 360)
    pub heading: f64,

    /// Non-negative, simulation units
    pub speed: f64,

    pub status: EntityStatus,

    #[serde(default)]
    pub occupancy: Option<Occupancy>,

    #[serde(default)]
    pub next_stop: String,

    #[serde(default)]
    pub eta: String,

    /// Unix milliseconds of the last write; strictly increasing
    #[serde(default)]
    pub last_updated: u64,

    #[serde(default)]
    pub source: EntitySource,
}

impl Entity {
    /// Creates a stationary, simulated entity.
    pub fn new(id: EntityId, label: impl Into<String>, position: GeoPoint) -> Self {
        Self {
            id,
            label: label.into(),
            position,
            heading: 0.0,
            speed: 0.0,
            status: EntityStatus::OnTime,
            occupancy: None,
            next_stop: String::new(),
            eta: String::new(),
            last_updated: 0,
            source: EntitySource::Simulated,
        }
    }

    pub fn with_motion(mut self, heading: f64, speed: f64) -> Self {
        self.heading = heading;
        self.speed = speed;
        self
    }

    pub fn with_status(mut self, status: EntityStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_occupancy(mut self, current: u32, capacity: u32) -> Self {
        self.occupancy = Some(Occupancy { current, capacity });
        self
    }

    pub fn with_schedule(mut self, next_stop: impl Into<String>, eta: impl Into<String>) -> Self {
        self.next_stop = next_stop.into();
        self.eta = eta.into();
        self
    }

    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.source = source;
        self
    }

    /// Brings heading and speed back inside their invariants.
    pub(crate) fn normalize(&mut self) {
        self.heading = wrap_heading(self.heading);
        if !(self.speed >= 0.0) {
            self.speed = 0.0;
        }
    }
}

/// Maps any heading onto [0, 360). Non-finite input becomes 0.
pub fn wrap_heading(heading: f64) -> f64 {
    if !heading.is_finite() {
        return 0.0;
    }
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Fields an operator supplies when adding a bus to the fleet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub label: String,
    pub position: GeoPoint,
    pub heading: f64,
    pub speed: f64,
    pub status: EntityStatus,
    pub occupancy: Option<Occupancy>,
    pub next_stop: String,
    pub eta: String,
    pub source: EntitySource,
}

impl NewEntity {
    pub fn new(label: impl Into<String>, position: GeoPoint) -> Self {
        Self {
            label: label.into(),
            position,
            heading: 0.0,
            speed: 0.0,
            status: EntityStatus::OnTime,
            occupancy: None,
            next_stop: String::new(),
            eta: String::new(),
            source: EntitySource::Simulated,
        }
    }

    pub(crate) fn into_entity(self, id: EntityId) -> Entity {
        Entity {
            id,
            label: self.label,
            position: self.position,
            heading: self.heading,
            speed: self.speed,
            status: self.status,
            occupancy: self.occupancy,
            next_stop: self.next_stop,
            eta: self.eta,
            last_updated: 0,
            source: self.source,
        }
    }
}
