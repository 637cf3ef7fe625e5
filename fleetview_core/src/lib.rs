//! FleetView Core - Live Fleet Position Tracking Engine
//!
//! Keeps a map of moving buses in step with a canonical entity registry:
//! 1. **Registry**: one mutable store of entities with monotonic write stamps
//! 2. **Motion**: kinematic random-walk simulation for buses without telemetry,
//!    device GPS or coarse network approximation for live drivers
//! 3. **Map sync**: flicker-free marker reconciliation that survives remounts
//! 4. **SOS**: a cancellable countdown before an emergency alert is dispatched

pub mod commands;
pub mod config;
pub mod entity;
pub mod error;
pub mod escalation;
pub mod location;
pub mod persistence;
pub mod reconciler;
pub mod registry;
pub mod runtime;
pub mod selection;
pub mod simulator;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use commands::{CommandBus, CommandOutcome, CommandTicket, Confirmation, OperatorCommand};
pub use config::FleetConfig;
pub use entity::{Entity, EntitySource, EntityStatus, NewEntity, Occupancy};
pub use error::{DispatchError, FleetError};
pub use escalation::{
    Dispatcher, EmergencyAlert, EmergencyEscalation, EmergencySignal, EmergencyTrigger,
    EscalationPhase, LogDispatcher, Transition,
};
pub use location::{ApproximationZone, LocationMode, LocationSource};
pub use persistence::{
    FleetSnapshot, MemorySnapshotStore, SessionIdentity, SledSnapshotStore, SnapshotStore,
};
pub use reconciler::{marker_meta, MapSyncReconciler, SyncOutcome, SyncReport};
pub use registry::EntityRegistry;
pub use runtime::{FleetRuntime, IssueReport, PeriodReport};
pub use selection::{SelectionController, SelectionRequests};
pub use simulator::KinematicSimulator;
