//! JSON exporter for offline replay.
//!
//! Exports one frame per scheduling period so a run can be scrubbed through
//! in a map viewer.

use fleetview_core::{
    CommandOutcome, Dispatcher, Entity, EntitySource, EntityStatus, EscalationPhase,
    FleetRuntime, LocationMode, PeriodReport, SyncOutcome,
};
use fleetview_env::{PositionProvider, RenderSurface};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    pub period: u64,

    /// Registry contents after the period
    pub entities: Vec<EntityFrame>,

    /// Markers on the surface
    pub markers: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub focused: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_mode: Option<LocationMode>,

    pub degraded: bool,

    pub escalation: EscalationPhase,

    pub countdown: u32,

    /// Events (clicks, SOS transitions, commands, deferred syncs)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Entity state in a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityFrame {
    pub id: String,
    pub label: String,
    pub lat: f64,
    pub lng: f64,
    pub heading: f64,
    pub status: EntityStatus,
    pub source: EntitySource,
}

impl From<&Entity> for EntityFrame {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.to_string(),
            label: entity.label.clone(),
            lat: entity.position.lat,
            lng: entity.position.lng,
            heading: entity.heading,
            status: entity.status,
            source: entity.source,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

impl SimEvent {
    fn info(message: String) -> Self {
        Self {
            message,
            level: None,
        }
    }

    fn warn(message: String) -> Self {
        Self {
            message,
            level: Some("warn".to_string()),
        }
    }
}

impl SimFrame {
    /// Snapshot of the runtime right after `report`'s period.
    pub fn capture<P, S, D>(time_sec: f64, runtime: &FleetRuntime<P, S, D>, report: &PeriodReport) -> Self
    where
        P: PositionProvider,
        S: RenderSurface,
        D: Dispatcher,
    {
        let mut events = Vec::new();
        if report.sync == SyncOutcome::Deferred {
            events.push(SimEvent::warn("map sync deferred: surface not mounted".to_string()));
        }
        if let Some(id) = &report.clicked {
            events.push(SimEvent::info(format!("marker clicked: {}", id)));
        }
        for transition in &report.transitions {
            events.push(SimEvent::warn(format!(
                "SOS {:?} → {:?}",
                transition.from, transition.to
            )));
        }
        for (ticket, outcome) in &report.commands {
            let event = match outcome {
                CommandOutcome::Failed(reason) => {
                    SimEvent::warn(format!("command #{} failed: {}", ticket, reason))
                }
                other => SimEvent::info(format!("command #{}: {:?}", ticket, other)),
            };
            events.push(event);
        }

        Self {
            time_sec,
            period: report.period,
            entities: runtime.registry().list().map(EntityFrame::from).collect(),
            markers: runtime.reconciler().marker_count(),
            focused: runtime.selection().focused().map(|id| id.to_string()),
            location_mode: runtime.location().mode(),
            degraded: runtime.location().is_degraded(),
            escalation: runtime.escalation().phase(),
            countdown: runtime.escalation().countdown(),
            events,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
