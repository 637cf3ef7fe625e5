//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::exporter::{SimExport, SimFrame};
use crate::provider::{DeviceTrack, SimPositionProvider};
use crate::surface::RecordingSurface;

use fleetview_core::{
    Entity, EntityStatus, EmergencyTrigger, FleetConfig, FleetError, FleetRuntime, LogDispatcher,
    PeriodReport, SyncOutcome,
};
use fleetview_env::{Clock, EntityId, GeoPoint};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Runtime wired to the simulated device and surface.
pub type SimRuntime = FleetRuntime<SimPositionProvider, RecordingSurface, LogDispatcher>;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Engine configuration under test
    pub fleet: FleetConfig,

    /// Virtual time between scheduling periods
    pub resolution: Duration,

    /// Per-axis GPS noise standard deviation in degrees
    pub gps_noise_deg: f64,

    /// Where the driver's device starts and how it moves
    pub device: DeviceTrack,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            fleet: FleetConfig::default(),
            resolution: Duration::from_secs(1),
            gps_noise_deg: 0.00002,
            device: DeviceTrack {
                // Ludhiana bus stand
                position: GeoPoint::new(30.9010, 75.8573),
                heading: 30.0,
                speed: 30.0,
            },
        }
    }
}

/// The Punjab demo fleet.
pub fn punjab_fleet() -> Vec<Entity> {
    vec![
        Entity::new(EntityId::new("PB-001"), "Amritsar ↔ Ludhiana", GeoPoint::new(31.6340, 75.8573))
            .with_motion(45.0, 45.0)
            .with_status(EntityStatus::OnTime)
            .with_occupancy(24, 45)
            .with_schedule("Civil Hospital", "8 min"),
        Entity::new(EntityId::new("PB-045"), "Chandigarh ↔ Patiala", GeoPoint::new(30.7333, 76.7794))
            .with_motion(180.0, 35.0)
            .with_status(EntityStatus::Delayed)
            .with_occupancy(31, 40)
            .with_schedule("Railway Station", "12 min"),
        Entity::new(EntityId::new("PB-078"), "Jalandhar ↔ Kapurthala", GeoPoint::new(31.3260, 75.5762))
            .with_motion(270.0, 50.0)
            .with_status(EntityStatus::Early)
            .with_occupancy(18, 35)
            .with_schedule("Bus Stand", "2 min"),
        Entity::new(EntityId::new("PB-112"), "Bathinda ↔ Mansa", GeoPoint::new(30.2110, 74.9455))
            .with_motion(90.0, 40.0)
            .with_status(EntityStatus::OnTime)
            .with_occupancy(12, 30)
            .with_schedule("Market Complex", "15 min"),
    ]
}

/// Totals accumulated over a run.
#[derive(Debug, Clone, Default)]
pub struct WorldMetrics {
    pub periods: u64,
    pub fixes: u64,
    pub simulation_advances: u64,
    pub markers_created: u64,
    pub markers_updated: u64,
    pub markers_removed: u64,
    pub deferred_syncs: u64,
    pub transitions: u64,
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Engine under test
    pub runtime: SimRuntime,

    /// Emergency trigger, as a UI button would hold it
    pub trigger: EmergencyTrigger,

    pub metrics: WorldMetrics,

    /// Frame recording, when enabled
    export: Option<SimExport>,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Result<Self, FleetError> {
        let context = SimContext::shared(config.seed);
        let clock: Arc<dyn Clock> = context.clone();

        let provider = SimPositionProvider::new(
            Arc::clone(&clock),
            config.device,
            config.fleet.location.gps_interval(),
            config.gps_noise_deg,
            context.derive_seed(1),
        )
        .with_speed_scale(config.fleet.simulation.speed_scale);
        let (runtime, trigger) = FleetRuntime::new(
            config.fleet.clone(),
            provider,
            RecordingSurface::mounted(),
            LogDispatcher::default(),
            clock,
            context.derive_seed(2),
        )?;

        Ok(Self {
            config,
            context,
            runtime,
            trigger,
            metrics: WorldMetrics::default(),
            export: None,
        })
    }

    /// Loads the four Punjab buses into the registry.
    pub fn seed_fleet(&mut self) -> Vec<EntityId> {
        punjab_fleet()
            .into_iter()
            .map(|entity| {
                let id = entity.id.clone();
                self.runtime.registry_mut().upsert(entity);
                id
            })
            .collect()
    }

    /// Starts capturing one frame per period.
    pub fn record(&mut self, scenario: &str) {
        self.export = Some(SimExport::new(scenario, self.config.seed));
    }

    pub fn take_export(&mut self) -> Option<SimExport> {
        self.export.take()
    }

    /// Runs one period, then advances virtual time by the resolution.
    pub fn step(&mut self) -> PeriodReport {
        self.provider_mut().advance();
        let report = self.runtime.step();
        self.account(&report);

        if let Some(export) = &mut self.export {
            export.add_frame(SimFrame::capture(self.context.now().as_secs_f64(), &self.runtime, &report));
        }

        self.context.advance_time(self.config.resolution);
        report
    }

    /// Steps until `duration` of virtual time has passed.
    pub fn run_for(&mut self, duration: Duration) -> Vec<PeriodReport> {
        let until = self.context.now() + duration;
        let mut reports = Vec::new();
        while self.context.now() < until {
            reports.push(self.step());
        }
        reports
    }

    /// Drives the runtime through its own async loop on the virtual clock.
    ///
    /// The device provider is not advanced, so no GPS fixes arrive.
    pub async fn run_async(&mut self, duration: Duration) -> Vec<PeriodReport> {
        let until = self.context.now() + duration;
        let reports = self
            .runtime
            .run_until(&*self.context, until, self.config.resolution)
            .await;
        for report in &reports {
            self.account(report);
        }
        reports
    }

    pub fn time_secs(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    pub fn provider(&self) -> &SimPositionProvider {
        self.runtime.location().provider()
    }

    pub fn provider_mut(&mut self) -> &mut SimPositionProvider {
        self.runtime.location_mut().provider_mut()
    }

    pub fn surface(&self) -> &RecordingSurface {
        self.runtime.surface()
    }

    pub fn surface_mut(&mut self) -> &mut RecordingSurface {
        self.runtime.surface_mut()
    }

    fn account(&mut self, report: &PeriodReport) {
        let m = &mut self.metrics;
        m.periods += 1;
        m.fixes += report.fixes.len() as u64;
        m.simulation_advances += report.simulated as u64;
        m.transitions += report.transitions.len() as u64;
        match &report.sync {
            SyncOutcome::Applied(sync) => {
                m.markers_created += sync.created.len() as u64;
                m.markers_updated += sync.updated.len() as u64;
                m.markers_removed += sync.removed.len() as u64;
            }
            SyncOutcome::Deferred => m.deferred_syncs += 1,
        }
        debug!(
            "t={:.0}s period {} | entities={} markers={}",
            self.context.now().as_secs_f64(),
            report.period,
            self.runtime.registry().len(),
            self.runtime.reconciler().marker_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetview_env::Accuracy;

    fn world() -> SimWorld {
        SimWorld::new(SimConfig::default()).unwrap()
    }

    #[test]
    fn test_seed_fleet_renders_four_buses() {
        let mut world = world();
        world.seed_fleet();
        world.runtime.start();
        world.step();

        assert_eq!(world.runtime.registry().len(), 4);
        assert_eq!(world.surface().markers().len(), 4);
        assert!(world.surface().find("PB-078").is_some());
    }

    #[test]
    fn test_same_seed_same_positions() {
        let run = || {
            let mut world = world();
            world.seed_fleet();
            world.runtime.start();
            world.run_for(Duration::from_secs(30));
            world.runtime.registry().snapshot()
        };
        let a = run();
        let b = run();
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.position, y.position);
            assert_eq!(x.heading, y.heading);
        }
    }

    #[test]
    fn test_recording_captures_frames() {
        let mut world = world();
        world.seed_fleet();
        world.record("test");
        world.runtime.start();
        world.run_for(Duration::from_secs(5));

        let export = world.take_export().unwrap();
        assert_eq!(export.frames.len(), 5);
        assert_eq!(export.frames[0].entities.len(), 4);
    }

    #[test]
    fn test_denied_device_degrades_to_region_center() {
        let mut world = world();
        world.provider_mut().set_denied(true);
        world.runtime.start();
        let id = world.runtime.start_driver_session("DRV-9", "PB-900");

        let report = world.step();
        assert_eq!(report.fixes.len(), 1);
        assert_eq!(report.fixes[0].accuracy, Accuracy::Fallback);
        assert!(world.runtime.location().is_degraded());
        assert_eq!(
            world.runtime.registry().get(&id).unwrap().position,
            world.runtime.config().region_center
        );
        assert_eq!(world.provider().active_watches(), 0);
    }

    #[tokio::test]
    async fn test_async_loop_advances_virtual_time() {
        let mut world = world();
        world.seed_fleet();
        world.runtime.start();

        let reports = world.run_async(Duration::from_secs(9)).await;
        assert_eq!(reports.len(), 9);
        assert_eq!(world.time_secs(), 9.0);
        // Ticks at 3s, 6s (the 9s period never runs)
        let advanced: usize = reports.iter().map(|r| r.simulated).sum();
        assert_eq!(advanced, 8);
    }
}
