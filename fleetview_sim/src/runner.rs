//! Scenario runner - executes end-to-end tracking scenarios.

use crate::exporter::SimExport;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld, WorldMetrics};

use fleetview_core::{
    CommandOutcome, Confirmation, EntitySource, EscalationPhase, FleetConfig, LocationMode,
    OperatorCommand, PeriodReport, SyncOutcome, Transition,
};
use fleetview_env::{Accuracy, Clock, EntityId};
use std::time::Duration;
use tracing::{info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Scheduling periods executed
    pub total_periods: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Entities in the registry at the end
    pub final_entity_count: usize,

    /// Alerts handed to the dispatcher
    pub dispatches: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: WorldMetrics,
}

/// Failed assertions collected while a scenario runs.
#[derive(Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn require(&mut self, ok: bool, describe: impl FnOnce() -> String) {
        if !ok {
            let failure = describe();
            warn!("  assertion failed: {}", failure);
            self.failures.push(failure);
        }
    }

    fn reason(&self) -> Option<String> {
        (!self.failures.is_empty()).then(|| self.failures.join("; "))
    }
}

/// Runs tracking scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Duration of open-ended scenarios in seconds
    max_duration_secs: f64,

    /// Engine configuration
    config: FleetConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_duration_secs: 60.0,
            config: FleetConfig::default(),
        }
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, false).0
    }

    /// Runs a scenario while recording one frame per period.
    pub fn run_exported(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let (result, export) = self.execute(scenario, true);
        let mut export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        export.finalize(result.passed, result.failure_reason.clone());
        (result, export)
    }

    fn execute(&self, scenario: ScenarioId, record: bool) -> (ScenarioResult, Option<SimExport>) {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let config = SimConfig {
            seed: self.seed,
            fleet: self.config.clone(),
            ..SimConfig::default()
        };
        let mut world = match SimWorld::new(config) {
            Ok(world) => world,
            Err(e) => {
                let result = ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_periods: 0,
                    final_time_secs: 0.0,
                    final_entity_count: 0,
                    dispatches: 0,
                    failure_reason: Some(format!("world setup failed: {}", e)),
                    metrics: WorldMetrics::default(),
                };
                return (result, None);
            }
        };
        if record {
            world.record(scenario.name());
        }

        let mut checks = Checks::default();
        match scenario {
            ScenarioId::SteadyFleet => self.run_steady_fleet(&mut world, &mut checks),
            ScenarioId::DriverShift => self.run_driver_shift(&mut world, &mut checks),
            ScenarioId::SourceSwitch => self.run_source_switch(&mut world, &mut checks),
            ScenarioId::SurfaceRemount => self.run_surface_remount(&mut world, &mut checks),
            ScenarioId::SosCancel => self.run_sos_cancel(&mut world, &mut checks),
            ScenarioId::SosDispatch => self.run_sos_dispatch(&mut world, &mut checks),
        }

        let failure_reason = checks.reason();
        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_periods: world.metrics.periods,
            final_time_secs: world.time_secs(),
            final_entity_count: world.runtime.registry().len(),
            dispatches: world.runtime.dispatcher().dispatched().len(),
            failure_reason,
            metrics: world.metrics.clone(),
        };
        (result, world.take_export())
    }

    fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.max_duration_secs)
            .unwrap_or(Duration::from_secs(60))
            .max(Duration::from_secs(10))
    }

    /// Four simulated buses random-walk for the configured duration.
    ///
    /// **Assertion**: markers match the registry every period, headings stay
    /// in [0, 360), every bus moved, a marker click selects its bus.
    fn run_steady_fleet(&self, world: &mut SimWorld, checks: &mut Checks) {
        world.seed_fleet();
        let starts: Vec<_> = world
            .runtime
            .registry()
            .list()
            .map(|e| (e.id.clone(), e.position))
            .collect();
        world.runtime.start();
        world.step();

        let target = EntityId::new("PB-001");
        match world.surface().find(target.as_str()) {
            Some(marker) => {
                world.surface().click(marker);
                let report = world.step();
                checks.require(report.clicked.as_ref() == Some(&target), || {
                    format!("click on {} selected {:?}", target, report.clicked)
                });
            }
            None => checks.require(false, || format!("no marker for {}", target)),
        }

        let until = world.context.now() + self.duration();
        while world.context.now() < until {
            let report = world.step();
            if report.sync == SyncOutcome::Deferred {
                checks.require(false, || format!("period {} deferred on a mounted map", report.period));
            }
            let markers = world.surface().markers().len();
            let entities = world.runtime.registry().len();
            checks.require(markers == entities, || {
                format!("period {}: {} markers for {} entities", report.period, markers, entities)
            });
        }

        for entity in world.runtime.registry().list() {
            checks.require((0.0..360.0).contains(&entity.heading), || {
                format!("{} heading {} out of range", entity.id, entity.heading)
            });
        }
        for (id, start) in starts {
            let moved = world
                .runtime
                .registry()
                .get(&id)
                .map(|e| e.position != start)
                .unwrap_or(false);
            checks.require(moved, || format!("{} never moved", id));
        }

        info!(
            "✓ SteadyFleet complete: {} periods, {} markers updated",
            world.metrics.periods, world.metrics.markers_updated
        );
    }

    /// A driver publishes GPS fixes, then ends the shift through a
    /// confirmed command.
    ///
    /// **Assertion**: the driver's bus tracks the device; after the shift the
    /// watch, entity and marker are gone and no further fixes are pushed.
    fn run_driver_shift(&self, world: &mut SimWorld, checks: &mut Checks) {
        world.seed_fleet();
        world.runtime.start();
        let id = world.runtime.start_driver_session("DRV-17", "PB-200");

        let half = self.duration() / 2;
        world.run_for(half);

        let truth = world.provider().truth().position;
        match world.runtime.registry().get(&id) {
            Some(entity) => {
                let error = (entity.position.lat - truth.lat)
                    .abs()
                    .max((entity.position.lng - truth.lng).abs());
                checks.require(error < 0.002, || {
                    format!("driver bus {:.5}° away from device", error)
                });
                checks.require(entity.source == EntitySource::External, || {
                    "driver bus not externally sourced".to_string()
                });
            }
            None => checks.require(false, || "driver bus missing".to_string()),
        }
        checks.require(world.metrics.fixes > 0, || "no fixes delivered".to_string());
        checks.require(world.provider().active_watches() == 1, || {
            format!("{} watches during shift", world.provider().active_watches())
        });

        let mut ticket = world.runtime.request(OperatorCommand::EndShift);
        world.runtime.respond(ticket.id, Confirmation::Confirmed);
        world.step();
        let outcome = ticket.try_outcome();
        checks.require(outcome == Some(CommandOutcome::Applied), || {
            format!("end shift settled as {:?}", outcome)
        });

        checks.require(!world.runtime.registry().contains(&id), || {
            "driver bus still registered".to_string()
        });
        checks.require(world.surface().find(id.as_str()).is_none(), || {
            "driver marker still rendered".to_string()
        });
        checks.require(world.provider().active_watches() == 0, || "watch leaked".to_string());

        let pushed = world.provider().fixes_pushed();
        world.run_for(half);
        checks.require(world.provider().fixes_pushed() == pushed, || {
            "fixes pushed after shift ended".to_string()
        });

        info!(
            "✓ DriverShift complete: {} fixes, {} entities left",
            world.metrics.fixes,
            world.runtime.registry().len()
        );
    }

    /// Toggles GPS and network approximation three times.
    ///
    /// **Assertion**: at most one watch at a time, network fixes are low
    /// accuracy and stay within the zone offset, GPS fixes resume after.
    fn run_source_switch(&self, world: &mut SimWorld, checks: &mut Checks) {
        world.runtime.start();
        let id = world.runtime.start_driver_session("DRV-3", "PB-300");
        world.run_for(Duration::from_secs(10));

        let offset = world.runtime.config().location.network_offset_deg;
        for round in 1..=3 {
            world.runtime.set_location_mode(LocationMode::Network);
            let reports = world.run_for(Duration::from_secs(65));
            let fixes = accuracies(&reports);

            checks.require(fixes.len() >= 3, || {
                format!("round {}: {} network fixes in 65s", round, fixes.len())
            });
            checks.require(fixes.iter().all(|a| *a == Accuracy::Low), || {
                format!("round {}: non-network fix during network mode", round)
            });
            if let (Some(zone), Some(entity)) =
                (world.runtime.location().zone(), world.runtime.registry().get(&id))
            {
                let seed = zone.seed();
                let inside = (entity.position.lat - seed.lat).abs() <= offset + 1e-9
                    && (entity.position.lng - seed.lng).abs() <= offset + 1e-9;
                checks.require(inside, || format!("round {}: fix outside zone offset", round));
            }

            world.runtime.set_location_mode(LocationMode::Gps);
            let reports = world.run_for(Duration::from_secs(10));
            let fixes = accuracies(&reports);
            checks.require(!fixes.is_empty() && fixes.iter().all(|a| *a == Accuracy::High), || {
                format!("round {}: gps did not resume cleanly", round)
            });
        }

        let provider = world.provider();
        checks.require(provider.max_active() <= 1, || {
            format!("{} concurrent watches", provider.max_active())
        });
        checks.require(provider.total_watches() == 4, || {
            format!("{} watches opened, expected 4", provider.total_watches())
        });

        info!(
            "✓ SourceSwitch complete: {} fixes, {} watches opened",
            world.metrics.fixes,
            world.provider().total_watches()
        );
    }

    /// Tears the map down for a few seconds, then mounts a fresh one.
    ///
    /// **Assertion**: syncs defer while unmounted without issuing removals;
    /// the first pass after remount recreates every marker.
    fn run_surface_remount(&self, world: &mut SimWorld, checks: &mut Checks) {
        world.seed_fleet();
        world.runtime.start();
        world.run_for(Duration::from_secs(10));

        world.surface_mut().unmount();
        let removals_before = world.metrics.markers_removed;
        for report in world.run_for(Duration::from_secs(6)) {
            checks.require(report.sync == SyncOutcome::Deferred, || {
                format!("period {} synced to an unmounted map", report.period)
            });
        }
        checks.require(world.metrics.markers_removed == removals_before, || {
            "markers removed while unmounted".to_string()
        });

        world.surface_mut().mount();
        let report = world.step();
        let rebuilt = match &report.sync {
            SyncOutcome::Applied(sync) => sync.created.len(),
            SyncOutcome::Deferred => 0,
        };
        checks.require(rebuilt == 4, || format!("{} markers rebuilt after remount", rebuilt));

        world.run_for(Duration::from_secs(10));
        let markers = world.surface().markers().len();
        checks.require(markers == 4, || format!("{} markers after remount", markers));

        info!(
            "✓ SurfaceRemount complete: {} deferred syncs, {} markers created in total",
            world.metrics.deferred_syncs, world.metrics.markers_created
        );
    }

    /// **Assertion**: cancelling with time left never reaches the dispatcher.
    fn run_sos_cancel(&self, world: &mut SimWorld, checks: &mut Checks) {
        world.runtime.start();
        world.trigger.raise("driver SOS");
        world.step();
        checks.require(world.runtime.escalation().phase() == EscalationPhase::Confirming, || {
            "SOS signal not picked up".to_string()
        });

        world.run_for(Duration::from_secs(3));
        let left = world.runtime.escalation().countdown();
        checks.require(left == 2, || format!("countdown at {} after 3s", left));

        let transitions = world.runtime.cancel_sos();
        checks.require(
            transitions
                == vec![Transition {
                    from: EscalationPhase::Confirming,
                    to: EscalationPhase::Idle,
                }],
            || format!("cancel produced {:?}", transitions),
        );

        world.run_for(Duration::from_secs(10));
        let dispatched = world.runtime.dispatcher().dispatched().len();
        checks.require(dispatched == 0, || format!("{} alerts after cancel", dispatched));

        info!("✓ SosCancel complete: cancelled with {}s left", left);
    }

    /// **Assertion**: exactly one dispatch, via Dispatching, back to Idle.
    fn run_sos_dispatch(&self, world: &mut SimWorld, checks: &mut Checks) {
        world.runtime.start();
        world.trigger.raise("driver SOS");

        let reports = world.run_for(Duration::from_secs(10));
        let transitions: Vec<Transition> = reports
            .iter()
            .flat_map(|r| r.transitions.iter().copied())
            .collect();
        let count = |from: EscalationPhase, to: EscalationPhase| {
            transitions
                .iter()
                .filter(|t| t.from == from && t.to == to)
                .count()
        };

        checks.require(count(EscalationPhase::Confirming, EscalationPhase::Dispatching) == 1, || {
            "dispatching phase not entered exactly once".to_string()
        });
        checks.require(count(EscalationPhase::Dispatching, EscalationPhase::Idle) == 1, || {
            "did not return to idle after dispatch".to_string()
        });
        checks.require(world.runtime.escalation().phase() == EscalationPhase::Idle, || {
            "escalation left active".to_string()
        });
        let alerts = world.runtime.dispatcher().dispatched();
        checks.require(alerts.len() == 1, || format!("{} alerts dispatched", alerts.len()));

        info!("✓ SosDispatch complete: {} transitions", transitions.len());
    }
}

fn accuracies(reports: &[PeriodReport]) -> Vec<Accuracy> {
    reports
        .iter()
        .flat_map(|r| r.fixes.iter().map(|f| f.accuracy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_all_scenarios_pass() {
        let runner = ScenarioRunner::new(42).with_duration(30.0);
        for scenario in ScenarioId::all() {
            let result = runner.run(scenario);
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
        }
    }

    #[test]
    fn test_scenarios_pass_across_seeds() {
        for seed in [1, 7, 1234, 99_999] {
            let runner = ScenarioRunner::new(seed).with_duration(20.0);
            for scenario in [ScenarioId::SteadyFleet, ScenarioId::DriverShift] {
                let result = runner.run(scenario);
                assert!(result.passed, "{} seed={} failed: {:?}", scenario, seed, result.failure_reason);
            }
        }
    }

    #[test]
    fn test_sos_dispatch_counts_one_alert() {
        let result = ScenarioRunner::new(42).run(ScenarioId::SosDispatch);
        assert_eq!(result.dispatches, 1);
    }

    #[test]
    fn test_invalid_config_fails_cleanly() {
        let mut config = FleetConfig::default();
        config.simulation.speed_scale = 0.0;
        let result = ScenarioRunner::new(42).with_config(config).run(ScenarioId::SteadyFleet);

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("world setup failed"));
    }

    #[test]
    fn test_exported_run_has_frames() {
        let (result, export) = ScenarioRunner::new(42)
            .with_duration(10.0)
            .run_exported(ScenarioId::SurfaceRemount);

        assert!(result.passed);
        assert_eq!(export.frames.len() as u64, result.total_periods);
        assert!(export.frames.iter().any(|f| !f.events.is_empty()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_sos_dispatches_once_for_any_seed(seed in any::<u64>()) {
            let result = ScenarioRunner::new(seed).run(ScenarioId::SosDispatch);
            prop_assert!(result.passed, "seed {} failed: {:?}", seed, result.failure_reason);
            prop_assert_eq!(result.dispatches, 1);
        }
    }
}
