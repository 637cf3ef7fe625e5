//! Scheduling-period orchestration.
//!
//! One call to [`FleetRuntime::step`] is one period:
//!
//! ```text
//!   confirmed commands
//!     → location poll (queued fixes + network cadence) → bound entity
//!     → simulation ticks due
//!     → reconcile markers
//!     → selection refresh, marker clicks
//!     → SOS signals, countdown ticks due
//! ```
//!
//! Every registry write of a period happens before the reconciler reads it.

use crate::commands::{CommandBus, CommandOutcome, CommandTicket, Confirmation, OperatorCommand};
use crate::config::FleetConfig;
use crate::entity::{wrap_heading, EntitySource, NewEntity};
use crate::error::FleetError;
use crate::escalation::{
    Dispatcher, EmergencyEscalation, EmergencySignal, EmergencySignals, EmergencyTrigger,
    LogDispatcher, Transition,
};
use crate::location::{LocationMode, LocationSource};
use crate::persistence::{load_snapshot, save_snapshot, FleetSnapshot, SessionIdentity, SnapshotStore};
use crate::reconciler::{MapSyncReconciler, SyncOutcome};
use crate::registry::EntityRegistry;
use crate::selection::SelectionController;
use crate::simulator::KinematicSimulator;
use fleetview_env::{
    Cadence, Clock, ControlKind, EntityId, Fix, FleetContext, GeoPoint, PositionProvider,
    RenderSurface,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened during one period.
#[derive(Debug, Clone)]
pub struct PeriodReport {
    pub period: u64,
    pub fixes: Vec<Fix>,
    /// Entity advances made by the simulator
    pub simulated: usize,
    pub sync: SyncOutcome,
    /// Entity selected through a marker click this period
    pub clicked: Option<EntityId>,
    pub transitions: Vec<Transition>,
    pub commands: Vec<(u64, CommandOutcome)>,
}

/// Free-text issue filed by a driver or operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    pub entity: Option<EntityId>,
    pub description: String,
    pub reported_at_ms: u64,
}

/// Owns every component and drives them in period order.
pub struct FleetRuntime<P, S, D = LogDispatcher>
where
    P: PositionProvider,
    S: RenderSurface,
    D: Dispatcher,
{
    config: FleetConfig,
    clock: Arc<dyn Clock>,

    registry: EntityRegistry,
    simulator: KinematicSimulator,
    location: LocationSource<P>,
    reconciler: MapSyncReconciler,
    selection: SelectionController,
    escalation: EmergencyEscalation,
    signals: EmergencySignals,
    dispatcher: D,
    commands: CommandBus,
    surface: S,

    sim_cadence: Cadence,
    session: Option<SessionIdentity>,
    issues: Vec<IssueReport>,
    periods: u64,
}

impl<P, S, D> FleetRuntime<P, S, D>
where
    P: PositionProvider,
    S: RenderSurface,
    D: Dispatcher,
{
    /// Builds a runtime plus the trigger end of its emergency channel.
    ///
    /// `seed` feeds both the simulator and the network approximation so a
    /// run is reproducible end to end.
    pub fn new(
        config: FleetConfig,
        provider: P,
        surface: S,
        dispatcher: D,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Result<(Self, EmergencyTrigger), FleetError> {
        config.validate()?;

        let registry = EntityRegistry::new(Arc::clone(&clock));
        let simulator = KinematicSimulator::seeded(&config.simulation, seed);
        let location = LocationSource::seeded(
            provider,
            config.location.clone(),
            config.region_center,
            Arc::clone(&clock),
            seed.wrapping_add(1),
        );
        let selection = SelectionController::new(config.camera.clone());
        let reconciler = MapSyncReconciler::new(selection.requests());
        let escalation = EmergencyEscalation::new(config.escalation.clone(), Arc::clone(&clock));
        let (trigger, signals) = EmergencySignal::channel();
        let sim_cadence = Cadence::new(config.simulation.tick_interval());

        let runtime = Self {
            config,
            clock,
            registry,
            simulator,
            location,
            reconciler,
            selection,
            escalation,
            signals,
            dispatcher,
            commands: CommandBus::new(),
            surface,
            sim_cadence,
            session: None,
            issues: Vec::new(),
            periods: 0,
        };
        Ok((runtime, trigger))
    }

    /// Mounts controls, arms the simulation cadence and resumes a restored
    /// driver session.
    pub fn start(&mut self) {
        for control in [ControlKind::Navigation, ControlKind::Geolocate] {
            if let Err(e) = self.surface.add_control(control) {
                debug!("runtime: control {:?} not added ({})", control, e);
            }
        }
        self.sim_cadence.start(self.clock.now());

        if matches!(self.session, Some(SessionIdentity::Driver { .. })) && !self.location.is_active() {
            self.location.start(LocationMode::Gps);
        }
        info!(
            "runtime: started with {} entities (simulation tick every {:?})",
            self.registry.len(),
            self.sim_cadence.period()
        );
    }

    /// Stops all timers and acquisitions and releases every marker.
    pub fn shutdown(&mut self) {
        self.location.stop();
        self.sim_cadence.stop();
        self.reconciler.teardown(&mut self.surface);
        info!("runtime: shut down after {} periods", self.periods);
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Publishes this device's position as a new external entity.
    pub fn start_driver_session(
        &mut self,
        driver_id: impl Into<String>,
        bus_label: impl Into<String>,
    ) -> EntityId {
        self.end_session();

        let driver_id = driver_id.into();
        let bus_label = bus_label.into();
        let start = self
            .location
            .last_fix()
            .map(|fix| fix.position)
            .unwrap_or(self.config.region_center);

        let mut draft = NewEntity::new(bus_label.clone(), start);
        draft.source = EntitySource::External;
        let id = self.registry.create(draft);

        self.session = Some(SessionIdentity::Driver {
            driver_id: driver_id.clone(),
            bus_label,
            entity: id.clone(),
        });
        self.location.set_zone_hint(start);
        self.location.start(LocationMode::Gps);
        info!("runtime: driver {} on shift as {}", driver_id, id);
        id
    }

    /// Stops publishing and removes the driver's entity.
    pub fn end_driver_session(&mut self) -> bool {
        if !matches!(self.session, Some(SessionIdentity::Driver { .. })) {
            return false;
        }
        let Some(SessionIdentity::Driver { entity, driver_id, .. }) = self.session.take() else {
            return false;
        };
        self.location.stop();
        self.registry.remove(&entity);
        info!("runtime: driver {} off shift", driver_id);
        true
    }

    pub fn operator_login(
        &mut self,
        user_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
    ) {
        self.end_session();
        let user_id = user_id.into();
        info!("runtime: operator {} signed in", user_id);
        self.session = Some(SessionIdentity::Operator {
            user_id,
            name: name.into(),
            role: role.into(),
        });
    }

    pub fn operator_logout(&mut self) -> bool {
        match self.session {
            Some(SessionIdentity::Operator { .. }) => {
                self.session = None;
                true
            }
            _ => false,
        }
    }

    fn end_session(&mut self) -> bool {
        self.end_driver_session() || self.operator_logout()
    }

    /// Switches the active acquisition; ignored when nothing is tracking.
    pub fn set_location_mode(&mut self, mode: LocationMode) {
        if self.location.mode().is_some() && self.location.mode() != Some(mode) {
            info!("runtime: location source → {:?}", mode);
            self.location.start(mode);
        }
    }

    // ========================================================================
    // FLEET AND COMMANDS
    // ========================================================================

    /// Adds a simulated bus to the fleet.
    pub fn add_to_fleet(&mut self, mut draft: NewEntity) -> EntityId {
        draft.source = EntitySource::Simulated;
        let id = self.registry.create(draft);
        info!("runtime: added {} to the fleet", id);
        id
    }

    /// Asks for confirmation before deleting a bus.
    pub fn remove_from_fleet(&mut self, id: EntityId) -> CommandTicket {
        self.request(OperatorCommand::RemoveFromFleet { id })
    }

    pub fn request(&mut self, command: OperatorCommand) -> CommandTicket {
        self.commands.request(command)
    }

    pub fn respond(&mut self, ticket_id: u64, confirmation: Confirmation) -> bool {
        self.commands.respond(ticket_id, confirmation)
    }

    pub fn select(&mut self, id: &EntityId) -> bool {
        self.selection.select(id, &self.registry, &mut self.surface)
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Flies to this device's position ("my location").
    pub fn locate_me(&mut self) -> GeoPoint {
        let fix = self.location.current_fix();
        self.selection.center_on(fix.position, &mut self.surface);
        fix.position
    }

    pub fn cancel_sos(&mut self) -> Vec<Transition> {
        self.escalation.cancel()
    }

    fn apply_commands(&mut self) -> Vec<(u64, CommandOutcome)> {
        let mut settled = Vec::new();
        for ready in self.commands.take_ready() {
            let outcome = match &ready.command {
                OperatorCommand::RemoveFromFleet { id } => self.remove_entity(id),
                OperatorCommand::EndShift => {
                    if self.end_session() {
                        CommandOutcome::Applied
                    } else {
                        CommandOutcome::Failed("no active session".to_string())
                    }
                }
                OperatorCommand::ReportIssue { entity, description } => {
                    info!("runtime: issue reported for {:?}: {}", entity, description);
                    self.issues.push(IssueReport {
                        entity: entity.clone(),
                        description: description.clone(),
                        reported_at_ms: self.clock.unix_millis(),
                    });
                    CommandOutcome::Applied
                }
            };
            settled.push((ready.id, outcome.clone()));
            ready.complete(outcome);
        }
        settled
    }

    fn remove_entity(&mut self, id: &EntityId) -> CommandOutcome {
        let bound = matches!(
            &self.session,
            Some(SessionIdentity::Driver { entity, .. }) if entity == id
        );
        if bound {
            self.end_driver_session();
            return CommandOutcome::Applied;
        }
        match self.registry.remove(id) {
            Some(_) => CommandOutcome::Applied,
            None => CommandOutcome::Failed(format!("unknown entity {}", id)),
        }
    }

    // ========================================================================
    // SCHEDULING
    // ========================================================================

    /// Runs one scheduling period.
    pub fn step(&mut self) -> PeriodReport {
        self.periods += 1;
        let commands = self.apply_commands();

        let fixes = self.location.poll();
        if let Some(fix) = fixes.last() {
            self.apply_fix(*fix);
        }

        let mut simulated = 0;
        for _ in 0..self.sim_cadence.poll(self.clock.now()) {
            simulated += self.simulator.tick(&mut self.registry);
        }

        let sync = self.reconciler.sync(self.registry.list(), &mut self.surface);
        self.selection.refresh(&self.registry, &mut self.surface);
        let clicked = self.selection.drain_requests(&self.registry, &mut self.surface);

        let mut transitions = Vec::new();
        for reason in self.signals.drain() {
            transitions.extend(self.escalation.trigger(reason));
        }
        transitions.extend(self.escalation.advance(&mut self.dispatcher));

        PeriodReport {
            period: self.periods,
            fixes,
            simulated,
            sync,
            clicked,
            transitions,
            commands,
        }
    }

    /// Steps every `resolution` until the context clock reaches `until`.
    ///
    /// `ctx` must share the clock this runtime was built with.
    pub async fn run_until<Ctx>(&mut self, ctx: &Ctx, until: Duration, resolution: Duration) -> Vec<PeriodReport>
    where
        Ctx: FleetContext,
    {
        let resolution = resolution.max(Duration::from_millis(1));
        debug!(
            "runtime: running until {:?} every {:?} (context seed {})",
            until,
            resolution,
            ctx.seed()
        );
        let mut reports = Vec::new();
        while ctx.now() < until {
            reports.push(self.step());
            ctx.sleep(resolution).await;
        }
        reports
    }

    fn apply_fix(&mut self, fix: Fix) {
        let Some(SessionIdentity::Driver { entity, .. }) = &self.session else {
            return;
        };
        self.registry.modify(entity, |e| {
            let dlat = fix.position.lat - e.position.lat;
            let dlng = fix.position.lng - e.position.lng;
            if dlat != 0.0 || dlng != 0.0 {
                // Same angle convention as the simulator: 0° east, 90° north
                e.heading = wrap_heading(dlat.atan2(dlng).to_degrees());
            }
            e.position = fix.position;
            e.last_updated = fix.timestamp_ms;
        });
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    pub fn snapshot(&self) -> FleetSnapshot {
        FleetSnapshot {
            entities: self.registry.snapshot(),
            session: self.session.clone(),
        }
    }

    /// Replaces fleet and session with a snapshot. Call before `start`.
    pub fn restore(&mut self, snapshot: FleetSnapshot) {
        self.registry.restore(snapshot.entities);
        self.session = match snapshot.session {
            Some(SessionIdentity::Driver { entity, .. }) if !self.registry.contains(&entity) => {
                warn!("runtime: restored driver session lost its entity {}, dropping", entity);
                None
            }
            session => session,
        };
    }

    pub fn load_from<T>(&mut self, store: &T)
    where
        T: SnapshotStore + ?Sized,
    {
        self.restore(load_snapshot(store));
    }

    pub fn save_to<T>(&self, store: &T) -> Result<(), FleetError>
    where
        T: SnapshotStore + ?Sized,
    {
        save_snapshot(store, &self.snapshot())
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn location(&self) -> &LocationSource<P> {
        &self.location
    }

    pub fn location_mut(&mut self) -> &mut LocationSource<P> {
        &mut self.location
    }

    pub fn reconciler(&self) -> &MapSyncReconciler {
        &self.reconciler
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut SelectionController {
        &mut self.selection
    }

    pub fn escalation(&self) -> &EmergencyEscalation {
        &self.escalation
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn session(&self) -> Option<&SessionIdentity> {
        self.session.as_ref()
    }

    pub fn issues(&self) -> &[IssueReport] {
        &self.issues
    }

    pub fn pending_commands(&self) -> impl Iterator<Item = (u64, &OperatorCommand)> + '_ {
        self.commands.pending()
    }

    pub fn periods(&self) -> u64 {
        self.periods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationPhase;
    use crate::persistence::MemorySnapshotStore;
    use crate::test_support::{FakeProvider, FakeSurface, ManualClock, SurfaceOp};
    use fleetview_env::Accuracy;

    type TestRuntime = FleetRuntime<FakeProvider, FakeSurface>;

    fn runtime_with(provider: FakeProvider) -> (TestRuntime, EmergencyTrigger, Arc<ManualClock>) {
        let clock = ManualClock::shared();
        let (runtime, trigger) = FleetRuntime::new(
            FleetConfig::default(),
            provider,
            FakeSurface::mounted(),
            LogDispatcher::default(),
            clock.clone(),
            42,
        )
        .unwrap();
        (runtime, trigger, clock)
    }

    fn runtime() -> (TestRuntime, EmergencyTrigger, Arc<ManualClock>) {
        runtime_with(FakeProvider::default())
    }

    fn bus(label: &str, lat: f64) -> NewEntity {
        let mut draft = NewEntity::new(label, GeoPoint::new(lat, 75.5));
        draft.heading = 90.0;
        draft.speed = 40.0;
        draft
    }

    #[test]
    fn test_start_adds_map_controls() {
        let (mut rt, _, _) = runtime();
        rt.start();

        assert_eq!(
            rt.surface().ops,
            vec![
                SurfaceOp::Control(ControlKind::Navigation),
                SurfaceOp::Control(ControlKind::Geolocate)
            ]
        );
    }

    #[test]
    fn test_simulation_runs_on_cadence() {
        let (mut rt, _, clock) = runtime();
        let id = rt.add_to_fleet(bus("PB-001", 31.0));
        rt.start();

        let first = rt.step();
        assert_eq!(first.simulated, 0);
        assert!(matches!(first.sync, SyncOutcome::Applied(ref r) if r.created == vec![id.clone()]));

        let before = rt.registry().get(&id).unwrap().position;
        clock.advance(Duration::from_secs(3));
        let second = rt.step();
        assert_eq!(second.simulated, 1);
        assert_ne!(rt.registry().get(&id).unwrap().position, before);
        assert!(matches!(second.sync, SyncOutcome::Applied(ref r) if r.updated == vec![id.clone()]));
    }

    #[test]
    fn test_driver_fixes_move_bound_entity_only() {
        let (mut rt, _, _) = runtime();
        rt.start();
        let id = rt.start_driver_session("D-7", "PB-200");
        assert_eq!(rt.location().mode(), Some(LocationMode::Gps));

        let target = GeoPoint::new(31.2, 75.4);
        rt.location_mut()
            .provider_mut()
            .push_fix(Fix::new(target, Accuracy::High, 1));
        let report = rt.step();

        assert_eq!(report.fixes.len(), 1);
        let entity = rt.registry().get(&id).unwrap();
        assert_eq!(entity.position, target);
        assert_eq!(entity.source, EntitySource::External);
    }

    #[test]
    fn test_end_shift_releases_watch_and_entity() {
        let (mut rt, _, _) = runtime();
        rt.start();
        let id = rt.start_driver_session("D-7", "PB-200");
        rt.step();

        let mut ticket = rt.request(OperatorCommand::EndShift);
        rt.respond(ticket.id, Confirmation::Confirmed);
        rt.step();

        assert_eq!(ticket.try_outcome(), Some(CommandOutcome::Applied));
        assert!(!rt.registry().contains(&id));
        assert!(rt.session().is_none());
        assert_eq!(rt.location().provider().active(), 0);
        assert_eq!(rt.reconciler().marker_count(), 0);
    }

    #[test]
    fn test_remove_requires_confirmation() {
        let (mut rt, _, _) = runtime();
        let id = rt.add_to_fleet(bus("PB-045", 30.7));
        rt.start();

        let mut declined = rt.remove_from_fleet(id.clone());
        rt.respond(declined.id, Confirmation::Declined);
        rt.step();
        assert_eq!(declined.try_outcome(), Some(CommandOutcome::Declined));
        assert!(rt.registry().contains(&id));

        let confirmed = rt.remove_from_fleet(id.clone());
        rt.respond(confirmed.id, Confirmation::Confirmed);
        let report = rt.step();
        assert_eq!(report.commands, vec![(confirmed.id, CommandOutcome::Applied)]);
        assert!(!rt.registry().contains(&id));
    }

    #[test]
    fn test_removed_selection_clears() {
        let (mut rt, _, _) = runtime();
        let id = rt.add_to_fleet(bus("PB-078", 31.3));
        rt.start();
        rt.step();
        assert!(rt.select(&id));

        let ticket = rt.remove_from_fleet(id);
        rt.respond(ticket.id, Confirmation::Confirmed);
        rt.step();
        assert!(rt.selection().focused().is_none());
    }

    #[test]
    fn test_sos_signal_counts_down_and_dispatches() {
        let (mut rt, trigger, clock) = runtime();
        rt.start();
        trigger.raise("panic button");

        let report = rt.step();
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(rt.escalation().phase(), EscalationPhase::Confirming);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            rt.step();
        }
        assert_eq!(rt.escalation().phase(), EscalationPhase::Idle);
        assert_eq!(rt.dispatcher().dispatched().len(), 1);
    }

    #[test]
    fn test_denied_gps_degrades_but_keeps_tracking() {
        let (mut rt, _, _) = runtime_with(FakeProvider::denying());
        rt.start();
        let id = rt.start_driver_session("D-1", "PB-300");
        let report = rt.step();

        assert!(rt.location().is_degraded());
        assert_eq!(report.fixes[0].accuracy, Accuracy::Fallback);
        assert_eq!(rt.registry().get(&id).unwrap().position, rt.config().region_center);
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let store = MemorySnapshotStore::new();
        let (mut rt, _, _) = runtime();
        rt.add_to_fleet(bus("PB-112", 30.2));
        rt.start_driver_session("D-9", "PB-900");
        rt.save_to(&store).unwrap();

        let (mut resumed, _, _) = runtime();
        resumed.load_from(&store);
        resumed.start();

        assert_eq!(resumed.registry().len(), 2);
        assert!(matches!(resumed.session(), Some(SessionIdentity::Driver { .. })));
        assert_eq!(resumed.location().mode(), Some(LocationMode::Gps));
    }

    #[test]
    fn test_issue_report_is_recorded() {
        let (mut rt, _, _) = runtime();
        let mut ticket = rt.request(OperatorCommand::ReportIssue {
            entity: None,
            description: "flat tyre".to_string(),
        });
        rt.respond(ticket.id, Confirmation::Confirmed);
        rt.step();

        assert_eq!(ticket.try_outcome(), Some(CommandOutcome::Applied));
        assert_eq!(rt.issues()[0].description, "flat tyre");
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (mut rt, _, _) = runtime();
        rt.add_to_fleet(bus("PB-001", 31.0));
        rt.start();
        rt.start_driver_session("D-1", "PB-300");
        rt.step();

        rt.shutdown();
        assert!(rt.surface().markers.is_empty());
        assert_eq!(rt.location().provider().active(), 0);
    }
}
