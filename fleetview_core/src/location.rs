//! Position acquisition with GPS / network arbitration.
//!
//! A `LocationSource` owns at most one acquisition at a time:
//!
//! ```text
//!             start(Gps)                     start(Network)
//!   Stopped ─────────────► Watch(handle) ───────────────────► Poll(cadence, zone)
//!      ▲                        │   stop() cancels handle first      │
//!      └──────── stop() ────────┴────────────────────────────────────┘
//! ```
//!
//! Provider callbacks only enqueue events tagged with the acquisition
//! generation. `poll()` drains the queue, so nothing reaches listeners
//! outside the owner's scheduling slot, and `stop()` discards anything a
//! cancelled watch left behind.

use crate::config::LocationConfig;
use crate::error::FleetError;
use fleetview_env::{
    Accuracy, AcquisitionError, Cadence, Clock, ErrorCallback, Fix, FixCallback, GeoPoint,
    PositionProvider, WatchHandle, WatchOptions,
};
use h3o::{CellIndex, LatLng, Resolution};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Which position source is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    /// Continuous high-accuracy device fixes
    Gps,
    /// Coarse periodic approximation
    Network,
}

/// Cell used to approximate a position in network mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApproximationZone {
    cell: CellIndex,
    seed: GeoPoint,
}

impl ApproximationZone {
    /// The zone containing `point` at the given H3 resolution.
    pub fn containing(point: GeoPoint, resolution: u8) -> Result<Self, FleetError> {
        let resolution = Resolution::try_from(resolution)
            .map_err(|e| FleetError::config(format!("zone resolution: {}", e)))?;
        let latlng = LatLng::new(point.lat, point.lng)
            .map_err(|e| FleetError::InvalidCoordinate(e.to_string()))?;
        let cell = latlng.to_cell(resolution);
        let center = LatLng::from(cell);

        Ok(Self {
            cell,
            seed: GeoPoint::new(center.lat(), center.lng()),
        })
    }

    pub fn cell(&self) -> CellIndex {
        self.cell
    }

    /// Seed coordinate fixes are synthesized around.
    pub fn seed(&self) -> GeoPoint {
        self.seed
    }
}

enum Acquisition {
    Watch(WatchHandle),
    Poll {
        cadence: Cadence,
        zone: ApproximationZone,
    },
}

enum LocationEvent {
    Fix(Fix),
    Error(AcquisitionError),
}

#[derive(Default)]
struct Inbox {
    generation: u64,
    events: VecDeque<LocationEvent>,
}

fn lock(inbox: &Mutex<Inbox>) -> MutexGuard<'_, Inbox> {
    inbox.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arbitrates a device position provider and network approximation.
pub struct LocationSource<P: PositionProvider, R: Rng = ChaCha8Rng> {
    provider: P,
    config: LocationConfig,
    fallback: GeoPoint,
    clock: Arc<dyn Clock>,
    rng: R,

    mode: Option<LocationMode>,
    acquisition: Option<Acquisition>,
    inbox: Arc<Mutex<Inbox>>,

    last_fix: Option<Fix>,
    zone_hint: Option<GeoPoint>,
    degraded: bool,
    error_reported: bool,

    fix_listeners: Vec<FixCallback>,
    error_listeners: Vec<ErrorCallback>,
}

impl<P: PositionProvider> LocationSource<P, ChaCha8Rng> {
    pub fn seeded(
        provider: P,
        config: LocationConfig,
        fallback: GeoPoint,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self::new(provider, config, fallback, clock, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<P: PositionProvider, R: Rng> LocationSource<P, R> {
    pub fn new(
        provider: P,
        config: LocationConfig,
        fallback: GeoPoint,
        clock: Arc<dyn Clock>,
        rng: R,
    ) -> Self {
        Self {
            provider,
            config,
            fallback,
            clock,
            rng,
            mode: None,
            acquisition: None,
            inbox: Arc::new(Mutex::new(Inbox::default())),
            last_fix: None,
            zone_hint: None,
            degraded: false,
            error_reported: false,
            fix_listeners: Vec::new(),
            error_listeners: Vec::new(),
        }
    }

    /// Registers a listener for every delivered fix.
    pub fn on_fix<F>(&mut self, callback: F)
    where
        F: FnMut(Fix) + Send + 'static,
    {
        self.fix_listeners.push(Box::new(callback));
    }

    /// Registers a listener for acquisition failures.
    pub fn on_error<F>(&mut self, callback: F)
    where
        F: FnMut(AcquisitionError) + Send + 'static,
    {
        self.error_listeners.push(Box::new(callback));
    }

    /// Starts acquiring in `mode`, stopping any previous acquisition first.
    pub fn start(&mut self, mode: LocationMode) {
        self.stop();
        self.mode = Some(mode);
        self.error_reported = false;
        let generation = lock(&self.inbox).generation;

        match mode {
            LocationMode::Gps => self.start_watch(generation),
            LocationMode::Network => self.start_polling(),
        }
    }

    /// Releases the active acquisition. No-op when not started.
    ///
    /// Events still queued from the released acquisition are dropped.
    pub fn stop(&mut self) {
        if self.mode.is_none() && self.acquisition.is_none() {
            return;
        }

        if let Some(Acquisition::Watch(handle)) = self.acquisition.take() {
            self.provider.cancel(handle);
            debug!("location: cancelled {}", handle);
        }

        let mut inbox = lock(&self.inbox);
        inbox.generation += 1;
        inbox.events.clear();
        drop(inbox);

        self.mode = None;
    }

    /// Delivers pending fixes and errors; drives the network cadence.
    ///
    /// # Returns
    /// The fixes delivered during this call, in order.
    pub fn poll(&mut self) -> Vec<Fix> {
        self.poll_network();

        let events: Vec<LocationEvent> = lock(&self.inbox).events.drain(..).collect();
        let mut delivered = Vec::new();
        for event in events {
            match event {
                LocationEvent::Fix(fix) => {
                    // A real fix ends the outage; the next failure is reported again
                    if fix.accuracy != Accuracy::Fallback {
                        self.degraded = false;
                        self.error_reported = false;
                    }
                    self.deliver(fix);
                    delivered.push(fix);
                }
                LocationEvent::Error(error) => {
                    if let Some(fix) = self.fail(error) {
                        delivered.push(fix);
                    }
                }
            }
        }
        delivered
    }

    /// One-shot fix; the configured fallback center on failure.
    pub fn current_fix(&mut self) -> Fix {
        match self.provider.current_fix(&self.watch_options()) {
            Ok(fix) => {
                self.last_fix = Some(fix);
                fix
            }
            Err(error) => {
                warn!("location: one-shot fix failed ({}), using regional center", error);
                self.degraded = true;
                let fix = self.fallback_fix();
                self.last_fix = Some(fix);
                fix
            }
        }
    }

    /// Position used to choose the approximation zone when switching to
    /// network mode without any prior fix.
    pub fn set_zone_hint(&mut self, point: GeoPoint) {
        self.zone_hint = Some(point);
    }

    pub fn mode(&self) -> Option<LocationMode> {
        self.mode
    }

    /// Whether an acquisition handle is held.
    pub fn is_active(&self) -> bool {
        self.acquisition.is_some()
    }

    pub fn active_watch(&self) -> Option<WatchHandle> {
        match self.acquisition {
            Some(Acquisition::Watch(handle)) => Some(handle),
            _ => None,
        }
    }

    pub fn zone(&self) -> Option<ApproximationZone> {
        match &self.acquisition {
            Some(Acquisition::Poll { zone, .. }) => Some(*zone),
            _ => None,
        }
    }

    /// Tracking continues on the fallback coordinate.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn last_fix(&self) -> Option<Fix> {
        self.last_fix
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.provider
    }

    fn watch_options(&self) -> WatchOptions {
        WatchOptions {
            high_accuracy: true,
            timeout_ms: self.config.timeout_ms,
            maximum_age_ms: 0,
        }
    }

    fn start_watch(&mut self, generation: u64) {
        let fix_inbox = Arc::clone(&self.inbox);
        let on_fix: FixCallback = Box::new(move |mut fix: Fix| {
            let mut inbox = lock(&fix_inbox);
            if inbox.generation == generation {
                fix.accuracy = Accuracy::High;
                inbox.events.push_back(LocationEvent::Fix(fix));
            }
        });

        let error_inbox = Arc::clone(&self.inbox);
        let on_error: ErrorCallback = Box::new(move |error| {
            let mut inbox = lock(&error_inbox);
            if inbox.generation == generation {
                inbox.events.push_back(LocationEvent::Error(error));
            }
        });

        match self.provider.watch(&self.watch_options(), on_fix, on_error) {
            Ok(handle) => {
                info!("location: gps watch started ({})", handle);
                self.acquisition = Some(Acquisition::Watch(handle));
            }
            Err(error) => {
                // No handle was created; report through the queue so the
                // failure surfaces on the next poll like any other.
                lock(&self.inbox).events.push_back(LocationEvent::Error(error));
            }
        }
    }

    fn start_polling(&mut self) {
        let anchor = self
            .last_fix
            .map(|fix| fix.position)
            .or(self.zone_hint)
            .unwrap_or(self.fallback);

        let zone = match ApproximationZone::containing(anchor, self.config.zone_resolution) {
            Ok(zone) => zone,
            Err(error) => {
                warn!("location: no zone for {:?} ({}), using regional center", anchor, error);
                match ApproximationZone::containing(self.fallback, self.config.zone_resolution) {
                    Ok(zone) => zone,
                    Err(_) => {
                        self.degraded = true;
                        let fix = self.fallback_fix();
                        lock(&self.inbox).events.push_back(LocationEvent::Fix(fix));
                        return;
                    }
                }
            }
        };

        let mut cadence = Cadence::new(self.config.network_interval());
        cadence.start(self.clock.now());
        info!("location: network polling started in cell {}", zone.cell());

        // First approximation right away rather than one full period later
        let fix = self.synthesize(&zone);
        lock(&self.inbox).events.push_back(LocationEvent::Fix(fix));

        self.acquisition = Some(Acquisition::Poll { cadence, zone });
    }

    fn poll_network(&mut self) {
        let now = self.clock.now();
        let (due, zone) = match &mut self.acquisition {
            Some(Acquisition::Poll { cadence, zone }) => (cadence.poll(now), *zone),
            _ => return,
        };
        // Only the latest approximation matters when several periods passed
        if due > 0 {
            let fix = self.synthesize(&zone);
            lock(&self.inbox).events.push_back(LocationEvent::Fix(fix));
        }
    }

    fn synthesize(&mut self, zone: &ApproximationZone) -> Fix {
        let max = self.config.network_offset_deg;
        let (dlat, dlng) = if max > 0.0 {
            (self.rng.gen_range(-max..=max), self.rng.gen_range(-max..=max))
        } else {
            (0.0, 0.0)
        };
        Fix::new(zone.seed().offset(dlat, dlng), Accuracy::Low, self.clock.unix_millis())
    }

    fn fallback_fix(&self) -> Fix {
        Fix::new(self.fallback, Accuracy::Fallback, self.clock.unix_millis())
    }

    fn deliver(&mut self, fix: Fix) {
        self.last_fix = Some(fix);
        for listener in &mut self.fix_listeners {
            listener(fix);
        }
    }

    /// First failure per `start`: notify once and fall back to the regional
    /// center. Later failures only log.
    fn fail(&mut self, error: AcquisitionError) -> Option<Fix> {
        if self.error_reported {
            debug!("location: repeated acquisition failure ({})", error);
            return None;
        }
        self.error_reported = true;
        self.degraded = true;
        warn!("location: acquisition failed ({}), falling back to regional center", error);

        for listener in &mut self.error_listeners {
            listener(error.clone());
        }

        let fix = self.fallback_fix();
        self.deliver(fix);
        Some(fix)
    }
}

impl<P: PositionProvider, R: Rng> Drop for LocationSource<P, R> {
    fn drop(&mut self) {
        self.stop();
    }
}
