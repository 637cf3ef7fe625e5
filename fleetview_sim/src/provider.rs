//! Scripted device geolocation.
//!
//! The provider carries a ground-truth "device" that drives along a heading.
//! Every GPS period it pushes a noisy fix to each live watch. Permission
//! denial and signal outages can be switched on at any time.

use fleetview_core::config::SimulationConfig;
use fleetview_core::simulator::displacement;
use fleetview_env::{
    Accuracy, AcquisitionError, Cadence, Clock, ErrorCallback, Fix, FixCallback, GeoPoint,
    PositionProvider, WatchHandle, WatchOptions,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Ground-truth motion of the simulated device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceTrack {
    pub position: GeoPoint,
    pub heading: f64,
    pub speed: f64,
}

pub struct SimPositionProvider {
    clock: Arc<dyn Clock>,
    rng: ChaCha8Rng,

    /// Per-axis fix noise in degrees; `None` for exact fixes
    noise: Option<Normal<f64>>,

    truth: DeviceTrack,
    /// Same K as the fleet simulator, so the device moves like a bus
    speed_scale: f64,
    cadence: Cadence,

    denied: bool,
    outage: bool,

    watches: BTreeMap<WatchHandle, (FixCallback, ErrorCallback)>,
    next_handle: u64,

    /// Most concurrently held watches ever
    max_active: usize,
    total_watches: u64,
    fixes_pushed: u64,
}

impl SimPositionProvider {
    pub fn new(
        clock: Arc<dyn Clock>,
        truth: DeviceTrack,
        gps_interval: Duration,
        noise_std_deg: f64,
        seed: u64,
    ) -> Self {
        let noise = match Normal::new(0.0, noise_std_deg) {
            Ok(normal) if noise_std_deg > 0.0 => Some(normal),
            Ok(_) => None,
            Err(e) => {
                warn!("sim provider: invalid noise {} ({}), fixes are exact", noise_std_deg, e);
                None
            }
        };
        let mut cadence = Cadence::new(gps_interval);
        cadence.start(clock.now());

        Self {
            clock,
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise,
            truth,
            speed_scale: SimulationConfig::default().speed_scale,
            cadence,
            denied: false,
            outage: false,
            watches: BTreeMap::new(),
            next_handle: 0,
            max_active: 0,
            total_watches: 0,
            fixes_pushed: 0,
        }
    }

    /// Uses the fleet's configured K for the device track.
    pub fn with_speed_scale(mut self, speed_scale: f64) -> Self {
        self.speed_scale = speed_scale;
        self
    }

    /// Refuses new watches and one-shot fixes.
    pub fn set_denied(&mut self, denied: bool) {
        self.denied = denied;
    }

    /// While set, live watches receive errors instead of fixes.
    pub fn set_outage(&mut self, outage: bool) {
        self.outage = outage;
    }

    pub fn truth(&self) -> DeviceTrack {
        self.truth
    }

    pub fn active_watches(&self) -> usize {
        self.watches.len()
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn total_watches(&self) -> u64 {
        self.total_watches
    }

    pub fn fixes_pushed(&self) -> u64 {
        self.fixes_pushed
    }

    /// Moves the device for every GPS period due and notifies watches.
    pub fn advance(&mut self) {
        for _ in 0..self.cadence.poll(self.clock.now()) {
            let (dlat, dlng) = displacement(self.truth.heading, self.truth.speed, self.speed_scale);
            self.truth.position = self.truth.position.offset(dlat, dlng);

            if self.outage {
                for (_, on_error) in self.watches.values_mut() {
                    on_error(AcquisitionError::unavailable("no satellite lock"));
                }
                continue;
            }

            let handles: Vec<WatchHandle> = self.watches.keys().copied().collect();
            for handle in handles {
                let fix = self.sample();
                if let Some((on_fix, _)) = self.watches.get_mut(&handle) {
                    on_fix(fix);
                    self.fixes_pushed += 1;
                }
            }
        }
    }

    fn sample(&mut self) -> Fix {
        let position = match &self.noise {
            Some(normal) => self.truth.position.offset(
                normal.sample(&mut self.rng),
                normal.sample(&mut self.rng),
            ),
            None => self.truth.position,
        };
        Fix::new(position, Accuracy::High, self.clock.unix_millis())
    }
}

impl PositionProvider for SimPositionProvider {
    fn watch(
        &mut self,
        _options: &WatchOptions,
        on_fix: FixCallback,
        on_error: ErrorCallback,
    ) -> Result<WatchHandle, AcquisitionError> {
        if self.denied {
            return Err(AcquisitionError::PermissionDenied);
        }
        self.next_handle += 1;
        let handle = WatchHandle(self.next_handle);
        self.watches.insert(handle, (on_fix, on_error));
        self.total_watches += 1;
        self.max_active = self.max_active.max(self.watches.len());
        debug!("sim provider: watch {} opened", handle);
        Ok(handle)
    }

    fn cancel(&mut self, handle: WatchHandle) {
        // Dropping the callbacks guarantees a cancelled watch never fires
        if self.watches.remove(&handle).is_some() {
            debug!("sim provider: watch {} closed", handle);
        }
    }

    fn current_fix(&mut self, _options: &WatchOptions) -> Result<Fix, AcquisitionError> {
        if self.denied {
            return Err(AcquisitionError::PermissionDenied);
        }
        if self.outage {
            return Err(AcquisitionError::Timeout(10_000));
        }
        Ok(self.sample())
    }
}
