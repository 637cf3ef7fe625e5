//! Kinematic simulation for entities without external telemetry.
//!
//! Each tick moves every simulated entity one step along its heading and
//! lets the heading random-walk:
//!
//! ```text
//! headingRad = heading * π / 180
//! Δlng       = cos(headingRad) * (speed / K)
//! Δlat       = sin(headingRad) * (speed / K)
//! heading'   = (heading + U(-J, J) + 360) mod 360
//! ```
//!
//! There is no route constraint; vehicles wander freely.

use crate::config::SimulationConfig;
use crate::entity::{wrap_heading, EntitySource};
use crate::registry::EntityRegistry;
use fleetview_env::{EntityId, GeoPoint};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Result of one kinematic step for a single entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub position: GeoPoint,
    pub heading: f64,
}

/// Displacement for one tick, without jitter.
pub fn displacement(heading: f64, speed: f64, speed_scale: f64) -> (f64, f64) {
    let heading_rad = heading.to_radians();
    let step = speed / speed_scale;
    let dlat = heading_rad.sin() * step;
    let dlng = heading_rad.cos() * step;
    (dlat, dlng)
}

/// Advances simulated entities once per scheduling period.
pub struct KinematicSimulator<R: Rng = ChaCha8Rng> {
    /// K
    speed_scale: f64,

    /// J
    jitter_deg: f64,

    refresh_eta: bool,

    rng: R,

    ticks: u64,
}

impl KinematicSimulator<ChaCha8Rng> {
    /// Creates a simulator with a ChaCha8 stream derived from `seed`.
    pub fn seeded(config: &SimulationConfig, seed: u64) -> Self {
        Self::new(config, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: Rng> KinematicSimulator<R> {
    pub fn new(config: &SimulationConfig, rng: R) -> Self {
        Self {
            speed_scale: config.speed_scale,
            jitter_deg: config.jitter_deg,
            refresh_eta: config.refresh_eta,
            rng,
            ticks: 0,
        }
    }

    /// Number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Computes the next position and heading for one entity.
    pub fn step(&mut self, position: GeoPoint, heading: f64, speed: f64) -> Motion {
        let (dlat, dlng) = displacement(heading, speed, self.speed_scale);
        let jitter = self.jitter();
        Motion {
            position: position.offset(dlat, dlng),
            heading: wrap_heading(heading + jitter + 360.0),
        }
    }

    /// Advances every `Simulated` entity in the registry.
    ///
    /// Entities whose position comes from an external fix are left alone.
    /// Only position, heading, the advisory ETA and `last_updated` change.
    ///
    /// # Returns
    /// Number of entities advanced.
    pub fn tick(&mut self, registry: &mut EntityRegistry) -> usize {
        self.ticks += 1;

        let ids: Vec<EntityId> = registry
            .list()
            .filter(|e| e.source == EntitySource::Simulated)
            .map(|e| e.id.clone())
            .collect();

        let mut advanced = 0;
        for id in &ids {
            let Some(current) = registry.get(id) else {
                continue;
            };
            let motion = self.step(current.position, current.heading, current.speed);
            let eta = self.refresh_eta.then(|| self.roll_eta());

            registry.modify(id, |entity| {
                entity.position = motion.position;
                entity.heading = motion.heading;
                if let Some(eta) = eta {
                    entity.eta = eta;
                }
            });
            advanced += 1;
        }
        advanced
    }

    fn jitter(&mut self) -> f64 {
        if self.jitter_deg > 0.0 {
            self.rng.gen_range(-self.jitter_deg..=self.jitter_deg)
        } else {
            0.0
        }
    }

    fn roll_eta(&mut self) -> String {
        let minutes = ((self.rng.gen::<f64>() * 20.0).floor() as u32).max(1);
        format!("{} min", minutes)
    }
}
