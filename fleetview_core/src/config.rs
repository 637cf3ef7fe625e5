//! Externally supplied constants for the tracking engine.
//!
//! Every section deserializes with per-field defaults, so a config file only
//! needs to name what it overrides:
//!
//! ```json
//! { "simulation": { "jitter_deg": 0.0 }, "escalation": { "countdown": 10 } }
//! ```

use crate::error::FleetError;
use fleetview_env::GeoPoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Punjab center, used when no fix can be acquired.
pub const DEFAULT_REGION_CENTER: GeoPoint = GeoPoint::new(31.1471, 75.3412);

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Fallback center when acquisition fails
    pub region_center: GeoPoint,

    pub simulation: SimulationConfig,
    pub location: LocationConfig,
    pub camera: CameraConfig,
    pub escalation: EscalationConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            region_center: DEFAULT_REGION_CENTER,
            simulation: SimulationConfig::default(),
            location: LocationConfig::default(),
            camera: CameraConfig::default(),
            escalation: EscalationConfig::default(),
        }
    }
}

impl FleetConfig {
    /// Loads a config from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, FleetError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, FleetError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the algorithms cannot work with.
    pub fn validate(&self) -> Result<(), FleetError> {
        if !(self.simulation.speed_scale > 0.0) {
            return Err(FleetError::config("simulation.speed_scale must be positive"));
        }
        if !(self.simulation.jitter_deg >= 0.0) {
            return Err(FleetError::config("simulation.jitter_deg must be non-negative"));
        }
        if !(self.location.network_offset_deg >= 0.0) {
            return Err(FleetError::config("location.network_offset_deg must be non-negative"));
        }
        if self.location.zone_resolution > 15 {
            return Err(FleetError::config("location.zone_resolution must be in 0..=15"));
        }
        if self.escalation.countdown == 0 {
            return Err(FleetError::config("escalation.countdown must be at least 1"));
        }
        Ok(())
    }
}

/// Kinematic simulation constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Period between simulation ticks (default: 3000ms)
    pub tick_interval_ms: u64,

    /// K: speed units per coordinate degree of displacement (default: 100000)
    pub speed_scale: f64,

    /// J: heading jitter amplitude in degrees (default: 10, i.e. ±10°)
    pub jitter_deg: f64,

    /// Re-roll the advisory ETA every tick (default: true)
    pub refresh_eta: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3_000,
            speed_scale: 100_000.0,
            jitter_deg: 10.0,
            refresh_eta: true,
        }
    }
}

impl SimulationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Position source cadences and network approximation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    /// Typical GPS push interval (default: 3000ms)
    pub gps_interval_ms: u64,

    /// Network poll interval, an order of magnitude coarser (default: 30000ms)
    pub network_interval_ms: u64,

    /// Maximum random offset applied to a zone seed, in degrees (default: 0.01)
    pub network_offset_deg: f64,

    /// H3 resolution of approximation zones (default: 7, ~5 km² cells)
    pub zone_resolution: u8,

    /// Per-fix acquisition timeout (default: 10000ms)
    pub timeout_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            gps_interval_ms: 3_000,
            network_interval_ms: 30_000,
            network_offset_deg: 0.01,
            zone_resolution: 7,
            timeout_ms: 10_000,
        }
    }
}

impl LocationConfig {
    pub fn gps_interval(&self) -> Duration {
        Duration::from_millis(self.gps_interval_ms)
    }

    pub fn network_interval(&self) -> Duration {
        Duration::from_millis(self.network_interval_ms)
    }
}

/// A camera transition template.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPreset {
    pub zoom: f64,
    pub pitch: f64,
    pub duration_ms: u64,
}

/// Camera presets used by the selection controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Flying to a selected bus
    pub focus: CameraPreset,

    /// "My location"
    pub user: CameraPreset,

    /// Re-centering on a followed bus after it moves
    pub follow: CameraPreset,

    /// Keep the camera on the focused bus as it moves
    pub follow_selected: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focus: CameraPreset { zoom: 15.0, pitch: 60.0, duration_ms: 2_000 },
            user: CameraPreset { zoom: 12.0, pitch: 0.0, duration_ms: 2_000 },
            follow: CameraPreset { zoom: 15.0, pitch: 60.0, duration_ms: 500 },
            follow_selected: false,
        }
    }
}

/// Emergency (SOS) countdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Ticks between trigger and dispatch (default: 5)
    pub countdown: u32,

    /// Countdown tick period (default: 1000ms)
    pub tick_interval_ms: u64,

    /// Number the dispatch notifies (default: "100")
    pub emergency_number: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            countdown: 5,
            tick_interval_ms: 1_000,
            emergency_number: "100".to_string(),
        }
    }
}

impl EscalationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FleetConfig::default();
        assert_eq!(config.simulation.speed_scale, 100_000.0);
        assert_eq!(config.simulation.jitter_deg, 10.0);
        assert_eq!(config.escalation.countdown, 5);
        assert_eq!(
            config.location.network_interval_ms,
            config.location.gps_interval_ms * 10
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = FleetConfig::from_json_str(
            r#"{ "simulation": { "jitter_deg": 0.0 }, "escalation": { "countdown": 3 } }"#,
        )
        .unwrap();

        assert_eq!(config.simulation.jitter_deg, 0.0);
        assert_eq!(config.simulation.tick_interval_ms, 3_000);
        assert_eq!(config.escalation.countdown, 3);
        assert_eq!(config.region_center, DEFAULT_REGION_CENTER);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = FleetConfig::from_json_str(r#"{ "simulation": { "speed_scale": 0.0 } }"#);
        assert!(matches!(result, Err(FleetError::Config(_))));

        let result = FleetConfig::from_json_str("not json");
        assert!(matches!(result, Err(FleetError::Serialization(_))));
    }
}
