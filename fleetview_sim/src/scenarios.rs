//! Deterministic end-to-end scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Four simulated buses wander; the map mirrors the registry every period
    SteadyFleet,

    /// A driver goes on shift, publishes GPS fixes, then ends the shift
    DriverShift,

    /// Repeated GPS ↔ network switching never leaks a watch
    SourceSwitch,

    /// The map is torn down mid-run and rebuilt from scratch
    SurfaceRemount,

    /// SOS raised and cancelled before the countdown ends
    SosCancel,

    /// SOS raised and left to run out
    SosDispatch,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::SteadyFleet,
            ScenarioId::DriverShift,
            ScenarioId::SourceSwitch,
            ScenarioId::SurfaceRemount,
            ScenarioId::SosCancel,
            ScenarioId::SosDispatch,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFleet => "steady_fleet",
            ScenarioId::DriverShift => "driver_shift",
            ScenarioId::SourceSwitch => "source_switch",
            ScenarioId::SurfaceRemount => "surface_remount",
            ScenarioId::SosCancel => "sos_cancel",
            ScenarioId::SosDispatch => "sos_dispatch",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::SteadyFleet => "4 buses random-walk; marker count and headings stay valid",
            ScenarioId::DriverShift => "Driver GPS fixes move their bus; end of shift releases everything",
            ScenarioId::SourceSwitch => "GPS/network toggling keeps at most one live acquisition",
            ScenarioId::SurfaceRemount => "Unmount defers sync; remount rebuilds every marker",
            ScenarioId::SosCancel => "Cancel at 2s left; nothing is dispatched",
            ScenarioId::SosDispatch => "Countdown 5→0 dispatches once and returns to idle",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady_fleet" | "steadyfleet" | "fleet" => Ok(ScenarioId::SteadyFleet),
            "driver_shift" | "drivershift" | "driver" => Ok(ScenarioId::DriverShift),
            "source_switch" | "sourceswitch" | "switch" => Ok(ScenarioId::SourceSwitch),
            "surface_remount" | "surfaceremount" | "remount" => Ok(ScenarioId::SurfaceRemount),
            "sos_cancel" | "soscancel" => Ok(ScenarioId::SosCancel),
            "sos_dispatch" | "sosdispatch" | "sos" => Ok(ScenarioId::SosDispatch),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_parse_back() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>(), Ok(scenario));
        }
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }
}
