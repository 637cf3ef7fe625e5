//! FleetView Deterministic Simulation Harness
//!
//! Runs the whole tracking engine against a virtual clock, a scripted
//! device and an in-memory map so that every run is reproducible from a
//! single 64-bit seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: a virtual clock that only moves when the harness steps it
//! - **Device**: GPS fixes sampled from a known truth track with seeded noise
//! - **Map**: a recording surface whose clicks and remounts are scripted
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        SimWorld                           │
//! │  ┌──────────────┐   ┌───────────────────────────────┐     │
//! │  │  SimContext  │──►│          FleetRuntime         │     │
//! │  │ (virtual t)  │   │ registry · simulator · sync   │     │
//! │  └──────────────┘   │ location · selection · SOS    │     │
//! │                     └──────┬─────────────────┬──────┘     │
//! │                            │                 │            │
//! │               ┌────────────▼───┐   ┌─────────▼────────┐   │
//! │               │ SimPosition    │   │ RecordingSurface │   │
//! │               │ Provider       │   │ (markers/camera) │   │
//! │               └────────────────┘   └──────────────────┘   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use fleetview_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::DriverShift);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod provider;
mod runner;
mod surface;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{EntityFrame, SimEvent, SimExport, SimFrame};
pub use provider::{DeviceTrack, SimPositionProvider};
pub use runner::{ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use surface::{RecordingSurface, RenderedMarker, SurfaceEvent};
pub use world::{punjab_fleet, SimConfig, SimRuntime, SimWorld, WorldMetrics};
