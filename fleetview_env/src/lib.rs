//! FleetView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the FleetView
//! tracking engine to run against **Production** capabilities (tokio clock,
//! device geolocation, a real map widget) and **Simulation** capabilities
//! (virtual clock, scripted fixes, a recording surface).
//!
//! # Core Concept: Capabilities at the Edges
//!
//! Everything the engine cannot decide by itself is reached through a trait:
//! - Time (`now()`, `sleep()`, `unix_millis()`)
//! - Position acquisition (`watch()`, `cancel()`, `current_fix()`)
//! - Rendering (`create_marker()`, `update_marker()`, `remove_marker()`, `pan_to()`)
//!
//! Periodic work is expressed as [`Cadence`] timers polled against the
//! context clock, so the same engine code is driven by `tokio::time` in
//! production and by a manually advanced clock under test.
//!
//! # Example
//!
//! ```ignore
//! use fleetview_env::{FleetContext, Cadence};
//!
//! async fn drive<Ctx: FleetContext>(ctx: &Ctx) {
//!     let mut tick = Cadence::new(Duration::from_secs(3));
//!     tick.start(ctx.now());
//!     loop {
//!         for _ in 0..tick.poll(ctx.now()) {
//!             advance_fleet();
//!         }
//!         ctx.sleep(Duration::from_millis(250)).await;
//!     }
//! }
//! ```

mod cadence;
mod context;
mod error;
mod position;
mod surface;
mod tokio_impl;
mod types;

pub use cadence::Cadence;
pub use context::{Clock, FleetContext};
pub use error::{AcquisitionError, SurfaceError};
pub use position::{ErrorCallback, FixCallback, NoGeolocation, PositionProvider, WatchOptions};
pub use surface::{CameraMove, ClickHandler, ControlKind, MarkerMeta, RenderSurface};
pub use tokio_impl::TokioContext;
pub use types::{Accuracy, EntityId, Fix, GeoPoint, MarkerId, WatchHandle};
