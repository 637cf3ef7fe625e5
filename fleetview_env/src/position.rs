//! Position acquisition abstraction, modeled on platform geolocation.

use crate::error::AcquisitionError;
use crate::types::{Fix, WatchHandle};

/// Invoked for every fix delivered by a watch.
pub type FixCallback = Box<dyn FnMut(Fix) + Send>;

/// Invoked when a watch reports an acquisition failure.
pub type ErrorCallback = Box<dyn FnMut(AcquisitionError) + Send>;

/// Options passed to a position request.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchOptions {
    /// Ask for satellite-grade accuracy
    pub high_accuracy: bool,

    /// Give up on a single fix after this long
    pub timeout_ms: u64,

    /// Accept cached fixes no older than this (0 = always fresh)
    pub maximum_age_ms: u64,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: 10_000,
            maximum_age_ms: 0,
        }
    }
}

/// A source of raw position fixes.
///
/// # Implementations
///
/// - **Production**: a device geolocation bridge, or [`NoGeolocation`] on
///   hosts without positioning hardware
/// - **Simulation**: `SimPositionProvider` with scripted fixes and faults
///
/// # Cancellation
///
/// After `cancel(handle)` returns, the provider must have dropped the
/// callbacks registered for `handle`; no further invocation is allowed.
pub trait PositionProvider: Send {
    /// Starts a continuous watch.
    ///
    /// # Returns
    /// * `Ok(handle)` - The watch is live; fixes arrive through `on_fix`
    /// * `Err(_)` - The capability is missing; no watch was created
    fn watch(
        &mut self,
        options: &WatchOptions,
        on_fix: FixCallback,
        on_error: ErrorCallback,
    ) -> Result<WatchHandle, AcquisitionError>;

    /// Cancels a watch. Unknown handles are ignored.
    fn cancel(&mut self, handle: WatchHandle);

    /// One-shot acquisition of the current position.
    fn current_fix(&mut self, options: &WatchOptions) -> Result<Fix, AcquisitionError>;
}

/// Provider for hosts that have no positioning capability at all.
///
/// Every request fails with [`AcquisitionError::Unavailable`], which drives
/// the location source into its fallback-coordinate mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeolocation;

impl PositionProvider for NoGeolocation {
    fn watch(
        &mut self,
        _options: &WatchOptions,
        _on_fix: FixCallback,
        _on_error: ErrorCallback,
    ) -> Result<WatchHandle, AcquisitionError> {
        Err(AcquisitionError::unavailable("geolocation is not supported on this host"))
    }

    fn cancel(&mut self, _handle: WatchHandle) {}

    fn current_fix(&mut self, _options: &WatchOptions) -> Result<Fix, AcquisitionError> {
        Err(AcquisitionError::unavailable("geolocation is not supported on this host"))
    }
}
