//! Error types for the FleetView environment abstraction.

use crate::types::MarkerId;
use thiserror::Error;

/// Why a position fix could not be acquired.
///
/// Codes follow platform geolocation: denied, unavailable, timed out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    /// The user or platform refused location access
    #[error("Location permission denied")]
    PermissionDenied,

    /// No positioning capability, or it failed to produce a fix
    #[error("Position unavailable: {0}")]
    Unavailable(String),

    /// No fix within the requested timeout
    #[error("Position timeout after {0}ms")]
    Timeout(u64),
}

impl AcquisitionError {
    /// Creates an unavailable error.
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// Errors raised by a rendering surface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// Container absent or map not yet mounted
    #[error("Render surface not mounted")]
    NotMounted,

    /// Marker handle is not (or no longer) known to the surface
    #[error("Unknown marker: {0}")]
    UnknownMarker(MarkerId),
}
