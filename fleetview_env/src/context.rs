//! Core environment context traits for FleetView.

use async_trait::async_trait;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Read-only access to time.
///
/// Split from [`FleetContext`] so that plain data stores (the entity
/// registry) can stamp writes without becoming generic over the full
/// runtime context. Object safe; usually held as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic time since context creation.
    ///
    /// Used for cadences and countdowns.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for `last_updated` stamps.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as unix milliseconds.
    fn unix_millis(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the fleet runtime can run
/// in both production (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - manually advanced clock, seeded RNG
///
/// # Determinism
///
/// For simulation, all methods that would normally introduce
/// non-determinism (time, randomness) are controlled by the implementation.
#[async_trait]
pub trait FleetContext: Clock + 'static {
    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Returns the context's seed (for logging and RNG derivation).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
