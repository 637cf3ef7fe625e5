//! Error types for the tracking engine.

use thiserror::Error;

/// Errors surfaced by fallible engine boundaries (config, storage, zones).
///
/// None of these are fatal: callers fall back to defaults and keep tracking.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

impl FleetError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }
}

/// The emergency dispatch boundary call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Dispatch failed: {0}")]
pub struct DispatchError(pub String);
