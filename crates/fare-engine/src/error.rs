//! Fare engine error types.

use thiserror::Error;

/// Fare engine error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FareError {
    #[error("invalid vehicle id: {0}")]
    InvalidVehicleId(String),

    #[error("malformed pricing response: {0}")]
    MalformedResponse(String),

    #[error("fare request cancelled")]
    Cancelled,

    #[error("stale fare response discarded (generation {generation})")]
    StaleGenerationDiscarded { generation: u64 },

    #[error("checksum mismatch for {key}")]
    ChecksumMismatch { key: String },

    #[error("fare {total} outside expected range {min}..={max}")]
    OutOfBounds { total: f64, min: f64, max: f64 },

    #[error("pricing provider error: {0}")]
    Provider(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("no pricing providers configured")]
    NoProviders,

    #[error("configuration error: {0}")]
    Config(String),
}

impl FareError {
    /// Errors that must reach the caller instead of being absorbed into a
    /// best-effort fare.
    #[must_use]
    pub fn is_caller_facing(&self) -> bool {
        matches!(self, Self::InvalidVehicleId(_) | Self::MalformedResponse(_))
    }
}

impl From<serde_json::Error> for FareError {
    fn from(error: serde_json::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Fare engine result type.
pub type Result<T> = std::result::Result<T, FareError>;
