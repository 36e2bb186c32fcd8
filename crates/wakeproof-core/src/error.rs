//! Core error types for wakeproof-core.
//!
//! Location acquisition failures, storage failures and penalty delivery
//! failures are kept in separate enums so a caller can never mistake one for
//! another. In particular a [`LocationError`] is never turned into a failed
//! commitment outcome.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for wakeproof-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Location acquisition errors
    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Penalty trigger errors
    #[error("Penalty error: {0}")]
    Penalty(#[from] PenaltyError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Normalized failure modes of the platform location source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    /// The user or OS refused location access.
    #[error("location permission denied")]
    PermissionDenied,

    /// The platform could not determine a position.
    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    /// No fix arrived within the per-attempt timeout.
    #[error("location request timed out")]
    Timeout,

    /// The platform has no location capability.
    #[error("location is not supported on this platform")]
    Unsupported,

    /// Anything the platform reported that fits none of the above.
    #[error("unknown location error: {0}")]
    Unknown(String),
}

impl LocationError {
    /// Errors worth another attempt within the retry budget.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LocationError::Timeout
                | LocationError::PositionUnavailable(_)
                | LocationError::Unknown(_)
        )
    }

    /// Errors that retrying cannot fix; surfaced immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LocationError::PermissionDenied | LocationError::Unsupported
        )
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => "permission_denied",
            LocationError::PositionUnavailable(_) => "position_unavailable",
            LocationError::Timeout => "timeout",
            LocationError::Unsupported => "unsupported",
            LocationError::Unknown(_) => "unknown",
        }
    }
}

impl From<tokio::time::error::Elapsed> for LocationError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        LocationError::Timeout
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// No commitment with this id
    #[error("Commitment not found: {0}")]
    NotFound(String),

    /// A terminal outcome was already written for this commitment
    #[error("Commitment {0} already has a terminal outcome")]
    AlreadyResolved(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid time range
    #[error("Invalid time range: deadline ({end}) must be later than start_time ({start})")]
    InvalidTimeRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    /// Coordinate outside the WGS84 range
    #[error("Invalid coordinate: ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Penalty trigger delivery errors.
#[derive(Error, Debug)]
pub enum PenaltyError {
    /// HTTP transport failed
    #[error("Penalty webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The receiver answered with a non-success status
    #[error("Penalty webhook rejected notice with status {status}")]
    Rejected { status: u16 },

    /// Webhook URL could not be parsed
    #[error("Invalid penalty webhook URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

// Helper implementations for converting from other error types

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::InvalidValue {
            key: "<file>".into(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_fatal_are_disjoint() {
        let all = [
            LocationError::PermissionDenied,
            LocationError::PositionUnavailable("no signal".into()),
            LocationError::Timeout,
            LocationError::Unsupported,
            LocationError::Unknown("?".into()),
        ];
        for err in all {
            assert_ne!(err.is_transient(), err.is_fatal(), "{err:?}");
        }
    }

    #[test]
    fn location_error_wraps_into_core_error() {
        let err: CoreError = LocationError::Timeout.into();
        assert!(matches!(err, CoreError::Location(LocationError::Timeout)));
        assert_eq!(err.to_string(), "Location error: location request timed out");
    }
}
