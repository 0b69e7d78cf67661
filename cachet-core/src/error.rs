//! Error types for cachet operations

use std::time::Duration;
use thiserror::Error;

/// Loader failures.
///
/// Raised when a caller-supplied loader cannot produce a value. On the
/// synchronous `get` path this surfaces to the caller; on refresh paths it
/// is retained internally and reported through events and stats.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    #[error("Load failed for key {key}: {reason}")]
    Failed { key: String, reason: String },

    #[error("Load timed out for key {key} after {elapsed:?}")]
    TimedOut { key: String, elapsed: Duration },
}

/// Backing store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Backing store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Lease acquisition and fencing failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Lease not acquired for {resource}: held by another owner")]
    NotAcquired { resource: String },

    #[error("Lease on {resource} expired (token {token})")]
    Expired { resource: String, token: u64 },

    #[error("Token {token} on {resource} fenced out by newer token {current}")]
    Fenced {
        resource: String,
        token: u64,
        current: u64,
    },

    #[error("Lease on {resource} is no longer held by this owner (token {token})")]
    NotHeld { resource: String, token: u64 },
}

/// Configuration errors. Raised at construction time only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },

    #[error("No tokio runtime available to host background tasks")]
    NoRuntime,
}

/// Remote key-value / pub-sub client failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Malformed payload on {channel}: {reason}")]
    MalformedPayload { channel: String, reason: String },

    #[error("Remote command {command} failed: {reason}")]
    CommandFailed { command: String, reason: String },
}

/// Master error type for all cachet errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Cache is shut down")]
    ShutDown,
}

/// Result type alias for cachet operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_write_failed() {
        let err = StoreError::WriteFailed {
            key: "user:1".to_string(),
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Write failed"));
        assert!(msg.contains("user:1"));
    }

    #[test]
    fn test_lease_error_display_fenced() {
        let err = LeaseError::Fenced {
            resource: "orders".to_string(),
            token: 3,
            current: 5,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("fenced out"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "capacity".to_string(),
            value: "0".to_string(),
            reason: "capacity must be greater than 0".to_string(),
        };
        assert!(format!("{}", err).contains("capacity"));
    }

    #[test]
    fn test_cache_error_from_conversions() {
        let err: CacheError = LoadError::Failed {
            key: "k".to_string(),
            reason: "boom".to_string(),
        }
        .into();
        assert!(matches!(err, CacheError::Load(_)));

        let err: CacheError = ConfigError::NoRuntime.into();
        assert!(matches!(err, CacheError::Config(ConfigError::NoRuntime)));

        let err: CacheError = LeaseError::NotAcquired {
            resource: "r".to_string(),
        }
        .into();
        assert!(format!("{}", err).starts_with("Lease error"));
    }
}
