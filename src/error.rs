//! Error types for the tiered cache

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the cache hierarchy
///
/// Backend-level errors never reach callers of [`crate::cache::CacheManager`]:
/// the guarded tier wrapper logs them and turns them into a miss or a failed
/// write. They are surfaced only by backends used directly and by health probes.
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Backend could not be reached or refused the operation
    #[error("Backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// Backend operation exceeded the configured deadline
    #[error("Timed out during {op} on tier {tier}")]
    Timeout { tier: String, op: String },

    /// Value or record could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Write rejected by the write policy
    #[error("Write policy rejected key {key}: {reason}")]
    PolicyViolation { key: String, reason: String },

    /// Embedding function failed
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used for metrics and log fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connectivity or transport failure, including timeouts
    BackendUnavailable,
    /// Encoding/decoding failure
    Serialization,
    /// Write rejected by policy
    PolicyViolation,
    /// Invalid configuration
    Config,
    /// Anything else
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::BackendUnavailable => write!(f, "backend_unavailable"),
            ErrorKind::Serialization => write!(f, "serialization"),
            ErrorKind::PolicyViolation => write!(f, "policy_violation"),
            ErrorKind::Config => write!(f, "config"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

impl Error {
    /// Shorthand for a backend connectivity failure
    pub fn unavailable(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BackendUnavailable {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BackendUnavailable { .. } | Error::Timeout { .. } | Error::Io(_) => {
                ErrorKind::BackendUnavailable
            }
            Error::Sqlite(e) => match e {
                rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..)
                | rusqlite::Error::ToSqlConversionFailure(_) => ErrorKind::Serialization,
                _ => ErrorKind::BackendUnavailable,
            },
            Error::Serialization(_) | Error::Json(_) | Error::Yaml(_) => ErrorKind::Serialization,
            Error::PolicyViolation { .. } => ErrorKind::PolicyViolation,
            Error::Config(_) => ErrorKind::Config,
            Error::Embedding(_) => ErrorKind::BackendUnavailable,
            Error::Metrics(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(
            Error::unavailable("sqlite", "disk gone").kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            Error::Timeout {
                tier: "L4".into(),
                op: "get".into()
            }
            .kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(
            Error::Serialization("bad tags".into()).kind(),
            ErrorKind::Serialization
        );
        assert_eq!(
            Error::PolicyViolation {
                key: "temp_1".into(),
                reason: "excluded prefix".into()
            }
            .kind(),
            ErrorKind::PolicyViolation
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::unavailable("redis-0", "connection refused");
        assert_eq!(
            err.to_string(),
            "Backend redis-0 unavailable: connection refused"
        );
        assert_eq!(ErrorKind::PolicyViolation.to_string(), "policy_violation");
    }
}
