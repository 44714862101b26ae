//! Error types for the confsync core.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the store backends, configuration, templates, and the admin server.

use crate::backend::KeyValueMap;
use std::path::PathBuf;

/// Top-level error type for the confsync core library.
#[derive(Debug, thiserror::Error)]
pub enum ConfsyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a key/value store backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No endpoint accepted a session, or the transport failed mid-call.
    #[error("Connection to {endpoint} failed: {message}")]
    Connection { endpoint: String, message: String },

    /// The store replied with a frame of an unexpected shape.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The requested key holds no value. Also returned when a deletion
    /// affected zero entries.
    #[error("Key not found: {key}")]
    NotFound { key: String },

    /// A prefix scan failed part way through its pagination.
    #[error("Scan of '{pattern}' failed at cursor {cursor}: {source}")]
    Scan {
        pattern: String,
        cursor: u64,
        #[source]
        source: Box<StoreError>,
    },

    /// The store answered the command with an error reply.
    #[error("Store rejected command: {message}")]
    Command { message: String },

    #[error("Invalid endpoint '{address}': {reason}")]
    InvalidEndpoint { address: String, reason: String },
}

impl StoreError {
    /// Whether this error means the session can no longer be trusted.
    pub fn invalidates_session(&self) -> bool {
        match self {
            StoreError::Connection { .. } | StoreError::Protocol { .. } => true,
            StoreError::Scan { source, .. } => source.invalidates_session(),
            _ => false,
        }
    }

    /// Whether this is the "value absent" outcome rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A fetch that aborted part way, carrying whatever was collected before
/// the failure.
#[derive(Debug, thiserror::Error)]
#[error("fetch aborted after {} value(s): {source}", values.len())]
pub struct FetchError {
    pub values: KeyValueMap,
    #[source]
    pub source: StoreError,
}

impl FetchError {
    pub fn new(values: KeyValueMap, source: StoreError) -> Self {
        Self { values, source }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from loading and rendering template resources.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template resource {path} is invalid: {message}")]
    InvalidResource { path: PathBuf, message: String },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Render of {template} failed: {message}")]
    Render { template: String, message: String },

    #[error("Fetching keys for {template} failed: {source}")]
    Fetch {
        template: String,
        #[source]
        source: FetchError,
    },

    #[error("Watch on '{prefix}' failed: {source}")]
    Watch {
        prefix: String,
        #[source]
        source: StoreError,
    },
}

/// A type alias for results using the top-level `ConfsyncError`.
pub type Result<T> = std::result::Result<T, ConfsyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_store() {
        let err = ConfsyncError::Store(StoreError::NotFound {
            key: "/app/db".into(),
        });
        assert_eq!(err.to_string(), "Store error: Key not found: /app/db");
    }

    #[test]
    fn test_error_display_connection() {
        let err = StoreError::Connection {
            endpoint: "127.0.0.1:6379".into(),
            message: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection to 127.0.0.1:6379 failed: connection refused"
        );
    }

    #[test]
    fn test_scan_error_wraps_source() {
        let err = StoreError::Scan {
            pattern: "/app/*".into(),
            cursor: 17,
            source: Box::new(StoreError::Protocol {
                message: "bad cursor".into(),
            }),
        };
        assert_eq!(
            err.to_string(),
            "Scan of '/app/*' failed at cursor 17: Protocol error: bad cursor"
        );
        assert!(err.invalidates_session());
    }

    #[test]
    fn test_invalidates_session() {
        assert!(
            StoreError::Connection {
                endpoint: "x".into(),
                message: "y".into()
            }
            .invalidates_session()
        );
        assert!(!StoreError::NotFound { key: "k".into() }.invalidates_session());
        assert!(
            !StoreError::Command {
                message: "WRONGTYPE".into()
            }
            .invalidates_session()
        );
    }

    #[test]
    fn test_fetch_error_reports_partial_count() {
        let mut values = KeyValueMap::new();
        values.insert("/a".into(), "1".into());
        let err = FetchError::new(
            values,
            StoreError::Protocol {
                message: "eof".into(),
            },
        );
        assert_eq!(
            err.to_string(),
            "fetch aborted after 1 value(s): Protocol error: eof"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConfsyncError = io_err.into();
        assert!(matches!(err, ConfsyncError::Io(_)));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid {
            message: "backend.nodes must not be empty".into(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid configuration: backend.nodes must not be empty"
        );
    }
}
