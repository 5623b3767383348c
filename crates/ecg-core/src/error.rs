//! Error handling for the ECG stream processor
//!
//! One taxonomy covers every stage: ingest failures are recoverable through
//! reconnection, publish failures are dropped, and retry-budget exhaustion
//! or bad configuration end the pipeline.

use thiserror::Error;

/// Result type alias for ECG pipeline operations
pub type EcgResult<T> = Result<T, EcgError>;

/// Longest slice of an offending record kept inside an error
const MAX_RECORD_EXCERPT: usize = 64;

/// Error type for all ECG pipeline operations
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EcgError {
    /// No record arrived within the ingest read timeout
    #[error("Device timeout: no record within {timeout_ms}ms")]
    DeviceTimeout {
        /// Configured read timeout in milliseconds
        timeout_ms: u64,
    },

    /// The underlying transport closed or could not be read
    #[error("Device disconnected: {reason}")]
    DeviceDisconnected {
        /// Description of the transport failure
        reason: String,
    },

    /// A line could not be parsed into three numeric electrode fields
    #[error("Malformed record {record:?}: {reason}")]
    MalformedRecord {
        /// Excerpt of the offending line
        record: String,
        /// Why parsing failed
        reason: String,
    },

    /// A message could not be serialized or handed to the transport
    #[error("Publish failure on topic '{topic}': {reason}")]
    PublishFailure {
        /// Topic the message was destined for
        topic: &'static str,
        /// Description of the failure
        reason: String,
    },

    /// Reconnection gave up after the configured number of attempts
    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted {
        /// Attempts made before giving up
        attempts: u32,
        /// Last failure observed
        last_error: String,
    },

    /// Invalid configuration detected at startup
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the configuration error
        reason: String,
    },
}

impl EcgError {
    /// Build a `MalformedRecord`, truncating long lines
    pub fn malformed(record: &str, reason: impl Into<String>) -> Self {
        let record = match record.char_indices().nth(MAX_RECORD_EXCERPT) {
            Some((idx, _)) => format!("{}...", &record[..idx]),
            None => record.to_string(),
        };
        EcgError::MalformedRecord {
            record,
            reason: reason.into(),
        }
    }

    /// Build a `Config` error
    pub fn config(reason: impl Into<String>) -> Self {
        EcgError::Config {
            reason: reason.into(),
        }
    }

    /// Build a `DeviceDisconnected` error
    pub fn disconnected(reason: impl Into<String>) -> Self {
        EcgError::DeviceDisconnected {
            reason: reason.into(),
        }
    }

    /// Ingest failures that a reconnect can fix
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EcgError::DeviceTimeout { .. } | EcgError::DeviceDisconnected { .. }
        )
    }
}

impl From<std::io::Error> for EcgError {
    fn from(err: std::io::Error) -> Self {
        EcgError::disconnected(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EcgError::RetryBudgetExhausted {
            attempts: 10,
            last_error: "connection refused".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("Retry budget exhausted"));
        assert!(display.contains("10"));
        assert!(display.contains("connection refused"));
    }

    #[test]
    fn test_malformed_excerpt_is_truncated() {
        let line = "x".repeat(500);
        match EcgError::malformed(&line, "not numeric") {
            EcgError::MalformedRecord { record, reason } => {
                assert_eq!(record.len(), MAX_RECORD_EXCERPT + 3);
                assert!(record.ends_with("..."));
                assert_eq!(reason, "not numeric");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_classification() {
        assert!(EcgError::DeviceTimeout { timeout_ms: 5 }.is_recoverable());
        assert!(EcgError::disconnected("eof").is_recoverable());
        assert!(!EcgError::malformed("a,b", "bad").is_recoverable());
        assert!(!EcgError::config("bad rate").is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(EcgError::from(io).is_recoverable());
    }
}
