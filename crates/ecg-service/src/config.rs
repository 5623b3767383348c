//! Service configuration
//!
//! One JSON document with a section per component. Every field has a
//! default, so a partial file (or none at all) is a valid configuration.

use ecg_core::{EcgError, EcgResult};
use ecg_processing::ProcessingConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Signal chain
    pub processing: ProcessingConfig,
    /// Device transport and reconnect policy
    pub ingest: IngestConfig,
    /// Outbound fan-out
    pub publisher: PublisherConfig,
}

/// Device transport and reconnect policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// `tcp://host:port` or a device path
    pub endpoint: String,
    /// Longest wait for one line before the device is considered silent
    pub read_timeout_ms: u64,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on the reconnect delay
    pub max_backoff_ms: u64,
    /// Malformed lines in a row tolerated before reconnecting
    pub max_consecutive_malformed: u32,
}

/// Outbound fan-out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// TCP address subscribers connect to
    pub listen_address: String,
    /// Frames buffered per subscriber before the oldest are dropped
    pub channel_capacity: usize,
    /// Longest a single subscriber write may take
    pub write_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            endpoint: "dev/device".to_string(),
            read_timeout_ms: 1000,
            max_reconnect_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            max_consecutive_malformed: 50,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:9999".to_string(),
            channel_capacity: 1024,
            write_timeout_ms: 500,
        }
    }
}

impl IngestConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let delay = self.initial_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }

    pub fn validate(&self) -> EcgResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(EcgError::config("ingest endpoint cannot be empty"));
        }
        if self.read_timeout_ms == 0 {
            return Err(EcgError::config("read timeout must be greater than 0"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(EcgError::config("need at least one reconnect attempt"));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(EcgError::config("initial backoff exceeds maximum backoff"));
        }
        Ok(())
    }
}

impl PublisherConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> EcgResult<()> {
        if self.channel_capacity == 0 {
            return Err(EcgError::config("publisher capacity must be greater than 0"));
        }
        if self.write_timeout_ms == 0 {
            return Err(EcgError::config("write timeout must be greater than 0"));
        }
        Ok(())
    }
}

impl ServiceConfig {
    /// Validate every section
    pub fn validate(&self) -> EcgResult<()> {
        self.processing.validate()?;
        self.ingest.validate()?;
        self.publisher.validate()
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> EcgResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EcgError::config(format!("cannot serialize configuration: {e}")))
    }

    /// Deserialize configuration from JSON
    pub fn from_json(json: &str) -> EcgResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EcgError::config(format!("invalid configuration: {e}")))
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> EcgResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            EcgError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_json(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.publisher.listen_address, "0.0.0.0:9999");
        assert_eq!(config.ingest.max_reconnect_attempts, 10);
        assert_eq!(config.ingest.max_consecutive_malformed, 50);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let ingest = IngestConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            ..IngestConfig::default()
        };
        let delays: Vec<u64> = (1..=6).map(|n| ingest.backoff(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(ingest.backoff(200), Duration::from_millis(1000));
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = ServiceConfig::default();
        config.ingest.endpoint = "tcp://127.0.0.1:7000".to_string();
        config.processing.filter.mains_hz = 50.0;

        let json = config.to_json().unwrap();
        assert_eq!(ServiceConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json() {
        let config = ServiceConfig::from_json(r#"{"ingest": {"read_timeout_ms": 250}}"#).unwrap();
        assert_eq!(config.ingest.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.ingest.endpoint, "dev/device");
        assert_eq!(config.processing, ProcessingConfig::default());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ServiceConfig::default();
        config.ingest.initial_backoff_ms = 10_000;
        assert!(matches!(config.validate(), Err(EcgError::Config { .. })));

        let mut config = ServiceConfig::default();
        config.publisher.channel_capacity = 0;
        assert!(config.validate().is_err());

        assert!(ServiceConfig::from_json("{not json").is_err());
    }
}
