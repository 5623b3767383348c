//! Per-tick sample types: electrode triples and the six derived leads

use crate::timestamp::Timestamp;
use core::fmt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Electrode voltages captured off the device, stamped on arrival
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: Timestamp,
    pub ra: f64,
    pub la: f64,
    pub ll: f64,
}

impl RawSample {
    pub fn new(timestamp: Timestamp, ra: f64, la: f64, ll: f64) -> Self {
        Self { timestamp, ra, la, ll }
    }

    /// Voltages in channel order (RA, LA, LL)
    pub fn channels(&self) -> [f64; 3] {
        [self.ra, self.la, self.ll]
    }
}

/// Body of one inbound device line, before it is stamped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElectrodeRecord {
    #[serde(rename = "RA")]
    pub ra: f64,
    #[serde(rename = "LA")]
    pub la: f64,
    #[serde(rename = "LL")]
    pub ll: f64,
}

impl ElectrodeRecord {
    pub fn from_channels(channels: [f64; 3]) -> Self {
        let [ra, la, ll] = channels;
        Self { ra, la, ll }
    }

    pub fn channels(&self) -> [f64; 3] {
        [self.ra, self.la, self.ll]
    }

    /// Attach the capture instant
    pub fn stamp(self, timestamp: Timestamp) -> RawSample {
        RawSample::new(timestamp, self.ra, self.la, self.ll)
    }
}

/// Electrode voltages after interference filtering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilteredSample {
    pub timestamp: Timestamp,
    pub ra: f64,
    pub la: f64,
    pub ll: f64,
}

impl FilteredSample {
    /// Build from channel-ordered voltages (RA, LA, LL)
    pub fn from_channels(timestamp: Timestamp, channels: [f64; 3]) -> Self {
        let [ra, la, ll] = channels;
        Self { timestamp, ra, la, ll }
    }

    pub fn channels(&self) -> [f64; 3] {
        [self.ra, self.la, self.ll]
    }
}

/// The six standard limb leads (Einthoven + Goldberger)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedLeads {
    pub timestamp: Timestamp,
    pub i: f64,
    pub ii: f64,
    pub iii: f64,
    pub avr: f64,
    pub avl: f64,
    pub avf: f64,
}

/// Identifier of one transport session (connect until disconnect)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_electrode_labels() {
        let record: ElectrodeRecord =
            serde_json::from_str(r#"{"RA": 0.40, "LA": 0.55, "LL": 0.50}"#).unwrap();
        assert_eq!(record.channels(), [0.40, 0.55, 0.50]);

        let raw = record.stamp(Timestamp::from_millis(20));
        assert_eq!(raw.timestamp, Timestamp::from_millis(20));
        assert_eq!(raw.ll, 0.50);
    }

    #[test]
    fn test_channel_round_trip() {
        let ts = Timestamp::from_millis(10);
        let raw = RawSample::new(ts, 0.40, 0.55, 0.50);
        let filtered = FilteredSample::from_channels(ts, raw.channels());
        assert_eq!(filtered.channels(), [0.40, 0.55, 0.50]);
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
