//! Outbound messages and their per-topic wire payloads
//!
//! Payload field names match what display and persistence consumers already
//! read: `RA`/`LA`/`LL` on `raw`, a `leads` map plus optional `bpm` on
//! `filtered`, and timestamps as fractional Unix seconds.

use crate::sample::{DerivedLeads, RawSample};
use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Named channel of the publish/subscribe transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    /// Pre-filter electrode voltages
    Raw,
    /// Derived leads plus heart rate
    Filtered,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Raw, Topic::Filtered];

    pub const fn as_str(self) -> &'static str {
        match self {
            Topic::Raw => "raw",
            Topic::Filtered => "filtered",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "raw" => Ok(Topic::Raw),
            "filtered" => Ok(Topic::Filtered),
            other => Err(format!("unknown topic '{other}'")),
        }
    }
}

/// A message produced by one pipeline tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutboundMessage {
    Raw(RawSample),
    Filtered {
        leads: DerivedLeads,
        bpm: Option<f64>,
    },
}

impl OutboundMessage {
    pub fn topic(&self) -> Topic {
        match self {
            OutboundMessage::Raw(_) => Topic::Raw,
            OutboundMessage::Filtered { .. } => Topic::Filtered,
        }
    }
}

/// Wire payload of the `raw` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub timestamp: f64,
    #[serde(rename = "RA")]
    pub ra: f64,
    #[serde(rename = "LA")]
    pub la: f64,
    #[serde(rename = "LL")]
    pub ll: f64,
}

impl From<&RawSample> for RawPayload {
    fn from(sample: &RawSample) -> Self {
        RawPayload {
            timestamp: sample.timestamp.as_secs_f64(),
            ra: sample.ra,
            la: sample.la,
            ll: sample.ll,
        }
    }
}

/// Lead voltages inside a `filtered` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadsPayload {
    #[serde(rename = "I")]
    pub i: f64,
    #[serde(rename = "II")]
    pub ii: f64,
    #[serde(rename = "III")]
    pub iii: f64,
    #[serde(rename = "aVR")]
    pub avr: f64,
    #[serde(rename = "aVL")]
    pub avl: f64,
    #[serde(rename = "aVF")]
    pub avf: f64,
}

/// Wire payload of the `filtered` topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilteredPayload {
    pub timestamp: f64,
    pub leads: LeadsPayload,
    /// Absent until the rate estimator has enough beats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
}

impl FilteredPayload {
    pub fn new(leads: &DerivedLeads, bpm: Option<f64>) -> Self {
        FilteredPayload {
            timestamp: leads.timestamp.as_secs_f64(),
            leads: LeadsPayload {
                i: leads.i,
                ii: leads.ii,
                iii: leads.iii,
                avr: leads.avr,
                avl: leads.avl,
                avf: leads.avf,
            },
            bpm,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::Timestamp;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::Raw.as_str(), "raw");
        assert_eq!("filtered".parse::<Topic>().unwrap(), Topic::Filtered);
        assert!("ecg".parse::<Topic>().is_err());
    }

    #[test]
    fn test_message_topics() {
        let ts = Timestamp::from_millis(0);
        let raw = RawSample::new(ts, 0.1, 0.2, 0.3);
        assert_eq!(OutboundMessage::Raw(raw).topic(), Topic::Raw);

        let leads = DerivedLeads {
            timestamp: ts,
            i: 0.0,
            ii: 0.0,
            iii: 0.0,
            avr: 0.0,
            avl: 0.0,
            avf: 0.0,
        };
        let msg = OutboundMessage::Filtered { leads, bpm: None };
        assert_eq!(msg.topic(), Topic::Filtered);
    }

    #[test]
    fn test_filtered_payload_omits_absent_bpm() {
        let leads = DerivedLeads {
            timestamp: Timestamp::from_millis(2_500),
            i: 0.15,
            ii: 0.10,
            iii: -0.05,
            avr: -0.125,
            avl: 0.1,
            avf: 0.025,
        };
        let json = serde_json::to_string(&FilteredPayload::new(&leads, None)).unwrap();
        assert!(!json.contains("bpm"));
        assert!(json.contains("aVR"));

        let with_rate = FilteredPayload::new(&leads, Some(72.0));
        assert_eq!(with_rate.bpm, Some(72.0));
        assert_eq!(with_rate.timestamp, 2.5);
    }
}
