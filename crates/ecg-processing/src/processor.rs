//! Per-tick signal chain: filter → derive → detect
//!
//! [`SignalChain`] holds everything designed at startup and never changes.
//! [`SessionState`] holds everything that evolves sample to sample; it is
//! owned by the caller's tick loop and replaced wholesale when a new
//! transport session begins.

use crate::config::ProcessingConfig;
use crate::detector::{BeatDetector, DetectorOutput, DetectorState};
use crate::filters::{FilterState, InterferenceFilter};
use crate::leads::derive_leads;
use ecg_core::{DerivedLeads, EcgResult, FilteredSample, RawSample, SessionId};
use std::time::{Duration, Instant};

/// Mutable state of one transport session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub filter: FilterState,
    pub detector: DetectorState,
}

/// Everything one tick produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub filtered: FilteredSample,
    pub leads: DerivedLeads,
    pub detection: DetectorOutput,
    /// Wall time spent in the chain
    pub elapsed: Duration,
}

impl TickOutput {
    pub fn bpm(&self) -> Option<f64> {
        self.detection.bpm
    }
}

/// Immutable processing chain designed from the configuration
#[derive(Debug, Clone)]
pub struct SignalChain {
    filter: InterferenceFilter,
    detector: BeatDetector,
    sample_period: Duration,
}

impl SignalChain {
    pub fn new(config: &ProcessingConfig) -> EcgResult<Self> {
        config.validate()?;
        Ok(SignalChain {
            filter: InterferenceFilter::new(config)?,
            detector: BeatDetector::new(config)?,
            sample_period: Duration::from_secs_f64(1.0 / config.sample_rate),
        })
    }

    pub fn filter(&self) -> &InterferenceFilter {
        &self.filter
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    /// Time budget of one tick at the nominal sample rate
    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// State for a brand-new session
    pub fn new_session(&self) -> SessionState {
        SessionState {
            id: SessionId::new(),
            filter: self.filter.new_state(),
            detector: self.detector.new_state(),
        }
    }

    /// Run one sample through the whole chain
    pub fn process(&self, session: &mut SessionState, raw: &RawSample) -> TickOutput {
        let start = Instant::now();

        let filtered = self.filter.apply(&mut session.filter, raw);
        let leads = derive_leads(&filtered);
        let detection = self.detector.update(&mut session.detector, leads.timestamp, leads.ii);

        TickOutput {
            filtered,
            leads,
            detection,
            elapsed: start.elapsed(),
        }
    }
}
