//! Beat detection and heart-rate estimation on Lead II
//!
//! A trailing window of samples gives a moving baseline (window mean) and an
//! adaptive threshold part-way between that baseline and the window peak.
//! Samples above the threshold compete to become the pending R-peak
//! candidate. A candidate is accepted once the signal has fallen away from
//! it, and accepted peaks are spaced by at least the refractory period.
//! Consecutive peaks give inter-beat intervals; the reported rate is a
//! median (or mean) over the most recent ones.

use crate::config::{DetectorConfig, ProcessingConfig, Smoothing};
use ecg_core::{EcgResult, Timestamp};
use std::collections::VecDeque;
use tracing::debug;

/// An accepted heartbeat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Beat {
    /// Instant of the R-peak
    pub timestamp: Timestamp,
    /// Lead II amplitude at the peak
    pub amplitude: f64,
    /// Interval from the previous beat, when it was physiologically plausible
    pub interval_secs: Option<f64>,
}

/// Result of feeding one sample to the detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOutput {
    /// Beat confirmed on this tick, if any
    pub beat: Option<Beat>,
    /// Smoothed rate; `None` until enough intervals have been seen
    pub bpm: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    timestamp: Timestamp,
    value: f64,
}

/// Detector memory for one session
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorState {
    window: VecDeque<f64>,
    capacity: usize,
    pending: Option<Candidate>,
    last_beat: Option<Timestamp>,
    intervals: VecDeque<f64>,
    bpm: Option<f64>,
    beats: u64,
}

impl DetectorState {
    fn new(capacity: usize, rr_history: usize) -> Self {
        DetectorState {
            window: VecDeque::with_capacity(capacity),
            capacity,
            pending: None,
            last_beat: None,
            intervals: VecDeque::with_capacity(rr_history),
            bpm: None,
            beats: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    /// Accepted beats in this session
    pub fn beats(&self) -> u64 {
        self.beats
    }

    /// Instant of the most recent accepted beat
    pub fn last_beat(&self) -> Option<Timestamp> {
        self.last_beat
    }

    /// Current smoothed rate
    pub fn bpm(&self) -> Option<f64> {
        self.bpm
    }

    /// Recent inter-beat intervals in seconds, oldest first
    pub fn intervals(&self) -> impl Iterator<Item = f64> + '_ {
        self.intervals.iter().copied()
    }

    /// Samples currently held in the trailing window
    pub fn buffered(&self) -> usize {
        self.window.len()
    }
}

/// Stateless detector logic; all memory lives in [`DetectorState`]
#[derive(Debug, Clone)]
pub struct BeatDetector {
    config: DetectorConfig,
    window_samples: usize,
    warmup_samples: usize,
}

impl BeatDetector {
    pub fn new(config: &ProcessingConfig) -> EcgResult<Self> {
        config.detector.validate(config.sample_rate)?;
        Ok(BeatDetector {
            config: config.detector.clone(),
            window_samples: config.detector.window_samples(config.sample_rate),
            warmup_samples: config.detector.warmup_samples(config.sample_rate),
        })
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Fresh per-session state
    pub fn new_state(&self) -> DetectorState {
        DetectorState::new(self.window_samples, self.config.rr_history)
    }

    /// Feed one Lead II sample
    pub fn update(&self, state: &mut DetectorState, timestamp: Timestamp, value: f64) -> DetectorOutput {
        if !value.is_finite() {
            return DetectorOutput { beat: None, bpm: state.bpm };
        }
        state.push(value);

        if state.window.len() < self.warmup_samples {
            return DetectorOutput { beat: None, bpm: state.bpm };
        }

        let (baseline, peak) = window_stats(&state.window);
        let swing = peak - baseline;
        if swing < self.config.min_amplitude {
            // Flat signal, nothing to detect
            state.pending = None;
            return DetectorOutput { beat: None, bpm: state.bpm };
        }
        let threshold = baseline + self.config.threshold_ratio * swing;

        let mut beat = None;
        if let Some(candidate) = state.pending {
            let falling = value < candidate.value;
            let settled = value <= threshold
                || timestamp.seconds_since(candidate.timestamp) >= self.config.peak_confirm_secs();
            if falling && settled {
                state.pending = None;
                beat = Some(self.accept(state, candidate));
            }
        }

        if value > threshold && !self.in_refractory(state, timestamp) {
            let replace = state.pending.map_or(true, |c| value > c.value);
            if replace {
                state.pending = Some(Candidate { timestamp, value });
            }
        }

        DetectorOutput { beat, bpm: state.bpm }
    }

    fn in_refractory(&self, state: &DetectorState, timestamp: Timestamp) -> bool {
        state
            .last_beat
            .map_or(false, |last| timestamp.seconds_since(last) < self.config.refractory_secs())
    }

    fn accept(&self, state: &mut DetectorState, candidate: Candidate) -> Beat {
        let interval = state
            .last_beat
            .map(|last| candidate.timestamp.seconds_since(last))
            .filter(|rr| *rr >= self.config.refractory_secs() && *rr <= self.config.max_rr_secs);

        if let Some(rr) = interval {
            if state.intervals.len() == self.config.rr_history {
                state.intervals.pop_front();
            }
            state.intervals.push_back(rr);
        }

        state.last_beat = Some(candidate.timestamp);
        state.beats += 1;

        if state.intervals.len() >= self.config.min_intervals {
            let smoothed = smooth(&state.intervals, self.config.smoothing);
            state.bpm = Some(60.0 / smoothed);
        }

        debug!(
            at = %candidate.timestamp,
            amplitude = candidate.value,
            interval_secs = ?interval,
            bpm = ?state.bpm,
            "beat accepted"
        );

        Beat {
            timestamp: candidate.timestamp,
            amplitude: candidate.value,
            interval_secs: interval,
        }
    }
}

/// Mean and maximum of the window
fn window_stats(window: &VecDeque<f64>) -> (f64, f64) {
    let mut sum = 0.0;
    let mut peak = f64::NEG_INFINITY;
    for &v in window {
        sum += v;
        peak = peak.max(v);
    }
    (sum / window.len() as f64, peak)
}

fn smooth(intervals: &VecDeque<f64>, smoothing: Smoothing) -> f64 {
    match smoothing {
        Smoothing::Mean => intervals.iter().sum::<f64>() / intervals.len() as f64,
        Smoothing::Median => {
            let mut sorted: Vec<f64> = intervals.iter().copied().collect();
            sorted.sort_by(|a, b| a.total_cmp(b));
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
    }
}
