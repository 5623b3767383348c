//! Configuration for the signal chain
//!
//! Everything here is fixed when the pipeline starts. Filter cutoffs, the
//! refractory period and the smoothing window are tunables rather than
//! clinical constants, so each has a default and can be overridden.

use ecg_core::{EcgError, EcgResult};
use serde::{Deserialize, Serialize};

/// Signal chain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Nominal device sampling rate (Hz)
    pub sample_rate: f64,
    /// Interference filter parameters
    pub filter: FilterConfig,
    /// Beat detector parameters
    pub detector: DetectorConfig,
}

/// Interference filter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// High-pass cutoff removing baseline wander and DC offset (Hz)
    pub highpass_hz: f64,
    /// Low-pass cutoff removing EMG noise (Hz)
    pub lowpass_hz: f64,
    /// Local mains frequency, typically 50 or 60 (Hz)
    pub mains_hz: f64,
    /// Notch quality factor
    pub notch_q: f64,
    /// Inputs are clamped to +/- this voltage
    pub input_limit: f64,
}

/// Rate smoothing statistic over recent inter-beat intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    Median,
    Mean,
}

/// Beat detector and rate estimator parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Trailing window used for baseline and threshold (s)
    pub window_secs: f64,
    /// Data needed in the window before any detection (s)
    pub warmup_secs: f64,
    /// Minimum time between accepted beats (ms)
    pub refractory_ms: u64,
    /// Time after a candidate peak before it is confirmed (ms)
    pub peak_confirm_ms: u64,
    /// Threshold position between baseline (0.0) and window peak (1.0)
    pub threshold_ratio: f64,
    /// Peak-to-baseline swing below which the window is treated as flat
    pub min_amplitude: f64,
    /// Longest inter-beat interval still counted (s)
    pub max_rr_secs: f64,
    /// Number of recent intervals kept for smoothing
    pub rr_history: usize,
    /// Intervals required before a rate is reported
    pub min_intervals: usize,
    /// Smoothing statistic
    pub smoothing: Smoothing,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 100.0,
            filter: FilterConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            highpass_hz: 0.5,
            lowpass_hz: 40.0,
            mains_hz: 60.0,
            notch_q: 30.0,
            input_limit: 10.0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_secs: 3.0,
            warmup_secs: 1.0,
            refractory_ms: 300,
            peak_confirm_ms: 60,
            threshold_ratio: 0.5,
            min_amplitude: 0.05,
            max_rr_secs: 2.0,
            rr_history: 8,
            min_intervals: 1,
            smoothing: Smoothing::Median,
        }
    }
}

impl ProcessingConfig {
    /// Same chain for a different mains frequency
    pub fn with_mains(mut self, mains_hz: f64) -> Self {
        self.filter.mains_hz = mains_hz;
        self
    }

    /// Nyquist frequency for the configured sample rate
    pub fn nyquist(&self) -> f64 {
        self.sample_rate / 2.0
    }

    /// Validate entire configuration
    pub fn validate(&self) -> EcgResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(EcgError::config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        self.filter.validate(self.sample_rate)?;
        self.detector.validate(self.sample_rate)
    }
}

impl FilterConfig {
    pub fn validate(&self, sample_rate: f64) -> EcgResult<()> {
        let nyquist = sample_rate / 2.0;

        if !(self.highpass_hz > 0.0 && self.highpass_hz < nyquist) {
            return Err(EcgError::config(format!(
                "high-pass cutoff {}Hz must lie in (0, {}Hz)",
                self.highpass_hz, nyquist
            )));
        }
        if !(self.lowpass_hz > 0.0 && self.lowpass_hz < nyquist) {
            return Err(EcgError::config(format!(
                "low-pass cutoff {}Hz must lie in (0, {}Hz)",
                self.lowpass_hz, nyquist
            )));
        }
        if self.highpass_hz >= self.lowpass_hz {
            return Err(EcgError::config(
                "high-pass cutoff must be below low-pass cutoff",
            ));
        }
        if !(self.mains_hz > 0.0 && self.mains_hz.is_finite()) {
            return Err(EcgError::config("mains frequency must be positive"));
        }
        if !(self.notch_q > 0.0 && self.notch_q.is_finite()) {
            return Err(EcgError::config("notch quality factor must be positive"));
        }
        if !(self.input_limit > 0.0) {
            return Err(EcgError::config("input limit must be positive"));
        }
        Ok(())
    }
}

impl DetectorConfig {
    pub fn validate(&self, sample_rate: f64) -> EcgResult<()> {
        if self.window_samples(sample_rate) < 3 {
            return Err(EcgError::config("detector window must span at least 3 samples"));
        }
        if self.warmup_secs < 0.0 || self.warmup_secs > self.window_secs {
            return Err(EcgError::config(
                "detector warm-up must be between 0 and the window length",
            ));
        }
        if self.refractory_ms == 0 {
            return Err(EcgError::config("refractory period must be greater than 0"));
        }
        if !(self.threshold_ratio > 0.0 && self.threshold_ratio < 1.0) {
            return Err(EcgError::config("threshold ratio must lie in (0, 1)"));
        }
        if self.min_amplitude < 0.0 {
            return Err(EcgError::config("minimum amplitude cannot be negative"));
        }
        if self.max_rr_secs <= self.refractory_secs() {
            return Err(EcgError::config(
                "maximum inter-beat interval must exceed the refractory period",
            ));
        }
        if self.rr_history == 0 || self.min_intervals == 0 || self.min_intervals > self.rr_history {
            return Err(EcgError::config(
                "need 1 <= min_intervals <= rr_history",
            ));
        }
        Ok(())
    }

    /// Ring buffer capacity in samples
    pub fn window_samples(&self, sample_rate: f64) -> usize {
        (self.window_secs * sample_rate).round().max(0.0) as usize
    }

    /// Samples required before detection starts
    pub fn warmup_samples(&self, sample_rate: f64) -> usize {
        (self.warmup_secs * sample_rate).round().max(1.0) as usize
    }

    pub fn refractory_secs(&self) -> f64 {
        self.refractory_ms as f64 / 1000.0
    }

    pub fn peak_confirm_secs(&self) -> f64 {
        self.peak_confirm_ms as f64 / 1000.0
    }
}
