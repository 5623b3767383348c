//! Interference filter for electrode channels
//!
//! Each channel runs the same cascade of second-order sections: a Butterworth
//! high-pass for baseline wander and DC offset, a notch at the (aliased)
//! mains frequency, and a Butterworth low-pass for muscle noise. The
//! coefficients are designed once per pipeline; only the delay lines in
//! [`FilterState`] change from sample to sample.

use crate::config::{FilterConfig, ProcessingConfig};
use ecg_core::{EcgResult, FilteredSample, RawSample};
use std::f64::consts::{PI, SQRT_2};
use tracing::warn;

/// Folded mains frequencies closer than this to DC or Nyquist get no notch
const NOTCH_EDGE_MARGIN_HZ: f64 = 1.0;

/// Filter stages in cascade order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    HighPass,
    Notch,
    LowPass,
}

/// Coefficients of one biquad section, normalised so that a0 = 1.
///
/// y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// 2nd order Butterworth lowpass via the bilinear transform
    pub fn butterworth_lowpass(cutoff: f64, fs: f64) -> Self {
        let k = (PI * cutoff / fs).tan();
        let k2 = k * k;
        let norm = 1.0 / (k2 + SQRT_2 * k + 1.0);

        let b0 = k2 * norm;
        BiquadCoefficients {
            b0,
            b1: 2.0 * b0,
            b2: b0,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (k2 - SQRT_2 * k + 1.0) * norm,
        }
    }

    /// 2nd order Butterworth highpass via the bilinear transform
    pub fn butterworth_highpass(cutoff: f64, fs: f64) -> Self {
        let k = (PI * cutoff / fs).tan();
        let k2 = k * k;
        let norm = 1.0 / (k2 + SQRT_2 * k + 1.0);

        BiquadCoefficients {
            b0: norm,
            b1: -2.0 * norm,
            b2: norm,
            a1: 2.0 * (k2 - 1.0) * norm,
            a2: (k2 - SQRT_2 * k + 1.0) * norm,
        }
    }

    /// Band-reject section centred on `freq` with quality factor `q`
    pub fn notch(freq: f64, q: f64, fs: f64) -> Self {
        let omega = 2.0 * PI * freq / fs;
        let alpha = omega.sin() / (2.0 * q);
        let cos_omega = omega.cos();
        let a0 = 1.0 + alpha;

        BiquadCoefficients {
            b0: 1.0 / a0,
            b1: -2.0 * cos_omega / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cos_omega / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Gain for a constant input
    pub fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a1 + self.a2;
        if den.abs() < f64::EPSILON {
            return 1.0;
        }
        (self.b0 + self.b1 + self.b2) / den
    }
}

/// Fold a frequency into the first Nyquist zone `[0, fs/2]`
pub fn fold_to_nyquist(freq: f64, fs: f64) -> f64 {
    let folded = freq.rem_euclid(fs);
    if folded > fs / 2.0 {
        fs - folded
    } else {
        folded
    }
}

/// Immutable filter coefficients designed from the configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDesign {
    sections: Vec<(Stage, BiquadCoefficients)>,
    notch_hz: Option<f64>,
    input_limit: f64,
}

impl FilterDesign {
    /// Design the cascade for the configured sample rate
    pub fn new(config: &ProcessingConfig) -> EcgResult<Self> {
        config.filter.validate(config.sample_rate)?;
        Ok(Self::design(&config.filter, config.sample_rate))
    }

    fn design(filter: &FilterConfig, fs: f64) -> Self {
        let mut sections = Vec::with_capacity(3);
        sections.push((
            Stage::HighPass,
            BiquadCoefficients::butterworth_highpass(filter.highpass_hz, fs),
        ));

        let folded = fold_to_nyquist(filter.mains_hz, fs);
        let notch_hz = if folded < NOTCH_EDGE_MARGIN_HZ || folded > fs / 2.0 - NOTCH_EDGE_MARGIN_HZ {
            warn!(
                mains_hz = filter.mains_hz,
                folded_hz = folded,
                sample_rate = fs,
                "mains frequency aliases onto DC or Nyquist, notch stage disabled"
            );
            None
        } else {
            sections.push((
                Stage::Notch,
                BiquadCoefficients::notch(folded, filter.notch_q, fs),
            ));
            Some(folded)
        };

        sections.push((
            Stage::LowPass,
            BiquadCoefficients::butterworth_lowpass(filter.lowpass_hz, fs),
        ));

        FilterDesign {
            sections,
            notch_hz,
            input_limit: filter.input_limit,
        }
    }

    pub fn sections(&self) -> &[(Stage, BiquadCoefficients)] {
        &self.sections
    }

    /// Frequency the notch is centred on after aliasing, if enabled
    pub fn notch_frequency(&self) -> Option<f64> {
        self.notch_hz
    }

    pub fn input_limit(&self) -> f64 {
        self.input_limit
    }
}

/// Delay line of one biquad section on one channel (Direct Form I)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DelayLine {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl DelayLine {
    fn process(&mut self, c: &BiquadCoefficients, input: f64) -> f64 {
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }

    /// Load the steady state for a constant `input` and return its output
    fn prime(&mut self, c: &BiquadCoefficients, input: f64) -> f64 {
        let output = c.dc_gain() * input;
        *self = DelayLine {
            x1: input,
            x2: input,
            y1: output,
            y2: output,
        };
        output
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ChannelState {
    lines: Vec<DelayLine>,
    last_input: Option<f64>,
}

/// Per-channel (RA, LA, LL) filter memory for one session
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    channels: [ChannelState; 3],
    samples: u64,
}

impl FilterState {
    /// Fresh state sized for `design`
    pub fn new(design: &FilterDesign) -> Self {
        let channel = ChannelState {
            lines: vec![DelayLine::default(); design.sections.len()],
            last_input: None,
        };
        FilterState {
            channels: [channel.clone(), channel.clone(), channel],
            samples: 0,
        }
    }

    /// Samples filtered since this state was created
    pub fn samples_filtered(&self) -> u64 {
        self.samples
    }

    /// True until the first sample has been filtered
    pub fn is_fresh(&self) -> bool {
        self.samples == 0
    }
}

/// Causal three-channel interference filter
#[derive(Debug, Clone)]
pub struct InterferenceFilter {
    design: FilterDesign,
}

impl InterferenceFilter {
    pub fn new(config: &ProcessingConfig) -> EcgResult<Self> {
        Ok(InterferenceFilter {
            design: FilterDesign::new(config)?,
        })
    }

    pub fn design(&self) -> &FilterDesign {
        &self.design
    }

    /// Fresh per-session state for this filter
    pub fn new_state(&self) -> FilterState {
        FilterState::new(&self.design)
    }

    /// Filter one electrode triple, advancing `state`. Never fails.
    pub fn apply(&self, state: &mut FilterState, sample: &RawSample) -> FilteredSample {
        let inputs = sample.channels();
        let mut outputs = [0.0; 3];

        for (idx, channel) in state.channels.iter_mut().enumerate() {
            outputs[idx] = self.filter_channel(channel, inputs[idx]);
        }
        state.samples += 1;

        FilteredSample::from_channels(sample.timestamp, outputs)
    }

    fn filter_channel(&self, channel: &mut ChannelState, input: f64) -> f64 {
        let limit = self.design.input_limit;
        let input = if input.is_finite() {
            input.clamp(-limit, limit)
        } else {
            // Hold the previous input over a non-finite glitch
            channel.last_input.unwrap_or(0.0)
        };

        let prime = channel.last_input.is_none();
        channel.last_input = Some(input);

        let mut value = input;
        for (line, (_, coeffs)) in channel.lines.iter_mut().zip(&self.design.sections) {
            value = if prime {
                line.prime(coeffs, value)
            } else {
                line.process(coeffs, value)
            };
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecg_core::Timestamp;

    fn filter() -> InterferenceFilter {
        InterferenceFilter::new(&ProcessingConfig::default()).unwrap()
    }

    fn run_channel(filter: &InterferenceFilter, input: &[f64]) -> Vec<f64> {
        let mut state = filter.new_state();
        input
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let raw = RawSample::new(Timestamp::from_millis(i as u64 * 10), x, 0.0, 0.0);
                filter.apply(&mut state, &raw).ra
            })
            .collect()
    }

    fn rms(data: &[f64]) -> f64 {
        (data.iter().map(|x| x * x).sum::<f64>() / data.len() as f64).sqrt()
    }

    fn tone(freq: f64, fs: f64, samples: usize) -> Vec<f64> {
        (0..samples)
            .map(|i| (2.0 * PI * freq * i as f64 / fs).sin())
            .collect()
    }

    #[test]
    fn test_mains_folding() {
        assert_eq!(fold_to_nyquist(60.0, 100.0), 40.0);
        assert_eq!(fold_to_nyquist(50.0, 250.0), 50.0);
        assert_eq!(fold_to_nyquist(50.0, 100.0), 50.0);
        assert_eq!(fold_to_nyquist(60.0, 30.0), 0.0);
    }

    #[test]
    fn test_default_design_has_three_stages() {
        let filter = filter();
        let stages: Vec<Stage> = filter.design().sections().iter().map(|(s, _)| *s).collect();
        assert_eq!(stages, vec![Stage::HighPass, Stage::Notch, Stage::LowPass]);
        assert_eq!(filter.design().notch_frequency(), Some(40.0));
    }

    #[test]
    fn test_notch_disabled_at_nyquist() {
        let config = ProcessingConfig::default().with_mains(50.0);
        let filter = InterferenceFilter::new(&config).unwrap();
        assert_eq!(filter.design().sections().len(), 2);
        assert_eq!(filter.design().notch_frequency(), None);
    }

    #[test]
    fn test_dc_gains() {
        let fs = 100.0;
        assert!(BiquadCoefficients::butterworth_highpass(0.5, fs).dc_gain().abs() < 1e-12);
        assert!((BiquadCoefficients::butterworth_lowpass(40.0, fs).dc_gain() - 1.0).abs() < 1e-12);
        assert!((BiquadCoefficients::notch(40.0, 30.0, fs).dc_gain() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_highpass_removes_dc_offset() {
        let filter = filter();
        // Step from 0 to a 0.4 offset, then hold for 10 seconds
        let mut input = vec![0.0; 10];
        input.extend(std::iter::repeat(0.4).take(1000));
        let output = run_channel(&filter, &input);
        assert!(output.last().unwrap().abs() < 1e-3);
    }

    #[test]
    fn test_priming_suppresses_startup_transient() {
        let filter = filter();
        let output = run_channel(&filter, &vec![0.55; 200]);
        assert!(output.iter().all(|y| y.abs() < 1e-9));
    }

    #[test]
    fn test_notch_attenuates_mains() {
        let filter = filter();
        let fs = 100.0;
        // 60 Hz sampled at 100 Hz shows up at 40 Hz
        let output = run_channel(&filter, &tone(60.0, fs, 1000));
        let settled = &output[400..];
        assert!(rms(settled) < 0.05 * rms(&tone(60.0, fs, 600)));
    }

    #[test]
    fn test_passband_preserved() {
        let filter = filter();
        let input = tone(10.0, 100.0, 1000);
        let output = run_channel(&filter, &input);
        let ratio = rms(&output[400..]) / rms(&input[400..]);
        assert!(ratio > 0.8 && ratio < 1.1, "passband gain {ratio}");
    }

    #[test]
    fn test_filter_is_deterministic() {
        let filter = filter();
        let input: Vec<f64> = (0..500)
            .map(|i| 0.4 + 0.3 * (i as f64 * 0.07).sin() + 0.05 * (i as f64 * 2.5).cos())
            .collect();
        let first = run_channel(&filter, &input);
        let second = run_channel(&filter, &input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_outliers_clamped_and_nan_held() {
        let filter = filter();
        let limit = filter.design().input_limit();

        let clamped = run_channel(&filter, &[0.0, 1.0e9, 0.0]);
        let at_limit = run_channel(&filter, &[0.0, limit, 0.0]);
        assert_eq!(clamped, at_limit);

        let held = run_channel(&filter, &[0.2, 0.3, f64::NAN, 0.1]);
        let repeated = run_channel(&filter, &[0.2, 0.3, 0.3, 0.1]);
        assert_eq!(held, repeated);
        assert!(held.iter().all(|y| y.is_finite()));
    }

    #[test]
    fn test_channels_are_independent() {
        let filter = filter();
        let mut state = filter.new_state();
        assert!(state.is_fresh());
        let mut last = None;
        for i in 0..300 {
            let t = i as f64 / 100.0;
            let raw = RawSample::new(Timestamp::from_millis(i * 10), (2.0 * PI * t).sin(), 0.0, 0.7);
            last = Some(filter.apply(&mut state, &raw));
        }
        let last = last.unwrap();
        assert_eq!(last.la, 0.0);
        assert!(last.ll.abs() < 1e-9);
        assert!(last.ra.abs() > 0.0);
        assert_eq!(state.samples_filtered(), 300);
        assert!(!state.is_fresh());
    }
}
