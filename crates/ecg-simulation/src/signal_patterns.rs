//! Beat waveforms injected into the electrode potentials

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Cardiac activity pattern, expressed as a Lead II contribution in volts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BeatPattern {
    /// No cardiac activity
    Flat,
    /// Pure sinusoid at the beat frequency
    Sinusoidal { frequency_hz: f64, amplitude: f64 },
    /// Narrow Gaussian R waves at a fixed rate
    Qrs {
        bpm: f64,
        amplitude: f64,
        /// Width (standard deviation) of each R wave
        width_ms: f64,
    },
    /// P-QRS-T morphology built from Gaussian components
    Realistic { bpm: f64, amplitude: f64 },
}

impl BeatPattern {
    /// Contribution at `time` seconds from the start of the recording
    pub fn value_at(&self, time: f64) -> f64 {
        match *self {
            BeatPattern::Flat => 0.0,

            BeatPattern::Sinusoidal { frequency_hz, amplitude } => {
                amplitude * (2.0 * PI * frequency_hz * time).sin()
            }

            BeatPattern::Qrs { bpm, amplitude, width_ms } => {
                let (phase, period) = beat_phase(bpm, time);
                // R wave sits a quarter period into each beat
                amplitude * gaussian(phase - period / 4.0, width_ms / 1000.0)
            }

            BeatPattern::Realistic { bpm, amplitude } => {
                let (phase, period) = beat_phase(bpm, time);
                let r = period / 4.0;
                amplitude
                    * (0.12 * gaussian(phase - (r - 0.16), 0.025)
                        - 0.10 * gaussian(phase - (r - 0.03), 0.010)
                        + gaussian(phase - r, 0.012)
                        - 0.15 * gaussian(phase - (r + 0.03), 0.010)
                        + 0.30 * gaussian(phase - (r + 0.25), 0.040))
            }
        }
    }

    /// Beat rate the pattern is built to produce, if any
    pub fn nominal_bpm(&self) -> Option<f64> {
        match *self {
            BeatPattern::Flat => None,
            BeatPattern::Sinusoidal { frequency_hz, .. } => Some(frequency_hz * 60.0),
            BeatPattern::Qrs { bpm, .. } | BeatPattern::Realistic { bpm, .. } => Some(bpm),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            BeatPattern::Flat => "Flat line",
            BeatPattern::Sinusoidal { .. } => "Sinusoidal beat",
            BeatPattern::Qrs { .. } => "Isolated R waves",
            BeatPattern::Realistic { .. } => "P-QRS-T complexes",
        }
    }
}

impl Default for BeatPattern {
    fn default() -> Self {
        BeatPattern::Realistic {
            bpm: 72.0,
            amplitude: 1.0,
        }
    }
}

fn beat_phase(bpm: f64, time: f64) -> (f64, f64) {
    let period = 60.0 / bpm;
    (time.rem_euclid(period), period)
}

fn gaussian(offset: f64, sigma: f64) -> f64 {
    (-(offset * offset) / (2.0 * sigma * sigma)).exp()
}
