//! Three-electrode ECG simulator producing device lines

use crate::signal_patterns::BeatPattern;
use ecg_core::{EcgError, EcgResult, ElectrodeRecord};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Line encoding written by the simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFormat {
    /// `{"RA":..,"LA":..,"LL":..}`
    Json,
    /// `ra,la,ll`
    Csv,
}

/// Configuration for ECG simulation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Sampling rate in Hz
    pub sample_rate: f64,
    /// Resting electrode potentials (RA, LA, LL)
    pub baseline: [f64; 3],
    /// Cardiac activity pattern
    pub pattern: BeatPattern,
    /// Weight of the pattern on each electrode (RA, LA, LL); Lead II sees LL - RA
    pub projection: [f64; 3],
    /// Noise configuration
    pub noise: NoiseConfig,
    /// Power line interference
    pub mains: Option<MainsConfig>,
    /// Encoding of emitted lines
    pub format: LineFormat,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

/// Noise added independently to every electrode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Gaussian noise standard deviation (0.0 = no noise)
    pub gaussian_std: f64,
    /// Baseline wander amplitude
    pub baseline_wander: f64,
    /// Baseline wander frequency in Hz
    pub wander_hz: f64,
}

/// Mains hum coupled into the electrodes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MainsConfig {
    pub frequency_hz: f64,
    pub amplitude: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gaussian_std: 0.01,
            baseline_wander: 0.05,
            wander_hz: 0.1,
        }
    }
}

impl NoiseConfig {
    /// No noise at all
    pub fn none() -> Self {
        Self {
            gaussian_std: 0.0,
            baseline_wander: 0.0,
            wander_hz: 0.0,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 100.0,
            baseline: [0.40, 0.55, 0.50],
            pattern: BeatPattern::default(),
            projection: [-0.2, 0.3, 0.8],
            noise: NoiseConfig::default(),
            mains: Some(MainsConfig {
                frequency_hz: 60.0,
                amplitude: 0.02,
            }),
            format: LineFormat::Json,
            seed: None,
        }
    }
}

impl SimulatorConfig {
    /// Clean recording: baseline plus pattern on LL only, no noise or hum
    pub fn clean(sample_rate: f64, pattern: BeatPattern) -> Self {
        Self {
            sample_rate,
            pattern,
            projection: [0.0, 0.0, 1.0],
            noise: NoiseConfig::none(),
            mains: None,
            seed: Some(0),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EcgResult<()> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(EcgError::config("simulator sample rate must be positive"));
        }
        if !(self.noise.gaussian_std >= 0.0 && self.noise.gaussian_std.is_finite()) {
            return Err(EcgError::config("noise standard deviation must be non-negative"));
        }
        Ok(())
    }
}

impl LineFormat {
    /// Encode one electrode triple as a line, without the newline
    pub fn render(self, channels: [f64; 3]) -> String {
        match self {
            LineFormat::Json => {
                serde_json::to_string(&ElectrodeRecord::from_channels(channels)).unwrap_or_default()
            }
            LineFormat::Csv => format!("{},{},{}", channels[0], channels[1], channels[2]),
        }
    }
}

/// ECG simulator
pub struct EcgSimulator {
    config: SimulatorConfig,
    rng: rand::rngs::StdRng,
    normal_dist: Normal<f64>,
    sample_index: u64,
}

impl EcgSimulator {
    /// Create new ECG simulator with configuration
    pub fn new(config: SimulatorConfig) -> EcgResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };
        let normal_dist = Normal::new(0.0, config.noise.gaussian_std)
            .map_err(|e| EcgError::config(format!("invalid noise distribution: {e}")))?;

        Ok(EcgSimulator {
            config,
            rng,
            normal_dist,
            sample_index: 0,
        })
    }

    /// Electrode potentials (RA, LA, LL) of the next sample
    pub fn next_channels(&mut self) -> [f64; 3] {
        let time = self.sample_index as f64 / self.config.sample_rate;
        self.sample_index += 1;

        let beat = self.config.pattern.value_at(time);
        let wander = self.config.noise.baseline_wander
            * (2.0 * PI * self.config.noise.wander_hz * time).sin();
        let hum = self
            .config
            .mains
            .map(|m| m.amplitude * (2.0 * PI * m.frequency_hz * time).sin())
            .unwrap_or(0.0);

        let mut channels = [0.0; 3];
        for (idx, value) in channels.iter_mut().enumerate() {
            let noise = if self.config.noise.gaussian_std > 0.0 {
                self.normal_dist.sample(&mut self.rng)
            } else {
                0.0
            };
            *value = self.config.baseline[idx]
                + self.config.projection[idx] * beat
                + wander
                + hum
                + noise;
        }
        channels
    }

    /// Next sample encoded in the configured line format
    pub fn next_line(&mut self) -> String {
        let channels = self.next_channels();
        self.config.format.render(channels)
    }

    /// `count` consecutive lines
    pub fn lines(&mut self, count: usize) -> Vec<String> {
        (0..count).map(|_| self.next_line()).collect()
    }

    /// Random garbage line, for exercising parsers
    pub fn garbage_line(&mut self) -> String {
        let len = self.rng.gen_range(3..24);
        (0..len)
            .map(|_| self.rng.sample(rand::distributions::Alphanumeric) as char)
            .collect()
    }

    pub fn samples_generated(&self) -> u64 {
        self.sample_index
    }

    /// Restart the recording from time zero
    pub fn reset_time(&mut self) {
        self.sample_index = 0;
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_recording_matches_pattern() {
        let pattern = BeatPattern::Sinusoidal { frequency_hz: 1.2, amplitude: 0.5 };
        let mut sim = EcgSimulator::new(SimulatorConfig::clean(100.0, pattern)).unwrap();

        for i in 0..250 {
            let [ra, la, ll] = sim.next_channels();
            let t = i as f64 / 100.0;
            assert_eq!(ra, 0.40);
            assert_eq!(la, 0.55);
            assert!((ll - (0.50 + pattern.value_at(t))).abs() < 1e-12);
        }
        assert_eq!(sim.samples_generated(), 250);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let config = SimulatorConfig {
            seed: Some(42),
            ..SimulatorConfig::default()
        };
        let mut a = EcgSimulator::new(config.clone()).unwrap();
        let mut b = EcgSimulator::new(config).unwrap();
        assert_eq!(a.lines(100), b.lines(100));
    }

    #[test]
    fn test_line_formats() {
        assert_eq!(LineFormat::Csv.render([0.4, 0.55, 0.5]), "0.4,0.55,0.5");

        let json = LineFormat::Json.render([0.4, 0.55, 0.5]);
        let record: ElectrodeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.channels(), [0.4, 0.55, 0.5]);
    }

    #[test]
    fn test_reset_time_replays_clean_signal() {
        let mut sim = EcgSimulator::new(SimulatorConfig::clean(
            100.0,
            BeatPattern::default(),
        ))
        .unwrap();
        let first = sim.lines(10);
        sim.reset_time();
        assert_eq!(sim.lines(10), first);
    }

    #[test]
    fn test_invalid_config() {
        let config = SimulatorConfig {
            sample_rate: 0.0,
            ..SimulatorConfig::default()
        };
        assert!(EcgSimulator::new(config).is_err());
    }

    #[test]
    fn test_garbage_is_not_numeric_triple() {
        let mut sim = EcgSimulator::new(SimulatorConfig::clean(100.0, BeatPattern::Flat)).unwrap();
        let line = sim.garbage_line();
        assert!(!line.is_empty());
        assert!(!line.contains(','));
    }
}
