//! ECG-Processing: Real-time signal chain for three-electrode ECG
//!
//! Causal interference filtering, lead derivation, and beat detection with
//! heart-rate estimation, one sample at a time.

pub mod config;
pub mod detector;
pub mod filters;
pub mod leads;
pub mod processor;

pub use config::{DetectorConfig, FilterConfig, ProcessingConfig, Smoothing};
pub use detector::{Beat, BeatDetector, DetectorOutput, DetectorState};
pub use filters::{
    fold_to_nyquist, BiquadCoefficients, FilterDesign, FilterState, InterferenceFilter, Stage,
};
pub use leads::derive_leads;
pub use processor::{SessionState, SignalChain, TickOutput};
