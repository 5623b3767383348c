//! ECG-Simulation: synthetic electrode streams
//!
//! Generates reproducible three-electrode recordings with a configurable
//! beat pattern, noise and mains interference, and serves them as device
//! lines for tests and demos.

pub mod ecg_simulator;
pub mod line_stream;
pub mod signal_patterns;

pub use ecg_simulator::{EcgSimulator, LineFormat, MainsConfig, NoiseConfig, SimulatorConfig};
pub use line_stream::{spawn_line_stream, stream_lines};
pub use signal_patterns::BeatPattern;
