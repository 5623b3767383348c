//! Capture timestamps for electrode samples
//!
//! Samples are stamped on arrival with a monotonic clock that is anchored to
//! wall time once, so timestamps never go backwards yet still mean something
//! to downstream consumers that persist or plot them.

use core::fmt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Capture instant with nanosecond resolution since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Timestamp {
    nanos: u64,
}

impl Timestamp {
    /// Create a timestamp from nanoseconds since the Unix epoch
    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from milliseconds since the Unix epoch
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    /// Create a timestamp from fractional seconds since the Unix epoch
    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            nanos: (secs.max(0.0) * 1_000_000_000.0).round() as u64,
        }
    }

    /// Nanoseconds since the Unix epoch
    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Fractional seconds since the Unix epoch
    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1_000_000_000.0
    }

    /// Signed number of seconds from `earlier` to `self`
    #[inline]
    pub fn seconds_since(&self, earlier: Timestamp) -> f64 {
        (self.nanos as i128 - earlier.nanos as i128) as f64 / 1_000_000_000.0
    }

    /// Timestamp shifted forward by `duration`, saturating at the end of time
    #[inline]
    pub fn saturating_add(&self, duration: Duration) -> Timestamp {
        let delta = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Timestamp::from_nanos(self.nanos.saturating_add(delta))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.nanos / 1_000_000_000;
        let subsec_nanos = self.nanos % 1_000_000_000;
        write!(f, "{}.{:09}", secs, subsec_nanos)
    }
}

/// Source of capture instants for ingested samples
pub trait Clock: Send + Sync {
    /// Timestamp for a sample captured right now
    fn now(&self) -> Timestamp;
}

/// Monotonic clock anchored to the wall clock at construction
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_instant: Instant,
    anchor_unix_nanos: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        let anchor_unix_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            anchor_instant: Instant::now(),
            anchor_unix_nanos,
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.anchor_unix_nanos).saturating_add(self.anchor_instant.elapsed())
    }
}

/// Clock that advances by one fixed sample period per reading.
///
/// Used for deterministic replay of recorded streams and in tests, where the
/// transport delivers lines faster than real time.
#[derive(Debug)]
pub struct SteppedClock {
    next_nanos: AtomicU64,
    step_nanos: u64,
}

impl SteppedClock {
    /// Clock starting at `start` and advancing `1 / sample_rate` per call
    pub fn new(start: Timestamp, sample_rate: f64) -> Self {
        let step_nanos = (1_000_000_000.0 / sample_rate).round() as u64;
        Self {
            next_nanos: AtomicU64::new(start.as_nanos()),
            step_nanos,
        }
    }

    /// Sample period in nanoseconds
    pub fn step_nanos(&self) -> u64 {
        self.step_nanos
    }
}

impl Clock for SteppedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.next_nanos.fetch_add(self.step_nanos, Ordering::Relaxed))
    }
}
