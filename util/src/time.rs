//! General time utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use log::warn;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Longest duration produced by [`secs_to_duration`].
///
/// Units: seconds
pub const MAX_DURATION_S: u64 = 86_400;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Gate which opens at most once per period, used to throttle progress logs in long loops.
#[derive(Debug, Clone)]
pub struct Throttle {
    period: Duration,
    last: Option<Instant>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Throttle {
    pub fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Returns true if the period has elapsed since the last time this returned true. The first
    /// call always returns true.
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(l) if now.duration_since(l) < self.period => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Convert a chrono duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: chrono::Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a number of seconds into a std duration.
///
/// Negative and NaN values give a zero duration, overly large values saturate to
/// [`MAX_DURATION_S`] with a warning.
pub fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        Duration::from_secs(0)
    } else if secs > MAX_DURATION_S as f64 {
        warn!(
            "Duration of {} s is longer than the {} s supported, clamping",
            secs, MAX_DURATION_S
        );
        Duration::from_secs(MAX_DURATION_S)
    } else {
        Duration::from_secs_f64(secs)
    }
}
