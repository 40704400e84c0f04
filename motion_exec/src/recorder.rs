//! # Trajectory recorder
//!
//! Releases the arm so it can be guided by hand and samples its measured pose at a fixed rate
//! until the operator interrupts. Reads that time out are skipped, the recording just has a longer
//! gap between two samples.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Instant};

use crate::traj::{AngleUnit, TrajError, Trajectory, Waypoint};
use comms_if::eqpt::arm::ArmChannel;
use util::{cancel::CancelToken, time::secs_to_duration};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest pose read timeout while recording.
///
/// Units: seconds
const MAX_READ_TIMEOUT_S: f64 = 0.15;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordParams {
    /// Sampling rate.
    ///
    /// Units: Hz
    pub rate_hz: f64,

    /// Delay between releasing the arm and the first sample.
    ///
    /// Units: seconds
    pub warmup_s: f64,

    /// Delay for the release command to take effect before the warmup starts.
    ///
    /// Units: seconds
    pub settle_s: f64,

    /// Unit of the angles reported by the arm, written into the trajectory file.
    pub unit: AngleUnit,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("The sampling rate must be positive and finite, found {0}")]
    InvalidRate(f64),

    #[error("The recording was stopped before any sample could be read")]
    EmptyRecording,

    #[error("Could not build or save the trajectory: {0}")]
    TrajError(#[from] TrajError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for RecordParams {
    fn default() -> Self {
        Self {
            rate_hz: 15.0,
            warmup_s: 0.2,
            settle_s: 0.3,
            unit: AngleUnit::Degrees,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Record a trajectory into `sink` until `cancel` is triggered.
///
/// A cancellation during the release or warmup still ends the recording normally, which then
/// fails with `EmptyRecording`.
pub fn record(
    arm: &dyn ArmChannel,
    sink: &Path,
    params: &RecordParams,
    cancel: &CancelToken,
) -> Result<Trajectory, RecordError> {
    if !params.rate_hz.is_finite() || params.rate_hz <= 0.0 {
        return Err(RecordError::InvalidRate(params.rate_hz));
    }

    // Very low rates saturate to the longest supported period
    let dt = secs_to_duration(1.0 / params.rate_hz);
    let read_timeout = secs_to_duration(f64::min(MAX_READ_TIMEOUT_S, dt.as_secs_f64() * 0.9));
    let dof = arm.dof();

    // The arm must be free to be moved by hand
    if let Err(e) = arm.release_force() {
        warn!("Could not release the arm, it may resist guiding: {}", e);
    }

    let mut waypoints = Vec::new();

    let ready = cancel
        .sleep(secs_to_duration(params.settle_s))
        .and_then(|_| cancel.sleep(secs_to_duration(params.warmup_s)));

    if ready.is_ok() {
        info!(
            "Recording at {:.1} Hz into {:?}, press Ctrl+C to stop",
            params.rate_hz, sink
        );

        let mut t0: Option<Instant> = None;
        let mut misses = 0usize;
        let mut next = Instant::now();

        while !cancel.is_cancelled() {
            match arm.read_pose(read_timeout) {
                Some(q) if q.dof() == dof => {
                    let now = Instant::now();
                    let t = now.duration_since(*t0.get_or_insert(now)).as_secs_f64();
                    waypoints.push(Waypoint { t, q });
                }
                Some(q) => {
                    warn!("Skipping pose with {} joints, expected {}", q.dof(), dof);
                    misses += 1;
                }
                None => misses += 1,
            }

            // Deadline pacing, a late cycle doesn't cause a burst of catch-up samples
            next += dt;
            let now = Instant::now();
            if next < now {
                next = now;
            }

            if cancel.sleep_until(next).is_err() {
                break;
            }
        }

        debug!("{} pose reads missed", misses);
    }

    if waypoints.is_empty() {
        return Err(RecordError::EmptyRecording);
    }

    let traj = Trajectory::new(params.rate_hz, Some(params.unit), waypoints)?;
    traj.save(sink)?;

    info!(
        "Recorded {} samples over {:.2} s into {:?}",
        traj.len(),
        traj.duration_s(),
        sink
    );

    Ok(traj)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
