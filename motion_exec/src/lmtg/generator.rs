//! # Tick generator
//!
//! Walks a list of waypoints, asking the shaper for one state per control tick until each waypoint
//! is reached in turn. Generation is driven by iteration so that it can be run faster than real
//! time (tests, previews) or paced by the caller against the wall clock (playback).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::Serialize;

use super::{KinematicState, LmtgError, MotionLimits, ShaperStatus, TrajectoryShaper};
use comms_if::eqpt::arm::JointPose;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One generated control tick.
#[derive(Debug, Clone, Serialize)]
pub struct Tick {
    /// Index of the waypoint being moved towards.
    pub segment: usize,

    /// Time since the start of generation.
    ///
    /// Units: seconds
    pub t: f64,

    pub state: KinematicState,

    /// `Working` or `Finished`, faulty ticks are never yielded.
    pub status: ShaperStatus,
}

/// Counters describing a generation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenReport {
    /// Number of segments (waypoints after the first).
    pub segments: usize,

    /// Segments whose waypoint was reached.
    pub completed: usize,

    /// Segments abandoned after a shaper fault.
    pub skipped: usize,

    /// Ticks yielded.
    pub ticks: usize,
}

/// Iterator of limited-motion ticks through a list of waypoints.
///
/// The arm is assumed to start at rest on the first waypoint.
pub struct TickGenerator<S: TrajectoryShaper> {
    shaper: S,
    waypoints: Vec<JointPose>,
    limits: MotionLimits,
    state: KinematicState,

    /// Index of the current target waypoint.
    segment: usize,

    report: GenReport,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<S: TrajectoryShaper> TickGenerator<S> {
    /// Create a new generator.
    ///
    /// At least two waypoints are required, and all of them as well as the limits must have the
    /// same number of joints.
    pub fn new(
        mut shaper: S,
        waypoints: Vec<JointPose>,
        limits: MotionLimits,
    ) -> Result<Self, LmtgError> {
        if waypoints.len() < 2 {
            return Err(LmtgError::TooFewWaypoints(waypoints.len()));
        }

        let dof = limits.dof();
        if let Some(bad) = waypoints.iter().find(|w| w.dof() != dof) {
            return Err(LmtgError::DofMismatch {
                expected: dof,
                found: bad.dof(),
            });
        }

        shaper.reset();

        Ok(Self {
            shaper,
            state: KinematicState::at_rest(&waypoints[0]),
            report: GenReport {
                segments: waypoints.len() - 1,
                ..Default::default()
            },
            waypoints,
            limits,
            segment: 1,
        })
    }

    /// Counters so far, final once the iterator is exhausted.
    pub fn report(&self) -> GenReport {
        self.report
    }

    /// Latest generated state.
    pub fn state(&self) -> &KinematicState {
        &self.state
    }

    /// Control tick period.
    ///
    /// Units: seconds
    pub fn dt(&self) -> f64 {
        self.shaper.dt()
    }
}

impl<S: TrajectoryShaper> Iterator for TickGenerator<S> {
    type Item = Tick;

    fn next(&mut self) -> Option<Self::Item> {
        // Each pass either yields or skips one segment, so this ends
        while self.segment < self.waypoints.len() {
            let target = &self.waypoints[self.segment];
            let (next, status) = self.shaper.step(&self.state, target, &self.limits);

            if let ShaperStatus::Fault(fault) = status {
                warn!(
                    "LimitGenerationFault on segment {}: {}, skipping to the next waypoint",
                    self.segment, fault
                );
                self.report.skipped += 1;
                self.segment += 1;
                self.shaper.reset();
                continue;
            }

            self.report.ticks += 1;
            self.state = next;

            let tick = Tick {
                segment: self.segment,
                t: self.report.ticks as f64 * self.shaper.dt(),
                state: self.state.clone(),
                status,
            };

            if status == ShaperStatus::Finished {
                debug!("Segment {} reached after {} ticks", self.segment, self.report.ticks);
                self.report.completed += 1;
                self.segment += 1;
            }

            return Some(tick);
        }

        None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
