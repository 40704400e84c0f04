//! Trajectory shaping step

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use super::{KinematicState, MotionLimits};
use comms_if::eqpt::arm::JointPose;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// An online trajectory generator, advancing a kinematic state one control tick at a time.
///
/// Given the current state and a target pose to reach at rest, `step` returns the state one tick
/// later. Implementations guarantee that the returned state, compared with `current`, stays within
/// `limits`: velocity and acceleration magnitudes, and the change in acceleration per tick.
pub trait TrajectoryShaper: Send {
    /// Advance one tick towards `target`.
    fn step(
        &mut self,
        current: &KinematicState,
        target: &JointPose,
        limits: &MotionLimits,
    ) -> (KinematicState, ShaperStatus);

    /// Forget any plan in progress.
    fn reset(&mut self);

    /// Control tick period.
    ///
    /// Units: seconds
    fn dt(&self) -> f64;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Status reported with each shaped state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ShaperStatus {
    /// The target has not been reached yet.
    Working,

    /// The returned state is the target, at rest.
    Finished,

    /// No valid state could be produced, the returned state is `current` unchanged.
    Fault(ShaperFault),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, thiserror::Error)]
pub enum ShaperFault {
    #[error("State, target and limits disagree on the number of joints")]
    DofMismatch,

    #[error("The state or target contains a non-finite value")]
    NonFinite,

    #[error("Could not bring the state to rest within {0} ticks")]
    BrakeTimeout(usize),
}
