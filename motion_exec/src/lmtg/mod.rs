//! # Limited-motion trajectory generator
//!
//! Turns a coarse list of waypoints into a stream of per-tick kinematic states whose velocity,
//! acceleration and jerk stay within the active limits on every joint. The pieces are:
//!
//! - [`limits`]: the limit set, unit detection for recordings without an explicit unit, and speed
//!   scaling.
//! - [`decimate`]: removes waypoints that would only make the arm stop and go between
//!   indistinguishable poses.
//! - [`shaper`]: the per-tick shaping step, behind the [`TrajectoryShaper`] trait.
//! - [`profile`]: the provided shaper, a time-synchronised double-S (or trapezoidal) profile.
//! - [`generator`]: the iterator which walks the waypoints and drives the shaper tick by tick.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod decimate;
pub mod generator;
pub mod limits;
pub mod profile;
pub mod shaper;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::arm::JointPose;
use serde::Serialize;

pub use decimate::decimate;
pub use generator::{GenReport, Tick, TickGenerator};
pub use limits::{detect_unit, MotionLimits};
pub use profile::{ProfileKind, ProfileShaper};
pub use shaper::{ShaperFault, ShaperStatus, TrajectoryShaper};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position, velocity and acceleration of every joint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KinematicState {
    pub position: Vec<f64>,
    pub velocity: Vec<f64>,
    pub acceleration: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LmtgError {
    #[error("Invalid motion limits: {0}")]
    InvalidLimits(String),

    #[error("Expected {expected} degrees of freedom, found {found}")]
    DofMismatch { expected: usize, found: usize },

    #[error("At least 2 waypoints are needed to generate motion, found {0}")]
    TooFewWaypoints(usize),

    #[error("The control rate must be positive and finite, found {0}")]
    InvalidControlRate(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl KinematicState {
    /// State at rest at the given pose.
    pub fn at_rest(pose: &JointPose) -> Self {
        let dof = pose.dof();
        Self {
            position: pose.as_slice().to_vec(),
            velocity: vec![0.0; dof],
            acceleration: vec![0.0; dof],
        }
    }

    pub fn dof(&self) -> usize {
        self.position.len()
    }

    /// Position as a pose to send to the arm.
    pub fn pose(&self) -> JointPose {
        JointPose::new(self.position.clone())
    }

    /// True if all three vectors have the same length.
    pub fn is_consistent(&self) -> bool {
        self.velocity.len() == self.position.len() && self.acceleration.len() == self.position.len()
    }

    pub fn is_finite(&self) -> bool {
        self.position
            .iter()
            .chain(self.velocity.iter())
            .chain(self.acceleration.iter())
            .all(|x| x.is_finite())
    }

    /// True if no joint is moving or accelerating.
    pub fn is_at_rest(&self) -> bool {
        self.velocity
            .iter()
            .chain(self.acceleration.iter())
            .all(|x| *x == 0.0)
    }
}
