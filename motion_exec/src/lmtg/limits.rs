//! Motion limits, unit detection and speed scaling

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use super::LmtgError;
use crate::traj::AngleUnit;
use comms_if::eqpt::arm::JointPose;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// A recording whose first pose has any joint beyond this magnitude is taken to be in degrees.
pub const DEG_DETECTION_THRESHOLD: f64 = 6.5;

/// Smallest speed factor applied to the limits.
pub const MIN_SPEED: f64 = 1e-3;

/// Conservative limits for degree-valued trajectories (deg/s, deg/s^2, deg/s^3).
const DEG_LIMITS: (f64, f64, f64) = (80.0, 300.0, 4000.0);

/// Conservative limits for radian-valued trajectories (rad/s, rad/s^2, rad/s^3).
const RAD_LIMITS: (f64, f64, f64) = (1.4, 2.5, 30.0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Per-joint velocity, acceleration and jerk limits.
///
/// All three vectors have the same length and only contain finite values greater than zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLimits")]
pub struct MotionLimits {
    max_velocity: Vec<f64>,
    max_acceleration: Vec<f64>,
    max_jerk: Vec<f64>,
}

#[derive(Deserialize)]
struct RawLimits {
    max_velocity: Vec<f64>,
    max_acceleration: Vec<f64>,
    max_jerk: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotionLimits {
    pub fn new(
        max_velocity: Vec<f64>,
        max_acceleration: Vec<f64>,
        max_jerk: Vec<f64>,
    ) -> Result<Self, LmtgError> {
        let dof = max_velocity.len();

        if dof == 0 {
            return Err(LmtgError::InvalidLimits("no joints given".into()));
        }
        if max_acceleration.len() != dof || max_jerk.len() != dof {
            return Err(LmtgError::InvalidLimits(format!(
                "{} velocity, {} acceleration and {} jerk limits given",
                dof,
                max_acceleration.len(),
                max_jerk.len()
            )));
        }

        let all = max_velocity
            .iter()
            .chain(max_acceleration.iter())
            .chain(max_jerk.iter());
        for x in all {
            if !x.is_finite() || *x <= 0.0 {
                return Err(LmtgError::InvalidLimits(format!(
                    "limits must be positive and finite, found {}",
                    x
                )));
            }
        }

        Ok(Self {
            max_velocity,
            max_acceleration,
            max_jerk,
        })
    }

    /// The same limits on every joint.
    pub fn uniform(dof: usize, vel: f64, acc: f64, jerk: f64) -> Result<Self, LmtgError> {
        Self::new(vec![vel; dof], vec![acc; dof], vec![jerk; dof])
    }

    /// Default conservative limits for the given unit.
    pub fn for_unit(unit: AngleUnit, dof: usize) -> Self {
        let (v, a, j) = match unit {
            AngleUnit::Degrees => DEG_LIMITS,
            AngleUnit::Radians => RAD_LIMITS,
        };

        Self {
            max_velocity: vec![v; dof],
            max_acceleration: vec![a; dof],
            max_jerk: vec![j; dof],
        }
    }

    /// Limits for playing back `speed` times faster.
    ///
    /// Time-scaling a profile by `1 / speed` scales velocities by `speed`, accelerations by
    /// `speed^2` and jerks by `speed^3`. The speed is floored at [`MIN_SPEED`].
    pub fn scaled(&self, speed: f64) -> Self {
        let s = if speed.is_finite() {
            speed.max(MIN_SPEED)
        } else {
            1.0
        };

        Self {
            max_velocity: self.max_velocity.iter().map(|v| v * s).collect(),
            max_acceleration: self.max_acceleration.iter().map(|a| a * s * s).collect(),
            max_jerk: self.max_jerk.iter().map(|j| j * s * s * s).collect(),
        }
    }

    pub fn dof(&self) -> usize {
        self.max_velocity.len()
    }

    pub fn max_velocity(&self) -> &[f64] {
        &self.max_velocity
    }

    pub fn max_acceleration(&self) -> &[f64] {
        &self.max_acceleration
    }

    pub fn max_jerk(&self) -> &[f64] {
        &self.max_jerk
    }
}

impl TryFrom<RawLimits> for MotionLimits {
    type Error = LmtgError;

    fn try_from(raw: RawLimits) -> Result<Self, Self::Error> {
        MotionLimits::new(raw.max_velocity, raw.max_acceleration, raw.max_jerk)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Guess the unit of a recording from the magnitude of its first pose.
///
/// Only meant for recordings that carry no unit. Any joint beyond
/// [`DEG_DETECTION_THRESHOLD`] means degrees, otherwise radians.
pub fn detect_unit(first: &JointPose) -> AngleUnit {
    if first
        .as_slice()
        .iter()
        .any(|q| q.abs() > DEG_DETECTION_THRESHOLD)
    {
        AngleUnit::Degrees
    } else {
        AngleUnit::Radians
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_detect_unit() {
        assert_eq!(
            detect_unit(&JointPose::new(vec![0.1, -1.5, 3.0])),
            AngleUnit::Radians
        );
        assert_eq!(
            detect_unit(&JointPose::new(vec![0.1, -87.8, 3.0])),
            AngleUnit::Degrees
        );
        // Small degree poses are indistinguishable from radians
        assert_eq!(detect_unit(&JointPose::zeros(7)), AngleUnit::Radians);
    }

    #[test]
    fn test_scaling() {
        let l = MotionLimits::uniform(2, 10.0, 20.0, 40.0).unwrap().scaled(0.5);

        assert_eq!(l.max_velocity(), &[5.0, 5.0]);
        assert_eq!(l.max_acceleration(), &[5.0, 5.0]);
        assert_eq!(l.max_jerk(), &[5.0, 5.0]);

        let floored = MotionLimits::uniform(1, 1.0, 1.0, 1.0).unwrap().scaled(0.0);
        assert_eq!(floored.max_velocity(), &[MIN_SPEED]);
    }

    #[test]
    fn test_invalid_limits() {
        assert!(MotionLimits::new(vec![1.0], vec![1.0, 1.0], vec![1.0]).is_err());
        assert!(MotionLimits::uniform(2, 1.0, 0.0, 1.0).is_err());
        assert!(MotionLimits::uniform(2, 1.0, 1.0, std::f64::INFINITY).is_err());
        assert!(MotionLimits::uniform(0, 1.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_unit_defaults() {
        let deg = MotionLimits::for_unit(AngleUnit::Degrees, 7);
        assert_eq!(deg.dof(), 7);
        assert_eq!(deg.max_velocity()[0], 80.0);
        assert_eq!(MotionLimits::for_unit(AngleUnit::Radians, 7).max_jerk()[6], 30.0);
    }
}
