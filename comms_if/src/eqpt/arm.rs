//! # Arm Equipment Commands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ChannelError;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of degrees of freedom of the reference arm (6 joints plus the gripper).
pub const DEFAULT_DOF: usize = 7;

/// Holding force level which fully releases the actuators.
pub const FORCE_RELEASED: u32 = 0;

/// Highest holding force level accepted by the arm controller.
pub const FORCE_MAX: u32 = 80_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Joint angles of the arm, one per degree of freedom.
///
/// The length of a pose is fixed when it is created. A missing reading is never represented by a
/// zero pose, since zero is a valid pose, channels return `None` instead.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(transparent)]
pub struct JointPose(Vec<f64>);

/// Auxiliary parameters passed to the controller alongside a multi-joint move.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct AuxParams {
    /// Controller smoothing mode, 0 applies the least smoothing.
    pub mode: u8,

    /// Per-joint braking parameter.
    pub habr: u32,

    /// Per-joint ply level.
    pub ply: u32,
}

/// Demands that are sent to the arm controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArmDems {
    /// Absolute target pose.
    pub pose: JointPose,

    /// Auxiliary parameters for the move.
    pub aux: AuxParams,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Command channel to the arm controller.
///
/// Delivery is at-most-once and unacknowledged. The channel is shared between concurrently running
/// tasks, so all methods take `&self`. Implementations may serialise wire writes internally but
/// make no promise about ordering between callers on different threads.
pub trait ArmChannel: Send + Sync {
    /// Number of degrees of freedom of the arm behind this channel.
    fn dof(&self) -> usize;

    /// Enable the actuators with the given holding force level.
    fn set_force(&self, level: u32) -> Result<(), ChannelError>;

    /// Release the holding force so the arm can be moved by hand. The arm may sag.
    fn release_force(&self) -> Result<(), ChannelError>;

    /// Send an absolute joint pose demand.
    fn send_pose(&self, dems: &ArmDems) -> Result<(), ChannelError>;

    /// Read the latest measured pose, or `None` if nothing arrived within `timeout`.
    fn read_pose(&self, timeout: Duration) -> Option<JointPose>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl JointPose {
    /// Create a new pose from the given joint angles.
    pub fn new(angles: Vec<f64>) -> Self {
        Self(angles)
    }

    /// The zero pose for the given number of degrees of freedom.
    pub fn zeros(dof: usize) -> Self {
        Self(vec![0.0; dof])
    }

    /// Number of degrees of freedom in this pose.
    pub fn dof(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }

    /// Largest absolute per-joint difference to `other`, or `None` if the lengths differ.
    pub fn max_abs_diff(&self, other: &JointPose) -> Option<f64> {
        if self.dof() != other.dof() {
            return None;
        }

        Some(
            self.0
                .iter()
                .zip(other.0.iter())
                .fold(0.0, |m, (a, b)| f64::max(m, (a - b).abs())),
        )
    }

    /// Linear interpolation towards `other`, `alpha` in [0, 1].
    ///
    /// Both poses must have the same number of degrees of freedom.
    pub fn lerp(&self, other: &JointPose, alpha: f64) -> JointPose {
        JointPose(
            self.0
                .iter()
                .zip(other.0.iter())
                .map(|(a, b)| (1.0 - alpha) * a + alpha * b)
                .collect(),
        )
    }

    /// Return true if every element is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|a| a.is_finite())
    }
}

impl From<Vec<f64>> for JointPose {
    fn from(angles: Vec<f64>) -> Self {
        Self(angles)
    }
}

impl std::ops::Index<usize> for JointPose {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.0[i]
    }
}

impl std::ops::IndexMut<usize> for JointPose {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.0[i]
    }
}

impl Default for AuxParams {
    /// Least filtering: mode 0, no braking, no ply.
    fn default() -> Self {
        Self {
            mode: 0,
            habr: 0,
            ply: 0,
        }
    }
}

impl ArmDems {
    /// Demands for the given pose with default auxiliary parameters.
    pub fn from_pose(pose: JointPose) -> Self {
        Self {
            pose,
            aux: AuxParams::default(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
