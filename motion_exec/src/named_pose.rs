//! # Named poses
//!
//! Moves to fixed, known poses such as the stow pose the arm rests in for transport. The pose is
//! streamed as a long burst so it gets through the lossy channel, then checked, and pushed once
//! more with a firmer hold if the arm did not get there.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    monitor::{has_converged, Convergence},
    replay::{burst_send, Burst},
};
use comms_if::eqpt::{
    arm::{ArmChannel, ArmDems, AuxParams, JointPose},
    ChannelError,
};
use util::{
    cancel::{CancelToken, Cancelled},
    time::secs_to_duration,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of named pose moves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamedPoseParams {
    /// Pose the arm is stowed in.
    pub stow: JointPose,

    /// Default holding force level.
    pub force: u32,

    /// The retry is made with at least this force.
    pub retry_min_force: u32,

    /// Commands sent on the first attempt.
    pub bursts: u32,

    /// Commands sent on the retry.
    pub retry_bursts: u32,

    /// Units: Hz
    pub burst_rate_hz: f64,

    /// Largest per-joint error accepted as having arrived.
    pub tolerance: f64,

    /// Units: seconds
    pub read_timeout_s: f64,

    /// Wait after locking before streaming.
    ///
    /// Units: seconds
    pub lock_settle_s: f64,

    /// Wait after streaming before checking the pose.
    ///
    /// Units: seconds
    pub settle_s: f64,

    pub aux: AuxParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How a named pose move ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NamedPoseOutcome {
    /// The arm was measured within tolerance, `retried` if the second push was needed.
    Reached { retried: bool },

    /// The arm could not be confirmed at the pose even after the retry.
    NotConfirmed { last_error: Option<f64> },
}

#[derive(Debug, thiserror::Error)]
pub enum NamedPoseError {
    #[error("The pose has {found} joints but the arm has {expected}")]
    DofMismatch { expected: usize, found: usize },

    #[error("Could not lock the arm: {0}")]
    LockError(#[from] ChannelError),

    #[error("Move interrupted")]
    Cancelled(#[from] Cancelled),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NamedPoseParams {
    fn default() -> Self {
        Self {
            stow: JointPose::new(vec![-9.8, -87.8, 92.3, -7.7, 0.5, 10.0, 18.0]),
            force: 45_000,
            retry_min_force: 50_000,
            bursts: 30,
            retry_bursts: 50,
            burst_rate_hz: 10.0,
            tolerance: 5.0,
            read_timeout_s: 1.0,
            lock_settle_s: 0.2,
            settle_s: 0.8,
            aux: AuxParams {
                mode: 1,
                habr: 20,
                ply: 3,
            },
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Move to the stow pose, locking with `force` or the default force.
pub fn stow(
    arm: &dyn ArmChannel,
    force: Option<u32>,
    params: &NamedPoseParams,
    cancel: &CancelToken,
) -> Result<NamedPoseOutcome, NamedPoseError> {
    info!("Stowing arm");
    go_to(arm, &params.stow, force.unwrap_or(params.force), params, cancel)
}

/// Release the holding force straight away.
pub fn release(arm: &dyn ArmChannel) -> Result<(), ChannelError> {
    warn!("Releasing arm holding force, the arm may drop");
    arm.release_force()
}

/// Stream `pose`, check it was reached and push once more if not.
pub fn go_to(
    arm: &dyn ArmChannel,
    pose: &JointPose,
    force: u32,
    params: &NamedPoseParams,
    cancel: &CancelToken,
) -> Result<NamedPoseOutcome, NamedPoseError> {
    if pose.dof() != arm.dof() {
        return Err(NamedPoseError::DofMismatch {
            expected: arm.dof(),
            found: pose.dof(),
        });
    }

    let dems = ArmDems {
        pose: pose.clone(),
        aux: params.aux,
    };
    let read_timeout = secs_to_duration(params.read_timeout_s);

    arm.set_force(force)?;
    cancel.sleep(secs_to_duration(params.lock_settle_s))?;

    let mut last_error = None;
    let mut check = || {
        has_converged(pose, params.tolerance, || {
            let q = arm.read_pose(read_timeout);
            last_error = q.as_ref().and_then(|q| q.max_abs_diff(pose));
            q
        })
    };

    for retried in [false, true].iter().copied() {
        let (level, count) = if retried {
            (force.max(params.retry_min_force), params.retry_bursts)
        } else {
            (force, params.bursts)
        };

        if retried {
            warn!("Pose not reached, pushing again with force {}", level);
            arm.set_force(level)?;
        }

        burst_send(
            arm,
            &dems,
            Burst {
                count,
                rate_hz: params.burst_rate_hz,
            },
            cancel,
        )?;
        cancel.sleep(secs_to_duration(params.settle_s))?;

        match check() {
            Convergence::Reached => {
                info!("Pose reached");
                return Ok(NamedPoseOutcome::Reached { retried });
            }
            Convergence::NotReached => (),
            Convergence::Unavailable => warn!("Could not read the arm pose to check it"),
        }
    }

    warn!("Could not confirm the arm reached the pose");
    Ok(NamedPoseOutcome::NotConfirmed { last_error })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimArm;

    fn fast_params() -> NamedPoseParams {
        NamedPoseParams {
            bursts: 3,
            retry_bursts: 5,
            burst_rate_hz: 1000.0,
            read_timeout_s: 0.001,
            lock_settle_s: 0.0,
            settle_s: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_stow_first_try() {
        let arm = SimArm::new(JointPose::zeros(7));
        let params = fast_params();

        let outcome = stow(&arm, None, &params, &CancelToken::new()).unwrap();

        assert_eq!(outcome, NamedPoseOutcome::Reached { retried: false });
        assert_eq!(arm.sent().len(), 3);
        assert_eq!(arm.force_log(), vec![45_000]);
        assert!(arm.sent().iter().all(|s| s.dems.aux.mode == 1));
    }

    #[test]
    fn test_stow_retries_firmer() {
        // Slow tracking, three commands only get part of the way
        let arm = SimArm::new(JointPose::zeros(7)).with_tracking_gain(0.5);
        let params = fast_params();

        let outcome = stow(&arm, Some(20_000), &params, &CancelToken::new()).unwrap();

        assert_eq!(outcome, NamedPoseOutcome::Reached { retried: true });
        assert_eq!(arm.sent().len(), 8);
        assert_eq!(arm.force_log(), vec![20_000, 50_000]);
    }

    #[test]
    fn test_stow_unconfirmed() {
        let arm = SimArm::new(JointPose::zeros(7));
        arm.set_unavailable(true);

        let outcome = stow(&arm, None, &fast_params(), &CancelToken::new()).unwrap();
        assert_eq!(
            outcome,
            NamedPoseOutcome::NotConfirmed { last_error: None }
        );
    }

    #[test]
    fn test_release() {
        let arm = SimArm::new(JointPose::zeros(7));
        arm.set_force(50_000).unwrap();

        release(&arm).unwrap();
        assert_eq!(arm.force(), 0);
    }
}
