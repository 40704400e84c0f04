//! # Pose convergence monitor
//!
//! Checks whether the measured arm pose has reached a target, and provides the bounded
//! "send, verify, resend" loop used wherever a single command may be lost on the wire.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use comms_if::eqpt::arm::{ArmChannel, ArmDems, JointPose};
use util::{
    cancel::{CancelToken, Cancelled},
    time::secs_to_duration,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the convergence loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergeParams {
    /// Largest per-joint error accepted as converged.
    ///
    /// Units: same as the joint angles (degrees for the reference arm)
    pub tolerance: f64,

    /// Wait between resending the command and checking again.
    ///
    /// Units: seconds
    pub interval_s: f64,

    /// Upper bound on the number of times the command is sent.
    pub max_attempts: usize,

    /// Timeout of each pose read.
    ///
    /// Units: seconds
    pub read_timeout_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of a single convergence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Every joint is within tolerance of the target.
    Reached,

    /// At least one joint is outside the tolerance.
    NotReached,

    /// No pose could be read, or the pose read has the wrong number of joints.
    Unavailable,
}

/// Outcome of [`retry_until`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The predicate held after `attempts` actions.
    Converged { attempts: usize },

    /// The predicate still did not hold after the maximum number of actions.
    TimedOut { attempts: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    #[error("No pose could be read from the arm in {attempts} attempts")]
    ChannelUnavailable { attempts: usize },

    #[error("The arm did not converge after {attempts} attempts (last error {last_error:?})")]
    NotConverged {
        attempts: usize,
        last_error: Option<f64>,
    },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ConvergeParams {
    fn default() -> Self {
        Self {
            tolerance: 2.0,
            interval_s: 0.1,
            max_attempts: 100,
            read_timeout_s: 1.5,
        }
    }
}

impl ConvergeParams {
    pub fn read_timeout(&self) -> Duration {
        secs_to_duration(self.read_timeout_s)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read the pose once and compare it against `target`.
pub fn has_converged<F>(target: &JointPose, tolerance: f64, read: F) -> Convergence
where
    F: FnOnce() -> Option<JointPose>,
{
    match read().and_then(|cur| cur.max_abs_diff(target)) {
        Some(err) if err <= tolerance => Convergence::Reached,
        Some(_) => Convergence::NotReached,
        None => Convergence::Unavailable,
    }
}

/// Run `action` until `predicate` holds, at most `max_attempts` times.
///
/// The predicate is checked before each action, and once more after the last one. Between an
/// action and the next check the loop sleeps for `interval`, and a cancellation is observed there.
pub fn retry_until<P, A>(
    mut predicate: P,
    mut action: A,
    interval: Duration,
    max_attempts: usize,
    cancel: &CancelToken,
) -> Result<RetryOutcome, Cancelled>
where
    P: FnMut() -> bool,
    A: FnMut(),
{
    for attempts in 0..max_attempts {
        cancel.check()?;

        if predicate() {
            return Ok(RetryOutcome::Converged { attempts });
        }

        action();
        cancel.sleep(interval)?;
    }

    if predicate() {
        Ok(RetryOutcome::Converged {
            attempts: max_attempts,
        })
    } else {
        Ok(RetryOutcome::TimedOut {
            attempts: max_attempts,
        })
    }
}

/// Send `dems` until the arm reports it has converged on the demanded pose.
///
/// Returns the number of sends made. Fails with `ChannelUnavailable` if no pose could be read at
/// all, and `NotConverged` if the attempts ran out while the arm was reporting poses.
pub fn move_until_converged(
    arm: &dyn ArmChannel,
    dems: &ArmDems,
    params: &ConvergeParams,
    cancel: &CancelToken,
) -> Result<usize, ConvergeError> {
    let mut any_available = false;
    let mut last_error = None;
    let read_timeout = params.read_timeout();

    let outcome = retry_until(
        || {
            let conv = has_converged(&dems.pose, params.tolerance, || {
                let pose = arm.read_pose(read_timeout);
                if let Some(ref p) = pose {
                    last_error = p.max_abs_diff(&dems.pose);
                }
                pose
            });
            if conv != Convergence::Unavailable {
                any_available = true;
            }
            conv == Convergence::Reached
        },
        || {
            if let Err(e) = arm.send_pose(dems) {
                warn!("Could not send pose demand: {}", e);
            }
        },
        secs_to_duration(params.interval_s),
        params.max_attempts,
        cancel,
    )?;

    match outcome {
        RetryOutcome::Converged { attempts } => {
            debug!("Converged after {} sends", attempts);
            Ok(attempts)
        }
        RetryOutcome::TimedOut { attempts } if !any_available => {
            Err(ConvergeError::ChannelUnavailable { attempts })
        }
        RetryOutcome::TimedOut { attempts } => Err(ConvergeError::NotConverged {
            attempts,
            last_error,
        }),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimArm;
    use std::cell::Cell;

    fn fast_params() -> ConvergeParams {
        ConvergeParams {
            tolerance: 2.0,
            interval_s: 0.001,
            max_attempts: 10,
            read_timeout_s: 0.001,
        }
    }

    #[test]
    fn test_has_converged() {
        let target = JointPose::new(vec![10.0, 20.0]);

        assert_eq!(
            has_converged(&target, 2.0, || Some(JointPose::new(vec![11.0, 18.5]))),
            Convergence::Reached
        );
        assert_eq!(
            has_converged(&target, 2.0, || Some(JointPose::new(vec![11.0, 17.5]))),
            Convergence::NotReached
        );
        assert_eq!(has_converged(&target, 2.0, || None), Convergence::Unavailable);
        assert_eq!(
            has_converged(&target, 2.0, || Some(JointPose::zeros(3))),
            Convergence::Unavailable
        );

        // Zero is a valid pose, not a missing one
        assert_eq!(
            has_converged(&JointPose::zeros(2), 0.0, || Some(JointPose::zeros(2))),
            Convergence::Reached
        );
    }

    #[test]
    fn test_retry_until_bounded() {
        let calls = Cell::new(0);
        let outcome = retry_until(
            || false,
            || calls.set(calls.get() + 1),
            Duration::from_millis(1),
            5,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, RetryOutcome::TimedOut { attempts: 5 });
        assert_eq!(calls.get(), 5);

        let outcome = retry_until(
            || calls.get() >= 7,
            || calls.set(calls.get() + 1),
            Duration::from_millis(1),
            5,
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(outcome, RetryOutcome::Converged { attempts: 2 });
    }

    #[test]
    fn test_retry_until_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();

        assert_eq!(
            retry_until(|| false, || (), Duration::from_secs(1), 100, &cancel),
            Err(Cancelled)
        );
    }

    #[test]
    fn test_move_until_converged_lossy() {
        let arm = SimArm::new(JointPose::zeros(3))
            .with_tracking_gain(0.5)
            .with_drop_every(3);
        arm.set_force(50000).unwrap();

        let dems = ArmDems::from_pose(JointPose::new(vec![20.0, -20.0, 5.0]));
        let mut params = fast_params();
        params.max_attempts = 50;

        let sends = move_until_converged(&arm, &dems, &params, &CancelToken::new()).unwrap();
        assert!(sends > 1);
    }

    #[test]
    fn test_move_until_converged_unavailable() {
        let arm = SimArm::new(JointPose::zeros(3));
        arm.set_unavailable(true);

        let dems = ArmDems::from_pose(JointPose::new(vec![20.0, -20.0, 5.0]));
        let res = move_until_converged(&arm, &dems, &fast_params(), &CancelToken::new());

        assert!(matches!(
            res,
            Err(ConvergeError::ChannelUnavailable { attempts: 10 })
        ));
    }

    #[test]
    fn test_move_until_converged_released_arm() {
        // Released arm never follows the demand
        let arm = SimArm::new(JointPose::zeros(3));

        let dems = ArmDems::from_pose(JointPose::new(vec![20.0, -20.0, 5.0]));
        let res = move_until_converged(&arm, &dems, &fast_params(), &CancelToken::new());

        match res {
            Err(ConvergeError::NotConverged {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 10);
                assert_eq!(last_error, Some(20.0));
            }
            r => panic!("Unexpected result {:?}", r),
        }
    }
}
