//! # Arm pose sequences
//!
//! A sequence is an ordered list of arm targets, each given either as joint angles or as a
//! Cartesian gripper position solved through an inverse kinematics solver. Targets are resolved up
//! front so that an unreachable target aborts the sequence before the arm moves at all.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::monitor::{move_until_converged, ConvergeError, ConvergeParams};
use comms_if::eqpt::arm::{ArmChannel, ArmDems, AuxParams, JointPose};
use util::cancel::CancelToken;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Cartesian target for the gripper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartesianTarget {
    /// Gripper position in the arm base frame.
    ///
    /// Units: meters
    pub position: [f64; 3],

    /// Direction the gripper should point along.
    pub orientation: [f64; 3],

    /// Gripper opening, replaces the last joint of the solution when given.
    #[serde(default)]
    pub gripper: Option<f64>,
}

/// Sequence targets after inverse kinematics, `None` for a skipped target.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSequence {
    pub poses: Vec<Option<JointPose>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A target in an arm sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArmTarget {
    /// Explicit joint angles.
    Joint { joints: JointPose },

    /// Gripper pose solved by inverse kinematics.
    Cartesian(CartesianTarget),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IkError {
    #[error("Target {0:?} is out of reach")]
    Unreachable([f64; 3]),
}

#[derive(Debug, thiserror::Error)]
pub enum SequenceError {
    #[error("Target {index} is unreachable: {source}")]
    Unreachable { index: usize, source: IkError },

    #[error("Target {0} is Cartesian but no inverse kinematics solver is available")]
    NoSolver(usize),

    #[error("Target {index} has {found} joints but the arm has {expected}")]
    DofMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Target {index} not reached: {source}")]
    NotReached {
        index: usize,
        source: ConvergeError,
    },
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Inverse kinematics for the arm.
pub trait IkSolver: Send + Sync {
    /// Joint angles placing the gripper at `position` pointing along `orientation`.
    fn solve(&self, position: [f64; 3], orientation: [f64; 3]) -> Result<JointPose, IkError>;
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ResolvedSequence {
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Resolve every target of a sequence into joint angles.
///
/// If `skip_unreachable` is set an unreachable target is kept as `None` so that indices into the
/// sequence are unchanged, otherwise the first one aborts the whole sequence.
pub fn resolve(
    targets: &[ArmTarget],
    solver: Option<&dyn IkSolver>,
    dof: usize,
    skip_unreachable: bool,
) -> Result<ResolvedSequence, SequenceError> {
    let mut poses = Vec::with_capacity(targets.len());

    for (index, target) in targets.iter().enumerate() {
        let pose = match target {
            ArmTarget::Joint { joints } => joints.clone(),
            ArmTarget::Cartesian(c) => {
                let solver = solver.ok_or(SequenceError::NoSolver(index))?;

                match solver.solve(c.position, c.orientation) {
                    Ok(mut q) => {
                        if let (Some(g), Some(last)) = (c.gripper, q.dof().checked_sub(1)) {
                            q[last] = g;
                        }
                        q
                    }
                    Err(source) if skip_unreachable => {
                        warn!("Skipping target {}: {}", index, source);
                        poses.push(None);
                        continue;
                    }
                    Err(source) => return Err(SequenceError::Unreachable { index, source }),
                }
            }
        };

        if pose.dof() != dof {
            return Err(SequenceError::DofMismatch {
                index,
                expected: dof,
                found: pose.dof(),
            });
        }

        poses.push(Some(pose));
    }

    Ok(ResolvedSequence { poses })
}

/// Drive the arm to one resolved target of a sequence.
///
/// Skipped targets return straight away.
pub fn drive_to(
    arm: &dyn ArmChannel,
    seq: &ResolvedSequence,
    index: usize,
    aux: AuxParams,
    params: &ConvergeParams,
    cancel: &CancelToken,
) -> Result<(), SequenceError> {
    let pose = match seq.poses.get(index) {
        Some(Some(p)) => p.clone(),
        _ => return Ok(()),
    };

    let sends = move_until_converged(arm, &ArmDems { pose, aux }, params, cancel)
        .map_err(|source| SequenceError::NotReached { index, source })?;

    info!("Arm reached target {} after {} sends", index, sends);
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Solver reaching anything within 0.5 m, with the first joint set to the target's x.
    pub(crate) struct ReachSolver;

    impl IkSolver for ReachSolver {
        fn solve(&self, position: [f64; 3], _orientation: [f64; 3]) -> Result<JointPose, IkError> {
            let r = position.iter().map(|x| x * x).sum::<f64>().sqrt();
            if r > 0.5 {
                return Err(IkError::Unreachable(position));
            }

            let mut q = JointPose::zeros(7);
            q[0] = position[0] * 100.0;
            Ok(q)
        }
    }

    fn cart(x: f64, gripper: Option<f64>) -> ArmTarget {
        ArmTarget::Cartesian(CartesianTarget {
            position: [x, 0.0, 0.0],
            orientation: [0.0, 0.0, -1.0],
            gripper,
        })
    }

    #[test]
    fn test_resolve() {
        let targets = vec![
            cart(0.3, Some(20.0)),
            ArmTarget::Joint {
                joints: JointPose::new(vec![1.0; 7]),
            },
        ];

        let seq = resolve(&targets, Some(&ReachSolver as &dyn IkSolver), 7, false).unwrap();
        let first = seq.poses[0].as_ref().unwrap();
        assert_eq!(first[0], 30.0);
        assert_eq!(first[6], 20.0);
        assert_eq!(seq.poses[1], Some(JointPose::new(vec![1.0; 7])));
    }

    #[test]
    fn test_resolve_unreachable() {
        let targets = vec![cart(0.3, None), cart(0.9, None), cart(0.1, None)];

        assert!(matches!(
            resolve(&targets, Some(&ReachSolver as &dyn IkSolver), 7, false),
            Err(SequenceError::Unreachable { index: 1, .. })
        ));

        let seq = resolve(&targets, Some(&ReachSolver as &dyn IkSolver), 7, true).unwrap();
        assert_eq!(seq.len(), 3);
        assert!(seq.poses[1].is_none());

        assert!(matches!(
            resolve(&targets, None, 7, false),
            Err(SequenceError::NoSolver(0))
        ));
        assert!(matches!(
            resolve(&targets, Some(&ReachSolver as &dyn IkSolver), 6, false),
            Err(SequenceError::DofMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_targets_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            targets: Vec<ArmTarget>,
        }

        let w: Wrapper = toml::from_str(
            r#"
            targets = [
                { joints = [0.0, 1.0] },
                { position = [0.3, 0.0, 0.02], orientation = [0.0, 0.0, -1.0], gripper = 20.0 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(
            w.targets[0],
            ArmTarget::Joint {
                joints: JointPose::new(vec![0.0, 1.0])
            }
        );
        assert_eq!(w.targets[1], cart_at([0.3, 0.0, 0.02], Some(20.0)));
    }

    fn cart_at(position: [f64; 3], gripper: Option<f64>) -> ArmTarget {
        ArmTarget::Cartesian(CartesianTarget {
            position,
            orientation: [0.0, 0.0, -1.0],
            gripper,
        })
    }
}
