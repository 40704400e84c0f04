//! # Planar inverse kinematics
//!
//! Geometric inverse kinematics for an arm whose shoulder, elbow and wrist pitch joints move the
//! gripper in the vertical plane selected by the base yaw joint. The gripper is pointed along the
//! projection of the requested orientation onto that plane, the roll joints are left at zero.
//!
//! Angles are computed in the geometric convention (shoulder from the horizontal, elbow and wrist
//! relative to the previous link, all positive upwards) and then mapped onto the controller's joint
//! angles with the per-joint signs and offsets from the parameter file.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::arm_seq::{IkError, IkSolver};
use comms_if::eqpt::arm::JointPose;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of joints set by the solver (base yaw, shoulder, elbow, wrist pitch).
pub const NUM_SOLVED_JOINTS: usize = 4;

/// Index of each solved joint in the arm's joint vector.
const JOINT_INDICES: [usize; NUM_SOLVED_JOINTS] = [0, 1, 2, 4];

/// Slack on the reach limits.
///
/// Units: meters
const REACH_EPS_M: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Geometry of the arm.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IkParams {
    /// Height of the shoulder axis above the arm base frame origin.
    ///
    /// Units: meters
    pub shoulder_height_m: f64,

    /// Shoulder to elbow length.
    ///
    /// Units: meters
    pub shoulder_length_m: f64,

    /// Elbow to wrist length.
    ///
    /// Units: meters
    pub elbow_length_m: f64,

    /// Wrist to gripper tip length.
    ///
    /// Units: meters
    pub tool_length_m: f64,

    /// Sign applied to each solved joint angle (base, shoulder, elbow, wrist).
    pub joint_signs: [f64; NUM_SOLVED_JOINTS],

    /// Offset added to each solved joint angle after the sign.
    ///
    /// Units: degrees
    pub joint_offsets_deg: [f64; NUM_SOLVED_JOINTS],

    /// Number of joints of the arm, including the gripper.
    pub dof: usize,
}

/// Planar geometric solver.
#[derive(Debug, Clone)]
pub struct PlanarIk {
    params: IkParams,
}

/// Geometric joint angles.
///
/// Units: radians
#[derive(Debug, Clone, Copy, PartialEq)]
struct PlanarAngles {
    base: f64,
    shoulder: f64,
    elbow: f64,
    wrist: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for IkParams {
    fn default() -> Self {
        Self {
            shoulder_height_m: 0.12,
            shoulder_length_m: 0.27,
            elbow_length_m: 0.25,
            tool_length_m: 0.12,
            joint_signs: [1.0; NUM_SOLVED_JOINTS],
            joint_offsets_deg: [0.0; NUM_SOLVED_JOINTS],
            dof: 7,
        }
    }
}

impl PlanarIk {
    pub fn new(params: IkParams) -> Self {
        Self { params }
    }

    fn solve_planar(
        &self,
        position: Vector3<f64>,
        orientation: Vector3<f64>,
    ) -> Option<PlanarAngles> {
        let p = &self.params;
        let (l1, l2) = (p.shoulder_length_m, p.elbow_length_m);

        let base = position.y.atan2(position.x);
        let radial = Vector3::new(base.cos(), base.sin(), 0.0);

        // Gripper direction within the arm plane, straight down if none is given
        let tool_pitch = if orientation.norm() > 1e-9 {
            orientation.z.atan2(orientation.dot(&radial))
        } else {
            -std::f64::consts::FRAC_PI_2
        };

        // Wrist centre in the arm plane, relative to the shoulder
        let r = position.dot(&radial) - p.tool_length_m * tool_pitch.cos();
        let z = position.z - p.shoulder_height_m - p.tool_length_m * tool_pitch.sin();
        let d = (r * r + z * z).sqrt();

        if d > l1 + l2 + REACH_EPS_M || d < (l1 - l2).abs() - REACH_EPS_M {
            return None;
        }

        // Elbow up
        let cos_elbow = ((d * d - l1 * l1 - l2 * l2) / (2.0 * l1 * l2)).max(-1.0).min(1.0);
        let elbow = -cos_elbow.acos();
        let shoulder = z.atan2(r) - (l2 * elbow.sin()).atan2(l1 + l2 * elbow.cos());

        Some(PlanarAngles {
            base,
            shoulder,
            elbow,
            wrist: tool_pitch - shoulder - elbow,
        })
    }

    /// Gripper tip position for the given geometric angles.
    #[cfg(test)]
    fn forward(&self, a: &PlanarAngles) -> Vector3<f64> {
        let p = &self.params;
        let a1 = a.shoulder;
        let a2 = a1 + a.elbow;
        let a3 = a2 + a.wrist;

        let r = p.shoulder_length_m * a1.cos()
            + p.elbow_length_m * a2.cos()
            + p.tool_length_m * a3.cos();
        let z = p.shoulder_height_m
            + p.shoulder_length_m * a1.sin()
            + p.elbow_length_m * a2.sin()
            + p.tool_length_m * a3.sin();

        Vector3::new(r * a.base.cos(), r * a.base.sin(), z)
    }
}

impl IkSolver for PlanarIk {
    fn solve(&self, position: [f64; 3], orientation: [f64; 3]) -> Result<JointPose, IkError> {
        let angles = self
            .solve_planar(Vector3::from(position), Vector3::from(orientation))
            .ok_or(IkError::Unreachable(position))?;

        trace!("IK solution for {:?}: {:?}", position, angles);

        let geometric = [angles.base, angles.shoulder, angles.elbow, angles.wrist];
        let mut q = JointPose::zeros(self.params.dof);

        for (i, (angle, idx)) in geometric.iter().zip(JOINT_INDICES.iter()).enumerate() {
            if *idx < q.dof() {
                q[*idx] =
                    self.params.joint_signs[i] * angle.to_degrees() + self.params.joint_offsets_deg[i];
            }
        }

        Ok(q)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
