//! # Motion library.
//!
//! This library allows other crates in the workspace to access items defined inside the motion
//! crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Arm sequences - resolves joint and Cartesian targets and drives the arm through them
pub mod arm_seq;

/// Base control - posture changes and relative moves of the legged base
pub mod base_ctrl;

/// Coordinator - runs arm and base tasks concurrently, synchronised at milestones
pub mod coord;

/// Inverse kinematics - planar geometric solver for Cartesian targets
pub mod ik;

/// Limited-motion trajectory generation - jerk limited per-tick shaping between waypoints
pub mod lmtg;

/// Convergence monitor - checks the measured pose against a target, bounded resend loops
pub mod monitor;

/// Named poses - stow and release
pub mod named_pose;

/// Executable parameters
pub mod params;

/// Trajectory recorder - samples the hand-guided arm into a trajectory file
pub mod recorder;

/// Replay engines - exact, resampled and smooth playback of recorded trajectories
pub mod replay;

/// SDK client - drives the real arm through the vendor SDK tools
pub mod sdk_client;

/// Simulated arm and base
pub mod sim;

/// Trajectories - persisted format, loading, saving and resampling
pub mod traj;
