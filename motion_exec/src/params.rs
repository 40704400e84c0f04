//! # Motion Executable Parameters
//!
//! This module provides the parameters of the motion executable, loaded from `motion_exec.toml`.
//! Every section falls back to its defaults when it is left out of the file. Rates, periods and
//! repeat counts are checked by [`MotionExecParams::validate`] before any equipment is driven.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    base_ctrl::BaseParams,
    ik::IkParams,
    monitor::ConvergeParams,
    named_pose::NamedPoseParams,
    recorder::RecordParams,
    replay::{ExactParams, PlayParams, SmoothParams},
    sdk_client::SdkParams,
};
use comms_if::eqpt::arm::DEFAULT_DOF;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionExecParams {
    /// Degrees of freedom of the arm, including the gripper.
    pub dof: usize,

    /// Directory searched for trajectory files not found at the given path, relative to the
    /// software root.
    pub traj_dir: PathBuf,

    pub record: RecordParams,
    pub exact: ExactParams,
    pub play: PlayParams,
    pub smooth: SmoothParams,
    pub converge: ConvergeParams,
    pub named: NamedPoseParams,
    pub base: BaseParams,
    pub ik: IkParams,
    pub sdk: SdkParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("{0} must be positive and finite, found {1}")]
    NotPositive(&'static str, f64),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),

    #[error("The stow pose has {found} joints, expected {expected}")]
    StowDofMismatch { expected: usize, found: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for MotionExecParams {
    fn default() -> Self {
        Self {
            dof: DEFAULT_DOF,
            traj_dir: PathBuf::from("trajectories"),
            record: RecordParams::default(),
            exact: ExactParams::default(),
            play: PlayParams::default(),
            smooth: SmoothParams::default(),
            converge: ConvergeParams::default(),
            named: NamedPoseParams::default(),
            base: BaseParams::default(),
            ik: IkParams::default(),
            sdk: SdkParams::default(),
        }
    }
}

impl MotionExecParams {
    /// Check every section.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.dof == 0 {
            return Err(ParamsError::ZeroCount("dof"));
        }

        positive("record.rate_hz", self.record.rate_hz)?;
        self.exact.validate()?;
        self.play.validate()?;
        self.smooth.validate()?;

        positive("converge.interval_s", self.converge.interval_s)?;
        at_least_one("converge.max_attempts", self.converge.max_attempts as u64)?;

        at_least_one("named.bursts", self.named.bursts as u64)?;
        at_least_one("named.retry_bursts", self.named.retry_bursts as u64)?;
        positive("named.burst_rate_hz", self.named.burst_rate_hz)?;
        if self.named.stow.dof() != self.dof {
            return Err(ParamsError::StowDofMismatch {
                expected: self.dof,
                found: self.named.stow.dof(),
            });
        }

        positive("base.cmd_period_s", self.base.cmd_period_s)?;
        positive("base.max_vx_ms", self.base.max_vx_ms)?;
        positive("base.max_vy_ms", self.base.max_vy_ms)?;
        positive("base.max_vyaw_rads", self.base.max_vyaw_rads)?;

        Ok(())
    }
}

impl ExactParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        at_least_one("exact.bursts", self.bursts as u64)?;
        positive("exact.burst_rate_hz", self.burst_rate_hz)
    }
}

impl PlayParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        positive("play.speed", self.speed)?;
        at_least_one("play.bursts", self.bursts as u64)?;
        positive("play.burst_rate_hz", self.burst_rate_hz)
    }
}

impl SmoothParams {
    pub fn validate(&self) -> Result<(), ParamsError> {
        positive("smooth.speed", self.speed)?;
        positive("smooth.control_hz", self.control_hz)?;
        at_least_one("smooth.stream_repeats", self.stream_repeats as u64)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn positive(name: &'static str, value: f64) -> Result<(), ParamsError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParamsError::NotPositive(name, value))
    }
}

fn at_least_one(name: &'static str, count: u64) -> Result<(), ParamsError> {
    if count >= 1 {
        Ok(())
    } else {
        Err(ParamsError::ZeroCount(name))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
