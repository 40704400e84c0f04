//! # Trajectory module
//!
//! A trajectory is a timestamped sequence of joint poses captured by the recorder. It is persisted
//! as JSON:
//!
//! ```json
//! { "sample_rate_hz": 15.0, "unit": "deg", "samples": [ { "t": 0.0, "q": [0, 0, 0, 0, 0, 0, 0] } ] }
//! ```
//!
//! `hz` is accepted in place of `sample_rate_hz` for older recordings, and `unit` is optional.
//! Trajectories are validated when they are built or loaded and are not modified afterwards, each
//! replay loads its own copy.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod resample;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::arm::JointPose;
use serde::{Deserialize, Serialize};
use std::{
    convert::TryFrom,
    fs,
    path::{Path, PathBuf},
};

pub use resample::*;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single timestamped pose.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Waypoint {
    /// Seconds since the start of the recording.
    pub t: f64,

    /// Joint angles at `t`.
    pub q: JointPose,
}

/// A validated sequence of waypoints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "RawTrajectory")]
pub struct Trajectory {
    sample_rate_hz: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<AngleUnit>,

    #[serde(rename = "samples")]
    waypoints: Vec<Waypoint>,
}

/// Unvalidated trajectory as it appears on disk.
#[derive(Deserialize)]
struct RawTrajectory {
    #[serde(alias = "hz")]
    sample_rate_hz: f64,

    #[serde(default)]
    unit: Option<AngleUnit>,

    samples: Vec<Waypoint>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Unit of the joint angles in a trajectory.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleUnit {
    #[serde(rename = "deg")]
    Degrees,

    #[serde(rename = "rad")]
    Radians,
}

#[derive(Debug, thiserror::Error)]
pub enum TrajError {
    #[error("The trajectory contains no samples")]
    Empty,

    #[error("Expected at least 2 samples but the trajectory contains {0}")]
    InsufficientSamples(usize),

    #[error("The playback speed must be positive and finite, found {0}")]
    InvalidSpeed(f64),

    #[error("The sample rate must be positive and finite, found {0}")]
    InvalidSampleRate(f64),

    #[error("Resampling would produce {points} samples, more than the {max} supported")]
    TooManySamples { points: f64, max: usize },

    #[error("Sample {index} has an invalid timestamp ({t})")]
    InvalidTimestamp { index: usize, t: f64 },

    #[error("Sample {index} is earlier than the sample before it")]
    NonMonotonic { index: usize },

    #[error("Sample {index} has {found} joint values, expected {expected}")]
    DofMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Sample {index} contains a non-finite joint value")]
    NonFinitePose { index: usize },

    #[error("Could not find a trajectory at {0:?} or in the trajectory directory")]
    NotFound(PathBuf),

    #[error("Could not access {0:?}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Malformed trajectory file: {0}")]
    Parse(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Trajectory {
    /// Build a trajectory, validating the waypoints.
    ///
    /// Requires at least one waypoint, finite timestamps `>= 0` that never decrease, and the same
    /// number of finite joint values in every pose.
    ///
    /// Consecutive waypoints may share a timestamp. Exact replay then sends their bursts back to
    /// back, and interpolation jumps straight to the later pose.
    pub fn new(
        sample_rate_hz: f64,
        unit: Option<AngleUnit>,
        waypoints: Vec<Waypoint>,
    ) -> Result<Self, TrajError> {
        if !sample_rate_hz.is_finite() || sample_rate_hz <= 0.0 {
            return Err(TrajError::InvalidSampleRate(sample_rate_hz));
        }

        let first = waypoints.first().ok_or(TrajError::Empty)?;
        let dof = first.q.dof();

        let mut last_t = 0.0;
        for (index, w) in waypoints.iter().enumerate() {
            if !w.t.is_finite() || w.t < 0.0 {
                return Err(TrajError::InvalidTimestamp { index, t: w.t });
            }
            if w.t < last_t {
                return Err(TrajError::NonMonotonic { index });
            }
            if w.q.dof() != dof {
                return Err(TrajError::DofMismatch {
                    index,
                    expected: dof,
                    found: w.q.dof(),
                });
            }
            if !w.q.is_finite() {
                return Err(TrajError::NonFinitePose { index });
            }
            last_t = w.t;
        }

        Ok(Self {
            sample_rate_hz,
            unit,
            waypoints,
        })
    }

    /// Load and validate a trajectory from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TrajError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|e| TrajError::Io(path.to_path_buf(), e))?;

        Self::from_json(&s)
    }

    /// Parse and validate a trajectory from a JSON string.
    pub fn from_json(s: &str) -> Result<Self, TrajError> {
        serde_json::from_str(s).map_err(TrajError::Parse)
    }

    /// Persist the trajectory as pretty JSON, creating parent directories if needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TrajError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| TrajError::Io(parent.to_path_buf(), e))?;
            }
        }

        let s = serde_json::to_string_pretty(self).map_err(TrajError::Parse)?;
        fs::write(path, s).map_err(|e| TrajError::Io(path.to_path_buf(), e))
    }

    /// Find the trajectory file to replay.
    ///
    /// The path is used as given if it exists, otherwise a file of the same name is looked for in
    /// `traj_dir`.
    pub fn resolve_path<P: AsRef<Path>, D: AsRef<Path>>(
        path: P,
        traj_dir: D,
    ) -> Result<PathBuf, TrajError> {
        let path = path.as_ref();

        if path.is_file() {
            return Ok(path.to_path_buf());
        }

        if let Some(name) = path.file_name() {
            let candidate = traj_dir.as_ref().join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(TrajError::NotFound(path.to_path_buf()))
    }

    /// Check that every pose has the given number of degrees of freedom.
    pub fn check_dof(&self, dof: usize) -> Result<(), TrajError> {
        match self.waypoints.first() {
            Some(w) if w.q.dof() != dof => Err(TrajError::DofMismatch {
                index: 0,
                expected: dof,
                found: w.q.dof(),
            }),
            _ => Ok(()),
        }
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// Explicit unit of the joint angles, if the file carried one.
    pub fn unit(&self) -> Option<AngleUnit> {
        self.unit
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Number of degrees of freedom of every pose.
    pub fn dof(&self) -> usize {
        self.waypoints.first().map(|w| w.q.dof()).unwrap_or(0)
    }

    /// Timestamp of the last waypoint.
    pub fn duration_s(&self) -> f64 {
        self.waypoints.last().map(|w| w.t).unwrap_or(0.0)
    }
}

impl TryFrom<RawTrajectory> for Trajectory {
    type Error = TrajError;

    fn try_from(raw: RawTrajectory) -> Result<Self, Self::Error> {
        Trajectory::new(raw.sample_rate_hz, raw.unit, raw.samples)
    }
}

impl std::fmt::Display for AngleUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AngleUnit::Degrees => write!(f, "deg"),
            AngleUnit::Radians => write!(f, "rad"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) fn wp(t: f64, q: Vec<f64>) -> Waypoint {
    Waypoint {
        t,
        q: JointPose::new(q),
    }
}
