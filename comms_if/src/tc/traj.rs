//! # Trajectory telecommands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use structopt::StructOpt;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A command that can be completed by the trajectory engine.
///
/// Optional arguments fall back to the defaults in the motion parameter file.
#[derive(Debug, Clone, Serialize, Deserialize, StructOpt)]
pub enum TrajCmd {
    /// Record a trajectory by moving the released arm by hand.
    ///
    /// Recording stops on Ctrl+C.
    #[structopt(name = "record")]
    Record {
        /// File to write the trajectory to.
        path: PathBuf,

        /// Sampling rate in Hz.
        rate_hz: Option<f64>,
    },

    /// Replay a trajectory resampled onto a uniform time grid.
    #[structopt(name = "play")]
    Play {
        /// Trajectory file to replay.
        path: PathBuf,

        /// Playback speed factor, 1.0 is the recorded speed.
        speed: Option<f64>,

        /// Holding force level to lock the arm with.
        force: Option<u32>,
    },

    /// Replay the recorded waypoints at their original timestamps without interpolation.
    #[structopt(name = "play_exact")]
    PlayExact {
        /// Trajectory file to replay.
        path: PathBuf,

        /// Holding force level to lock the arm with.
        force: Option<u32>,

        /// Rate at which the repeated commands of a burst are sent, in Hz.
        burst_rate_hz: Option<f64>,

        /// Number of identical commands sent per waypoint.
        bursts: Option<u32>,
    },

    /// Replay a trajectory through the limited-motion trajectory generator.
    #[structopt(name = "play_smooth")]
    PlaySmooth {
        /// Trajectory file to replay.
        path: PathBuf,

        /// Playback speed factor, scales the motion limits.
        speed: Option<f64>,

        /// Holding force level to lock the arm with.
        force: Option<u32>,

        /// Control tick rate in Hz.
        control_hz: Option<f64>,
    },

    /// Run a coordinated arm and base sequence from a plan file in the params directory.
    #[structopt(name = "sequence")]
    Sequence {
        /// Plan file name, relative to the params directory.
        plan: String,
    },

    /// Move the arm to the stow pose and verify it got there.
    #[structopt(name = "stow")]
    Stow {
        /// Holding force level to lock the arm with.
        force: Option<u32>,
    },

    /// Release the arm's holding force immediately.
    #[structopt(name = "release")]
    Release,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
