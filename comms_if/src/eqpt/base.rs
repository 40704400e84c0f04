//! # Legged Base Equipment Commands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::ChannelError;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Body frame velocity demand for the legged base.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct BaseVel {
    /// Forward velocity in meters/second.
    pub vx_ms: f64,

    /// Leftward velocity in meters/second.
    pub vy_ms: f64,

    /// Yaw rate in radians/second, following the right hand rule about the base's Z+ axis.
    pub vyaw_rads: f64,
}

/// Foot contact force reading, one element per foot (FR, FL, RR, RL).
pub type FootForce = [f64; 4];

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A single command issued to the base, used for logging and by simulated channels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum BaseCmdKind {
    StandDown,
    StandUp,
    RecoveryStand,
    Damp,
    StopMove,
    Move(BaseVel),
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Command channel to the legged base's sport controller.
///
/// As with the arm, commands are fire-and-forget and the channel is shared by `&self`.
pub trait BaseChannel: Send + Sync {
    /// Issue a single command.
    fn command(&self, cmd: BaseCmdKind) -> Result<(), ChannelError>;

    /// Latest foot force reading, if telemetry has been received.
    fn foot_force(&self) -> Option<FootForce>;

    /// Lower the body to the ground.
    fn stand_down(&self) -> Result<(), ChannelError> {
        self.command(BaseCmdKind::StandDown)
    }

    /// Raise the body to the standing height.
    fn stand_up(&self) -> Result<(), ChannelError> {
        self.command(BaseCmdKind::StandUp)
    }

    /// Recover to a balanced stand from any posture.
    fn recovery_stand(&self) -> Result<(), ChannelError> {
        self.command(BaseCmdKind::RecoveryStand)
    }

    /// Put all motors into damping mode.
    fn damp(&self) -> Result<(), ChannelError> {
        self.command(BaseCmdKind::Damp)
    }

    /// Stop any ongoing locomotion.
    fn stop_move(&self) -> Result<(), ChannelError> {
        self.command(BaseCmdKind::StopMove)
    }

    /// Command a body velocity. Must be repeated to keep moving.
    fn move_vel(&self, vel: BaseVel) -> Result<(), ChannelError> {
        self.command(BaseCmdKind::Move(vel))
    }
}
