//! # Equipment Interface
//!
//! This module defines the interface structures which will be sent to the equipment controllers,
//! and the channels used to send them.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod arm;
pub mod base;
mod cell;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use cell::LatestCell;

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// Errors which can be reported by an equipment channel.
///
/// Channels are fire-and-forget, so an `Ok` from a send only means the command left this process,
/// not that the equipment acted on it.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Could not reach the equipment: {0}")]
    Transport(String),

    #[error("The equipment rejected the command: {0}")]
    Rejected(String),

    #[error("Could not serialize the command: {0}")]
    SerializationError(serde_json::Error),

    #[error("IO error on the channel: {0}")]
    Io(#[from] std::io::Error),
}
