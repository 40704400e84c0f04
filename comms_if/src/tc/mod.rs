//! # Telecommand module
//!
//! Definitions of the commands accepted by the motion executable. The command enums derive
//! `StructOpt` so they can be parsed directly from the command line, and `Serialize`/`Deserialize`
//! so they can be logged and archived alongside the session.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Trajectory record and replay commands
pub mod traj;
