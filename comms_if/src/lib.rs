//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the motion software: the equipment
//! interfaces used to command the arm and the legged base, and the command definitions accepted
//! by the executable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod tc;

/// Command and response definitions for equipment (arm and base)
pub mod eqpt;
