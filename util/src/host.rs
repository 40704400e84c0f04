//! Host platform utility functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::path::PathBuf;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable which points at the software root, containing the `params` directory
/// and the sessions directory.
pub const SW_ROOT_ENV: &str = "PNP_MOTION_ROOT";

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the software root directory.
///
/// Uses `$PNP_MOTION_ROOT` if it is set and not empty, otherwise the current working directory.
pub fn get_sw_root() -> std::io::Result<PathBuf> {
    match std::env::var_os(SW_ROOT_ENV) {
        Some(p) if !p.is_empty() => Ok(PathBuf::from(p)),
        _ => std::env::current_dir(),
    }
}
