//! Session management
//!
//! A session is one run of an executable. It owns a timestamped directory holding the log file,
//! CSV archives and any JSON snapshots saved during the run, and it fixes the process-wide epoch
//! that log lines are timestamped against.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use conquer_once::OnceCell;
use serde::Serialize;
use std::{
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::time;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

static SESSION_EPOCH: OnceCell<DateTime<Utc>> = OnceCell::uninit();

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// A chrono format string which diplays a timestamp. See
/// https://docs.rs/chrono/0.4.11/chrono/format/strftime/index.html for more
/// information.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A struct storing information about the current session
#[derive(Debug, Clone)]
pub struct Session {
    /// The root directory for this session
    pub session_root: PathBuf,

    /// The root directory for this session's archives
    pub arch_root: PathBuf,

    /// The path to the session's log file
    pub log_file_path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors associated with the session module.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Cannot find the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot create the session directory: {0}")]
    CannotCreateDir(std::io::Error),

    #[error(
        "Cannot initialise the session epoch, have you already initialised the \
         session? (conquer_once error: {0})"
    )]
    CannotInitEpoch(conquer_once::TryInitError),

    #[error("Cannot get the epoch time, did you forget to initialise the session?")]
    CannotGetEpoch,

    #[error("Cannot write {0:?}: {1}")]
    SaveIoError(PathBuf, std::io::Error),

    #[error("Cannot serialize data for {0:?}: {1}")]
    SaveSerError(PathBuf, serde_json::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Session {
    /// Start a new session within the given directory.
    ///
    /// This will create a new session directory named `{exec_name}_{timestamp}` under the software
    /// root, with an `arch` subdirectory. Only one session may be created per process.
    pub fn new(exec_name: &str, sessions_dir: &str) -> Result<Self, SessionError> {
        SESSION_EPOCH
            .try_init_once(Utc::now)
            .map_err(SessionError::CannotInitEpoch)?;

        let timestamp = match SESSION_EPOCH.get() {
            Some(e) => e.format(TIMESTAMP_FORMAT),
            None => return Err(SessionError::CannotGetEpoch),
        };

        let root = crate::host::get_sw_root().map_err(SessionError::SwRootNotFound)?;

        let mut path: PathBuf = root;
        path.push(sessions_dir);
        path.push(format!("{}_{}", exec_name, timestamp));

        Self::in_dir(path, exec_name)
    }

    /// Build the session directory structure inside an explicit directory, without touching the
    /// session epoch.
    pub fn in_dir<P: AsRef<Path>>(path: P, exec_name: &str) -> Result<Self, SessionError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(SessionError::CannotCreateDir)?;

        let arch_path = path.join("arch");
        fs::create_dir_all(&arch_path).map_err(SessionError::CannotCreateDir)?;

        let log_file_path = path.join(format!("{}.log", exec_name));

        Ok(Session {
            session_root: path,
            arch_root: arch_path,
            log_file_path,
        })
    }

    /// Save the given data as pretty JSON to a session-relative path, creating parent directories
    /// as needed.
    pub fn save_json<P: AsRef<Path>, T: Serialize>(
        &self,
        path: P,
        data: &T,
    ) -> Result<PathBuf, SessionError> {
        let full_path = self.session_root.join(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SessionError::SaveIoError(full_path.clone(), e))?;
        }

        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&full_path)
            .map_err(|e| SessionError::SaveIoError(full_path.clone(), e))?;

        serde_json::to_writer_pretty(&file, data)
            .map_err(|e| SessionError::SaveSerError(full_path.clone(), e))?;

        Ok(full_path)
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the number of seconds elapsed since the start of the session, or `None` if no session has
/// been started.
pub fn get_elapsed_seconds() -> Option<f64> {
    SESSION_EPOCH
        .get()
        .and_then(|e| time::duration_to_seconds(Utc::now() - *e))
}

/// Return a reference to the session's epoch, if a session has been started.
pub fn get_epoch() -> Option<&'static DateTime<Utc>> {
    SESSION_EPOCH.get()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_save_json_in_dir() {
        let dir = std::env::temp_dir().join(format!("util_session_test_{}", std::process::id()));
        let session = Session::in_dir(&dir, "test").unwrap();

        assert!(session.arch_root.is_dir());

        let path = session.save_json("snap/data.json", &vec![1, 2, 3]).unwrap();
        let read: Vec<i32> = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(read, vec![1, 2, 3]);

        fs::remove_dir_all(&dir).unwrap();
    }
}
