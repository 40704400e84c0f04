//! CSV archiving
//!
//! An [`Archiver`] owns one CSV file in the session's archive directory. Records are flat rows of
//! numbers written after an explicit header, since their width depends on the number of degrees of
//! freedom.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use csv::WriterBuilder;
use std::{
    fs::File,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub use csv::Writer;

use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    writer: Writer<File>,
    path: PathBuf,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create archive file {0:?}: {1}")]
    CreateError(PathBuf, std::io::Error),

    #[error("Cannot write to the archive: {0}")]
    WriteError(#[from] csv::Error),

    #[error("Cannot flush the archive: {0}")]
    FlushError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver from a paricular path relative to the session's archive root.
    pub fn from_path<P: AsRef<Path>>(session: &Session, path: P) -> Result<Self, ArchiveError> {
        Self::create(session.arch_root.join(path))
    }

    /// Create a new archiver writing to the given file, truncating any existing content.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| ArchiveError::CreateError(path.clone(), e))?;

        // Headers are written explicitly
        let writer = WriterBuilder::new().has_headers(false).from_writer(file);

        Ok(Self { writer, path })
    }

    /// Path of the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a header row of column names.
    pub fn write_header<S: AsRef<str>>(&mut self, columns: &[S]) -> Result<(), ArchiveError> {
        self.writer
            .write_record(columns.iter().map(|c| c.as_ref()))?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a flat row of numbers.
    pub fn write_row(&mut self, values: &[f64]) -> Result<(), ArchiveError> {
        self.writer
            .write_record(values.iter().map(|v| v.to_string()))?;
        Ok(())
    }

    /// Flush any buffered rows to disk.
    pub fn flush(&mut self) -> Result<(), ArchiveError> {
        self.writer.flush()?;
        Ok(())
    }
}
