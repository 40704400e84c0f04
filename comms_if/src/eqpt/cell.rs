//! # Latest value cell
//!
//! Shared holder for the most recent value published by a background reader (for example the
//! measured pose or the foot force of the base). Owned by the channel that produces the values and
//! handed out by reference or cloned handle to readers, so its lifetime follows the connection.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Thread-safe cell holding the latest published value.
#[derive(Debug)]
pub struct LatestCell<T> {
    inner: Arc<Mutex<Option<T>>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T: Clone> LatestCell<T> {
    /// Create an empty cell.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Publish a new value, replacing the previous one.
    pub fn publish(&self, value: T) {
        let mut v = match self.inner.lock() {
            Ok(v) => v,
            Err(p) => p.into_inner(),
        };
        *v = Some(value);
    }

    /// Get a copy of the latest value, if any has been published.
    ///
    /// A publisher that panicked leaves its last complete value readable.
    pub fn latest(&self) -> Option<T> {
        match self.inner.lock() {
            Ok(v) => v.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }
}

impl<T: Clone> Default for LatestCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LatestCell<T> {
    /// Clones share the same underlying value.
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
