//! Cooperative cancellation
//!
//! A [`CancelToken`] is cloned into every task that must stop on an operator interrupt or on the
//! failure of a sibling task. Blocking waits go through [`CancelToken::sleep`] and
//! [`CancelToken::sleep_until`], which wake up in short slices to check the token, so a
//! cancellation is observed within [`CANCEL_POLL_PERIOD`] at every suspension point.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Longest single sleep between two checks of the token.
pub const CANCEL_POLL_PERIOD: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Shared cancellation flag.
///
/// Clones share the same flag. A token created with [`CancelToken::child`] is cancelled when
/// either its own flag or any of its ancestors' flags is set, while cancelling the child leaves
/// the parent untouched.
#[derive(Debug, Clone)]
pub struct CancelToken {
    /// This token's own flag followed by the flags of its ancestors.
    flags: Vec<Arc<AtomicBool>>,
}

/// Returned from a wait which was interrupted by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Operation cancelled")]
pub struct Cancelled;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CancelToken {
    /// Create a new root token.
    pub fn new() -> Self {
        Self {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// Create a child token which also observes this token.
    pub fn child(&self) -> Self {
        let mut flags = Vec::with_capacity(self.flags.len() + 1);
        flags.push(Arc::new(AtomicBool::new(false)));
        flags.extend(self.flags.iter().cloned());

        Self { flags }
    }

    /// Cancel this token and all of its children.
    pub fn cancel(&self) {
        if let Some(f) = self.flags.first() {
            f.store(true, Ordering::SeqCst);
        }
    }

    /// Returns true if this token or one of its ancestors has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }

    /// Returns `Err(Cancelled)` if the token is cancelled.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for the given duration, checking the token at least every [`CANCEL_POLL_PERIOD`].
    pub fn sleep(&self, duration: Duration) -> Result<(), Cancelled> {
        self.sleep_until(Instant::now() + duration)
    }

    /// Sleep until the given instant, checking the token at least every [`CANCEL_POLL_PERIOD`].
    ///
    /// Returns immediately if the deadline has already passed, but still reports a cancellation.
    pub fn sleep_until(&self, deadline: Instant) -> Result<(), Cancelled> {
        loop {
            self.check()?;

            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            let remaining = deadline - now;
            std::thread::sleep(if remaining < CANCEL_POLL_PERIOD {
                remaining
            } else {
                CANCEL_POLL_PERIOD
            });
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_child_observes_parent() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());

        child.cancel();
        assert!(grandchild.is_cancelled());
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());

        let other = root.child();
        root.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_sleep_interrupted() {
        let token = CancelToken::new();
        let remote = token.clone();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let start = Instant::now();
        assert_eq!(token.sleep(Duration::from_secs(10)), Err(Cancelled));
        assert!(start.elapsed() < Duration::from_secs(2));

        handle.join().unwrap();
    }

    #[test]
    fn test_sleep_completes() {
        let token = CancelToken::new();
        let start = Instant::now();

        assert_eq!(token.sleep(Duration::from_millis(30)), Ok(()));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
