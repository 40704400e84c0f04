//! # Milestone rendezvous
//!
//! One-shot signals keyed by milestone name and event. A signal stays raised once set, so a task
//! arriving late at a rendezvous passes straight through.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use std::{
    collections::HashSet,
    sync::{Condvar, Mutex, MutexGuard},
};

use util::cancel::{CancelToken, Cancelled, CANCEL_POLL_PERIOD};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Set of raised milestone signals shared between the tasks of one run.
#[derive(Debug, Default)]
pub struct Rendezvous {
    raised: Mutex<HashSet<(String, MilestoneEvent)>>,
    cond: Condvar,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Events a milestone can be waited on for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MilestoneEvent {
    /// The arm reached the milestone's pose.
    ArmReached,

    /// The base finished the milestone's action.
    BaseDone,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn signal(&self, milestone: &str, event: MilestoneEvent) {
        trace!("Rendezvous {} {:?} raised", milestone, event);
        self.lock().insert((milestone.to_string(), event));
        self.cond.notify_all();
    }

    pub fn is_signalled(&self, milestone: &str, event: MilestoneEvent) -> bool {
        self.lock().contains(&(milestone.to_string(), event))
    }

    /// Block until the signal is raised or the token is cancelled.
    pub fn wait(
        &self,
        milestone: &str,
        event: MilestoneEvent,
        cancel: &CancelToken,
    ) -> Result<(), Cancelled> {
        let key = (milestone.to_string(), event);
        let mut raised = self.lock();

        loop {
            if raised.contains(&key) {
                return Ok(());
            }
            cancel.check()?;

            raised = match self.cond.wait_timeout(raised, CANCEL_POLL_PERIOD) {
                Ok((g, _)) => g,
                Err(p) => p.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<(String, MilestoneEvent)>> {
        match self.raised.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
