//! Coordinator state machine and the single-pass guard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::progress::SyncOutcome;

/// Message recorded when a pass unwinds without reporting an outcome
pub(crate) const ABORTED_MESSAGE: &str = "sync pass aborted";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    #[default]
    Idle,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        finished_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        finished_at: DateTime<Utc>,
    },
}

impl CoordinatorState {
    pub fn is_running(&self) -> bool {
        matches!(self, CoordinatorState::Running { .. })
    }
}

/// Lock the state even if a panicking pass poisoned the mutex; the state
/// value itself is always consistent since it is only ever replaced whole
pub(crate) fn lock_state(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Holds the coordinator in `Running` for the lifetime of one pass.
///
/// Dropping the guard without calling [`RunGuard::finish`] moves the state
/// to `Failed`, so the coordinator can never be left stuck in `Running`.
pub(crate) struct RunGuard<'a> {
    state: &'a Mutex<CoordinatorState>,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    /// `None` when a pass is already running
    pub(crate) fn acquire(state: &'a Mutex<CoordinatorState>) -> Option<Self> {
        let mut current = lock_state(state);
        if current.is_running() {
            return None;
        }
        let started_at = Utc::now();
        *current = CoordinatorState::Running { started_at };
        Some(Self {
            state,
            started_at,
            finished: false,
        })
    }

    pub(crate) fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub(crate) fn finish(mut self, outcome: &SyncOutcome) {
        let finished_at = Utc::now();
        let next = match outcome {
            SyncOutcome::Succeeded => CoordinatorState::Succeeded { finished_at },
            SyncOutcome::Failed(error) => CoordinatorState::Failed {
                error: error.clone(),
                finished_at,
            },
            // A guard is only held by a pass that actually ran
            SyncOutcome::Skipped => CoordinatorState::Idle,
        };
        *lock_state(self.state) = next;
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *lock_state(self.state) = CoordinatorState::Failed {
                error: ABORTED_MESSAGE.to_string(),
                finished_at: Utc::now(),
            };
        }
    }
}
