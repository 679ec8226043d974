//! Progress and completion reporting for sync passes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase boundaries of a pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Collecting,
    Negotiating,
    Pulling,
    Pushing,
    PullingBills,
    Deleting,
    RefreshingPersons,
    Sweeping,
    Finished,
}

impl SyncPhase {
    /// Coarse percent-complete reported when the phase starts
    pub fn percent(&self) -> u8 {
        match self {
            SyncPhase::Collecting => 5,
            SyncPhase::Negotiating => 10,
            SyncPhase::Pulling => 30,
            SyncPhase::Pushing => 55,
            SyncPhase::PullingBills => 75,
            SyncPhase::Deleting => 85,
            SyncPhase::RefreshingPersons => 90,
            SyncPhase::Sweeping => 95,
            SyncPhase::Finished => 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum SyncOutcome {
    Succeeded,
    Failed(String),
    /// Another pass was already running; nothing was touched
    Skipped,
}

/// Aggregate item counts of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    pub pulled: usize,
    pub pushed: usize,
    pub conflicts: usize,
    /// Removed on the server's instruction
    pub deleted: usize,
    /// Removed by the local retention sweep
    pub swept: usize,
    pub bills_pulled: usize,
    pub pull_failures: usize,
    pub push_failures: usize,
    pub bill_failures: usize,
}

impl SyncCounters {
    pub fn failures(&self) -> usize {
        self.pull_failures + self.push_failures + self.bill_failures
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub counters: SyncCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn skipped() -> Self {
        let now = Utc::now();
        Self {
            outcome: SyncOutcome::Skipped,
            counters: SyncCounters::default(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SyncOutcome::Succeeded
    }

    pub fn is_skipped(&self) -> bool {
        self.outcome == SyncOutcome::Skipped
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Broadcast to subscribers of a coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Progress { phase: SyncPhase, percent: u8 },
    Completed { report: SyncReport },
}

impl SyncEvent {
    pub fn progress(phase: SyncPhase) -> Self {
        SyncEvent::Progress {
            phase,
            percent: phase.percent(),
        }
    }
}
