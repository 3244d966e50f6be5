//! Drain results and status snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a drain was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    /// Connectivity came back.
    Reconnected,
    /// The arbiter broadcast `SyncScans`.
    SyncScans,
    /// The user or caller asked for a sync.
    Requested,
    /// Periodic timer while online with a non-empty queue.
    Periodic,
    /// Retry after a drain that left failures.
    Backoff,
}

/// Counts from one completed drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    pub reason: TriggerReason,
    pub started_at: DateTime<Utc>,
    /// Items delivered and moved into completed records.
    pub synced_count: usize,
    /// Items whose delivery failed, including those dead-lettered.
    pub failed_count: usize,
    /// Items moved to dead letters during this drain.
    pub dead_lettered_count: usize,
    /// Items left untouched because connectivity dropped mid-drain.
    pub skipped_count: usize,
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub duration: Duration,
}

impl DrainReport {
    /// Whether any delivery failed.
    pub fn has_failures(&self) -> bool {
        self.failed_count > 0
    }
}

/// Result of [`SyncCoordinator::trigger`](crate::SyncCoordinator::trigger).
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// The drain ran to completion.
    Completed(DrainReport),
    /// Another drain was already in flight; nothing was done.
    AlreadyRunning,
    /// Offline at trigger time; no delivery was attempted.
    Offline,
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Point-in-time view of the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub online: bool,
    pub pending_count: u64,
    pub dead_letter_count: u64,
    pub in_progress: bool,
    pub last_report: Option<DrainReport>,
}
