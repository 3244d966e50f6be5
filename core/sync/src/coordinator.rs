//! Sync coordinator: replays queued writes when connectivity returns.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use agrosentinel_common::{
    Error, NewRecord, PendingWrite, Result, DEFAULT_LANGUAGE, LANGUAGE_SETTING,
};
use agrosentinel_store::{FailureDisposition, Store};
use agrosentinel_transport::{AnalysisApi, AnalysisUpload};

use crate::backoff::BackoffConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::status::{DrainOutcome, DrainReport, SyncStatus, TriggerReason};

/// Configuration for the coordinator and scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed attempts after which an item is dead-lettered. Zero disables
    /// dead-lettering.
    pub max_attempts: u32,
    /// Bound on a single delivery attempt.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub attempt_timeout: Duration,
    /// Period of the background drain while online with queued writes.
    #[serde(with = "agrosentinel_common::duration_ms")]
    pub periodic_interval: Duration,
    /// Backoff between drains that left failures.
    pub backoff: BackoffConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            attempt_timeout: Duration::from_secs(30),
            periodic_interval: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Check the values are usable.
    ///
    /// # Errors
    /// - Zero attempt timeout or periodic interval
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "attempt_timeout must be positive".to_string(),
            ));
        }
        if self.periodic_interval.is_zero() {
            return Err(Error::InvalidInput(
                "periodic_interval must be positive".to_string(),
            ));
        }
        if !(self.backoff.multiplier >= 1.0) {
            return Err(Error::InvalidInput(
                "backoff multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Clears the in-flight flag when the drain ends, however it ends.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Replays the pending-write queue, at most one drain at a time.
pub struct SyncCoordinator {
    store: Store,
    api: Arc<dyn AnalysisApi>,
    connectivity: Arc<ConnectivityMonitor>,
    config: SyncConfig,
    running: AtomicBool,
    last_report: RwLock<Option<DrainReport>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Store,
        api: Arc<dyn AnalysisApi>,
        connectivity: Arc<ConnectivityMonitor>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            config,
            running: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Whether a drain is in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Request a drain.
    ///
    /// Returns [`DrainOutcome::AlreadyRunning`] without doing anything if a
    /// drain is in flight, and [`DrainOutcome::Offline`] without attempting
    /// any delivery if the monitor reports offline.
    ///
    /// # Errors
    /// - Store failures abort the drain; items already delivered stay
    ///   delivered
    pub async fn trigger(&self, reason: TriggerReason) -> Result<DrainOutcome> {
        let Some(_guard) = DrainGuard::acquire(&self.running) else {
            debug!("Drain already running, ignoring {:?} trigger", reason);
            return Ok(DrainOutcome::AlreadyRunning);
        };

        if !self.connectivity.is_online() {
            debug!("Offline, skipping {:?} drain", reason);
            return Ok(DrainOutcome::Offline);
        }

        let report = self.drain(reason).await?;
        *self.last_report.write().await = Some(report.clone());
        Ok(DrainOutcome::Completed(report))
    }

    async fn drain(&self, reason: TriggerReason) -> Result<DrainReport> {
        let start = Instant::now();
        let mut report = DrainReport {
            reason,
            started_at: Utc::now(),
            synced_count: 0,
            failed_count: 0,
            dead_lettered_count: 0,
            skipped_count: 0,
            duration: Duration::ZERO,
        };

        let pending = self.store.list_pending().await?;
        if pending.is_empty() {
            debug!("Nothing to drain");
            report.duration = start.elapsed();
            return Ok(report);
        }

        info!("Draining {} pending writes ({:?})", pending.len(), reason);
        let language = self.language().await?;

        let total = pending.len();
        for (index, write) in pending.into_iter().enumerate() {
            if !self.connectivity.is_online() {
                report.skipped_count = total - index;
                warn!(
                    "Went offline mid-drain, leaving {} writes queued",
                    report.skipped_count
                );
                break;
            }

            match self.deliver(&write, &language).await {
                Ok(payload) => {
                    let record = NewRecord::replayed(payload, &write);
                    match self.store.complete_pending(write.id, record).await? {
                        Some(_) => report.synced_count += 1,
                        None => debug!("Pending write {} vanished during delivery", write.id),
                    }
                }
                Err(e) => {
                    report.failed_count += 1;
                    warn!("Failed to replay pending write {}: {}", write.id, e);
                    let disposition = self
                        .store
                        .record_failure(write.id, e.to_string(), self.config.max_attempts)
                        .await?;
                    if let FailureDisposition::DeadLettered { attempts } = disposition {
                        error!(
                            "Pending write {} dead-lettered after {} attempts",
                            write.id, attempts
                        );
                        report.dead_lettered_count += 1;
                    }
                }
            }
        }

        report.duration = start.elapsed();
        info!(
            "Drain complete: {} synced, {} failed, {} dead-lettered in {:?}",
            report.synced_count, report.failed_count, report.dead_lettered_count, report.duration
        );
        Ok(report)
    }

    /// One bounded delivery attempt.
    async fn deliver(&self, write: &PendingWrite, language: &str) -> Result<Value> {
        let upload = AnalysisUpload::replay(write, language);
        match tokio::time::timeout(self.config.attempt_timeout, self.api.analyze(&upload)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Transport(format!(
                "Delivery timed out after {:?}",
                self.config.attempt_timeout
            ))),
        }
    }

    async fn language(&self) -> Result<String> {
        let value = self
            .store
            .get_setting_or(LANGUAGE_SETTING, Value::from(DEFAULT_LANGUAGE))
            .await?;
        Ok(value.as_str().unwrap_or(DEFAULT_LANGUAGE).to_string())
    }

    /// Report of the most recent completed drain.
    pub async fn last_report(&self) -> Option<DrainReport> {
        self.last_report.read().await.clone()
    }

    /// Snapshot of queue depth and drain state.
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            online: self.connectivity.is_online(),
            pending_count: self.store.count_pending().await?,
            dead_letter_count: self.store.count_dead_letters().await?,
            in_progress: self.is_running(),
            last_report: self.last_report().await,
        })
    }
}
