//! Sync scheduling: reconnects, `SyncScans` messages, explicit requests,
//! the periodic timer and backoff after failed drains.

use std::future::pending;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use agrosentinel_common::{AppEndpoint, Error, Result};

use crate::connectivity::{ConnectivitySubscription, Transition};
use crate::coordinator::SyncCoordinator;
use crate::status::{DrainOutcome, TriggerReason};

/// Messages accepted by the scheduler task.
#[derive(Debug)]
enum Command {
    Sync(oneshot::Sender<Result<DrainOutcome>>),
    Shutdown,
}

/// Front end for requesting drains from the scheduler task.
#[derive(Clone)]
pub struct SyncScheduler {
    request_tx: mpsc::Sender<Command>,
}

impl SyncScheduler {
    /// Create a scheduler for `coordinator` and the handle that runs it.
    ///
    /// The handle subscribes to connectivity transitions immediately, so no
    /// transition between this call and `run` is lost.
    pub fn new(coordinator: Arc<SyncCoordinator>) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(32);
        let transitions = coordinator.connectivity().subscribe();

        (
            Self { request_tx },
            SyncSchedulerHandle {
                coordinator,
                request_rx,
                transitions,
                sync_scans: None,
            },
        )
    }

    /// Request a drain and wait for its outcome.
    pub async fn request_sync(&self) -> Result<DrainOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send(Command::Sync(response_tx))
            .await
            .map_err(|_| Error::InvalidInput("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::InvalidInput("Failed to receive sync result".to_string()))?
    }

    /// Stop the scheduler task.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(Command::Shutdown).await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    coordinator: Arc<SyncCoordinator>,
    request_rx: mpsc::Receiver<Command>,
    transitions: ConnectivitySubscription,
    sync_scans: Option<AppEndpoint>,
}

impl SyncSchedulerHandle {
    /// Also drain whenever the arbiter broadcasts `SyncScans`.
    ///
    /// With the channel attached a reconnect drains only through the
    /// arbiter's broadcast, so one reconnect starts one drain.
    pub fn with_sync_scans(mut self, endpoint: AppEndpoint) -> Self {
        self.sync_scans = Some(endpoint);
        self
    }

    /// Run the scheduler until shut down or every [`SyncScheduler`] is gone.
    ///
    /// This should be spawned in a tokio task.
    pub async fn run(mut self) {
        let period = self.coordinator.config().periodic_interval;
        let mut periodic = interval_at(Instant::now() + period, period);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut retry_at: Option<Instant> = None;
        let mut failed_drains: u32 = 0;

        info!("Sync scheduler started");

        loop {
            let reason = tokio::select! {
                command = self.request_rx.recv() => match command {
                    Some(Command::Sync(response_tx)) => {
                        let result = self.coordinator.trigger(TriggerReason::Requested).await;
                        if let Ok(outcome) = &result {
                            retry_at = self.next_retry(outcome, &mut failed_drains);
                        }
                        let _ = response_tx.send(result);
                        continue;
                    }
                    Some(Command::Shutdown) | None => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                },

                transition = self.transitions.recv() => match transition {
                    // The arbiter answers a reconnect with `SyncScans`; that
                    // message starts the drain when the channel is wired.
                    Some(Transition::Online) if self.sync_scans.is_some() => continue,
                    Some(Transition::Online) => TriggerReason::Reconnected,
                    Some(Transition::Offline) => {
                        retry_at = None;
                        continue;
                    }
                    None => {
                        info!("Connectivity monitor gone, stopping scheduler");
                        break;
                    }
                },

                message = Self::next_sync_scans(&mut self.sync_scans) => match message {
                    Some(_) => TriggerReason::SyncScans,
                    None => {
                        debug!("Arbiter channel closed");
                        self.sync_scans = None;
                        continue;
                    }
                },

                _ = Self::tick(&mut periodic) => {
                    if !self.should_poll().await {
                        continue;
                    }
                    TriggerReason::Periodic
                }

                _ = Self::wait_for_retry(retry_at) => {
                    retry_at = None;
                    TriggerReason::Backoff
                }
            };

            self.absorb_queued_signals();

            match self.coordinator.trigger(reason).await {
                Ok(outcome) => {
                    retry_at = self.next_retry(&outcome, &mut failed_drains);
                }
                Err(e) => {
                    error!("{:?} drain failed: {}", reason, e);
                }
            }
        }
    }

    /// Swallow transitions and `SyncScans` signals already queued, so one
    /// drain covers all of them. The coordinator re-checks the online flag.
    fn absorb_queued_signals(&mut self) {
        while self.transitions.try_recv().is_some() {}
        if let Some(endpoint) = self.sync_scans.as_mut() {
            while endpoint.try_recv_sync_scans().is_some() {}
        }
    }

    async fn should_poll(&self) -> bool {
        if !self.coordinator.connectivity().is_online() {
            return false;
        }
        match self.coordinator.store().count_pending().await {
            Ok(depth) => depth > 0,
            Err(e) => {
                error!("Failed to read queue depth: {}", e);
                false
            }
        }
    }

    fn next_retry(&self, outcome: &DrainOutcome, failed_drains: &mut u32) -> Option<Instant> {
        match outcome {
            DrainOutcome::Completed(report) if report.has_failures() => {
                let delay = self
                    .coordinator
                    .config()
                    .backoff
                    .delay_for_attempt(*failed_drains);
                *failed_drains = failed_drains.saturating_add(1);
                debug!("Retrying failed writes in {:?}", delay);
                Some(Instant::now() + delay)
            }
            DrainOutcome::Completed(_) => {
                *failed_drains = 0;
                None
            }
            DrainOutcome::AlreadyRunning | DrainOutcome::Offline => None,
        }
    }

    async fn next_sync_scans(endpoint: &mut Option<AppEndpoint>) -> Option<()> {
        match endpoint {
            Some(endpoint) => endpoint.recv_sync_scans().await.map(|_| ()),
            None => pending().await,
        }
    }

    async fn tick(periodic: &mut Interval) {
        periodic.tick().await;
    }

    async fn wait_for_retry(retry_at: Option<Instant>) {
        match retry_at {
            Some(at) => sleep_until(at).await,
            None => pending().await,
        }
    }
}
