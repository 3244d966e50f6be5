//! Typed channel between the request arbiter and application contexts.
//!
//! Each message kind is its own type and travels on its own channel:
//! [`SyncScans`] fans out from the arbiter to every attached application
//! context, [`SkipWaiting`] flows from any application context back to the
//! arbiter.

use tokio::sync::{broadcast, mpsc};

/// Capacity of the fan-out channel. Lagging receivers lose old signals,
/// which is harmless since one drain request covers any number of them.
const SYNC_SCANS_CAPACITY: usize = 16;

/// Arbiter → application: connectivity resumed, please drain the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncScans;

/// Application → arbiter: activate the newly installed version now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipWaiting;

/// Create a linked pair of endpoints.
pub fn message_channel() -> (ArbiterEndpoint, SkipWaitingInbox) {
    let (sync_scans, _) = broadcast::channel(SYNC_SCANS_CAPACITY);
    let (skip_waiting_tx, skip_waiting_rx) = mpsc::unbounded_channel();

    (
        ArbiterEndpoint {
            sync_scans,
            skip_waiting: skip_waiting_tx,
        },
        SkipWaitingInbox {
            rx: skip_waiting_rx,
        },
    )
}

/// Arbiter side of the channel.
#[derive(Debug, Clone)]
pub struct ArbiterEndpoint {
    sync_scans: broadcast::Sender<SyncScans>,
    skip_waiting: mpsc::UnboundedSender<SkipWaiting>,
}

impl ArbiterEndpoint {
    /// Attach a new application context.
    pub fn attach(&self) -> AppEndpoint {
        AppEndpoint {
            sync_scans: self.sync_scans.subscribe(),
            skip_waiting: self.skip_waiting.clone(),
        }
    }

    /// Send [`SyncScans`] to every attached context.
    ///
    /// Returns the number of contexts reached.
    pub fn broadcast_sync_scans(&self) -> usize {
        self.sync_scans.send(SyncScans).unwrap_or(0)
    }

    /// Number of currently attached contexts.
    pub fn attached_contexts(&self) -> usize {
        self.sync_scans.receiver_count()
    }
}

/// Arbiter-side receiver for [`SkipWaiting`].
#[derive(Debug)]
pub struct SkipWaitingInbox {
    rx: mpsc::UnboundedReceiver<SkipWaiting>,
}

impl SkipWaitingInbox {
    /// Wait for the next request. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<SkipWaiting> {
        self.rx.recv().await
    }
}

/// Application side of the channel.
#[derive(Debug)]
pub struct AppEndpoint {
    sync_scans: broadcast::Receiver<SyncScans>,
    skip_waiting: mpsc::UnboundedSender<SkipWaiting>,
}

impl AppEndpoint {
    /// Wait for the next [`SyncScans`] signal.
    ///
    /// Signals missed while lagging collapse into one. Returns `None` once
    /// the arbiter is gone.
    pub async fn recv_sync_scans(&mut self) -> Option<SyncScans> {
        match self.sync_scans.recv().await {
            Ok(message) => Some(message),
            Err(broadcast::error::RecvError::Lagged(_)) => Some(SyncScans),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Take a [`SyncScans`] signal if one is already waiting.
    pub fn try_recv_sync_scans(&mut self) -> Option<SyncScans> {
        match self.sync_scans.try_recv() {
            Ok(message) => Some(message),
            Err(broadcast::error::TryRecvError::Lagged(_)) => Some(SyncScans),
            Err(_) => None,
        }
    }

    /// Ask the arbiter to activate a waiting version.
    ///
    /// # Errors
    /// - The arbiter side has been dropped
    pub fn request_skip_waiting(&self) -> crate::Result<()> {
        self.skip_waiting
            .send(SkipWaiting)
            .map_err(|_| crate::Error::InvalidInput("Arbiter is not running".to_string()))
    }
}
