//! AgroSentinel sync engine.
//!
//! This crate keeps the pending-write queue moving:
//! - [`ConnectivityMonitor`]: the single online flag and its transitions
//! - [`SyncCoordinator`]: single-flight FIFO replay of queued writes
//! - [`SyncScheduler`]: drains on reconnect, `SyncScans`, request, timer
//! - [`BackoffConfig`]: exponential backoff after drains with failures

pub mod backoff;
pub mod connectivity;
pub mod coordinator;
pub mod scheduler;
pub mod status;

pub use backoff::BackoffConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivitySubscription, Transition};
pub use coordinator::{SyncConfig, SyncCoordinator};
pub use scheduler::{SyncScheduler, SyncSchedulerHandle};
pub use status::{DrainOutcome, DrainReport, SyncStatus, TriggerReason};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 8);
    }

    #[test]
    fn test_config_from_json() {
        let config: SyncConfig = serde_json::from_str(
            r#"{ "max_attempts": 3, "attempt_timeout": 5000, "backoff": { "jitter": false } }"#,
        )
        .unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.attempt_timeout, std::time::Duration::from_secs(5));
        assert!(!config.backoff.jitter);
        assert_eq!(config.periodic_interval, SyncConfig::default().periodic_interval);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SyncConfig {
            attempt_timeout: std::time::Duration::ZERO,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
