//! AgroSentinel offline client.
//!
//! Embeds the offline subsystem in a host application:
//! - [`Client`]: the façade presentation code calls; every call settles to
//!   an [`Outcome`](agrosentinel_common::Outcome)
//! - [`App`]: opens the store and runs the arbiter and sync scheduler
//! - [`AppConfig`]: JSON-loadable configuration for all of the above

pub mod client;
pub mod config;
pub mod runtime;

pub use client::{Client, Language, LocationHistory, ReadPolicy, PENDING_MESSAGE};
pub use config::{AppConfig, CacheTtls};
pub use runtime::App;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global log subscriber.
///
/// `RUST_LOG` wins over `default_filter`. Returns false if a subscriber was
/// already installed.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
