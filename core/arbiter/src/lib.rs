//! Network arbiter for the AgroSentinel client.
//!
//! Sits between application contexts and the network. Requests are
//! classified and resolved cache-first, network-first, with a shell fallback,
//! or passed straight through (writes). The arbiter also owns the install
//! and activate lifecycle of its cache generations and turns reconnect
//! signals into `SyncScans` broadcasts.

pub mod arbiter;
pub mod cache;
pub mod classify;
pub mod config;

pub use arbiter::{Activation, Arbiter, LifecycleState, SYNC_SCANS_TAG};
pub use cache::ByteCache;
pub use classify::{classify, RequestClass};
pub use config::ArbiterConfig;
