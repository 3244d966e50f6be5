//! Persistent Store for the offline-first sync engine.
//!
//! A versioned SQLite database holding:
//! - completed analysis records (append-only history)
//! - pending writes awaiting a drain, plus dead letters
//! - the response cache backing offline reads
//! - process-wide settings
//!
//! All SQLite work runs on the blocking pool; every public method is async.

mod error;
pub mod schema;
pub mod store;

pub use error::StoreResult;
pub use schema::SCHEMA_VERSION;
pub use store::{CacheEntry, FailureDisposition, Store};
