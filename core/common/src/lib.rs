//! Common utilities and types shared across the AgroSentinel sync engine.
//!
//! This crate holds the foundational pieces every other crate depends on:
//! the error taxonomy, the persisted domain records, the uniform
//! [`Outcome`] returned to presentation code, and the typed channel linking
//! the request arbiter with application contexts.

pub mod duration_ms;
pub mod error;
pub mod messages;
pub mod outcome;
pub mod types;

pub use error::{Error, ErrorKind, Result, StoreError};
pub use messages::{
    message_channel, AppEndpoint, ArbiterEndpoint, SkipWaiting, SkipWaitingInbox, SyncScans,
};
pub use outcome::{Outcome, PendingReceipt};
pub use types::{
    AnalysisResult, CompletedRecord, Coordinates, DeadLetter, NewRecord, PendingId, PendingWrite,
    WriteContext, DEFAULT_LANGUAGE, LANGUAGE_SETTING,
};
