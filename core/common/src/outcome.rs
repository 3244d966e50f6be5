//! Uniform result shape returned to presentation code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};
use crate::types::PendingId;

/// Acknowledgment that a write was saved locally and will sync later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReceipt {
    pub id: PendingId,
    pub enqueued_at: DateTime<Utc>,
    pub message: String,
}

/// Outcome of every façade call.
///
/// Callers match on all four variants; a raw transport failure is never one
/// of them.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The call completed with a payload.
    Ok(T),
    /// The write was queued for a later drain.
    Pending(PendingReceipt),
    /// No network and nothing usable in the local cache.
    Offline(String),
    /// The call failed in a way the user should see.
    Error(ErrorKind, String),
}

impl<T> Outcome<T> {
    /// Build the outcome for a failed operation.
    ///
    /// Transport failures become [`Outcome::Offline`]; everything else is
    /// surfaced as [`Outcome::Error`].
    pub fn from_error(err: Error) -> Self {
        match err {
            Error::Transport(message) => Outcome::Offline(message),
            other => Outcome::Error(other.kind(), other.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending(_))
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, Outcome::Offline(_))
    }

    /// Take the payload, if any.
    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    /// Map the payload, leaving every other variant untouched.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Pending(receipt) => Outcome::Pending(receipt),
            Outcome::Offline(message) => Outcome::Offline(message),
            Outcome::Error(kind, message) => Outcome::Error(kind, message),
        }
    }
}

impl<T> From<crate::Result<T>> for Outcome<T> {
    fn from(result: crate::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => Outcome::from_error(err),
        }
    }
}
