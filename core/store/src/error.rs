//! Mapping of SQLite failures onto [`StoreError`].

use agrosentinel_common::StoreError;
use rusqlite::ErrorCode;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub(crate) fn map_sqlite(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::DiskFull => {
            StoreError::QuotaExceeded(err.to_string())
        }
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            StoreError::Serialization(err.to_string())
        }
        _ => StoreError::Io(err.to_string()),
    }
}

pub(crate) fn map_json(err: serde_json::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}
