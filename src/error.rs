//! Error taxonomy for the ledger engine.
//!
//! Every public operation returns `Result<T, EngineError>`. Validation
//! problems inside the pricing calculator never reach this type: they clamp
//! the offending value and surface as warnings on the result instead.

use thiserror::Error;

/// Typed failure surfaced to the presentation layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Out-of-range or malformed input rejected before any write.
    #[error("{0}")]
    Validation(String),

    /// A referenced sale, service entry, or report does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A concurrent writer got there first (settlement race, locked store,
    /// or an unconfirmed overwrite of an existing snapshot).
    #[error("conflict: {0}")]
    Conflict(String),

    /// SQLite I/O failure.
    #[error("store error: {0}")]
    Store(String),

    /// A read failed while building a daily report; the whole report aborts
    /// and nothing is persisted.
    #[error("aggregation failed: {0}")]
    Aggregation(String),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn aggregation(msg: impl Into<String>) -> Self {
        Self::Aggregation(msg.into())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => Self::NotFound("record".into()),
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::DatabaseBusy
                    || err.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Self::Conflict(format!("store busy: {e}"))
            }
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Store(format!("record decode: {e}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = EngineError::validation("amount must be positive");
        assert_eq!(e.to_string(), "amount must be positive");

        let e = EngineError::not_found("sale sale-1");
        assert_eq!(e.to_string(), "sale sale-1 not found");

        let e = EngineError::conflict("balance already settled");
        assert_eq!(e.to_string(), "conflict: balance already settled");
    }

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let e: EngineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(e, EngineError::NotFound(_)));
    }
}
