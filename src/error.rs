// ⚠️ Engine Errors - one taxonomy for draw and exchange
//
// Validation errors short-circuit before a transaction opens.
// Everything else aborts the transaction and is handed back unmodified.

use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input, rejected before any transaction opens
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("account {0} not found")]
    AccountNotFound(i64),

    #[error("item {0} not found")]
    ItemNotFound(i64),

    /// The trading account does not hold the item it offers
    #[error("account {account_id} does not own item {item_id}")]
    OwnershipMismatch { account_id: i64, item_id: i64 },

    /// A concurrent writer holds the rows; the only retryable class
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("no items available in catalog")]
    NoItemsAvailable,

    /// Catalog index resolved to nothing (catalog/index mismatch)
    #[error("catalog index {index} did not resolve to an item")]
    ItemLookupFailed { index: usize },

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Only conflicts with a concurrent transaction are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SerializationFailure(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::AccountNotFound(_)
                | EngineError::ItemNotFound(_)
                | EngineError::NoItemsAvailable
        )
    }

    /// Short machine-readable kind, used in logs and API bodies
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::AccountNotFound(_) => "account_not_found",
            EngineError::ItemNotFound(_) => "item_not_found",
            EngineError::OwnershipMismatch { .. } => "ownership_mismatch",
            EngineError::SerializationFailure(_) => "serialization_failure",
            EngineError::Storage(_) => "storage_error",
            EngineError::NoItemsAvailable => "no_items_available",
            EngineError::ItemLookupFailed { .. } => "item_lookup_failed",
            EngineError::Cancelled => "cancelled",
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                EngineError::SerializationFailure(err.to_string())
            }
            _ => EngineError::Storage(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_maps_to_serialization_failure() {
        let err: EngineError = sqlite_failure(rusqlite::ffi::SQLITE_BUSY).into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "serialization_failure");

        let err: EngineError = sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_sqlite_errors_are_terminal() {
        let err: EngineError = sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "storage_error");

        let err: EngineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, EngineError::Storage(_)));
    }

    #[test]
    fn test_not_found_classes() {
        assert!(EngineError::AccountNotFound(1).is_not_found());
        assert!(EngineError::ItemNotFound(1).is_not_found());
        assert!(EngineError::NoItemsAvailable.is_not_found());
        assert!(!EngineError::OwnershipMismatch { account_id: 1, item_id: 2 }.is_not_found());
    }
}
