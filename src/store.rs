// 🗄️ Store - connection factory + transaction executor
//
// Every request gets its own connection. Write transactions start with
// BEGIN IMMEDIATE, so SQLite's write lock serializes overlapping writers;
// a writer that cannot get the lock within `busy_timeout` sees
// SerializationFailure.

use crate::config::Config;
use crate::db;
use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// CANCELLATION
// ============================================================================

/// Caller-owned cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Err(Cancelled) once `cancel` has been called
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            db_path: db_path.into(),
            busy_timeout,
        }
    }

    /// Build from config and make sure the schema exists
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let store = Self::new(&config.db_path, config.busy_timeout());
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.connect()?;
        db::setup_database(&conn)?;
        Ok(())
    }

    /// Fresh connection with per-connection pragmas applied
    pub fn connect(&self) -> EngineResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(self.busy_timeout)?;
        db::configure_connection(&conn)?;
        Ok(conn)
    }

    /// Run a read outside any write transaction
    pub fn read<T, F>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.connect()?;
        Ok(f(&conn)?)
    }

    /// Run `body` inside one write transaction.
    ///
    /// Commits only if `body` succeeds and `cancel` is still clear afterwards.
    /// Any error rolls everything back and is returned as-is.
    pub fn exec_tx<T, F>(&self, cancel: &CancelToken, body: F) -> EngineResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> EngineResult<T>,
    {
        cancel.check()?;

        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let outcome = body(&tx).and_then(|value| cancel.check().map(|_| value));

        match outcome {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb_err) = tx.rollback() {
                    tracing::error!(error = %err, rollback_error = %rb_err, "rollback failed");
                } else {
                    tracing::debug!(error = %err, "transaction rolled back");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store(dir: &TempDir) -> Store {
        let store = Store::new(dir.path().join("store.db"), Duration::from_millis(50));
        store.init_schema().unwrap();
        store
    }

    #[test]
    fn test_commit_persists() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir);

        let account = store
            .exec_tx(&CancelToken::new(), |tx| Ok(db::create_account(tx, "alice", 10)?))
            .unwrap();

        let loaded = store.read(|conn| db::get_account(conn, account.id)).unwrap();
        assert_eq!(loaded, Some(account));
    }

    #[test]
    fn test_error_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir);

        let result: EngineResult<()> = store.exec_tx(&CancelToken::new(), |tx| {
            db::create_account(tx, "alice", 10)?;
            Err(EngineError::Storage("boom".to_string()))
        });

        assert!(matches!(result, Err(EngineError::Storage(_))));
        let count: i64 = store
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_cancel_inside_body_prevents_commit() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir);
        let cancel = CancelToken::new();

        let result = store.exec_tx(&cancel, |tx| {
            let account = db::create_account(tx, "alice", 10)?;
            cancel.cancel();
            Ok(account)
        });

        assert!(matches!(result, Err(EngineError::Cancelled)));
        let count: i64 = store
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM accounts", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_cancelled_before_begin() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir);
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut ran = false;
        let result = store.exec_tx(&cancel, |_| {
            ran = true;
            Ok(())
        });

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(!ran);
    }

    #[test]
    fn test_held_write_lock_surfaces_serialization_failure() {
        let dir = TempDir::new().unwrap();
        let store = temp_store(&dir);

        let mut holder = store.connect().unwrap();
        let _guard = holder
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let result = store.exec_tx(&CancelToken::new(), |tx| Ok(db::create_account(tx, "bob", 0)?));
        assert!(matches!(result, Err(EngineError::SerializationFailure(_))));
    }
}
