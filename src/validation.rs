// ✅ Shared checks for draw and exchange
//
// `require_positive` runs before a transaction opens. The `require_*`
// lookups run inside the caller's transaction so they see the same
// snapshot the writes will.

use crate::db::{self, Account, Item, OwnershipRecord};
use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;

pub fn require_positive(field: &str, id: i64) -> EngineResult<()> {
    if id <= 0 {
        return Err(EngineError::Validation(format!(
            "{} must be a positive identifier, got {}",
            field, id
        )));
    }
    Ok(())
}

pub fn require_account(conn: &Connection, account_id: i64) -> EngineResult<Account> {
    db::get_account(conn, account_id)?.ok_or(EngineError::AccountNotFound(account_id))
}

pub fn require_item(conn: &Connection, item_id: i64) -> EngineResult<Item> {
    db::get_item(conn, item_id)?.ok_or(EngineError::ItemNotFound(item_id))
}

/// The ledger row proving `account_id` holds `item_id` right now
pub fn require_ownership(
    conn: &Connection,
    account_id: i64,
    item_id: i64,
) -> EngineResult<OwnershipRecord> {
    db::find_owned_record(conn, account_id, item_id)?
        .ok_or(EngineError::OwnershipMismatch { account_id, item_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> (Connection, Account, Item) {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let account = db::create_account(&conn, "alice", 0).unwrap();
        let category = db::create_category(&conn, "figures").unwrap();
        let item = db::create_item(&conn, "dragon", 5, "http://srrrs/dragon", category.id).unwrap();
        (conn, account, item)
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive("account_id", 1).is_ok());
        assert!(matches!(
            require_positive("account_id", 0),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            require_positive("item_id", -3),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_entities() {
        let (conn, account, item) = seeded();
        assert_eq!(require_account(&conn, account.id).unwrap(), account);
        assert_eq!(require_item(&conn, item.id).unwrap(), item);
        assert!(matches!(require_account(&conn, 77), Err(EngineError::AccountNotFound(77))));
        assert!(matches!(require_item(&conn, 88), Err(EngineError::ItemNotFound(88))));
    }

    #[test]
    fn test_require_ownership() {
        let (conn, account, item) = seeded();
        assert!(matches!(
            require_ownership(&conn, account.id, item.id),
            Err(EngineError::OwnershipMismatch { .. })
        ));

        let record = db::insert_ownership_record(&conn, account.id, item.id).unwrap();
        assert_eq!(require_ownership(&conn, account.id, item.id).unwrap(), record);
    }
}
