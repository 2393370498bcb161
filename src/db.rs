use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

// ============================================================================
// RECORDS
// ============================================================================

/// Account that can own items. Managed outside the engine; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: i64,
    pub item_name: String,
    pub rating: i32,
    pub item_url: String,
    pub category_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Catalog row as read from a seed file, before it has an id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub item_name: String,
    pub rating: i32,
    pub item_url: String,
    pub category: String,
}

/// Gallery entry: one item currently held by one account
///
/// Created by a draw, re-owned by an exchange, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub id: i64,
    pub owner_id: i64,
    pub item_id: i64,
    /// Last time this record changed hands (None until the first exchange)
    pub exchange_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Gacha entry: one successful draw
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawRecord {
    pub id: i64,
    pub account_id: i64,
    pub item_id: i64,
    pub created_at: DateTime<Utc>,
}

/// One direction of an exchange. Always written in pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub id: i64,
    pub from_account_id: i64,
    pub to_account_id: i64,
    pub item_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Event for audit trail ("Every change is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Per-connection settings. Must run on every connection, not only the first.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery and concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;
    configure_connection(conn)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner TEXT NOT NULL,
            balance INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_name TEXT NOT NULL,
            rating INTEGER NOT NULL,
            item_url TEXT NOT NULL,
            category_id INTEGER NOT NULL REFERENCES categories(id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS galleries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL REFERENCES accounts(id),
            item_id INTEGER NOT NULL REFERENCES items(id),
            exchange_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gachas (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            item_id INTEGER NOT NULL REFERENCES items(id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS exchanges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_account_id INTEGER NOT NULL REFERENCES accounts(id),
            to_account_id INTEGER NOT NULL REFERENCES accounts(id),
            item_id INTEGER NOT NULL REFERENCES items(id),
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_galleries_owner_item ON galleries(owner_id, item_id);
        CREATE INDEX IF NOT EXISTS idx_galleries_item ON galleries(item_id);
        CREATE INDEX IF NOT EXISTS idx_gachas_account ON gachas(account_id);
        CREATE INDEX IF NOT EXISTS idx_exchanges_from ON exchanges(from_account_id);
        CREATE INDEX IF NOT EXISTS idx_exchanges_to ON exchanges(to_account_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);",
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        owner: row.get(1)?,
        balance: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
    })
}

fn category_from_row(row: &Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        category: row.get(1)?,
        created_at: timestamp_at(row, 2)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        item_name: row.get(1)?,
        rating: row.get(2)?,
        item_url: row.get(3)?,
        category_id: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
    })
}

fn ownership_from_row(row: &Row<'_>) -> rusqlite::Result<OwnershipRecord> {
    Ok(OwnershipRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        item_id: row.get(2)?,
        exchange_at: optional_timestamp_at(row, 3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn draw_from_row(row: &Row<'_>) -> rusqlite::Result<DrawRecord> {
    Ok(DrawRecord {
        id: row.get(0)?,
        account_id: row.get(1)?,
        item_id: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
    })
}

fn exchange_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeRecord> {
    Ok(ExchangeRecord {
        id: row.get(0)?,
        from_account_id: row.get(1)?,
        to_account_id: row.get(2)?,
        item_id: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

const GALLERY_COLUMNS: &str = "id, owner_id, item_id, exchange_at, created_at";
const EXCHANGE_COLUMNS: &str = "id, from_account_id, to_account_id, item_id, created_at";

// ============================================================================
// ACCOUNTS, CATEGORIES, ITEMS (seeding + read-only lookups)
// ============================================================================

pub fn create_account(conn: &Connection, owner: &str, balance: i64) -> rusqlite::Result<Account> {
    conn.query_row(
        "INSERT INTO accounts (owner, balance, created_at) VALUES (?1, ?2, ?3)
         RETURNING id, owner, balance, created_at",
        params![owner, balance, Utc::now().to_rfc3339()],
        account_from_row,
    )
}

pub fn get_account(conn: &Connection, id: i64) -> rusqlite::Result<Option<Account>> {
    conn.query_row(
        "SELECT id, owner, balance, created_at FROM accounts WHERE id = ?1",
        [id],
        account_from_row,
    )
    .optional()
}

pub fn create_category(conn: &Connection, category: &str) -> rusqlite::Result<Category> {
    conn.query_row(
        "INSERT INTO categories (category, created_at) VALUES (?1, ?2)
         RETURNING id, category, created_at",
        params![category, Utc::now().to_rfc3339()],
        category_from_row,
    )
}

pub fn get_category_by_name(
    conn: &Connection,
    category: &str,
) -> rusqlite::Result<Option<Category>> {
    conn.query_row(
        "SELECT id, category, created_at FROM categories WHERE category = ?1",
        [category],
        category_from_row,
    )
    .optional()
}

pub fn create_item(
    conn: &Connection,
    item_name: &str,
    rating: i32,
    item_url: &str,
    category_id: i64,
) -> rusqlite::Result<Item> {
    conn.query_row(
        "INSERT INTO items (item_name, rating, item_url, category_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id, item_name, rating, item_url, category_id, created_at",
        params![item_name, rating, item_url, category_id, Utc::now().to_rfc3339()],
        item_from_row,
    )
}

pub fn get_item(conn: &Connection, id: i64) -> rusqlite::Result<Option<Item>> {
    conn.query_row(
        "SELECT id, item_name, rating, item_url, category_id, created_at FROM items WHERE id = ?1",
        [id],
        item_from_row,
    )
    .optional()
}

/// First `limit` catalog ids in id order. The draw picks an index into this page.
pub fn list_catalog_ids(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT id FROM items ORDER BY id LIMIT ?1")?;
    let ids = stmt
        .query_map([limit as i64], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

pub fn load_catalog_csv(csv_path: &Path) -> Result<Vec<NewItem>> {
    let mut rdr = csv::Reader::from_path(csv_path).context("Failed to open catalog CSV")?;

    let mut items = Vec::new();
    for result in rdr.deserialize() {
        let item: NewItem = result.context("Failed to deserialize catalog row")?;
        items.push(item);
    }

    Ok(items)
}

/// Insert catalog rows, creating categories on first sight. Runs as one transaction.
pub fn import_items(conn: &mut Connection, items: &[NewItem]) -> Result<Vec<Item>> {
    let tx = conn.transaction()?;
    let mut category_ids: HashMap<String, i64> = HashMap::new();
    let mut inserted = Vec::with_capacity(items.len());

    for new_item in items {
        let category_id = match category_ids.get(&new_item.category) {
            Some(id) => *id,
            None => {
                let id = match get_category_by_name(&tx, &new_item.category)? {
                    Some(existing) => existing.id,
                    None => create_category(&tx, &new_item.category)?.id,
                };
                category_ids.insert(new_item.category.clone(), id);
                id
            }
        };

        let item = create_item(
            &tx,
            &new_item.item_name,
            new_item.rating,
            &new_item.item_url,
            category_id,
        )
        .with_context(|| format!("Failed to insert item {}", new_item.item_name))?;
        inserted.push(item);
    }

    tx.commit()?;
    tracing::info!(count = inserted.len(), "catalog items imported");
    Ok(inserted)
}

// ============================================================================
// OWNERSHIP LEDGER (galleries)
// ============================================================================

pub fn insert_ownership_record(
    conn: &Connection,
    owner_id: i64,
    item_id: i64,
) -> rusqlite::Result<OwnershipRecord> {
    conn.query_row(
        &format!(
            "INSERT INTO galleries (owner_id, item_id, exchange_at, created_at)
             VALUES (?1, ?2, NULL, ?3)
             RETURNING {GALLERY_COLUMNS}"
        ),
        params![owner_id, item_id, Utc::now().to_rfc3339()],
        ownership_from_row,
    )
}

pub fn get_gallery(conn: &Connection, id: i64) -> rusqlite::Result<Option<OwnershipRecord>> {
    conn.query_row(
        &format!("SELECT {GALLERY_COLUMNS} FROM galleries WHERE id = ?1"),
        [id],
        ownership_from_row,
    )
    .optional()
}

/// Oldest ledger row where `owner_id` holds `item_id`
pub fn find_owned_record(
    conn: &Connection,
    owner_id: i64,
    item_id: i64,
) -> rusqlite::Result<Option<OwnershipRecord>> {
    conn.query_row(
        &format!(
            "SELECT {GALLERY_COLUMNS} FROM galleries
             WHERE owner_id = ?1 AND item_id = ?2
             ORDER BY id LIMIT 1"
        ),
        params![owner_id, item_id],
        ownership_from_row,
    )
    .optional()
}

/// Move one ledger row to `new_owner`, only if it is still held by `expected_owner`.
///
/// Returns None when the guard no longer matches (someone else moved it).
pub fn reassign_ownership(
    conn: &Connection,
    gallery_id: i64,
    expected_owner: i64,
    new_owner: i64,
    exchange_at: DateTime<Utc>,
) -> rusqlite::Result<Option<OwnershipRecord>> {
    conn.query_row(
        &format!(
            "UPDATE galleries SET owner_id = ?1, exchange_at = ?2
             WHERE id = ?3 AND owner_id = ?4
             RETURNING {GALLERY_COLUMNS}"
        ),
        params![new_owner, exchange_at.to_rfc3339(), gallery_id, expected_owner],
        ownership_from_row,
    )
    .optional()
}

pub fn galleries_by_owner(
    conn: &Connection,
    owner_id: i64,
) -> rusqlite::Result<Vec<OwnershipRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {GALLERY_COLUMNS} FROM galleries WHERE owner_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([owner_id], ownership_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_galleries_for_item(conn: &Connection, item_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM galleries WHERE item_id = ?1",
        [item_id],
        |row| row.get(0),
    )
}

pub fn count_galleries(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM galleries", [], |row| row.get(0))
}

// ============================================================================
// DRAW RECORDS (gachas)
// ============================================================================

pub fn insert_draw_record(
    conn: &Connection,
    account_id: i64,
    item_id: i64,
) -> rusqlite::Result<DrawRecord> {
    conn.query_row(
        "INSERT INTO gachas (account_id, item_id, created_at) VALUES (?1, ?2, ?3)
         RETURNING id, account_id, item_id, created_at",
        params![account_id, item_id, Utc::now().to_rfc3339()],
        draw_from_row,
    )
}

pub fn get_gacha(conn: &Connection, id: i64) -> rusqlite::Result<Option<DrawRecord>> {
    conn.query_row(
        "SELECT id, account_id, item_id, created_at FROM gachas WHERE id = ?1",
        [id],
        draw_from_row,
    )
    .optional()
}

pub fn count_gachas(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM gachas", [], |row| row.get(0))
}

// ============================================================================
// EXCHANGE RECORDS
// ============================================================================

pub fn insert_exchange_record(
    conn: &Connection,
    from_account_id: i64,
    to_account_id: i64,
    item_id: i64,
) -> rusqlite::Result<ExchangeRecord> {
    conn.query_row(
        &format!(
            "INSERT INTO exchanges (from_account_id, to_account_id, item_id, created_at)
             VALUES (?1, ?2, ?3, ?4)
             RETURNING {EXCHANGE_COLUMNS}"
        ),
        params![from_account_id, to_account_id, item_id, Utc::now().to_rfc3339()],
        exchange_from_row,
    )
}

pub fn get_exchange(conn: &Connection, id: i64) -> rusqlite::Result<Option<ExchangeRecord>> {
    conn.query_row(
        &format!("SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE id = ?1"),
        [id],
        exchange_from_row,
    )
    .optional()
}

pub fn exchanges_from_account(
    conn: &Connection,
    account_id: i64,
) -> rusqlite::Result<Vec<ExchangeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE from_account_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([account_id], exchange_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn exchanges_to_account(
    conn: &Connection,
    account_id: i64,
) -> rusqlite::Result<Vec<ExchangeRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {EXCHANGE_COLUMNS} FROM exchanges WHERE to_account_id = ?1 ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([account_id], exchange_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_exchanges(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM exchanges", [], |row| row.get(0))
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> rusqlite::Result<()> {
    let data_json = event.data.to_string();

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Get events for a specific entity, newest first
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> rusqlite::Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: timestamp_at(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn count_events(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
}
