// 🎲 Random Draw Allocator (gacha)
//
// Picks one catalog item uniformly and grants it to an account. The draw
// record and the ownership record are written in one transaction.

use crate::db::{self, DrawRecord, Event, OwnershipRecord};
use crate::error::{EngineError, EngineResult};
use crate::store::{CancelToken, Store};
use crate::validation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex};

/// Catalog rows sampled per draw when nothing else is configured
pub const DEFAULT_CATALOG_PAGE_SIZE: usize = 1000;

// ============================================================================
// RANDOMNESS
// ============================================================================

/// Uniform index source shared by all concurrent draws
pub trait IndexSource: Send + Sync {
    /// Uniform index in `[0, len)`. Callers guarantee `len > 0`.
    fn pick(&self, len: usize) -> usize;
}

/// Per-thread OS-seeded generator (`rand::thread_rng`). The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl IndexSource for ThreadRngSource {
    fn pick(&self, len: usize) -> usize {
        rand::thread_rng().gen_range(0..len)
    }
}

/// One generator seeded once, shared behind a mutex. Reproducible runs.
#[derive(Debug)]
pub struct SeededSource {
    rng: Mutex<StdRng>,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl IndexSource for SeededSource {
    fn pick(&self, len: usize) -> usize {
        // A panic while holding the lock cannot leave the rng in a bad state
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_range(0..len)
    }
}

// ============================================================================
// ALLOCATOR
// ============================================================================

/// Everything one successful draw wrote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub gacha: DrawRecord,
    pub gallery: OwnershipRecord,
}

#[derive(Clone)]
pub struct DrawAllocator {
    store: Store,
    source: Arc<dyn IndexSource>,
    catalog_page_size: usize,
}

impl DrawAllocator {
    /// A page size of 0 would hide a non-empty catalog; it means the default
    pub fn new(store: Store, source: Arc<dyn IndexSource>, catalog_page_size: usize) -> Self {
        let catalog_page_size = match catalog_page_size {
            0 => DEFAULT_CATALOG_PAGE_SIZE,
            size => size,
        };
        Self {
            store,
            source,
            catalog_page_size,
        }
    }

    pub fn with_thread_rng(store: Store, catalog_page_size: usize) -> Self {
        Self::new(store, Arc::new(ThreadRngSource), catalog_page_size)
    }

    /// Draw one item for `account_id` and return the new ledger entry
    pub fn draw(&self, account_id: i64) -> EngineResult<OwnershipRecord> {
        self.allocate(account_id, &CancelToken::new())
            .map(|allocation| allocation.gallery)
    }

    /// Draw with caller-controlled cancellation; returns both written records
    pub fn allocate(&self, account_id: i64, cancel: &CancelToken) -> EngineResult<Allocation> {
        validation::require_positive("account_id", account_id)?;

        let span = tracing::info_span!("draw", account_id);
        let _enter = span.enter();

        let result = self.store.exec_tx(cancel, |tx| {
            validation::require_account(tx, account_id)?;

            let catalog = db::list_catalog_ids(tx, self.catalog_page_size)?;
            if catalog.is_empty() {
                return Err(EngineError::NoItemsAvailable);
            }

            let index = self.source.pick(catalog.len());
            let item_id = *catalog
                .get(index)
                .ok_or(EngineError::ItemLookupFailed { index })?;
            let item = db::get_item(tx, item_id)?.ok_or(EngineError::ItemLookupFailed { index })?;

            let gacha = db::insert_draw_record(tx, account_id, item.id)?;
            let gallery = db::insert_ownership_record(tx, account_id, item.id)?;

            db::insert_event(
                tx,
                &Event::new(
                    "gacha_drawn",
                    "gallery",
                    &gallery.id.to_string(),
                    serde_json::json!({
                        "gacha_id": gacha.id,
                        "account_id": account_id,
                        "item_id": item.id,
                        "catalog_index": index,
                        "catalog_size": catalog.len(),
                    }),
                    "draw_allocator",
                ),
            )?;

            Ok(Allocation { gacha, gallery })
        });

        match &result {
            Ok(allocation) => tracing::info!(
                item_id = allocation.gallery.item_id,
                gallery_id = allocation.gallery.id,
                "item drawn"
            ),
            Err(err) => tracing::warn!(kind = err.kind(), error = %err, "draw failed"),
        }

        result
    }
}
