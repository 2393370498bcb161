// ⚙️ Engine - draw + exchange behind one handle, with conflict retries
//
// Built once at startup from explicit dependencies and shared by every
// request handler. Holds no mutable state of its own.

use crate::config::Config;
use crate::db::{self, DrawRecord, ExchangeRecord, OwnershipRecord};
use crate::draw::{Allocation, DrawAllocator, IndexSource, ThreadRngSource};
use crate::error::EngineResult;
use crate::exchange::{ExchangeCoordinator, ExchangeParams, ExchangeResult};
use crate::retry::RetryPolicy;
use crate::store::{CancelToken, Store};
use std::sync::Arc;

#[derive(Clone)]
pub struct Engine {
    store: Store,
    allocator: DrawAllocator,
    coordinator: ExchangeCoordinator,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(store: Store, source: Arc<dyn IndexSource>, config: &Config) -> Self {
        Self {
            allocator: DrawAllocator::new(store.clone(), source, config.catalog_page_size),
            coordinator: ExchangeCoordinator::new(store.clone()),
            retry: config.retry.clone(),
            store,
        }
    }

    /// Open the configured database and use the thread-local generator
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = Store::open(config)?;
        Ok(Self::new(store, Arc::new(ThreadRngSource), config))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    pub fn draw(&self, account_id: i64) -> EngineResult<OwnershipRecord> {
        self.draw_with_cancel(account_id, &CancelToken::new())
            .map(|allocation| allocation.gallery)
    }

    pub fn draw_with_cancel(
        &self,
        account_id: i64,
        cancel: &CancelToken,
    ) -> EngineResult<Allocation> {
        self.retry
            .run("draw", || self.allocator.allocate(account_id, cancel))
    }

    pub fn exchange(&self, params: &ExchangeParams) -> EngineResult<ExchangeResult> {
        self.exchange_with_cancel(params, &CancelToken::new())
    }

    /// A retried attempt re-reads ownership, so a lost race ends in
    /// OwnershipMismatch rather than a second swap
    pub fn exchange_with_cancel(
        &self,
        params: &ExchangeParams,
        cancel: &CancelToken,
    ) -> EngineResult<ExchangeResult> {
        self.retry
            .run("exchange", || self.coordinator.exchange_with_cancel(params, cancel))
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn get_gallery(&self, id: i64) -> EngineResult<Option<OwnershipRecord>> {
        self.store.read(|conn| db::get_gallery(conn, id))
    }

    pub fn get_gacha(&self, id: i64) -> EngineResult<Option<DrawRecord>> {
        self.store.read(|conn| db::get_gacha(conn, id))
    }

    pub fn get_exchange(&self, id: i64) -> EngineResult<Option<ExchangeRecord>> {
        self.store.read(|conn| db::get_exchange(conn, id))
    }

    pub fn galleries_by_owner(&self, owner_id: i64) -> EngineResult<Vec<OwnershipRecord>> {
        self.store.read(|conn| db::galleries_by_owner(conn, owner_id))
    }

    pub fn exchanges_from_account(&self, account_id: i64) -> EngineResult<Vec<ExchangeRecord>> {
        self.store.read(|conn| db::exchanges_from_account(conn, account_id))
    }

    pub fn exchanges_to_account(&self, account_id: i64) -> EngineResult<Vec<ExchangeRecord>> {
        self.store.read(|conn| db::exchanges_to_account(conn, account_id))
    }
}
