// Gacha Exchange - Core Library
// Draw allocation and atomic item exchange over a SQLite ownership ledger.
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod draw;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod fault;
pub mod logging;
pub mod retry;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use db::{
    import_items, load_catalog_csv, setup_database, Account, Category, DrawRecord, Event,
    ExchangeRecord, Item, NewItem, OwnershipRecord,
};
pub use draw::{Allocation, DrawAllocator, IndexSource, SeededSource, ThreadRngSource};
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use exchange::{ExchangeCoordinator, ExchangeParams, ExchangeResult};
pub use fault::{ExchangeStep, FaultPlan};
pub use retry::RetryPolicy;
pub use store::{CancelToken, Store};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
