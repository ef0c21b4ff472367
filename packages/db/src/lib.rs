//! SurrealDB integration for jobsdb.
//!
//! This crate provides database connectivity, the dataset directory and
//! repositories for jobs, statuses, migration checkpoints, the journal and
//! store-backed counters.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod directory;
mod schema;
mod txn;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use directory::{CreateMode, DatasetDirectory, DirectoryGuard, StorageScan};
pub use schema::{Tables, init_schema};
pub use txn::Transaction;

/// Connect with `config` and initialize the queue-wide tables for `tables`.
pub async fn init(config: &DbConfig, tables: &Tables) -> Result<Database, DbError> {
    let db = connect(config).await?;
    init_schema(&db, tables).await?;
    Ok(db)
}
