//! Session State Store
//!
//! This module provides the authoritative keyed record of every session, with
//! last-writer-wins updates and change notification.
//!
//! Components:
//! - `storage_trait`: the `SessionStore` trait defining a uniform API.
//! - `types`: the session row, its public snapshot and state patches.
//! - `notifier`: per-session change fan-out shared by every backend.
//! - `memory_storage`: in-process map, the default backend.
//! - `file_storage`: one JSON document per session on disk.
//! - `database_storage`: SQLite implementation using SeaORM.
//! - `db_entities`: SeaORM entity model for the database backend.

pub mod database_storage;
pub mod db_entities;
pub mod file_storage;
pub mod memory_storage;
pub mod notifier;
pub mod storage_trait;
pub mod types;

use std::sync::Arc;

use crate::configuration::types::{StorageBackend, StorageConfig};
use crate::error_handling::types::StorageError;

pub use database_storage::DatabaseStorage;
pub use file_storage::FileStorage;
pub use memory_storage::MemoryStorage;
pub use storage_trait::SessionStore;
pub use types::{Session, SessionSnapshot, StatePatch};

/// Opens the backend selected by `config`.
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn SessionStore>, StorageError> {
    let store: Arc<dyn SessionStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::File => Arc::new(FileStorage::new(&config.path)?),
        StorageBackend::Database => {
            Arc::new(DatabaseStorage::new_file(config.path.join("radio-sync.sqlite3")).await?)
        }
    };
    Ok(store)
}
