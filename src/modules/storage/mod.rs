//! Key-value persistence for sample histories.
//!
//! Payloads are opaque JSON documents; interpretation (and tolerance of
//! malformed data) lives with the caller.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde_json::Value;
use thiserror::Error;

const HISTORY_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("history");

/// Errors raised by a history store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] redb::Error),
    #[error("payload encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(String),
}

fn backend<E: Into<redb::Error>>(err: E) -> StoreError {
    StoreError::Backend(err.into())
}

/// Persistence seam used by coordinators for their rolling history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn save(&self, key: &str, payload: &Value) -> Result<(), StoreError>;
}

/// History store backed by a single redb database file.
#[derive(Clone)]
pub struct RedbHistoryStore {
    db: Arc<Database>,
}

impl RedbHistoryStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Wraps an already opened database, e.g. one on an in-memory backend.
    pub fn from_database(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    fn read(db: &Database, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = db.begin_read().map_err(backend)?;
        let table = match txn.open_table(HISTORY_TABLE) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(backend(err)),
        };
        let value = table.get(key).map_err(backend)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn write(db: &Database, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let txn = db.begin_write().map_err(backend)?;
        {
            let mut table = txn.open_table(HISTORY_TABLE).map_err(backend)?;
            table.insert(key, bytes).map_err(backend)?;
        }
        txn.commit().map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for RedbHistoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let db = self.db.clone();
        let key = key.to_string();
        let bytes = tokio::task::spawn_blocking(move || Self::read(&db, &key))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))??;

        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, payload: &Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(payload)?;
        let db = self.db.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::write(&db, &key, &bytes))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))?
    }
}

/// Process-local store; nothing survives a restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` with an arbitrary payload.
    pub fn insert(&self, key: impl Into<String>, payload: Value) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.insert(key.into(), payload);
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().ok().and_then(|map| map.get(key).cloned())
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, payload: &Value) -> Result<(), StoreError> {
        self.insert(key, payload.clone());
        Ok(())
    }
}
