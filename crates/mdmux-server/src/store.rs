//! Store selection for batch flushes.

use crate::config::{PersistenceConfig, StoreKind};
use crate::error::AppResult;
use mdmux_persistence::{JsonLinesStore, MemoryStore, PersistenceResult, UpsertStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Configured [`UpsertStore`] for one feed kind.
pub enum StoreBackend<V> {
    Memory(Arc<MemoryStore<V>>),
    JsonLines(JsonLinesStore<V>),
}

impl<V> StoreBackend<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Open the store named `name` (e.g. "tickers") per `config`.
    pub fn open(config: &PersistenceConfig, name: &str) -> AppResult<Self> {
        Ok(match config.store {
            StoreKind::Memory => Self::Memory(Arc::new(MemoryStore::new())),
            StoreKind::Jsonl => Self::JsonLines(JsonLinesStore::new(&config.base_dir, name)?),
        })
    }

    pub fn as_memory(&self) -> Option<&Arc<MemoryStore<V>>> {
        match self {
            Self::Memory(store) => Some(store),
            Self::JsonLines(_) => None,
        }
    }

    /// Latest persisted value per key.
    pub fn load_latest(&self) -> AppResult<HashMap<String, V>> {
        match self {
            Self::Memory(store) => Ok(store.snapshot()),
            Self::JsonLines(store) => Ok(store.load_latest()?),
        }
    }
}

impl<V> UpsertStore<V> for StoreBackend<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn upsert_batch(&self, batch: HashMap<String, V>) -> PersistenceResult<()> {
        match self {
            Self::Memory(store) => store.upsert_batch(batch).await,
            Self::JsonLines(store) => store.upsert_batch(batch).await,
        }
    }
}
