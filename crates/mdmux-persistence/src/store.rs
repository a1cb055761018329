//! Keyed upsert store capability.

use crate::error::PersistenceResult;
use dashmap::DashMap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for merged batches: each key's value replaces any stored value.
pub trait UpsertStore<V>: Send + Sync + 'static {
    fn upsert_batch(
        &self,
        batch: HashMap<String, V>,
    ) -> impl Future<Output = PersistenceResult<()>> + Send;
}

/// In-process store keeping the latest value per key.
pub struct MemoryStore<V> {
    values: DashMap<String, V>,
    batches: AtomicU64,
}

impl<V> MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            batches: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of batches applied so far.
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> HashMap<String, V> {
        self.values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

impl<V> Default for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> UpsertStore<V> for MemoryStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn upsert_batch(&self, batch: HashMap<String, V>) -> PersistenceResult<()> {
        for (key, value) in batch {
            self.values.insert(key, value);
        }
        self.batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_upserts() {
        let store = MemoryStore::new();

        let first = HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
        let second = HashMap::from([("a".to_string(), 10)]);
        tokio_test::block_on(store.upsert_batch(first)).unwrap();
        tokio_test::block_on(store.upsert_batch(second)).unwrap();

        assert_eq!(store.get("a"), Some(10));
        assert_eq!(store.get("b"), Some(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.batch_count(), 2);
    }
}
