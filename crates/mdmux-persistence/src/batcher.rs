//! Debounced update batcher.
//!
//! Producers [`record`](UpdateBatcher::record) keyed values at any rate.
//! Values for the same key are merged while they wait, and a single
//! background loop flushes the merged map to an [`UpsertStore`]:
//!
//! 1. wait until something was recorded since the last flush (or stop)
//! 2. wait `trigger_interval` so further records coalesce into the batch
//! 3. swap the pending map for an empty one and upsert the snapshot
//!
//! A store failure is logged and that batch is dropped; stale market data
//! is not worth retrying.

use crate::store::UpsertStore;
use mdmux_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Merge of a pending value with a newly recorded one: `merge(existing, incoming)`.
pub type MergeFn<V> = Arc<dyn Fn(V, V) -> V + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Name used in logs and metric labels.
    pub name: String,
    /// Debounce window between the first pending record and the flush.
    pub trigger_interval: Duration,
}

impl BatcherConfig {
    pub fn new(name: impl Into<String>, trigger_interval: Duration) -> Self {
        Self {
            name: name.into(),
            trigger_interval,
        }
    }
}

struct Shared<V, S> {
    name: String,
    trigger_interval: Duration,
    pending: Mutex<HashMap<String, V>>,
    signal: Notify,
    merge: MergeFn<V>,
    store: Arc<S>,
}

impl<V, S> Shared<V, S>
where
    V: Send + 'static,
    S: UpsertStore<V>,
{
    /// Swap out the pending map and hand it to the store.
    async fn flush_pending(&self) {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return;
        }

        let keys = batch.len();
        match self.store.upsert_batch(batch).await {
            Ok(()) => {
                debug!(batcher = %self.name, keys, "Flushed batch");
                Metrics::batch_flushed(&self.name, keys, true);
            }
            Err(e) => {
                error!(batcher = %self.name, keys, error = %e, "Batch flush failed, dropping batch");
                Metrics::batch_flushed(&self.name, keys, false);
            }
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            batcher = %self.name,
            trigger_interval_ms = self.trigger_interval.as_millis() as u64,
            "Batcher started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.signal.notified() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.trigger_interval) => {}
            }
            self.flush_pending().await;
        }

        // Drain whatever was recorded before cancellation was observed.
        self.flush_pending().await;
        info!(batcher = %self.name, "Batcher stopped");
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Keyed, merging, debounced batcher in front of an [`UpsertStore`].
pub struct UpdateBatcher<V, S> {
    shared: Arc<Shared<V, S>>,
    running: Mutex<Option<Running>>,
}

impl<V, S> UpdateBatcher<V, S>
where
    V: Send + 'static,
    S: UpsertStore<V>,
{
    pub fn new<F>(config: BatcherConfig, store: Arc<S>, merge: F) -> Self
    where
        F: Fn(V, V) -> V + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                name: config.name,
                trigger_interval: config.trigger_interval,
                pending: Mutex::new(HashMap::new()),
                signal: Notify::new(),
                merge: Arc::new(merge),
                store,
            }),
            running: Mutex::new(None),
        }
    }

    /// Batcher whose merge keeps the newest value.
    pub fn last_write_wins(config: BatcherConfig, store: Arc<S>) -> Self {
        Self::new(config, store, |_, incoming| incoming)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Merge `updates` into the pending map and wake the flush loop.
    pub fn record<I>(&self, updates: I)
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let mut count = 0usize;
        {
            let mut pending = self.shared.pending.lock();
            for (key, incoming) in updates {
                let value = match pending.remove(&key) {
                    Some(existing) => (self.shared.merge)(existing, incoming),
                    None => incoming,
                };
                pending.insert(key, value);
                count += 1;
            }
        }

        if count > 0 {
            self.shared.signal.notify_one();
            Metrics::batch_recorded(&self.shared.name, count);
        }
    }

    pub fn record_one(&self, key: impl Into<String>, value: V) {
        self.record(std::iter::once((key.into(), value)));
    }

    /// Launch the flush loop. A second call while running is a no-op.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            warn!(batcher = %self.shared.name, "Batcher already running, ignoring start");
            return;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.shared.clone().run(cancel.clone()));
        *running = Some(Running { cancel, task });
    }

    /// Cancel the flush loop and wait for its final drain flush.
    ///
    /// No flush runs after this returns. Calling it when not running is a
    /// no-op.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            debug!(batcher = %self.shared.name, "Batcher not running, ignoring stop");
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.task.await {
            error!(batcher = %self.shared.name, error = %e, "Batcher task failed");
        }
    }

    /// Flush pending values immediately, outside the debounce cycle.
    pub async fn flush(&self) {
        self.shared.flush_pending().await;
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl<V, S> Drop for UpdateBatcher<V, S> {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PersistenceError, PersistenceResult};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store that records each batch and can be switched to fail.
    /// With a delay, a batch lands only once the write completes.
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<HashMap<String, u64>>>,
        failing: AtomicBool,
        delay: Duration,
    }

    impl RecordingStore {
        fn batches(&self) -> Vec<HashMap<String, u64>> {
            self.batches.lock().clone()
        }
    }

    impl UpsertStore<u64> for RecordingStore {
        async fn upsert_batch(&self, batch: HashMap<String, u64>) -> PersistenceResult<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.batches.lock().push(batch);
            if self.failing.load(Ordering::SeqCst) {
                return Err(PersistenceError::Unavailable("store down".to_string()));
            }
            Ok(())
        }
    }

    const WINDOW: Duration = Duration::from_millis(1000);

    fn batcher(store: Arc<RecordingStore>) -> UpdateBatcher<u64, RecordingStore> {
        UpdateBatcher::last_write_wins(BatcherConfig::new("test", WINDOW), store)
    }

    fn entries(pairs: &[(&str, u64)]) -> Vec<(String, u64)> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_record_merges_pending() {
        let store = Arc::new(RecordingStore::default());
        let batcher = UpdateBatcher::new(BatcherConfig::new("sum", WINDOW), store, |a: u64, b: u64| a + b);

        batcher.record(entries(&[("x", 1), ("y", 5)]));
        batcher.record(entries(&[("x", 2)]));

        assert_eq!(batcher.pending_len(), 2);
        let pending = batcher.shared.pending.lock().clone();
        assert_eq!(pending.get("x"), Some(&3));
        assert_eq!(pending.get("y"), Some(&5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coalesces_within_window() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());
        batcher.start();

        batcher.record(entries(&[("X", 1)]));
        tokio::time::sleep(Duration::from_millis(100)).await;
        batcher.record(entries(&[("X", 2)]));

        tokio::time::sleep(WINDOW * 2).await;

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], HashMap::from([("X".to_string(), 2)]));
        assert_eq!(batcher.pending_len(), 0);

        batcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_windows_flush_separately() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());
        batcher.start();

        batcher.record(entries(&[("a", 1)]));
        tokio::time::sleep(WINDOW * 2).await;
        batcher.record(entries(&[("b", 2)]));
        tokio::time::sleep(WINDOW * 2).await;

        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], HashMap::from([("a".to_string(), 1)]));
        assert_eq!(batches[1], HashMap::from([("b".to_string(), 2)]));

        batcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_batcher_never_flushes() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());
        batcher.start();

        tokio::time::sleep(WINDOW * 10).await;
        batcher.stop().await;

        assert!(store.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_waits_for_debounce_window() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());
        batcher.start();

        batcher.record(entries(&[("k", 1)]));
        tokio::time::sleep(WINDOW / 2).await;
        assert!(store.batches().is_empty());
        assert_eq!(batcher.pending_len(), 1);

        tokio::time::sleep(WINDOW).await;
        assert_eq!(store.batches().len(), 1);

        batcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drains_pending() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());
        batcher.start();

        batcher.record(entries(&[("a", 1), ("b", 2)]));
        batcher.stop().await;

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert!(!batcher.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_inflight_flush() {
        let store = Arc::new(RecordingStore {
            delay: Duration::from_millis(500),
            ..Default::default()
        });
        let batcher = batcher(store.clone());
        batcher.start();

        batcher.record(entries(&[("a", 1)]));
        tokio::time::sleep(WINDOW + Duration::from_millis(100)).await;
        // The first batch is inside the slow write.
        assert!(store.batches().is_empty());
        assert_eq!(batcher.pending_len(), 0);

        batcher.record(entries(&[("b", 2)]));
        batcher.stop().await;

        let after_stop = store.batches();
        assert_eq!(
            after_stop,
            vec![
                HashMap::from([("a".to_string(), 1)]),
                HashMap::from([("b".to_string(), 2)]),
            ]
        );

        batcher.record(entries(&[("c", 3)]));
        tokio::time::sleep(WINDOW * 5).await;
        assert_eq!(store.batches(), after_stop);
        assert_eq!(batcher.pending_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_error_drops_batch() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());
        batcher.start();

        store.failing.store(true, Ordering::SeqCst);
        batcher.record(entries(&[("lost", 1)]));
        tokio::time::sleep(WINDOW * 2).await;

        store.failing.store(false, Ordering::SeqCst);
        batcher.record(entries(&[("kept", 2)]));
        tokio::time::sleep(WINDOW * 2).await;

        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], HashMap::from([("kept".to_string(), 2)]));
        assert!(batcher.is_running());

        batcher.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_and_stop_are_noops() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());

        batcher.stop().await;
        assert!(!batcher.is_running());

        batcher.start();
        batcher.start();
        assert!(batcher.is_running());

        batcher.record(entries(&[("k", 1)]));
        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(store.batches().len(), 1);

        batcher.stop().await;
        batcher.stop().await;
        assert!(!batcher.is_running());
    }

    #[tokio::test]
    async fn test_manual_flush_skips_empty() {
        let store = Arc::new(RecordingStore::default());
        let batcher = batcher(store.clone());

        batcher.flush().await;
        assert!(store.batches().is_empty());

        batcher.record_one("k", 9);
        batcher.flush().await;
        assert_eq!(store.batches(), vec![HashMap::from([("k".to_string(), 9)])]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_records_all_persisted() {
        let store = Arc::new(MemoryStore::<u64>::new());
        let batcher = Arc::new(UpdateBatcher::last_write_wins(
            BatcherConfig::new("concurrent", Duration::from_millis(5)),
            store.clone(),
        ));
        batcher.start();

        let mut tasks = Vec::new();
        for worker in 0..8u64 {
            let batcher = batcher.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..50u64 {
                    batcher.record_one(format!("w{worker}-{i}"), i);
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        batcher.stop().await;

        assert_eq!(store.len(), 8 * 50);
        assert_eq!(store.get("w3-49"), Some(49));
    }
}
