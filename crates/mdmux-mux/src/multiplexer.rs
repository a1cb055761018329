//! Subscription multiplexer.
//!
//! Maps each topic to at most one live upstream subscription and fans its
//! events out to every attached consumer.
//!
//! # Locking
//!
//! Every attach/detach of a topic runs inside that topic's region of a
//! [`KeyedLocks`] pool, held across the provider's subscribe and close
//! calls. Two calls for the same topic never interleave; calls for
//! different topics never wait on each other.
//!
//! # Broadcast
//!
//! Each upstream has a pump task that reads provider events. For every
//! event it loads a snapshot of the consumer set from an `ArcSwap` (writers
//! replace the whole map) and invokes the callbacks outside any lock.
//!
//! Consumer set changes are ordered after queued events: attach and detach
//! send a barrier through the pump and wait for it before touching the set,
//! so an update the provider handed over before `detach` was called reaches
//! the detaching consumer. Closing the last consumer's upstream closes the
//! provider handle, dispatches what is still queued (tap included) and
//! joins the pump. A panicking callback is logged and skipped; the other
//! consumers keep receiving events.
//!
//! # Counts
//!
//! [`Multiplexer::connection_count`] and [`Multiplexer::subscription_count`]
//! read shared maps without the topic locks and are eventually consistent
//! under concurrent attach/detach.

use crate::error::{MuxError, MuxResult};
use crate::keyed_lock::{KeyedGuard, KeyedLocks};
use crate::observer::{TopicObserver, UpdateTap};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use futures_util::future::join_all;
use mdmux_core::{ConsumerId, FeedKind, StatusEvent, TopicKey};
use mdmux_feed::{FeedEvent, FeedHandle, FeedProvider};
use mdmux_telemetry::Metrics;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type ObserverRef<U> = Arc<dyn TopicObserver<U>>;
type ConsumerSet<U> = Arc<ArcSwap<HashMap<ConsumerId, ObserverRef<U>>>>;

/// Out-of-band messages to a pump. Both are handled only after the events
/// queued ahead of them have been dispatched.
enum Control {
    /// Acknowledge once the queue ahead has been dispatched.
    Barrier(oneshot::Sender<()>),
    /// Dispatch the queue ahead, then exit.
    Stop,
}

/// One live upstream subscription and the consumers sharing it.
///
/// The reference count is the size of the consumer set; the entry is
/// removed from the multiplexer as soon as it would reach zero.
struct Upstream<H, U> {
    handle: H,
    consumers: ConsumerSet<U>,
    control: mpsc::UnboundedSender<Control>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<H, U> Upstream<H, U>
where
    H: FeedHandle,
{
    fn ref_count(&self) -> usize {
        self.consumers.load().len()
    }

    fn has_consumer(&self, consumer: &ConsumerId) -> bool {
        self.consumers.load().contains_key(consumer)
    }

    /// Callers hold the topic lock, so load-modify-store never races.
    fn add_consumer(&self, consumer: ConsumerId, observer: ObserverRef<U>) {
        let mut next = HashMap::clone(&self.consumers.load());
        next.insert(consumer, observer);
        self.consumers.store(Arc::new(next));
    }

    fn remove_consumer(&self, consumer: &ConsumerId) {
        let mut next = HashMap::clone(&self.consumers.load());
        next.remove(consumer);
        self.consumers.store(Arc::new(next));
    }

    /// Wait until every event queued so far has been dispatched.
    async fn barrier(&self) {
        let (ack, done) = oneshot::channel();
        if self.control.send(Control::Barrier(ack)).is_ok() {
            // An exited pump drops the ack; there is nothing left to deliver.
            let _ = done.await;
        }
    }

    /// Close the provider side, dispatch the remaining queue and join the pump.
    async fn shut<K: fmt::Display>(&self, kind: FeedKind, topic: &K) {
        self.handle.close().await;
        let _ = self.control.send(Control::Stop);

        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                error!(kind = %kind, topic = %topic, error = %e, "Upstream pump task failed");
            }
        }
    }
}

/// Shares one upstream subscription per topic among any number of consumers.
///
/// `K` is the topic key shape, `U` the update payload, `P` the provider.
pub struct Multiplexer<K, U, P>
where
    K: TopicKey,
    U: Send + Sync + 'static,
    P: FeedProvider<K, U>,
{
    kind: FeedKind,
    provider: Arc<P>,
    locks: KeyedLocks<K>,
    upstreams: DashMap<K, Arc<Upstream<P::Handle, U>>>,
    attachments: DashMap<ConsumerId, HashSet<K>>,
    tap: Option<Arc<dyn UpdateTap<K, U>>>,
}

impl<K, U, P> Multiplexer<K, U, P>
where
    K: TopicKey,
    U: Send + Sync + 'static,
    P: FeedProvider<K, U>,
{
    /// Create a multiplexer over `provider`.
    pub fn new(kind: FeedKind, provider: Arc<P>) -> Self {
        Self {
            kind,
            provider,
            locks: KeyedLocks::new(),
            upstreams: DashMap::new(),
            attachments: DashMap::new(),
            tap: None,
        }
    }

    /// Install a hook that sees every upstream update before broadcast.
    pub fn with_tap(mut self, tap: Arc<dyn UpdateTap<K, U>>) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// Attach `consumer` to `topic`.
    ///
    /// Opens the upstream on first attach. Attaching an already attached
    /// consumer is a successful no-op. A new consumer only sees events
    /// dispatched after it attached.
    ///
    /// # Errors
    /// Returns [`MuxError::Subscribe`] if the provider fails to open the
    /// upstream; no state is left behind, so a later attach retries.
    pub async fn attach(
        &self,
        consumer: ConsumerId,
        topic: K,
        observer: Arc<dyn TopicObserver<U>>,
    ) -> MuxResult<()> {
        let _guard = self.locks.lock(&topic).await;

        let existing = self.upstreams.get(&topic).map(|e| e.value().clone());
        match existing {
            Some(upstream) => {
                if upstream.has_consumer(&consumer) {
                    debug!(kind = %self.kind, topic = %topic, consumer = %consumer, "Already attached");
                    return Ok(());
                }
                upstream.barrier().await;
                upstream.add_consumer(consumer, observer);
                debug!(
                    kind = %self.kind,
                    topic = %topic,
                    consumer = %consumer,
                    ref_count = upstream.ref_count(),
                    "Consumer joined live upstream"
                );
            }
            None => {
                let subscription = match self.provider.subscribe(&topic).await {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        Metrics::subscribe_failed(self.kind.as_str());
                        warn!(kind = %self.kind, topic = %topic, error = %e, "Upstream subscribe failed");
                        return Err(MuxError::Subscribe {
                            topic: topic.to_string(),
                            source: e,
                        });
                    }
                };

                let mut initial = HashMap::new();
                initial.insert(consumer, observer);
                let consumers: ConsumerSet<U> = Arc::new(ArcSwap::from_pointee(initial));
                let (control, control_rx) = mpsc::unbounded_channel();

                let pump = Pump {
                    kind: self.kind,
                    topic: topic.clone(),
                    consumers: consumers.clone(),
                    tap: self.tap.clone(),
                };
                let pump = tokio::spawn(pump.run(subscription.events, control_rx));

                self.upstreams.insert(
                    topic.clone(),
                    Arc::new(Upstream {
                        handle: subscription.handle,
                        consumers,
                        control,
                        pump: Mutex::new(Some(pump)),
                    }),
                );
                Metrics::upstream_opened(self.kind.as_str());
                info!(kind = %self.kind, topic = %topic, consumer = %consumer, "Upstream opened");
            }
        }

        self.attachments
            .entry(consumer)
            .or_default()
            .insert(topic);
        Metrics::attached(self.kind.as_str());
        Ok(())
    }

    /// Detach `consumer` from `topic`.
    ///
    /// No-op if not attached. Updates the provider queued before this call
    /// are still delivered to `consumer`. Closes the upstream when the last
    /// consumer leaves; this is the only path that closes an upstream.
    pub async fn detach(&self, consumer: ConsumerId, topic: &K) {
        let guard = self.locks.lock(topic).await;

        let Some(upstream) = self.upstreams.get(topic).map(|e| e.value().clone()) else {
            return;
        };
        if !upstream.has_consumer(&consumer) {
            return;
        }

        if upstream.ref_count() > 1 {
            upstream.barrier().await;
            upstream.remove_consumer(&consumer);
            self.forget_attachment(consumer, topic);
            Metrics::detached(self.kind.as_str());
            debug!(
                kind = %self.kind,
                topic = %topic,
                consumer = %consumer,
                ref_count = upstream.ref_count(),
                "Consumer left live upstream"
            );
            return;
        }

        self.upstreams.remove(topic);
        self.forget_attachment(consumer, topic);
        Metrics::detached(self.kind.as_str());
        self.close_upstream(guard, topic, upstream).await;
        info!(kind = %self.kind, topic = %topic, consumer = %consumer, "Upstream closed");
    }

    /// Detach `consumer` from every topic it is attached to.
    pub async fn detach_all(&self, consumer: ConsumerId) {
        let topics: Vec<K> = self
            .attachments
            .get(&consumer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        if topics.is_empty() {
            return;
        }
        debug!(kind = %self.kind, consumer = %consumer, topics = topics.len(), "Detaching consumer");

        join_all(topics.iter().map(|topic| self.detach(consumer, topic))).await;
    }

    /// Close every upstream and drop all registrations.
    pub async fn shutdown(&self) {
        let topics: Vec<K> = self.upstreams.iter().map(|e| e.key().clone()).collect();
        for topic in topics {
            let guard = self.locks.lock(&topic).await;
            if let Some((_, upstream)) = self.upstreams.remove(&topic) {
                for _ in 0..upstream.ref_count() {
                    Metrics::detached(self.kind.as_str());
                }
                self.close_upstream(guard, &topic, upstream).await;
            }
        }
        self.attachments.clear();
        info!(kind = %self.kind, "Multiplexer shut down");
    }

    /// Tear down an upstream already removed from the map.
    ///
    /// Runs on its own task, which owns the topic lock until the close is
    /// done, so it completes even if the caller's future is dropped part way
    /// and no attach for the topic can slip in before it.
    async fn close_upstream(
        &self,
        guard: KeyedGuard<K>,
        topic: &K,
        upstream: Arc<Upstream<P::Handle, U>>,
    ) {
        let kind = self.kind;
        let task_topic = topic.clone();
        let teardown = tokio::spawn(async move {
            let _guard = guard;
            upstream.shut(kind, &task_topic).await;
            Metrics::upstream_closed(kind.as_str());
        });
        if let Err(e) = teardown.await {
            error!(kind = %self.kind, topic = %topic, error = %e, "Upstream teardown failed");
        }
    }

    /// Distinct consumers with at least one attachment.
    pub fn connection_count(&self) -> usize {
        self.attachments.iter().filter(|e| !e.is_empty()).count()
    }

    /// Total consumer x topic attachment edges.
    pub fn subscription_count(&self) -> usize {
        self.attachments.iter().map(|e| e.len()).sum()
    }

    /// Live upstream subscriptions.
    pub fn upstream_count(&self) -> usize {
        self.upstreams.len()
    }

    /// Consumers currently sharing the upstream of `topic`.
    pub fn ref_count(&self, topic: &K) -> usize {
        self.upstreams
            .get(topic)
            .map(|e| e.ref_count())
            .unwrap_or(0)
    }

    pub fn is_attached(&self, consumer: ConsumerId, topic: &K) -> bool {
        self.attachments
            .get(&consumer)
            .map(|set| set.contains(topic))
            .unwrap_or(false)
    }

    /// Consumers with at least one attachment.
    pub fn consumers(&self) -> Vec<ConsumerId> {
        self.attachments
            .iter()
            .filter(|e| !e.is_empty())
            .map(|e| *e.key())
            .collect()
    }

    /// Topics with a live upstream.
    pub fn topics(&self) -> Vec<K> {
        self.upstreams.iter().map(|e| e.key().clone()).collect()
    }

    fn forget_attachment(&self, consumer: ConsumerId, topic: &K) {
        if let Some(mut set) = self.attachments.get_mut(&consumer) {
            set.remove(topic);
        }
        self.attachments.remove_if(&consumer, |_, set| set.is_empty());
    }
}

/// Per-upstream broadcast task state.
struct Pump<K, U> {
    kind: FeedKind,
    topic: K,
    consumers: ConsumerSet<U>,
    tap: Option<Arc<dyn UpdateTap<K, U>>>,
}

impl<K, U> Pump<K, U>
where
    K: TopicKey,
    U: Send + Sync + 'static,
{
    async fn run(
        self,
        mut events: mpsc::Receiver<FeedEvent<U>>,
        mut control: mpsc::UnboundedReceiver<Control>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
                message = control.recv() => {
                    self.drain(&mut events);
                    match message {
                        Some(Control::Barrier(ack)) => {
                            let _ = ack.send(());
                        }
                        Some(Control::Stop) | None => break,
                    }
                }
            }
        }
        debug!(kind = %self.kind, topic = %self.topic, "Upstream event stream ended");
    }

    /// Dispatch what is queued right now, without waiting for more.
    fn drain(&self, events: &mut mpsc::Receiver<FeedEvent<U>>) {
        for _ in 0..events.len() {
            match events.try_recv() {
                Ok(event) => self.dispatch(event),
                Err(_) => break,
            }
        }
    }

    fn dispatch(&self, event: FeedEvent<U>) {
        let snapshot = self.consumers.load_full();
        match event {
            FeedEvent::Update(update) => {
                if let Some(tap) = &self.tap {
                    self.isolated(&"tap", || tap.on_update(&self.topic, &update));
                }
                for (consumer, observer) in snapshot.iter() {
                    self.isolated(consumer, || observer.on_update(&update));
                }
                Metrics::update_broadcast(self.kind.as_str());
            }
            FeedEvent::Status(status) => {
                let (kind, topic) = (self.kind, &self.topic);
                match status {
                    StatusEvent::Interrupted => {
                        warn!(kind = %kind, topic = %topic, consumers = snapshot.len(), "Upstream interrupted")
                    }
                    StatusEvent::Restored => {
                        info!(kind = %kind, topic = %topic, consumers = snapshot.len(), "Upstream restored")
                    }
                    StatusEvent::Failed => {
                        error!(kind = %kind, topic = %topic, consumers = snapshot.len(), "Upstream failed")
                    }
                }
                for (consumer, observer) in snapshot.iter() {
                    self.isolated(consumer, || observer.on_status(status));
                }
                Metrics::status_broadcast(kind.as_str(), status.as_str());
            }
        }
    }

    /// Run one callback; a panic is logged and does not reach the pump.
    fn isolated(&self, callee: &dyn fmt::Display, callback: impl FnOnce()) {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(callback)) {
            let message = panic
                .downcast_ref::<&'static str>()
                .map(|msg| (*msg).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Metrics::callback_panicked(self.kind.as_str());
            error!(
                kind = %self.kind,
                topic = %self.topic,
                callee = %callee,
                panic = %message,
                "Broadcast callback panicked"
            );
        }
    }
}
