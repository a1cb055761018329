//! In-process simulated feed provider.
//!
//! Produces deterministic payloads at a fixed cadence for every live topic,
//! and lets callers inject updates, connectivity transitions and subscribe
//! failures. Counts subscribe/close calls so callers can verify that each
//! topic has at most one live upstream.

use crate::error::{FeedError, FeedResult};
use crate::provider::{FeedEvent, FeedHandle, FeedProvider, FeedSubscription};
use chrono::Utc;
use dashmap::DashMap;
use mdmux_core::{
    Candle, CandleTopic, Price, Size, StatusEvent, SymbolTopic, Ticker, TopicKey, Trade, TradeSide,
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Produces the `seq`-th synthetic payload for a topic.
pub type Generator<K, U> = Arc<dyn Fn(&K, u64) -> U + Send + Sync>;

/// Simulated provider configuration.
#[derive(Debug, Clone)]
pub struct SimulatedFeedConfig {
    /// Interval between generated updates. `None` disables generation;
    /// updates then only arrive through [`SimulatedFeedProvider::push`].
    pub tick_interval: Option<Duration>,
    /// Artificial latency of each subscribe call.
    pub subscribe_delay: Duration,
    /// Event channel capacity per subscription.
    pub channel_capacity: usize,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            tick_interval: Some(Duration::from_millis(250)),
            subscribe_delay: Duration::ZERO,
            channel_capacity: 1024,
        }
    }
}

struct LiveTopic<U> {
    id: u64,
    tx: mpsc::Sender<FeedEvent<U>>,
    ticker: Option<JoinHandle<()>>,
}

struct Shared<K, U> {
    live: DashMap<K, LiveTopic<U>>,
    next_id: AtomicU64,
    subscribe_calls: AtomicU64,
    close_calls: AtomicU64,
    overlapping_subscribes: AtomicU64,
}

/// Deterministic in-process [`FeedProvider`].
pub struct SimulatedFeedProvider<K, U> {
    config: SimulatedFeedConfig,
    generator: Generator<K, U>,
    failing: Mutex<HashSet<K>>,
    shared: Arc<Shared<K, U>>,
}

impl<K, U> SimulatedFeedProvider<K, U>
where
    K: TopicKey,
    U: Send + 'static,
{
    pub fn new(config: SimulatedFeedConfig, generator: Generator<K, U>) -> Self {
        Self {
            config,
            generator,
            failing: Mutex::new(HashSet::new()),
            shared: Arc::new(Shared {
                live: DashMap::new(),
                next_id: AtomicU64::new(1),
                subscribe_calls: AtomicU64::new(0),
                close_calls: AtomicU64::new(0),
                overlapping_subscribes: AtomicU64::new(0),
            }),
        }
    }

    /// Make subsequent subscribe calls for `topic` fail (or succeed again).
    pub fn set_failing(&self, topic: &K, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(topic.clone());
        } else {
            set.remove(topic);
        }
    }

    /// Total subscribe calls, including failed ones.
    pub fn subscribe_calls(&self) -> u64 {
        self.shared.subscribe_calls.load(Ordering::Acquire)
    }

    /// Total close calls.
    pub fn close_calls(&self) -> u64 {
        self.shared.close_calls.load(Ordering::Acquire)
    }

    /// Subscribes issued while the same topic was already live.
    ///
    /// Stays zero as long as the caller never double-subscribes.
    pub fn overlapping_subscribes(&self) -> u64 {
        self.shared.overlapping_subscribes.load(Ordering::Acquire)
    }

    /// Whether `topic` currently has a live upstream.
    pub fn is_live(&self, topic: &K) -> bool {
        self.shared.live.contains_key(topic)
    }

    /// Number of live upstream subscriptions.
    pub fn live_count(&self) -> usize {
        self.shared.live.len()
    }

    /// Inject an update into a live topic. Returns false if not live.
    pub async fn push(&self, topic: &K, update: U) -> bool {
        self.send(topic, FeedEvent::Update(update)).await
    }

    /// Inject a connectivity transition into a live topic.
    pub async fn emit_status(&self, topic: &K, status: StatusEvent) -> bool {
        info!(topic = %topic, %status, "Simulated upstream status change");
        self.send(topic, FeedEvent::Status(status)).await
    }

    async fn send(&self, topic: &K, event: FeedEvent<U>) -> bool {
        let tx = match self.shared.live.get(topic) {
            Some(entry) => entry.tx.clone(),
            None => return false,
        };
        tx.send(event).await.is_ok()
    }
}

impl<K, U> FeedProvider<K, U> for SimulatedFeedProvider<K, U>
where
    K: TopicKey,
    U: Send + 'static,
{
    type Handle = SimulatedHandle<K, U>;

    async fn subscribe(&self, topic: &K) -> FeedResult<FeedSubscription<Self::Handle, U>> {
        self.shared.subscribe_calls.fetch_add(1, Ordering::AcqRel);

        if !self.config.subscribe_delay.is_zero() {
            tokio::time::sleep(self.config.subscribe_delay).await;
        }

        if self.failing.lock().contains(topic) {
            warn!(topic = %topic, "Simulated subscribe failure");
            return Err(FeedError::Rejected {
                topic: topic.to_string(),
                reason: "simulated failure".to_string(),
            });
        }

        if self.shared.live.contains_key(topic) {
            self.shared
                .overlapping_subscribes
                .fetch_add(1, Ordering::AcqRel);
            warn!(topic = %topic, "Subscribe issued for an already live topic");
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::AcqRel);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        let ticker = self.config.tick_interval.map(|interval| {
            let tx = tx.clone();
            let topic = topic.clone();
            let generator = self.generator.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(interval);
                let mut seq = 0u64;
                loop {
                    tick.tick().await;
                    if tx.send(FeedEvent::Update(generator(&topic, seq))).await.is_err() {
                        break;
                    }
                    seq += 1;
                }
            })
        });

        self.shared
            .live
            .insert(topic.clone(), LiveTopic { id, tx, ticker });
        debug!(topic = %topic, id, "Simulated upstream opened");

        let handle = SimulatedHandle {
            topic: topic.clone(),
            id,
            shared: self.shared.clone(),
        };
        Ok(FeedSubscription::new(handle, rx))
    }
}

/// Handle returned by [`SimulatedFeedProvider`].
pub struct SimulatedHandle<K, U> {
    topic: K,
    id: u64,
    shared: Arc<Shared<K, U>>,
}

impl<K, U> FeedHandle for SimulatedHandle<K, U>
where
    K: TopicKey,
    U: Send + 'static,
{
    async fn close(&self) {
        self.shared.close_calls.fetch_add(1, Ordering::AcqRel);
        if let Some((_, live)) = self.shared.live.remove_if(&self.topic, |_, t| t.id == self.id) {
            if let Some(ticker) = live.ticker {
                ticker.abort();
            }
            debug!(topic = %self.topic, id = self.id, "Simulated upstream closed");
        }
    }
}

fn walk_price(base: Decimal, seq: u64) -> Decimal {
    // Triangle wave of +/- 0.5% around the base.
    let step = (seq % 20) as i64;
    let offset = if step < 10 { step } else { 20 - step };
    base + base * Decimal::new(offset - 5, 3)
}

fn base_price(symbol: &str) -> Decimal {
    let seed = symbol.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
    Decimal::from(10 + seed % 50_000)
}

/// Ticker generator for symbol topics.
pub fn ticker_walk() -> Generator<SymbolTopic, Ticker> {
    Arc::new(|topic: &SymbolTopic, seq: u64| {
        let base = base_price(topic.symbol.as_str());
        let last = walk_price(base, seq);
        let tick = base * Decimal::new(1, 4);
        Ticker {
            last_price: Price::new(last),
            best_bid: Price::new(last - tick),
            best_ask: Price::new(last + tick),
            open_24h: Price::new(base),
            high_24h: Price::new(walk_price(base, 10)),
            low_24h: Price::new(walk_price(base, 0)),
            volume_24h: Size::new(Decimal::from(1_000 + seq)),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    })
}

/// Trade generator for symbol topics.
pub fn trade_walk() -> Generator<SymbolTopic, Trade> {
    Arc::new(|topic: &SymbolTopic, seq: u64| Trade {
        trade_id: format!("{}-{}", topic.symbol, seq),
        price: Price::new(walk_price(base_price(topic.symbol.as_str()), seq)),
        size: Size::new(Decimal::new(1 + (seq % 9) as i64, 2)),
        side: if seq % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell },
        timestamp_ms: Utc::now().timestamp_millis(),
    })
}

/// Candle generator for candle topics.
pub fn candle_walk() -> Generator<CandleTopic, Candle> {
    Arc::new(|topic: &CandleTopic, seq: u64| {
        let base = base_price(topic.symbol.as_str());
        let now = Utc::now().timestamp_millis();
        let close = walk_price(base, seq);
        Candle {
            open_time: topic.interval.open_time(now),
            open: Price::new(base),
            high: Price::new(close.max(base)),
            low: Price::new(close.min(base)),
            close: Price::new(close),
            volume: Size::new(Decimal::from(seq + 1)),
            closed: false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_provider() -> SimulatedFeedProvider<SymbolTopic, Ticker> {
        let config = SimulatedFeedConfig {
            tick_interval: None,
            ..Default::default()
        };
        SimulatedFeedProvider::new(config, ticker_walk())
    }

    #[tokio::test]
    async fn test_subscribe_and_push() {
        let provider = manual_provider();
        let topic = SymbolTopic::new("exoa", "BTC-USDT");

        let mut sub = provider.subscribe(&topic).await.unwrap();
        assert!(provider.is_live(&topic));

        let update = ticker_walk()(&topic, 3);
        assert!(provider.push(&topic, update.clone()).await);
        assert_eq!(sub.events.recv().await, Some(FeedEvent::Update(update)));

        assert!(provider.emit_status(&topic, StatusEvent::Interrupted).await);
        assert_eq!(
            sub.events.recv().await,
            Some(FeedEvent::Status(StatusEvent::Interrupted))
        );
    }

    #[tokio::test]
    async fn test_close_drops_sender() {
        let provider = manual_provider();
        let topic = SymbolTopic::new("exoa", "ETH-USDT");

        let mut sub = provider.subscribe(&topic).await.unwrap();
        sub.handle.close().await;

        assert!(!provider.is_live(&topic));
        assert_eq!(provider.close_calls(), 1);
        assert_eq!(sub.events.recv().await, None);
        assert!(!provider.push(&topic, ticker_walk()(&topic, 0)).await);
    }

    #[tokio::test]
    async fn test_failing_topic() {
        let provider = manual_provider();
        let topic = SymbolTopic::new("exoa", "SOL-USDT");

        provider.set_failing(&topic, true);
        assert!(matches!(
            provider.subscribe(&topic).await,
            Err(FeedError::Rejected { .. })
        ));
        assert!(!provider.is_live(&topic));

        provider.set_failing(&topic, false);
        assert!(provider.subscribe(&topic).await.is_ok());
        assert_eq!(provider.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_subscribe_detected() {
        let provider = manual_provider();
        let topic = SymbolTopic::new("exoa", "BTC-USDT");

        let _first = provider.subscribe(&topic).await.unwrap();
        let _second = provider.subscribe(&topic).await.unwrap();
        assert_eq!(provider.overlapping_subscribes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_updates() {
        let config = SimulatedFeedConfig {
            tick_interval: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let provider = SimulatedFeedProvider::new(config, trade_walk());
        let topic = SymbolTopic::new("exoa", "BTC-USDT");

        let mut sub = provider.subscribe(&topic).await.unwrap();
        for expected in 0..3u64 {
            match sub.events.recv().await {
                Some(FeedEvent::Update(trade)) => {
                    assert_eq!(trade.trade_id, format!("BTC-USDT-{expected}"));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn test_walk_stays_in_band() {
        let base = Decimal::from(1000);
        for seq in 0..40 {
            let px = walk_price(base, seq);
            assert!(px >= Decimal::from(995) && px <= Decimal::from(1005));
        }
    }
}
