//! Multiplexer integration tests against the simulated provider.
//!
//! Covers:
//! - Reference counting across consumers (open on first, close on last)
//! - At most one live upstream per topic under concurrent churn
//! - Broadcast of updates and status transitions to every consumer
//! - Slow subscribes on one topic not blocking other topics

use mdmux_core::{ConsumerId, FeedKind, StatusEvent, SymbolTopic, Ticker};
use mdmux_feed::{ticker_walk, SimulatedFeedConfig, SimulatedFeedProvider};
use mdmux_mux::{observer_fn, Multiplexer, TopicObserver};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type TickerProvider = SimulatedFeedProvider<SymbolTopic, Ticker>;
type TickerMux = Multiplexer<SymbolTopic, Ticker, TickerProvider>;

fn setup(subscribe_delay: Duration) -> (Arc<TickerProvider>, Arc<TickerMux>) {
    let config = SimulatedFeedConfig {
        tick_interval: None,
        subscribe_delay,
        ..Default::default()
    };
    let provider = Arc::new(SimulatedFeedProvider::new(config, ticker_walk()));
    let mux = Arc::new(Multiplexer::new(FeedKind::Ticker, provider.clone()));
    (provider, mux)
}

fn counting_observer() -> (Arc<dyn TopicObserver<Ticker>>, Arc<AtomicUsize>, Arc<Mutex<Vec<StatusEvent>>>) {
    let updates = Arc::new(AtomicUsize::new(0));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let observer = {
        let updates = updates.clone();
        let statuses = statuses.clone();
        observer_fn(
            move |_: &Ticker| {
                updates.fetch_add(1, Ordering::SeqCst);
            },
            move |s| statuses.lock().push(s),
        )
    };
    (observer, updates, statuses)
}

fn noop_observer() -> Arc<dyn TopicObserver<Ticker>> {
    observer_fn(|_: &Ticker| {}, |_| {})
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_two_consumers_share_one_upstream() {
    let (provider, mux) = setup(Duration::ZERO);
    let topic = SymbolTopic::new("EXOA", "BTC-USDT");
    let c1 = ConsumerId::new();
    let c2 = ConsumerId::new();

    mux.attach(c1, topic.clone(), noop_observer()).await.unwrap();
    assert_eq!(provider.subscribe_calls(), 1);

    mux.attach(c2, topic.clone(), noop_observer()).await.unwrap();
    assert_eq!(provider.subscribe_calls(), 1);
    assert_eq!(mux.subscription_count(), 2);

    mux.detach(c1, &topic).await;
    assert!(provider.is_live(&topic));
    assert_eq!(provider.close_calls(), 0);
    assert_eq!(mux.subscription_count(), 1);

    mux.detach(c2, &topic).await;
    assert!(!provider.is_live(&topic));
    assert_eq!(provider.close_calls(), 1);
    assert_eq!(mux.subscription_count(), 0);
    assert_eq!(mux.connection_count(), 0);
}

#[tokio::test]
async fn test_broadcast_reaches_every_consumer_once() {
    let (provider, mux) = setup(Duration::ZERO);
    let topic = SymbolTopic::new("exoa", "ETH-USDT");
    let (a, a_updates, a_status) = counting_observer();
    let (b, b_updates, b_status) = counting_observer();

    mux.attach(ConsumerId::new(), topic.clone(), a).await.unwrap();
    mux.attach(ConsumerId::new(), topic.clone(), b).await.unwrap();

    let generate = ticker_walk();
    assert!(provider.push(&topic, generate(&topic, 0)).await);
    assert!(provider.emit_status(&topic, StatusEvent::Interrupted).await);
    assert!(provider.emit_status(&topic, StatusEvent::Restored).await);
    settle().await;

    assert_eq!(a_updates.load(Ordering::SeqCst), 1);
    assert_eq!(b_updates.load(Ordering::SeqCst), 1);
    let expected = vec![StatusEvent::Interrupted, StatusEvent::Restored];
    assert_eq!(*a_status.lock(), expected);
    assert_eq!(*b_status.lock(), expected);
}

#[tokio::test]
async fn test_late_consumer_gets_no_replay() {
    let (provider, mux) = setup(Duration::ZERO);
    let topic = SymbolTopic::new("exoa", "SOL-USDT");
    let (early, early_updates, _) = counting_observer();
    let (late, late_updates, _) = counting_observer();
    let generate = ticker_walk();

    mux.attach(ConsumerId::new(), topic.clone(), early).await.unwrap();
    provider.push(&topic, generate(&topic, 0)).await;
    settle().await;

    mux.attach(ConsumerId::new(), topic.clone(), late).await.unwrap();
    provider.push(&topic, generate(&topic, 1)).await;
    settle().await;

    assert_eq!(early_updates.load(Ordering::SeqCst), 2);
    assert_eq!(late_updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_subscribe_is_retried_on_next_attach() {
    let (provider, mux) = setup(Duration::ZERO);
    let topic = SymbolTopic::new("exoa", "DOGE-USDT");
    let consumer = ConsumerId::new();

    provider.set_failing(&topic, true);
    assert!(mux.attach(consumer, topic.clone(), noop_observer()).await.is_err());
    assert_eq!(mux.upstream_count(), 0);

    provider.set_failing(&topic, false);
    mux.attach(consumer, topic.clone(), noop_observer()).await.unwrap();
    assert_eq!(provider.subscribe_calls(), 2);
    assert!(provider.is_live(&topic));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_churn_keeps_single_upstream() {
    let (provider, mux) = setup(Duration::from_millis(1));
    let topics: Vec<SymbolTopic> = ["BTC-USDT", "ETH-USDT", "SOL-USDT"]
        .iter()
        .map(|s| SymbolTopic::new("exoa", s))
        .collect();

    let mut tasks = Vec::new();
    for worker in 0..24usize {
        let mux = mux.clone();
        let topics = topics.clone();
        tasks.push(tokio::spawn(async move {
            let consumer = ConsumerId::new();
            for round in 0..10usize {
                let topic = &topics[(worker + round) % topics.len()];
                mux.attach(consumer, topic.clone(), noop_observer())
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
                if round % 3 == 0 {
                    mux.detach_all(consumer).await;
                } else {
                    mux.detach(consumer, topic).await;
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(provider.overlapping_subscribes(), 0);
    assert_eq!(provider.live_count(), 0);
    assert_eq!(provider.subscribe_calls(), provider.close_calls());
    assert_eq!(mux.upstream_count(), 0);
    assert_eq!(mux.subscription_count(), 0);
    assert_eq!(mux.connection_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attach_same_topic_subscribes_once() {
    let (provider, mux) = setup(Duration::from_millis(20));
    let topic = SymbolTopic::new("exoa", "BTC-USDT");

    let attaches = (0..8).map(|_| {
        let mux = mux.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            mux.attach(ConsumerId::new(), topic, noop_observer()).await
        })
    });
    for task in attaches.collect::<Vec<_>>() {
        task.await.unwrap().unwrap();
    }

    assert_eq!(provider.subscribe_calls(), 1);
    assert_eq!(mux.ref_count(&topic), 8);
    assert_eq!(mux.subscription_count(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_slow_subscribe_does_not_block_other_topics() {
    let (provider, mux) = setup(Duration::from_secs(5));
    let live = SymbolTopic::new("exoa", "BTC-USDT");
    let slow = SymbolTopic::new("exoa", "ETH-USDT");

    mux.attach(ConsumerId::new(), live.clone(), noop_observer())
        .await
        .unwrap();

    let pending = {
        let mux = mux.clone();
        let slow = slow.clone();
        tokio::spawn(async move { mux.attach(ConsumerId::new(), slow, noop_observer()).await })
    };
    tokio::task::yield_now().await;

    // Joins a live topic: no provider call, so no virtual time may pass.
    let started = tokio::time::Instant::now();
    mux.attach(ConsumerId::new(), live.clone(), noop_observer())
        .await
        .unwrap();
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert!(!pending.is_finished());

    pending.await.unwrap().unwrap();
    assert_eq!(provider.subscribe_calls(), 2);
    assert_eq!(mux.ref_count(&live), 2);
}
