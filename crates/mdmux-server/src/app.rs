//! Main application orchestration.
//!
//! Coordinates all components:
//! - Simulated feed providers and the market data hub
//! - Recorder taps feeding one batcher per kind
//! - Demo consumer sessions attached through channel observers
//! - Periodic stats and ordered shutdown (sessions, hub, batchers)

use crate::config::{AppConfig, FeedConfig};
use crate::error::{AppError, AppResult};
use crate::hub::{MarketDataHub, SimulatedHub};
use crate::recorder::Recorder;
use mdmux_core::{
    Candle, CandleTopic, ConsumerId, FeedKind, StatusEvent, SymbolTopic, Ticker, Trade,
};
use mdmux_feed::{
    candle_walk, ticker_walk, trade_walk, FeedEvent, SimulatedFeedConfig, SimulatedFeedProvider,
};
use mdmux_mux::{ChannelObserver, Multiplexer};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Event channel capacity per session and kind.
const SESSION_CHANNEL_CAPACITY: usize = 1024;

/// Topics each demo session attaches to.
#[derive(Debug, Clone)]
struct SessionTopics {
    tickers: Vec<SymbolTopic>,
    trades: Vec<SymbolTopic>,
    candles: Vec<CandleTopic>,
}

impl SessionTopics {
    fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            tickers: config.ticker_topics()?,
            trades: config.trade_topics()?,
            candles: config.candle_topics()?,
        })
    }
}

/// Main application.
pub struct Application {
    config: AppConfig,
    hub: Arc<SimulatedHub>,
    recorder: Recorder,
}

impl Application {
    /// Create a new application: stores, batchers, providers and hub.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let recorder = Recorder::from_config(&config)?;
        let hub = Arc::new(build_hub(&config.feed, &recorder)?);

        Ok(Self {
            config,
            hub,
            recorder,
        })
    }

    pub fn hub(&self) -> Arc<SimulatedHub> {
        self.hub.clone()
    }

    pub fn recorder(&self) -> Recorder {
        self.recorder.clone()
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> AppResult<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then tear everything down in order:
    /// sessions detach, upstreams close, batchers drain.
    pub async fn run_until<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = std::io::Result<()>>,
    {
        let topics = SessionTopics::from_config(&self.config)?;
        info!(
            sessions = self.config.sessions.count,
            tickers = topics.tickers.len(),
            trades = topics.trades.len(),
            candles = topics.candles.len(),
            store = ?self.config.persistence.store,
            "Starting application"
        );

        self.recorder.start();

        let cancel = CancellationToken::new();
        let sessions: Vec<JoinHandle<u64>> = (0..self.config.sessions.count)
            .map(|_| {
                tokio::spawn(run_session(
                    self.hub.clone(),
                    topics.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        let period = Duration::from_secs(self.config.metrics.report_interval_secs);
        let mut report = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        tokio::pin!(shutdown);
        let signal_result = loop {
            tokio::select! {
                _ = report.tick() => {
                    if self.config.metrics.enabled {
                        self.report_stats();
                    }
                }
                result = &mut shutdown => {
                    info!("Shutdown signal received");
                    break result;
                }
            }
        };

        cancel.cancel();
        let mut total_updates = 0u64;
        for session in sessions {
            match session.await {
                Ok(updates) => total_updates += updates,
                Err(e) => error!(error = %e, "Session task failed"),
            }
        }

        self.hub.shutdown().await;
        self.recorder.stop().await;
        self.report_stats();

        if self.config.metrics.enabled {
            match mdmux_telemetry::gather_text() {
                Ok(text) => debug!(metrics = %text, "Final metrics"),
                Err(e) => warn!(error = %e, "Failed to gather metrics"),
            }
        }

        info!(total_updates, "Shutdown complete");
        signal_result.map_err(AppError::from)
    }

    fn report_stats(&self) {
        let stats = self.hub.stats();
        info!(
            upstreams = stats.upstreams,
            subscriptions = stats.subscriptions,
            connections = stats.connections,
            pending = self.recorder.pending_len(),
            "Hub stats"
        );
    }
}

/// Build the simulated providers (with failure injection) and the tapped hub.
fn build_hub(feed: &FeedConfig, recorder: &Recorder) -> AppResult<SimulatedHub> {
    let provider_config = SimulatedFeedConfig {
        tick_interval: feed.tick_interval(),
        subscribe_delay: feed.subscribe_delay(),
        ..Default::default()
    };

    let tickers = Arc::new(SimulatedFeedProvider::new(provider_config.clone(), ticker_walk()));
    let trades = Arc::new(SimulatedFeedProvider::new(provider_config.clone(), trade_walk()));
    let candles = Arc::new(SimulatedFeedProvider::new(provider_config, candle_walk()));

    for raw in &feed.fail_topics {
        if raw.split(':').count() == 3 {
            candles.set_failing(&raw.parse::<CandleTopic>()?, true);
        } else {
            let topic = raw.parse::<SymbolTopic>()?;
            tickers.set_failing(&topic, true);
            trades.set_failing(&topic, true);
        }
        warn!(topic = %raw, "Subscribe failure injected");
    }

    Ok(MarketDataHub::new(
        Multiplexer::new(FeedKind::Ticker, tickers).with_tap(recorder.ticker_tap()),
        Multiplexer::new(FeedKind::Trade, trades).with_tap(recorder.trade_tap()),
        Multiplexer::new(FeedKind::Candle, candles).with_tap(recorder.candle_tap()),
    ))
}

/// One demo consumer: attach to every topic, count updates until
/// cancelled, then detach everything. Returns the number of updates seen.
async fn run_session(hub: Arc<SimulatedHub>, topics: SessionTopics, cancel: CancellationToken) -> u64 {
    let consumer = ConsumerId::new();
    let (ticker_tx, mut ticker_rx) = mpsc::channel::<(SymbolTopic, FeedEvent<Ticker>)>(SESSION_CHANNEL_CAPACITY);
    let (trade_tx, mut trade_rx) = mpsc::channel::<(SymbolTopic, FeedEvent<Trade>)>(SESSION_CHANNEL_CAPACITY);
    let (candle_tx, mut candle_rx) = mpsc::channel::<(CandleTopic, FeedEvent<Candle>)>(SESSION_CHANNEL_CAPACITY);

    for topic in &topics.tickers {
        let observer = ChannelObserver::new(topic.clone(), ticker_tx.clone());
        if let Err(e) = hub.tickers().attach(consumer, topic.clone(), observer).await {
            warn!(consumer = %consumer, error = %e, "Session attach failed");
        }
    }
    for topic in &topics.trades {
        let observer = ChannelObserver::new(topic.clone(), trade_tx.clone());
        if let Err(e) = hub.trades().attach(consumer, topic.clone(), observer).await {
            warn!(consumer = %consumer, error = %e, "Session attach failed");
        }
    }
    for topic in &topics.candles {
        let observer = ChannelObserver::new(topic.clone(), candle_tx.clone());
        if let Err(e) = hub.candles().attach(consumer, topic.clone(), observer).await {
            warn!(consumer = %consumer, error = %e, "Session attach failed");
        }
    }
    info!(consumer = %consumer, "Session attached");

    let mut updates = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some((topic, event)) = ticker_rx.recv() => updates += note_event(consumer, &topic, event),
            Some((topic, event)) = trade_rx.recv() => updates += note_event(consumer, &topic, event),
            Some((topic, event)) = candle_rx.recv() => updates += note_event(consumer, &topic, event),
        }
    }

    hub.detach_all(consumer).await;
    info!(consumer = %consumer, updates, "Session closed");
    updates
}

fn note_event<K: Display, U>(consumer: ConsumerId, topic: &K, event: FeedEvent<U>) -> u64 {
    match event {
        FeedEvent::Update(_) => 1,
        FeedEvent::Status(status) => {
            match status {
                StatusEvent::Failed => {
                    warn!(consumer = %consumer, topic = %topic, "Session saw upstream failure")
                }
                _ => info!(consumer = %consumer, topic = %topic, status = %status, "Session saw status"),
            }
            0
        }
    }
}

/// Waits for a termination signal.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = sigterm.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_fail_topic() {
        let mut config = AppConfig::default();
        config.feed.fail_topics = vec!["not-a-topic".to_string()];
        assert!(Application::new(config).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_tears_down() {
        let mut config = AppConfig::default();
        config.batcher.trigger_interval_ms = 100;
        config.feed.tick_interval_ms = 50;
        config.sessions.count = 3;

        let app = Application::new(config).unwrap();
        let hub = app.hub();
        let recorder = app.recorder();

        app.run_until(async {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(hub.upstream_count(), 0);
        assert_eq!(hub.connection_count(), 0);
        assert!(!recorder.is_running());
        assert_eq!(recorder.pending_len(), 0);

        let tickers = recorder.ticker_store().as_memory().unwrap();
        assert!(tickers.get("okx:BTC-USDT").is_some());
        assert!(tickers.get("okx:ETH-USDT").is_some());
    }
}
