//! Per-kind multiplexers behind one facade.

use mdmux_core::{Candle, CandleTopic, ConsumerId, FeedKind, SymbolTopic, Ticker, Trade};
use mdmux_feed::{FeedProvider, SimulatedFeedProvider};
use mdmux_mux::Multiplexer;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Ticker, trade and candle-series multiplexers.
///
/// A session that disconnects calls [`MarketDataHub::detach_all`] once
/// instead of walking every kind.
pub struct MarketDataHub<TP, RP, CP>
where
    TP: FeedProvider<SymbolTopic, Ticker>,
    RP: FeedProvider<SymbolTopic, Trade>,
    CP: FeedProvider<CandleTopic, Candle>,
{
    tickers: Multiplexer<SymbolTopic, Ticker, TP>,
    trades: Multiplexer<SymbolTopic, Trade, RP>,
    candles: Multiplexer<CandleTopic, Candle, CP>,
}

/// Hub over the in-process simulated feeds.
pub type SimulatedHub = MarketDataHub<
    SimulatedFeedProvider<SymbolTopic, Ticker>,
    SimulatedFeedProvider<SymbolTopic, Trade>,
    SimulatedFeedProvider<CandleTopic, Candle>,
>;

/// Aggregate counts across kinds. Eventually consistent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub upstreams: usize,
    pub subscriptions: usize,
    pub connections: usize,
}

impl<TP, RP, CP> MarketDataHub<TP, RP, CP>
where
    TP: FeedProvider<SymbolTopic, Ticker>,
    RP: FeedProvider<SymbolTopic, Trade>,
    CP: FeedProvider<CandleTopic, Candle>,
{
    pub fn new(
        tickers: Multiplexer<SymbolTopic, Ticker, TP>,
        trades: Multiplexer<SymbolTopic, Trade, RP>,
        candles: Multiplexer<CandleTopic, Candle, CP>,
    ) -> Self {
        Self {
            tickers,
            trades,
            candles,
        }
    }

    /// Hub without update taps.
    pub fn from_providers(tickers: Arc<TP>, trades: Arc<RP>, candles: Arc<CP>) -> Self {
        Self::new(
            Multiplexer::new(FeedKind::Ticker, tickers),
            Multiplexer::new(FeedKind::Trade, trades),
            Multiplexer::new(FeedKind::Candle, candles),
        )
    }

    pub fn tickers(&self) -> &Multiplexer<SymbolTopic, Ticker, TP> {
        &self.tickers
    }

    pub fn trades(&self) -> &Multiplexer<SymbolTopic, Trade, RP> {
        &self.trades
    }

    pub fn candles(&self) -> &Multiplexer<CandleTopic, Candle, CP> {
        &self.candles
    }

    /// Detach `consumer` from every topic of every kind.
    pub async fn detach_all(&self, consumer: ConsumerId) {
        tokio::join!(
            self.tickers.detach_all(consumer),
            self.trades.detach_all(consumer),
            self.candles.detach_all(consumer),
        );
    }

    /// Distinct consumers attached to anything.
    pub fn connection_count(&self) -> usize {
        let mut consumers = self.tickers.consumers();
        consumers.extend(self.trades.consumers());
        consumers.extend(self.candles.consumers());
        consumers.sort_unstable();
        consumers.dedup();
        consumers.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.tickers.subscription_count()
            + self.trades.subscription_count()
            + self.candles.subscription_count()
    }

    pub fn upstream_count(&self) -> usize {
        self.tickers.upstream_count() + self.trades.upstream_count() + self.candles.upstream_count()
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            upstreams: self.upstream_count(),
            subscriptions: self.subscription_count(),
            connections: self.connection_count(),
        }
    }

    /// Close every upstream of every kind.
    pub async fn shutdown(&self) {
        tokio::join!(
            self.tickers.shutdown(),
            self.trades.shutdown(),
            self.candles.shutdown(),
        );
        info!("Market data hub shut down");
    }
}
