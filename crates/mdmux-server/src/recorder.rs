//! Bridges upstream updates into the batchers.
//!
//! Each multiplexer gets an [`UpdateTap`] that records every upstream
//! update into the batcher for its kind, independently of how many
//! consumers are attached. Keys:
//! - tickers: `{exchange}:{symbol}`, newest exchange timestamp wins
//! - trades: `{exchange}:{symbol}`, last trade wins
//! - candles: `{exchange}:{symbol}:{interval}:{open_time}`, pushes of one
//!   candle merge

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::store::StoreBackend;
use mdmux_core::{Candle, CandleTopic, SymbolTopic, Ticker, Trade};
use mdmux_mux::UpdateTap;
use mdmux_persistence::{BatcherConfig, UpdateBatcher};
use std::sync::Arc;
use std::time::Duration;

pub type TickerBatcher = UpdateBatcher<Ticker, StoreBackend<Ticker>>;
pub type TradeBatcher = UpdateBatcher<Trade, StoreBackend<Trade>>;
pub type CandleBatcher = UpdateBatcher<Candle, StoreBackend<Candle>>;

/// One batcher and store per feed kind.
#[derive(Clone)]
pub struct Recorder {
    tickers: Arc<TickerBatcher>,
    trades: Arc<TradeBatcher>,
    candles: Arc<CandleBatcher>,
    ticker_store: Arc<StoreBackend<Ticker>>,
    trade_store: Arc<StoreBackend<Trade>>,
    candle_store: Arc<StoreBackend<Candle>>,
}

impl Recorder {
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self::with_stores(
            config.batcher.trigger_interval(),
            StoreBackend::open(&config.persistence, "tickers")?,
            StoreBackend::open(&config.persistence, "trades")?,
            StoreBackend::open(&config.persistence, "candles")?,
        ))
    }

    pub fn with_stores(
        trigger_interval: Duration,
        ticker_store: StoreBackend<Ticker>,
        trade_store: StoreBackend<Trade>,
        candle_store: StoreBackend<Candle>,
    ) -> Self {
        let ticker_store = Arc::new(ticker_store);
        let trade_store = Arc::new(trade_store);
        let candle_store = Arc::new(candle_store);

        Self {
            tickers: Arc::new(UpdateBatcher::new(
                BatcherConfig::new("tickers", trigger_interval),
                ticker_store.clone(),
                Ticker::latest,
            )),
            trades: Arc::new(UpdateBatcher::last_write_wins(
                BatcherConfig::new("trades", trigger_interval),
                trade_store.clone(),
            )),
            candles: Arc::new(UpdateBatcher::new(
                BatcherConfig::new("candles", trigger_interval),
                candle_store.clone(),
                Candle::merge,
            )),
            ticker_store,
            trade_store,
            candle_store,
        }
    }

    pub fn ticker_tap(&self) -> Arc<dyn UpdateTap<SymbolTopic, Ticker>> {
        let batcher = self.tickers.clone();
        Arc::new(move |topic: &SymbolTopic, ticker: &Ticker| {
            batcher.record_one(topic.to_string(), ticker.clone());
        })
    }

    pub fn trade_tap(&self) -> Arc<dyn UpdateTap<SymbolTopic, Trade>> {
        let batcher = self.trades.clone();
        Arc::new(move |topic: &SymbolTopic, trade: &Trade| {
            batcher.record_one(topic.to_string(), trade.clone());
        })
    }

    pub fn candle_tap(&self) -> Arc<dyn UpdateTap<CandleTopic, Candle>> {
        let batcher = self.candles.clone();
        Arc::new(move |topic: &CandleTopic, candle: &Candle| {
            batcher.record_one(candle_key(topic, candle), candle.clone());
        })
    }

    pub fn start(&self) {
        self.tickers.start();
        self.trades.start();
        self.candles.start();
    }

    /// Stop all batchers, each draining what it still holds.
    pub async fn stop(&self) {
        tokio::join!(self.tickers.stop(), self.trades.stop(), self.candles.stop());
    }

    pub fn pending_len(&self) -> usize {
        self.tickers.pending_len() + self.trades.pending_len() + self.candles.pending_len()
    }

    pub fn is_running(&self) -> bool {
        self.tickers.is_running() && self.trades.is_running() && self.candles.is_running()
    }

    pub fn ticker_store(&self) -> &StoreBackend<Ticker> {
        &self.ticker_store
    }

    pub fn trade_store(&self) -> &StoreBackend<Trade> {
        &self.trade_store
    }

    pub fn candle_store(&self) -> &StoreBackend<Candle> {
        &self.candle_store
    }
}

fn candle_key(topic: &CandleTopic, candle: &Candle) -> String {
    format!("{}:{}", topic, candle.open_time)
}
