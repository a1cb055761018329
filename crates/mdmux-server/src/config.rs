//! Application configuration.

use crate::error::{AppError, AppResult};
use mdmux_core::{CandleTopic, SymbolTopic};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Batcher configuration shared by every feed kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherSettings {
    /// Debounce window between the first pending update and the flush (ms).
    /// Default: 1,000.
    #[serde(default = "default_trigger_interval_ms")]
    pub trigger_interval_ms: u64,
}

fn default_trigger_interval_ms() -> u64 {
    1_000
}

impl Default for BatcherSettings {
    fn default() -> Self {
        Self {
            trigger_interval_ms: default_trigger_interval_ms(),
        }
    }
}

impl BatcherSettings {
    pub fn trigger_interval(&self) -> Duration {
        Duration::from_millis(self.trigger_interval_ms)
    }
}

/// Backing store for flushed batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process map; nothing survives a restart.
    #[default]
    Memory,
    /// Append-only JSON Lines files under `base_dir`.
    Jsonl,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub store: StoreKind,
    /// Directory for JSON Lines files.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("data/mdmux")
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store: StoreKind::default(),
            base_dir: default_base_dir(),
        }
    }
}

/// Simulated feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Interval between generated updates per topic (ms). 0 disables
    /// generation. Default: 250.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Artificial latency of each upstream subscribe (ms). Default: 0.
    #[serde(default)]
    pub subscribe_delay_ms: u64,
    /// Topics whose subscribe always fails (`exchange:SYMBOL` or
    /// `exchange:SYMBOL:interval`).
    #[serde(default)]
    pub fail_topics: Vec<String>,
}

fn default_tick_interval_ms() -> u64 {
    250
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            subscribe_delay_ms: 0,
            fail_topics: Vec::new(),
        }
    }
}

impl FeedConfig {
    pub fn tick_interval(&self) -> Option<Duration> {
        (self.tick_interval_ms > 0).then(|| Duration::from_millis(self.tick_interval_ms))
    }

    pub fn subscribe_delay(&self) -> Duration {
        Duration::from_millis(self.subscribe_delay_ms)
    }
}

/// Demo consumer sessions run by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Number of concurrent sessions. Default: 2.
    #[serde(default = "default_session_count")]
    pub count: usize,
    /// Ticker topics every session attaches to.
    #[serde(default = "default_symbol_topics")]
    pub tickers: Vec<String>,
    /// Trade topics every session attaches to.
    #[serde(default = "default_symbol_topics")]
    pub trades: Vec<String>,
    /// Candle topics every session attaches to.
    #[serde(default = "default_candle_topics")]
    pub candles: Vec<String>,
}

fn default_session_count() -> usize {
    2
}

fn default_symbol_topics() -> Vec<String> {
    vec!["okx:BTC-USDT".to_string(), "okx:ETH-USDT".to_string()]
}

fn default_candle_topics() -> Vec<String> {
    vec!["okx:BTC-USDT:1m".to_string()]
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            count: default_session_count(),
            tickers: default_symbol_topics(),
            trades: default_symbol_topics(),
            candles: default_candle_topics(),
        }
    }
}

/// Metrics and stats reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Interval between stats log lines (seconds). Default: 60.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_report_interval_secs() -> u64 {
    60
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            report_interval_secs: default_report_interval_secs(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub batcher: BatcherSettings,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the pipeline misbehave.
    pub fn validate(&self) -> AppResult<()> {
        if self.batcher.trigger_interval_ms == 0 {
            return Err(AppError::Config(
                "batcher.trigger_interval_ms must be positive".to_string(),
            ));
        }
        if self.metrics.report_interval_secs == 0 {
            return Err(AppError::Config(
                "metrics.report_interval_secs must be positive".to_string(),
            ));
        }
        self.ticker_topics()?;
        self.trade_topics()?;
        self.candle_topics()?;
        Ok(())
    }

    pub fn ticker_topics(&self) -> AppResult<Vec<SymbolTopic>> {
        parse_topics(&self.sessions.tickers)
    }

    pub fn trade_topics(&self) -> AppResult<Vec<SymbolTopic>> {
        parse_topics(&self.sessions.trades)
    }

    pub fn candle_topics(&self) -> AppResult<Vec<CandleTopic>> {
        parse_topics(&self.sessions.candles)
    }
}

fn parse_topics<T>(raw: &[String]) -> AppResult<Vec<T>>
where
    T: std::str::FromStr<Err = mdmux_core::CoreError>,
{
    raw.iter()
        .map(|s| s.parse::<T>().map_err(AppError::from))
        .collect()
}
