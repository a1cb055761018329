//! Topic identification.
//!
//! A topic key is the sole sharing granule of the multiplexer: two attach
//! requests with equal keys share one upstream subscription. Keys are plain
//! values with structural equality and hashing.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use uuid::Uuid;

/// Anything usable as a topic key in a multiplexer.
pub trait TopicKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> TopicKey for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// Exchange identifier (e.g., "binance", "okx").
///
/// Normalized to lowercase on construction so that "OKX" and "okx" share a feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Instrument symbol as quoted by the exchange (e.g., "BTC-USDT").
///
/// Normalized to uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Candle series resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl CandleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "1d",
        }
    }

    /// Interval length in milliseconds.
    pub fn millis(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Self::OneMinute => MINUTE,
            Self::FiveMinutes => 5 * MINUTE,
            Self::FifteenMinutes => 15 * MINUTE,
            Self::OneHour => 60 * MINUTE,
            Self::FourHours => 240 * MINUTE,
            Self::OneDay => 1_440 * MINUTE,
        }
    }

    /// Start of the candle containing `timestamp_ms`.
    pub fn open_time(&self, timestamp_ms: i64) -> i64 {
        timestamp_ms - timestamp_ms.rem_euclid(self.millis())
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "1m" => Ok(Self::OneMinute),
            "5m" => Ok(Self::FiveMinutes),
            "15m" => Ok(Self::FifteenMinutes),
            "1h" => Ok(Self::OneHour),
            "4h" => Ok(Self::FourHours),
            "1d" => Ok(Self::OneDay),
            other => Err(CoreError::InvalidInterval(other.to_string())),
        }
    }
}

/// Topic key for ticker and trade feeds: exchange + symbol.
///
/// Format: `{exchange}:{symbol}` (e.g., "okx:BTC-USDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolTopic {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
}

impl SymbolTopic {
    pub fn new(exchange: impl AsRef<str>, symbol: impl AsRef<str>) -> Self {
        Self {
            exchange: ExchangeId::new(exchange),
            symbol: Symbol::new(symbol),
        }
    }

    /// Extend with an interval to address a candle series.
    pub fn with_interval(&self, interval: CandleInterval) -> CandleTopic {
        CandleTopic {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
            interval,
        }
    }
}

impl fmt::Display for SymbolTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

impl FromStr for SymbolTopic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split(':').collect::<Vec<_>>().as_slice() {
            [exchange, symbol] if !exchange.is_empty() && !symbol.is_empty() => {
                Ok(Self::new(exchange, symbol))
            }
            _ => Err(CoreError::InvalidTopic(s.to_string())),
        }
    }
}

/// Topic key for candle series: exchange + symbol + interval.
///
/// Format: `{exchange}:{symbol}:{interval}` (e.g., "okx:BTC-USDT:1m").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandleTopic {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub interval: CandleInterval,
}

impl CandleTopic {
    pub fn new(exchange: impl AsRef<str>, symbol: impl AsRef<str>, interval: CandleInterval) -> Self {
        Self {
            exchange: ExchangeId::new(exchange),
            symbol: Symbol::new(symbol),
            interval,
        }
    }

    /// The underlying instrument, without the interval dimension.
    pub fn instrument(&self) -> SymbolTopic {
        SymbolTopic {
            exchange: self.exchange.clone(),
            symbol: self.symbol.clone(),
        }
    }
}

impl fmt::Display for CandleTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.interval)
    }
}

impl FromStr for CandleTopic {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split(':').collect::<Vec<_>>().as_slice() {
            [exchange, symbol, interval] if !exchange.is_empty() && !symbol.is_empty() => {
                Ok(Self::new(exchange, symbol, interval.parse()?))
            }
            _ => Err(CoreError::InvalidTopic(s.to_string())),
        }
    }
}

/// Identifies one logical consumer (a session or connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_symbol_topic_normalizes() {
        let a = SymbolTopic::new("OKX", "btc-usdt");
        let b = SymbolTopic::new("okx", "BTC-USDT");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_symbol_topic_parse() {
        let topic: SymbolTopic = "exoa:BTC-USDT".parse().unwrap();
        assert_eq!(topic.exchange.as_str(), "exoa");
        assert_eq!(topic.symbol.as_str(), "BTC-USDT");
        assert_eq!(topic.to_string(), "exoa:BTC-USDT");

        assert!("exoa".parse::<SymbolTopic>().is_err());
        assert!(":BTC".parse::<SymbolTopic>().is_err());
    }

    #[test]
    fn test_candle_topic_parse() {
        let topic: CandleTopic = "okx:ETH-USDT:15m".parse().unwrap();
        assert_eq!(topic.interval, CandleInterval::FifteenMinutes);
        assert_eq!(topic.to_string(), "okx:ETH-USDT:15m");
        assert_eq!(topic.instrument(), SymbolTopic::new("okx", "ETH-USDT"));

        assert!(matches!(
            "okx:ETH-USDT:7m".parse::<CandleTopic>(),
            Err(CoreError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_interval_distinguishes_candle_topics() {
        let base = SymbolTopic::new("okx", "BTC-USDT");
        assert_ne!(
            base.with_interval(CandleInterval::OneMinute),
            base.with_interval(CandleInterval::FiveMinutes)
        );
    }

    #[test]
    fn test_interval_open_time() {
        let interval = CandleInterval::OneMinute;
        assert_eq!(interval.open_time(125_000), 120_000);
        assert_eq!(interval.open_time(120_000), 120_000);
        assert_eq!(CandleInterval::OneHour.millis(), 3_600_000);
    }
}
