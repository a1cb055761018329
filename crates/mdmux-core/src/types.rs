//! Market data payloads and feed status.
//!
//! Contains the update types relayed through the multiplexer (ticker,
//! trade, candle) and the connectivity status replicated to consumers.

use crate::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream connectivity transition.
///
/// Not an error: replicated verbatim to every consumer attached to the
/// affected topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusEvent {
    /// Upstream connection lost; the provider is recovering it.
    Interrupted,
    /// Upstream connection recovered.
    Restored,
    /// Provider gave up on recovery. Informational only.
    Failed,
}

impl StatusEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted",
            Self::Restored => "restored",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feed kind, used for labelling logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Ticker,
    Trade,
    Candle,
}

impl FeedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Candle => "candle",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 24h rolling ticker snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    pub last_price: Price,
    pub best_bid: Price,
    pub best_ask: Price,
    pub open_24h: Price,
    pub high_24h: Price,
    pub low_24h: Price,
    pub volume_24h: Size,
    /// Exchange timestamp in milliseconds.
    pub timestamp_ms: i64,
}

impl Ticker {
    /// Percentage change of the last price over 24h.
    pub fn change_pct_24h(&self) -> Option<rust_decimal::Decimal> {
        self.last_price.pct_from(self.open_24h)
    }

    /// Keep the newer of two snapshots by exchange timestamp.
    ///
    /// Ties resolve to `incoming` (last write wins).
    pub fn latest(existing: Self, incoming: Self) -> Self {
        if incoming.timestamp_ms >= existing.timestamp_ms {
            incoming
        } else {
            existing
        }
    }
}

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Single public trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub price: Price,
    pub size: Size,
    pub side: TradeSide,
    pub timestamp_ms: i64,
}

/// OHLCV candle.
///
/// Exchanges push the still-open candle repeatedly; every push carries the
/// cumulative values for that candle so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle start in milliseconds.
    pub open_time: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
    /// Whether the exchange marked this candle final.
    pub closed: bool,
}

impl Candle {
    /// Merge two pushes of a candle series.
    ///
    /// A later candle replaces an earlier one outright. Two pushes of the same
    /// candle keep the incoming close and volume but widen the high/low range,
    /// so an out-of-order push never narrows it. A closed candle stays closed.
    pub fn merge(existing: Self, incoming: Self) -> Self {
        if incoming.open_time > existing.open_time {
            return incoming;
        }
        if incoming.open_time < existing.open_time {
            return existing;
        }
        Self {
            open_time: existing.open_time,
            open: existing.open,
            high: existing.high.max(incoming.high),
            low: existing.low.min(incoming.low),
            close: incoming.close,
            volume: existing.volume.max(incoming.volume),
            closed: existing.closed || incoming.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(last: rust_decimal::Decimal, ts: i64) -> Ticker {
        Ticker {
            last_price: Price::new(last),
            best_bid: Price::new(last - dec!(0.5)),
            best_ask: Price::new(last + dec!(0.5)),
            open_24h: Price::new(dec!(100)),
            high_24h: Price::new(dec!(110)),
            low_24h: Price::new(dec!(95)),
            volume_24h: Size::new(dec!(1000)),
            timestamp_ms: ts,
        }
    }

    fn candle(open_time: i64, high: rust_decimal::Decimal, low: rust_decimal::Decimal) -> Candle {
        Candle {
            open_time,
            open: Price::new(dec!(100)),
            high: Price::new(high),
            low: Price::new(low),
            close: Price::new(dec!(101)),
            volume: Size::new(dec!(5)),
            closed: false,
        }
    }

    #[test]
    fn test_ticker_latest_prefers_newer() {
        let older = ticker(dec!(101), 1_000);
        let newer = ticker(dec!(102), 2_000);

        assert_eq!(Ticker::latest(older.clone(), newer.clone()), newer);
        assert_eq!(Ticker::latest(newer.clone(), older), newer);
    }

    #[test]
    fn test_ticker_change_pct() {
        let t = ticker(dec!(105), 1);
        assert_eq!(t.change_pct_24h(), Some(dec!(5)));
    }

    #[test]
    fn test_candle_merge_same_open_time_widens_range() {
        let first = candle(60_000, dec!(105), dec!(99));
        let mut second = candle(60_000, dec!(103), dec!(97));
        second.close = Price::new(dec!(98));

        let merged = Candle::merge(first, second);
        assert_eq!(merged.high, Price::new(dec!(105)));
        assert_eq!(merged.low, Price::new(dec!(97)));
        assert_eq!(merged.close, Price::new(dec!(98)));
    }

    #[test]
    fn test_candle_merge_newer_candle_replaces() {
        let first = candle(60_000, dec!(105), dec!(99));
        let next = candle(120_000, dec!(102), dec!(100));

        assert_eq!(Candle::merge(first.clone(), next.clone()), next);
        assert_eq!(Candle::merge(next.clone(), first), next);
    }

    #[test]
    fn test_status_event_serde() {
        let json = serde_json::to_string(&StatusEvent::Interrupted).unwrap();
        assert_eq!(json, "\"interrupted\"");
    }
}
