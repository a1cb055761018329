//! Core domain types for the market data multiplexer.
//!
//! This crate provides fundamental types shared by every layer:
//! - `SymbolTopic`, `CandleTopic`: sharing granules for upstream feeds
//! - `Ticker`, `Trade`, `Candle`: per-topic update payloads
//! - `StatusEvent`: upstream connectivity transitions
//! - `Price`, `Size`: precision-safe numeric types

pub mod decimal;
pub mod error;
pub mod topic;
pub mod types;

pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use topic::{CandleInterval, CandleTopic, ConsumerId, ExchangeId, Symbol, SymbolTopic, TopicKey};
pub use types::{Candle, FeedKind, StatusEvent, Ticker, Trade, TradeSide};
