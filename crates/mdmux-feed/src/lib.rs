//! Feed provider boundary for the market data multiplexer.
//!
//! The exchange connectivity layer lives behind [`FeedProvider`]: given a
//! topic it establishes one upstream subscription and hands back a
//! [`FeedHandle`] plus a channel of [`FeedEvent`]s (updates and
//! connectivity transitions). Reconnection is the provider's job.
//!
//! [`SimulatedFeedProvider`] is an in-process provider producing
//! deterministic price walks, used by the demo server and by tests.

pub mod error;
pub mod provider;
pub mod simulated;

pub use error::{FeedError, FeedResult};
pub use provider::{FeedEvent, FeedHandle, FeedProvider, FeedSubscription};
pub use simulated::{
    candle_walk, ticker_walk, trade_walk, Generator, SimulatedFeedConfig, SimulatedFeedProvider,
    SimulatedHandle,
};
