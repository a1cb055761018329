//! Market data multiplexer server.
//!
//! Wires the subsystems into one process:
//! - `MarketDataHub`: ticker, trade and candle multiplexers
//! - `Recorder`: update taps feeding one debounced batcher per kind
//! - `Application`: demo sessions, periodic stats and ordered shutdown

pub mod app;
pub mod config;
pub mod error;
pub mod hub;
pub mod recorder;
pub mod store;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use hub::{HubStats, MarketDataHub, SimulatedHub};
pub use recorder::Recorder;
pub use store::StoreBackend;
