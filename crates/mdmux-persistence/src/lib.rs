//! Update batching and persistence for the market data multiplexer.
//!
//! High-frequency per-key updates are coalesced by [`UpdateBatcher`] and
//! flushed on a fixed debounce cadence into an [`UpsertStore`]:
//! - [`MemoryStore`]: in-process keyed map
//! - [`JsonLinesStore`]: append-only JSON Lines files, last line per key wins

pub mod batcher;
pub mod error;
pub mod store;
pub mod writer;

pub use batcher::{BatcherConfig, MergeFn, UpdateBatcher};
pub use error::{PersistenceError, PersistenceResult};
pub use store::{MemoryStore, UpsertStore};
pub use writer::{JsonLinesStore, UpsertRecord};
