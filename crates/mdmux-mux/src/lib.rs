//! Subscription multiplexer.
//!
//! Keeps exactly one live upstream subscription per distinct topic and fans
//! every update and connectivity transition out to all attached consumers:
//! - Lazy upstream creation on first attach, teardown on last detach
//! - Per-topic serialization of attach/detach, full parallelism across topics
//! - Copy-on-write consumer snapshots for lock-free broadcast
//! - Optional update tap to feed persistence independently of consumers

pub mod error;
pub mod keyed_lock;
pub mod multiplexer;
pub mod observer;

pub use error::{MuxError, MuxResult};
pub use keyed_lock::{KeyedGuard, KeyedLocks};
pub use multiplexer::Multiplexer;
pub use observer::{observer_fn, ChannelObserver, FnObserver, TopicObserver, UpdateTap};
