//! Feed provider capability.
//!
//! A provider turns a topic key into one live upstream subscription. The
//! multiplexer calls [`FeedProvider::subscribe`] at most once per live topic
//! and [`FeedHandle::close`] exactly once when the last consumer leaves.

use crate::error::FeedResult;
use mdmux_core::StatusEvent;
use std::future::Future;
use tokio::sync::mpsc;

/// Event emitted by an upstream subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent<U> {
    /// Topic payload update.
    Update(U),
    /// Connectivity transition.
    Status(StatusEvent),
}

/// Handle to one live upstream subscription.
pub trait FeedHandle: Send + Sync + 'static {
    /// Tear down the upstream subscription.
    ///
    /// Called exactly once by the owner. Providers should stop emitting
    /// events and drop their side of the event channel.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Result of a successful subscribe: the handle plus its event stream.
pub struct FeedSubscription<H, U> {
    pub handle: H,
    pub events: mpsc::Receiver<FeedEvent<U>>,
}

impl<H, U> FeedSubscription<H, U> {
    pub fn new(handle: H, events: mpsc::Receiver<FeedEvent<U>>) -> Self {
        Self { handle, events }
    }
}

/// Exchange connectivity capability for one topic kind.
///
/// `K` is the topic key shape, `U` the update payload for that kind.
pub trait FeedProvider<K, U>: Send + Sync + 'static {
    type Handle: FeedHandle;

    /// Establish the upstream subscription for `topic`.
    ///
    /// May be slow (network round trips, acknowledgements). Errors are
    /// surfaced to the attaching consumer unchanged.
    fn subscribe(
        &self,
        topic: &K,
    ) -> impl Future<Output = FeedResult<FeedSubscription<Self::Handle, U>>> + Send;
}
