//! Consumer callbacks.
//!
//! A consumer registers one [`TopicObserver`] per attached topic. Callbacks
//! run on the topic's broadcast task and must not block: hand work off to a
//! channel (see [`ChannelObserver`]) if it is not trivial.

use mdmux_core::{StatusEvent, TopicKey};
use mdmux_feed::FeedEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Update/status callback pair for one consumer on one topic.
pub trait TopicObserver<U>: Send + Sync {
    fn on_update(&self, update: &U);
    fn on_status(&self, status: StatusEvent);
}

/// Closure-backed observer.
pub struct FnObserver<U> {
    on_update: Box<dyn Fn(&U) + Send + Sync>,
    on_status: Box<dyn Fn(StatusEvent) + Send + Sync>,
}

impl<U> TopicObserver<U> for FnObserver<U> {
    fn on_update(&self, update: &U) {
        (self.on_update)(update)
    }

    fn on_status(&self, status: StatusEvent) {
        (self.on_status)(status)
    }
}

/// Build an observer from an update closure and a status closure.
pub fn observer_fn<U, F, S>(on_update: F, on_status: S) -> Arc<dyn TopicObserver<U>>
where
    U: 'static,
    F: Fn(&U) + Send + Sync + 'static,
    S: Fn(StatusEvent) + Send + Sync + 'static,
{
    Arc::new(FnObserver {
        on_update: Box::new(on_update),
        on_status: Box::new(on_status),
    })
}

/// Forwards events, tagged with their topic, into a bounded channel.
///
/// Typically one channel per session, shared by all of its topics. Events
/// are dropped (and logged) when the channel is full or closed, so a slow
/// session never stalls the broadcast for others.
pub struct ChannelObserver<K, U> {
    topic: K,
    tx: mpsc::Sender<(K, FeedEvent<U>)>,
}

impl<K, U> ChannelObserver<K, U>
where
    K: TopicKey,
    U: Clone + Send + Sync + 'static,
{
    pub fn new(topic: K, tx: mpsc::Sender<(K, FeedEvent<U>)>) -> Arc<dyn TopicObserver<U>> {
        Arc::new(Self { topic, tx })
    }

    fn forward(&self, event: FeedEvent<U>) {
        if let Err(e) = self.tx.try_send((self.topic.clone(), event)) {
            debug!(topic = %self.topic, error = %e, "Dropped event for consumer channel");
        }
    }
}

impl<K, U> TopicObserver<U> for ChannelObserver<K, U>
where
    K: TopicKey,
    U: Clone + Send + Sync + 'static,
{
    fn on_update(&self, update: &U) {
        self.forward(FeedEvent::Update(update.clone()));
    }

    fn on_status(&self, status: StatusEvent) {
        self.forward(FeedEvent::Status(status));
    }
}

/// Hook invoked once per upstream update, before consumer broadcast.
///
/// Runs regardless of how many consumers are attached.
pub trait UpdateTap<K, U>: Send + Sync {
    fn on_update(&self, topic: &K, update: &U);
}

impl<K, U, F> UpdateTap<K, U> for F
where
    F: Fn(&K, &U) + Send + Sync,
{
    fn on_update(&self, topic: &K, update: &U) {
        self(topic, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_observer_fn_routes_calls() {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let statuses = Arc::new(Mutex::new(Vec::new()));

        let observer = {
            let updates = updates.clone();
            let statuses = statuses.clone();
            observer_fn(
                move |u: &u32| updates.lock().push(*u),
                move |s| statuses.lock().push(s),
            )
        };

        observer.on_update(&7);
        observer.on_status(StatusEvent::Restored);

        assert_eq!(*updates.lock(), vec![7]);
        assert_eq!(*statuses.lock(), vec![StatusEvent::Restored]);
    }

    #[tokio::test]
    async fn test_channel_observer_tags_topic() {
        let (tx, mut rx) = mpsc::channel::<(String, FeedEvent<u64>)>(4);
        let observer = ChannelObserver::new("okx:BTC-USDT".to_string(), tx);

        observer.on_update(&1u64);
        observer.on_status(StatusEvent::Interrupted);

        assert_eq!(
            rx.recv().await,
            Some(("okx:BTC-USDT".to_string(), FeedEvent::Update(1)))
        );
        assert_eq!(
            rx.recv().await,
            Some((
                "okx:BTC-USDT".to_string(),
                FeedEvent::Status(StatusEvent::Interrupted)
            ))
        );
    }

    #[test]
    fn test_channel_observer_drops_when_full() {
        let (tx, mut rx) = mpsc::channel::<(String, FeedEvent<u64>)>(1);
        let observer = ChannelObserver::new("k".to_string(), tx);

        observer.on_update(&1u64);
        observer.on_update(&2u64);

        assert_eq!(rx.try_recv().ok(), Some(("k".to_string(), FeedEvent::Update(1))));
        assert!(rx.try_recv().is_err());
    }
}
