//! Push channel: subscription handles and the in-process event bus.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::{SessionConfig, DEFAULT_EVENT_BUFFER};
use crate::error::{AppError, Result};
use crate::events::{ServerEvent, Topic};

/// Source of push events, one stream per topic.
pub trait EventSource: Send + Sync {
    /// Acquire a subscription to `topic`. May suspend until the transport has
    /// registered the listener.
    fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription>>;
}

/// Handle to one registered listener.
///
/// The release hook runs exactly once: on `unsubscribe`, or on drop if the
/// handle was never released explicitly.
pub struct Subscription {
    id: u64,
    topic: Topic,
    receiver: broadcast::Receiver<ServerEvent>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        id: u64,
        topic: Topic,
        receiver: broadcast::Receiver<ServerEvent>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            topic,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next event on this topic, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Subscription {} to {} lagged, skipped {} events",
                        self.id,
                        self.topic.event_name(),
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    active: Mutex<HashSet<u64>>,
}

/// In-process push channel with one broadcast channel per topic.
///
/// Order is preserved within a topic; nothing orders events across topics.
#[derive(Debug)]
pub struct EventBus {
    channels: HashMap<Topic, broadcast::Sender<ServerEvent>>,
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let channels = Topic::all()
            .iter()
            .map(|&topic| {
                let (sender, _) = broadcast::channel(capacity.max(1));
                (topic, sender)
            })
            .collect();

        Self {
            channels,
            registry: Arc::new(Registry::default()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.event_buffer)
    }

    /// Deliver an event to every subscriber of its topic. Returns how many
    /// receivers it reached.
    pub fn publish(&self, event: ServerEvent) -> usize {
        let topic = event.topic();
        match self.channels.get(&topic) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }

    /// Decode a named supervisor event and publish it.
    pub fn publish_raw(&self, name: &str, payload: Value) -> Result<usize> {
        let event = ServerEvent::decode(name, payload)?;
        Ok(self.publish(event))
    }

    /// Subscriptions acquired and not yet released.
    pub fn active_subscriptions(&self) -> usize {
        self.registry
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.channels
            .get(&topic)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    fn register(&self, topic: Topic) -> Result<Subscription> {
        let sender = self
            .channels
            .get(&topic)
            .ok_or_else(|| AppError::subscription(topic.event_name(), "no channel"))?;

        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);

        let registry = Arc::clone(&self.registry);
        Ok(Subscription::new(id, topic, sender.subscribe(), move || {
            registry
                .active
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
        }))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl EventSource for EventBus {
    fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription>> {
        Box::pin(async move { self.register(topic) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::OutputStream;

    fn output(instance_id: &str, line: &str) -> ServerEvent {
        ServerEvent::Output {
            instance_id: instance_id.to_string(),
            line: line.to_string(),
            stream: OutputStream::Stdout,
        }
    }

    #[tokio::test]
    async fn delivers_only_to_matching_topic() {
        let bus = EventBus::new(16);
        let mut out = bus.subscribe(Topic::Output).await.unwrap();
        let exit = bus.subscribe(Topic::ProcessExited).await.unwrap();

        assert_eq!(bus.publish(output("A", "one")), 1);
        assert_eq!(bus.subscriber_count(Topic::ProcessExited), 1);
        assert_eq!(out.recv().await, Some(output("A", "one")));
        drop(exit);
        assert_eq!(bus.subscriber_count(Topic::ProcessExited), 0);
    }

    #[tokio::test]
    async fn release_runs_once() {
        let bus = EventBus::new(16);
        let first = bus.subscribe(Topic::Output).await.unwrap();
        let second = bus.subscribe(Topic::AuthNeeded).await.unwrap();
        assert_eq!(bus.active_subscriptions(), 2);

        first.unsubscribe();
        assert_eq!(bus.active_subscriptions(), 1);
        drop(second);
        assert_eq!(bus.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn per_topic_order_is_preserved() {
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe(Topic::Output).await.unwrap();
        for i in 0..10 {
            bus.publish(output("A", &format!("{i}")));
        }
        for i in 0..10 {
            assert_eq!(sub.recv().await, Some(output("A", &format!("{i}"))));
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_keeps_receiving() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe(Topic::Output).await.unwrap();
        for i in 0..5 {
            bus.publish(output("A", &format!("{i}")));
        }
        // The two newest survive the overflow.
        assert_eq!(sub.recv().await, Some(output("A", "3")));
        assert_eq!(sub.recv().await, Some(output("A", "4")));
    }

    #[tokio::test]
    async fn publish_raw_decodes_names() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe(Topic::ProcessExited).await.unwrap();
        assert_eq!(bus.publish_raw("server-exit", json!("A")).unwrap(), 1);
        assert_eq!(
            sub.recv().await,
            Some(ServerEvent::ProcessExited {
                instance_id: "A".to_string()
            })
        );
        assert!(bus.publish_raw("nope", json!({})).is_err());
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(output("A", "lost")), 0);
    }
}
