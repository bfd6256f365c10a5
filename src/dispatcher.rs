//! Subscribes a mounted session to every push topic and routes the events
//! addressed to its instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt as _};
use tokio::task::JoinHandle;

use crate::bus::{EventSource, Subscription};
use crate::events::{ServerEvent, Topic};

/// Liveness flag shared by everything working on behalf of one mount.
#[derive(Debug, Clone)]
pub struct MountGuard(Arc<AtomicBool>);

impl MountGuard {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_mounted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn unmount(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for MountGuard {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventDispatcher {
    instance_id: String,
    guard: MountGuard,
    subscriptions: Vec<Subscription>,
    task: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Acquire one subscription per topic.
    ///
    /// A topic that fails to subscribe is logged and skipped. If the guard
    /// flips while acquisitions are in flight, whatever was already acquired
    /// is released before returning and the dispatcher stays empty.
    pub async fn attach(source: &dyn EventSource, instance_id: &str, guard: MountGuard) -> Self {
        let mut subscriptions = Vec::with_capacity(Topic::all().len());

        for &topic in Topic::all() {
            if !guard.is_mounted() {
                break;
            }
            match source.subscribe(topic).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(e) => log::warn!(
                    "Failed to subscribe to {} for instance {}: {}",
                    topic.event_name(),
                    instance_id,
                    e
                ),
            }
        }

        if !guard.is_mounted() {
            log::debug!(
                "Instance {} unmounted during subscribe, releasing {} subscriptions",
                instance_id,
                subscriptions.len()
            );
            subscriptions.clear();
        }

        Self {
            instance_id: instance_id.to_string(),
            guard,
            subscriptions,
            task: None,
        }
    }

    /// Subscriptions held and not yet handed to the event loop.
    pub fn pending_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Spawn the event loop. Every topic is merged into one stream and
    /// `handler` sees the events for this instance one at a time, in delivery
    /// order. Events for other instances are dropped without a trace.
    pub fn run<H>(&mut self, mut handler: H)
    where
        H: FnMut(ServerEvent) + Send + 'static,
    {
        if self.task.is_some() || !self.guard.is_mounted() {
            return;
        }

        let streams = std::mem::take(&mut self.subscriptions)
            .into_iter()
            .map(|subscription| {
                stream::unfold(subscription, |mut subscription| async move {
                    let event = subscription.recv().await?;
                    Some((event, subscription))
                })
                .boxed()
            });
        let mut events = stream::select_all(streams);
        let guard = self.guard.clone();
        let instance_id = self.instance_id.clone();

        self.task = Some(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if !guard.is_mounted() {
                    break;
                }
                if event.instance_id() != instance_id {
                    continue;
                }
                handler(event);
            }
            log::debug!("Event loop for instance {} finished", instance_id);
        }));
    }

    /// Stop delivering and release every subscription. Returns once the event
    /// loop has been torn down.
    pub async fn teardown(&mut self) {
        self.guard.unmount();
        self.subscriptions.clear();
        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::error!("Event loop for instance {} failed: {}", self.instance_id, e);
                }
            }
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.guard.unmount();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::future::BoxFuture;

    use super::*;
    use crate::bus::EventBus;
    use crate::error::{AppError, Result};
    use crate::events::OutputStream;

    fn output(instance_id: &str, line: &str) -> ServerEvent {
        ServerEvent::Output {
            instance_id: instance_id.to_string(),
            line: line.to_string(),
            stream: OutputStream::Stdout,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn routes_only_own_instance() {
        let bus = EventBus::new(32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::attach(&bus, "A", MountGuard::new()).await;
        assert_eq!(dispatcher.pending_subscriptions(), Topic::all().len());

        let sink = Arc::clone(&seen);
        dispatcher.run(move |event| sink.lock().unwrap().push(event));

        bus.publish(output("B", "not mine"));
        bus.publish(output("A", "mine"));
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec![output("A", "mine")]);
        dispatcher.teardown().await;
    }

    #[tokio::test]
    async fn teardown_releases_everything() {
        let bus = EventBus::new(32);
        let mut dispatcher = EventDispatcher::attach(&bus, "A", MountGuard::new()).await;
        dispatcher.run(|_| {});
        assert_eq!(bus.active_subscriptions(), Topic::all().len());

        dispatcher.teardown().await;
        assert_eq!(bus.active_subscriptions(), 0);
        assert!(!dispatcher.is_running());

        // Nothing is delivered after teardown.
        assert_eq!(bus.publish(output("A", "late")), 0);
    }

    #[tokio::test]
    async fn drop_releases_everything() {
        let bus = EventBus::new(32);
        let dispatcher = EventDispatcher::attach(&bus, "A", MountGuard::new()).await;
        assert_eq!(bus.active_subscriptions(), Topic::all().len());
        drop(dispatcher);
        assert_eq!(bus.active_subscriptions(), 0);
    }

    /// Flips the guard once a given number of subscriptions were handed out.
    struct FlippingSource {
        bus: EventBus,
        guard: MountGuard,
        flip_after: usize,
        handed_out: Mutex<usize>,
    }

    impl EventSource for FlippingSource {
        fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription>> {
            Box::pin(async move {
                let subscription = self.bus.subscribe(topic).await?;
                let mut handed_out = self.handed_out.lock().unwrap();
                *handed_out += 1;
                if *handed_out == self.flip_after {
                    self.guard.unmount();
                }
                drop(handed_out);
                Ok(subscription)
            })
        }
    }

    #[tokio::test]
    async fn unmount_mid_setup_releases_acquired() {
        let guard = MountGuard::new();
        let source = FlippingSource {
            bus: EventBus::new(8),
            guard: guard.clone(),
            flip_after: 3,
            handed_out: Mutex::new(0),
        };

        let mut dispatcher = EventDispatcher::attach(&source, "A", guard).await;
        assert_eq!(*source.handed_out.lock().unwrap(), 3);
        assert_eq!(dispatcher.pending_subscriptions(), 0);
        assert_eq!(source.bus.active_subscriptions(), 0);

        dispatcher.run(|_| {});
        assert!(!dispatcher.is_running());
    }

    /// Refuses one topic.
    struct PartialSource {
        bus: EventBus,
        refused: Topic,
    }

    impl EventSource for PartialSource {
        fn subscribe(&self, topic: Topic) -> BoxFuture<'_, Result<Subscription>> {
            Box::pin(async move {
                if topic == self.refused {
                    return Err(AppError::subscription(topic.event_name(), "refused"));
                }
                self.bus.subscribe(topic).await
            })
        }
    }

    #[tokio::test]
    async fn failed_topic_is_skipped() {
        let source = PartialSource {
            bus: EventBus::new(8),
            refused: Topic::AuthNeeded,
        };
        let dispatcher = EventDispatcher::attach(&source, "A", MountGuard::new()).await;
        assert_eq!(dispatcher.pending_subscriptions(), Topic::all().len() - 1);
        assert_eq!(source.bus.subscriber_count(Topic::AuthNeeded), 0);
        assert_eq!(source.bus.subscriber_count(Topic::Output), 1);
    }
}
