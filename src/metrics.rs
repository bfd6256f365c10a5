//! Periodic resource sampling for a running instance.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::{Backend, ServerMetrics};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSample {
    #[serde(flatten)]
    pub metrics: ServerMetrics,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MetricsState {
    /// Bumped on every stop; samples from an older generation are discarded.
    generation: u64,
    current: Option<MetricsSample>,
    history: VecDeque<MetricsSample>,
}

pub type SampleListener = Arc<dyn Fn() + Send + Sync>;

/// Polls `get_metrics` on a fixed interval while the instance runs.
///
/// Only one poll loop exists at a time. Stopping drops the loop and clears
/// the retained samples, and a response that lands after a stop is ignored.
pub struct MetricsPoller {
    instance_id: String,
    backend: Arc<dyn Backend>,
    interval: Duration,
    history_len: usize,
    state: Arc<Mutex<MetricsState>>,
    listener: Option<SampleListener>,
    task: Option<JoinHandle<()>>,
}

impl MetricsPoller {
    pub fn new(
        instance_id: &str,
        backend: Arc<dyn Backend>,
        interval: Duration,
        history_len: usize,
    ) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            backend,
            interval,
            history_len: history_len.max(1),
            state: Arc::new(Mutex::new(MetricsState::default())),
            listener: None,
            task: None,
        }
    }

    /// Called after every recorded sample.
    pub fn with_listener(mut self, listener: SampleListener) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start polling. The first sample is taken immediately. No-op if a loop
    /// is already active.
    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }

        let generation = lock(&self.state).generation;
        let instance_id = self.instance_id.clone();
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let listener = self.listener.clone();
        let history_len = self.history_len;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::debug!(
            "Starting metrics polling for instance {} every {:?}",
            instance_id,
            self.interval
        );

        self.task = Some(tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if lock(&state).generation != generation {
                    break;
                }

                let metrics = match backend.get_metrics(&instance_id).await {
                    Ok(metrics) => metrics,
                    Err(e) => {
                        log::warn!("Failed to poll metrics for instance {}: {}", instance_id, e);
                        continue;
                    }
                };

                let sample = MetricsSample {
                    metrics,
                    sampled_at: Utc::now(),
                };
                let recorded = {
                    let mut guard = lock(&state);
                    if guard.generation == generation {
                        guard.history.push_back(sample.clone());
                        while guard.history.len() > history_len {
                            guard.history.pop_front();
                        }
                        guard.current = Some(sample);
                        true
                    } else {
                        false
                    }
                };
                if !recorded {
                    break;
                }

                if let Some(listener) = &listener {
                    listener();
                }
            }
        }));
    }

    /// Stop polling and clear retained samples.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            log::debug!("Stopped metrics polling for instance {}", self.instance_id);
        }
        let mut state = lock(&self.state);
        state.generation += 1;
        state.current = None;
        state.history.clear();
    }

    pub fn current(&self) -> Option<MetricsSample> {
        lock(&self.state).current.clone()
    }

    /// Retained samples, oldest first.
    pub fn history(&self) -> Vec<MetricsSample> {
        lock(&self.state).history.iter().cloned().collect()
    }
}

impl Drop for MetricsPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn lock(state: &Mutex<MetricsState>) -> std::sync::MutexGuard<'_, MetricsState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test_support::FakeBackend;

    const TICK: Duration = Duration::from_secs(3);

    fn poller(backend: &Arc<FakeBackend>, history_len: usize) -> MetricsPoller {
        MetricsPoller::new("A", Arc::clone(backend) as Arc<dyn Backend>, TICK, history_len)
    }

    async fn advance(by: Duration) {
        tokio::time::advance(by).await;
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn samples_immediately_then_on_each_tick() {
        let backend = Arc::new(FakeBackend::new());
        let mut poller = poller(&backend, 20);
        poller.start();
        advance(Duration::ZERO).await;
        assert_eq!(backend.metrics_calls(), 1);
        assert!(poller.current().is_some());

        advance(TICK).await;
        advance(TICK).await;
        assert_eq!(backend.metrics_calls(), 3);
        assert_eq!(poller.history().len(), 3);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded() {
        let backend = Arc::new(FakeBackend::new());
        let mut poller = poller(&backend, 4);
        poller.start();
        advance(Duration::ZERO).await;
        for _ in 0..9 {
            advance(TICK).await;
        }

        let history = poller.history();
        assert_eq!(history.len(), 4);
        // The fake reports an increasing uptime per call.
        let uptimes: Vec<u64> = history
            .iter()
            .filter_map(|s| s.metrics.uptime_seconds)
            .collect();
        assert_eq!(uptimes, vec![7, 8, 9, 10]);
        assert_eq!(
            poller.current().and_then(|s| s.metrics.uptime_seconds),
            Some(10)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_polling_and_clears() {
        let backend = Arc::new(FakeBackend::new());
        let mut poller = poller(&backend, 20);
        poller.start();
        advance(Duration::ZERO).await;
        advance(TICK).await;
        let calls = backend.metrics_calls();

        poller.stop();
        assert!(poller.current().is_none());
        assert!(poller.history().is_empty());

        advance(TICK * 5).await;
        assert_eq!(backend.metrics_calls(), calls);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let backend = Arc::new(FakeBackend::new());
        let mut poller = poller(&backend, 20);
        poller.start();
        poller.start();
        advance(Duration::ZERO).await;
        advance(TICK).await;
        assert_eq!(backend.metrics_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_poll_is_skipped() {
        let backend = Arc::new(FakeBackend::new());
        backend.fail_metrics(true);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        let mut poller = poller(&backend, 20).with_listener(
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        poller.start();
        advance(Duration::ZERO).await;
        assert!(poller.current().is_none());
        assert!(poller.is_active());

        backend.fail_metrics(false);
        advance(TICK).await;
        assert!(poller.current().is_some());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }
}
