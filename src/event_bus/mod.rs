//! Per-execution pub/sub over the durable event log.
//!
//! Generalizes this codebase's `CrawlEventBus` (one `tokio::sync::broadcast`
//! channel per process) to one logical bus keyed by execution id — a
//! `DashMap<ExecutionId, broadcast::Sender<ExecutionEvent>>`, following this
//! codebase's own `CrawlRegistry` keyed-map pattern — with store-backed
//! replay so a subscriber that attaches after an execution started still
//! sees every event from the beginning.

mod config;
mod error;
mod metrics;

pub use config::{BackpressureMode, EventBusConfig};
pub use error::EventBusError;
pub use metrics::{EventBusMetrics, MetricsSnapshot};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::warn;

use crate::model::{ExecutionEvent, ExecutionId};
use crate::observer::Observer;
use crate::store::Store;

pub struct EventBus {
    store: Arc<dyn Store>,
    config: EventBusConfig,
    channels: DashMap<ExecutionId, broadcast::Sender<ExecutionEvent>>,
    metrics: EventBusMetrics,
    observer: Option<Arc<dyn Observer>>,
}

impl EventBus {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: EventBusConfig) -> Self {
        Self {
            store,
            config,
            channels: DashMap::new(),
            metrics: EventBusMetrics::new(),
            observer: None,
        }
    }

    /// Attach an `Observer` that is notified of every published event
    /// alongside the live subscriber fan-out, for metrics/tracing exporters
    /// that want the state-transition stream without subscribing like a
    /// client would.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn channel_for(&self, execution_id: ExecutionId) -> broadcast::Sender<ExecutionEvent> {
        self.channels
            .entry(execution_id)
            .or_insert_with(|| broadcast::channel(self.config.subscriber_queue_depth).0)
            .clone()
    }

    /// Persist `event` (the store assigns its sequence number), then publish
    /// it live to any current subscribers of its execution.
    pub async fn publish(&self, mut event: ExecutionEvent) -> Result<ExecutionEvent, EventBusError> {
        let seq = self
            .store
            .append_event(&event)
            .await
            .map_err(|e| EventBusError::PublishFailed(e.to_string()))?;
        event.seq = seq;

        if let Some(observer) = &self.observer {
            observer.record(event.execution_id, event.kind, event.task_name.as_deref());
        }

        let sender = self.channel_for(event.execution_id);
        match sender.send(event.clone()) {
            Ok(subscriber_count) => self.metrics.track_subscriber_joined(subscriber_count),
            Err(_) => {
                // No live subscribers; the event is already durable and will
                // be served by replay to a future subscriber.
            }
        }
        self.metrics.increment_published();

        if event.kind.is_execution_terminal() {
            // Terminal events drop their bus channel once published: no
            // further events for this execution will ever be produced, and a
            // late subscriber reconstructs everything from the store.
            self.channels.remove(&event.execution_id);
        }

        Ok(event)
    }

    /// Subscribe to an execution's events, optionally replaying everything
    /// after `from_seq` before switching to live delivery. The cutover is
    /// gap-free: replay reads the store up to "now", and any event the
    /// broadcast channel delivers afterward is deduplicated by sequence
    /// number.
    pub async fn subscribe(
        &self,
        execution_id: ExecutionId,
        from_seq: Option<u64>,
    ) -> Result<EventSubscription, EventBusError> {
        let receiver = self.channel_for(execution_id).subscribe();
        self.metrics
            .track_subscriber_joined(self.channels.get(&execution_id).map_or(0, |s| s.receiver_count()));

        let snapshot = self
            .store
            .load_execution(execution_id)
            .await
            .map_err(|e| EventBusError::ReplayFailed(e.to_string()))?;

        let replay: Vec<ExecutionEvent> = snapshot
            .events
            .into_iter()
            .filter(|e| e.seq > from_seq.unwrap_or(0))
            .collect();

        Ok(EventSubscription {
            execution_id,
            store: Arc::clone(&self.store),
            receiver,
            replay: replay.into_iter().collect(),
            last_seq: from_seq.unwrap_or(0),
            metrics: self.metrics.clone(),
            done: false,
        })
    }
}

/// A live subscription: drains the replay backlog first, then the broadcast
/// channel, recovering from `Lagged` by re-querying the store so no event is
/// silently lost regardless of kind.
pub struct EventSubscription {
    execution_id: ExecutionId,
    store: Arc<dyn Store>,
    receiver: broadcast::Receiver<ExecutionEvent>,
    replay: std::collections::VecDeque<ExecutionEvent>,
    last_seq: u64,
    metrics: EventBusMetrics,
    done: bool,
}

impl EventSubscription {
    /// Next event, or `None` once the execution has reached a terminal state
    /// and every event up to it has been delivered.
    pub async fn next(&mut self) -> Option<Result<ExecutionEvent, EventBusError>> {
        if self.done {
            return None;
        }

        if let Some(event) = self.replay.pop_front() {
            self.last_seq = event.seq;
            let terminal = event.kind.is_execution_terminal();
            if terminal {
                self.done = true;
            }
            return Some(Ok(event));
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) if event.seq <= self.last_seq => continue,
                Ok(event) => {
                    self.last_seq = event.seq;
                    if event.kind.is_execution_terminal() {
                        self.done = true;
                    }
                    return Some(Ok(event));
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        execution_id = %self.execution_id,
                        missed,
                        "subscriber lagged, recovering missed events from the store"
                    );
                    self.metrics.increment_dropped();
                    match self.store.load_execution(self.execution_id).await {
                        Ok(snapshot) => {
                            self.replay.extend(
                                snapshot
                                    .events
                                    .into_iter()
                                    .filter(|e| e.seq > self.last_seq),
                            );
                            if let Some(event) = self.replay.pop_front() {
                                self.last_seq = event.seq;
                                if event.kind.is_execution_terminal() {
                                    self.done = true;
                                }
                                return Some(Ok(event));
                            }
                            continue;
                        }
                        Err(e) => return Some(Err(EventBusError::ReplayFailed(e.to_string()))),
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventKind, Execution, OnError, TaskSpec, Workflow, WorkflowDefinition};
    use crate::store::SqliteStore;
    use std::collections::BTreeMap;

    async fn setup() -> (EventBus, ExecutionId) {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let definition = WorkflowDefinition {
            tasks: vec![TaskSpec {
                name: "a".to_string(),
                agent_type: "browser".to_string(),
                action: "navigate".to_string(),
                parameters: serde_json::Value::Null,
                depends_on: vec![],
                timeout_seconds: None,
                retry_count: None,
                on_error: None,
            }],
            variables: BTreeMap::new(),
            on_error: OnError::Stop,
        };
        let workflow = Workflow::new("w".to_string(), "owner".to_string(), definition, None, None);
        store.create_workflow(&workflow).await.unwrap();
        let execution = Execution::new(workflow.id, BTreeMap::new(), "manual".to_string());
        store.create_execution(&execution).await.unwrap();
        (EventBus::new(store, EventBusConfig::default()), execution.id)
    }

    #[tokio::test]
    async fn subscriber_sees_live_events_in_order() {
        let (bus, execution_id) = setup().await;
        let mut sub = bus.subscribe(execution_id, None).await.unwrap();

        bus.publish(ExecutionEvent::new(execution_id, EventKind::ExecutionStarted))
            .await
            .unwrap();
        bus.publish(ExecutionEvent::new(execution_id, EventKind::ExecutionCompleted))
            .await
            .unwrap();

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.kind, EventKind::ExecutionStarted);
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.kind, EventKind::ExecutionCompleted);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_replays_from_store() {
        let (bus, execution_id) = setup().await;
        bus.publish(ExecutionEvent::new(execution_id, EventKind::ExecutionStarted))
            .await
            .unwrap();

        let mut sub = bus.subscribe(execution_id, None).await.unwrap();
        let replayed = sub.next().await.unwrap().unwrap();
        assert_eq!(replayed.kind, EventKind::ExecutionStarted);
    }

    #[tokio::test]
    async fn replay_from_seq_skips_already_seen_events() {
        let (bus, execution_id) = setup().await;
        let first = bus
            .publish(ExecutionEvent::new(execution_id, EventKind::ExecutionStarted))
            .await
            .unwrap();
        bus.publish(ExecutionEvent::new(execution_id, EventKind::TaskStarted))
            .await
            .unwrap();

        let mut sub = bus.subscribe(execution_id, Some(first.seq)).await.unwrap();
        let next = sub.next().await.unwrap().unwrap();
        assert_eq!(next.kind, EventKind::TaskStarted);
    }
}
