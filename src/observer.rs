//! The `Observer` capability: a seam for metric/tracing exporters.
//!
//! Concrete exporters (Prometheus, OTLP, a vendor APM agent) are external
//! collaborators per this crate's scope — only the interface and a
//! `tracing`-backed default implementation live here, logging lifecycle
//! transitions inline with `tracing::info!`/`warn!` rather than through a
//! dedicated metrics type.

use crate::model::{EventKind, ExecutionId};

/// Notified of every execution/task state transition the engine makes.
/// Implementations must not block the engine; a slow `Observer` should hand
/// off to its own background task the way `EventBus` subscribers do.
pub trait Observer: Send + Sync {
    fn record(&self, execution_id: ExecutionId, kind: EventKind, task_name: Option<&str>);
}

/// Default `Observer`: every transition becomes one `tracing` event at
/// `info` level (or `warn` for failure/cancellation kinds), so an operator
/// gets execution-scoped spans out of the box without standing up a metrics
/// backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn record(&self, execution_id: ExecutionId, kind: EventKind, task_name: Option<&str>) {
        match kind {
            EventKind::TaskFailed | EventKind::ExecutionFailed | EventKind::ExecutionCancelled => {
                tracing::warn!(%execution_id, ?kind, task = task_name, "execution state transition");
            }
            _ => {
                tracing::info!(%execution_id, ?kind, task = task_name, "execution state transition");
            }
        }
    }
}

/// An `Observer` that discards everything, for tests that don't care.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn record(&self, _execution_id: ExecutionId, _kind: EventKind, _task_name: Option<&str>) {}
}
