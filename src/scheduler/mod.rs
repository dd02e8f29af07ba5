//! Transport-agnostic API core: workflow CRUD, `execute_workflow`,
//! `get_execution`, `cancel_execution`, `subscribe_execution_events` — the
//! operations any transport (`api`'s axum routes, a future CLI, or a test)
//! calls into directly.
//!
//! Grounded on `mcp::registry::CrawlRegistry`'s find-or-create/list/kill
//! shape, generalized from keyed crawl sessions to persisted workflow
//! executions: the `Store` replaces the registry's in-memory `HashMap` as
//! the authority, and `ExecutionEngine` replaces direct crawl spawning.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::engine::{EngineError, ExecutionEngine};
use crate::event_bus::{EventBus, EventSubscription};
use crate::model::{
    Execution, ExecutionEvent, ExecutionId, ExecutionStatus, EventKind, TaskGraph, TaskRun,
    Workflow, WorkflowDefinition, WorkflowId, WorkflowStatus,
};
use crate::store::{ExecutionSnapshot, Store, WorkflowFilter};

/// A page of `list_workflows` results. The reference store has no natural
/// cursor column beyond `created_at`, so pagination here is offset/limit
/// over that ordering — adequate for the owner-scoped lists this operation
/// serves, not for unbounded cross-tenant scans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    #[must_use]
    pub const fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }
}

/// What `GetExecution` returns: the execution record plus every task run
/// persisted for it, in creation order.
#[derive(Debug, Clone)]
pub struct ExecutionView {
    pub execution: Execution,
    pub task_runs: Vec<TaskRun>,
}

/// The engine's core operations, independent of any wire transport.
pub struct Scheduler {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    engine: Arc<ExecutionEngine>,
}

impl Scheduler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>, engine: Arc<ExecutionEngine>) -> Self {
        Self { store, bus, engine }
    }

    /// Validate and persist a new workflow. Rejects a cyclic or otherwise
    /// malformed definition with `ErrInvalidDefinition` naming the offending
    /// task, without ever reaching the store.
    pub async fn create_workflow(
        &self,
        name: String,
        owner: String,
        definition: WorkflowDefinition,
        timeout_seconds: Option<u64>,
        max_retries_default: Option<u32>,
    ) -> Result<WorkflowId, EngineError> {
        TaskGraph::build(&definition)?;
        let workflow = Workflow::new(name, owner, definition, timeout_seconds, max_retries_default);
        let id = workflow.id;
        self.store.create_workflow(&workflow).await?;
        Ok(id)
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, EngineError> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(id.to_string()))
    }

    pub async fn list_workflows(
        &self,
        owner: &str,
        filter: &WorkflowFilter,
        page: Page,
    ) -> Result<Vec<Workflow>, EngineError> {
        let mut all = self.store.list_workflows(owner, filter).await?;
        all.sort_by_key(|w| std::cmp::Reverse(w.created_at));
        let limit = if page.limit == 0 { all.len() } else { page.limit };
        Ok(all.into_iter().skip(page.offset).take(limit).collect())
    }

    /// Logical archive: sets `status = archived`, which blocks future
    /// `execute_workflow` calls but leaves any in-flight execution running
    /// and every past execution's history intact (never a cascading delete).
    pub async fn archive_workflow(&self, id: WorkflowId) -> Result<(), EngineError> {
        self.get_workflow(id).await?;
        self.store
            .update_workflow_status(id, WorkflowStatus::Archived)
            .await?;
        Ok(())
    }

    /// Create a queued `Execution` for `workflow_id` and enqueue it to the
    /// engine. Returns the new execution id immediately; the run happens in
    /// the background bounded by `global_parallelism`.
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        inputs: BTreeMap<String, Value>,
        trigger_type: String,
    ) -> Result<ExecutionId, EngineError> {
        let workflow = self.get_workflow(workflow_id).await?;
        if workflow.status == WorkflowStatus::Archived {
            return Err(EngineError::WorkflowArchived(workflow_id.to_string()));
        }

        let execution = Execution::new(workflow_id, inputs, trigger_type);
        let execution_id = execution.id;
        self.store.create_execution(&execution).await?;
        if let Err(e) = self
            .bus
            .publish(ExecutionEvent::new(execution_id, EventKind::ExecutionQueued))
            .await
        {
            warn!(execution_id = %execution_id, error = %e, "failed to publish execution_queued event");
        }
        self.engine.submit(workflow, execution);
        Ok(execution_id)
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<ExecutionView, EngineError> {
        let ExecutionSnapshot {
            execution,
            task_runs,
            ..
        } = self
            .store
            .load_execution(id)
            .await
            .map_err(|_| EngineError::ExecutionNotFound(id.to_string()))?;
        Ok(ExecutionView { execution, task_runs })
    }

    /// True `ExecutionStatus` as the store records it, with the engine's
    /// in-memory cancellation-in-progress flag overlaid as `Cancelling`
    /// when applicable — the store itself only ever records `running`
    /// until the drain completes and the engine writes the real terminal
    /// transition, so this is where that intermediate state becomes
    /// externally observable without a second writer racing the engine.
    #[must_use]
    pub fn display_status(&self, execution: &Execution) -> ExecutionStatus {
        if execution.status == ExecutionStatus::Running && self.engine.is_cancelling(execution.id) {
            ExecutionStatus::Cancelling
        } else {
            execution.status
        }
    }

    /// Request cancellation. Rejects with `ErrTerminal` (`AlreadyTerminal`)
    /// if the execution has already reached a terminal status; otherwise
    /// signals the engine and returns immediately — the execution reaches
    /// `cancelled` within `cancellation_grace` once in-flight task runs
    /// drain.
    pub async fn cancel_execution(&self, id: ExecutionId) -> Result<(), EngineError> {
        let snapshot = self
            .store
            .load_execution(id)
            .await
            .map_err(|_| EngineError::ExecutionNotFound(id.to_string()))?;
        if snapshot.execution.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(id.to_string()));
        }
        self.engine.cancel_execution(id);
        Ok(())
    }

    /// Subscribe to an execution's event stream, optionally replaying
    /// everything after `from_sequence` before the subscription switches to
    /// live delivery (see `EventBus::subscribe`).
    pub async fn subscribe_execution_events(
        &self,
        id: ExecutionId,
        from_sequence: Option<u64>,
    ) -> Result<EventSubscription, EngineError> {
        self.get_execution(id).await?;
        Ok(self.bus.subscribe(id, from_sequence).await?)
    }
}
