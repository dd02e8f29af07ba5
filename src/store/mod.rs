//! Durable persistence for workflows, executions, task runs, and the
//! execution event log.
//!
//! Grounded on this codebase's existing `sqlx`-backed SQLite layer
//! (WAL mode, pool, embedded `CREATE TABLE IF NOT EXISTS` schema), scaled
//! from a link-graph index up to four orchestration tables with
//! compare-and-swap status transitions.

mod error;
mod schema;
mod sqlite;

pub use error::StoreError;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{
    Execution, ExecutionError, ExecutionEvent, ExecutionId, ExecutionStatus, TaskRun, TaskRunId,
    TaskRunStatus, Workflow, WorkflowId, WorkflowStatus,
};

/// Fields a status transition may update alongside the status itself.
#[derive(Debug, Default, Clone)]
pub struct ExecutionTransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<BTreeMap<String, Value>>,
    pub error: Option<ExecutionError>,
}

#[derive(Debug, Default, Clone)]
pub struct TaskRunTransitionFields {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: Option<Value>,
    pub error: Option<ExecutionError>,
    /// Set when a retry bumps the attempt counter.
    pub attempt: Option<u32>,
}

/// A full execution snapshot for inspection or resume.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub execution: Execution,
    pub task_runs: Vec<TaskRun>,
    pub events: Vec<ExecutionEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowFilter {
    pub status: Option<WorkflowStatus>,
}

/// Durable persistence capability. Every write is atomic; status
/// transitions are compare-and-swap so concurrent workers can detect and
/// reconcile a conflicting write instead of silently clobbering it.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_workflow(&self, workflow: &Workflow) -> Result<(), StoreError>;
    async fn get_workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError>;
    async fn list_workflows(
        &self,
        owner: &str,
        filter: &WorkflowFilter,
    ) -> Result<Vec<Workflow>, StoreError>;
    async fn update_workflow_status(
        &self,
        id: WorkflowId,
        status: WorkflowStatus,
    ) -> Result<(), StoreError>;

    async fn create_execution(&self, execution: &Execution) -> Result<(), StoreError>;
    async fn transition_execution(
        &self,
        id: ExecutionId,
        expected_from: ExecutionStatus,
        to: ExecutionStatus,
        fields: ExecutionTransitionFields,
    ) -> Result<(), StoreError>;

    async fn create_task_run(&self, task_run: &TaskRun) -> Result<(), StoreError>;
    async fn transition_task_run(
        &self,
        id: TaskRunId,
        expected_from: TaskRunStatus,
        to: TaskRunStatus,
        fields: TaskRunTransitionFields,
    ) -> Result<(), StoreError>;

    /// Append an event to the durable log, returning the sequence number
    /// the store assigned it.
    async fn append_event(&self, event: &ExecutionEvent) -> Result<u64, StoreError>;

    async fn load_execution(&self, id: ExecutionId) -> Result<ExecutionSnapshot, StoreError>;

    /// Every execution left `running` or `cancelling` by a prior process,
    /// for startup orphan recovery.
    async fn list_incomplete_executions(&self) -> Result<Vec<Execution>, StoreError>;
}
