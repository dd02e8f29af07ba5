//! Wire DTOs for the HTTP surface. Where a domain type's own `Serialize`/
//! `Deserialize` already matches the wire format in full (e.g.
//! `WorkflowDefinition`, `Workflow`, `ExecutionEvent`), routes return it
//! directly instead of duplicating a shape here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Execution, ExecutionError, ExecutionStatus, TaskRun, WorkflowDefinition, WorkflowStatus};

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub name: String,
    pub owner: String,
    #[serde(flatten)]
    pub definition: WorkflowDefinition,
    pub timeout_seconds: Option<u64>,
    pub max_retries_default: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListWorkflowsQuery {
    pub owner: String,
    pub status: Option<WorkflowStatus>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ExecuteWorkflowRequest {
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default = "default_trigger_type")]
    pub trigger_type: String,
}

fn default_trigger_type() -> String {
    "manual".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExecutionIdResponse {
    pub execution_id: String,
}

#[derive(Debug, Serialize)]
pub struct WorkflowIdResponse {
    pub workflow_id: String,
}

/// `GetExecution`'s response body. Mirrors `Execution` field-for-field
/// except `status`, which carries the scheduler's display status (so a
/// cancel request in flight shows as `cancelling` before the engine's
/// drain writes the real terminal transition).
#[derive(Debug, Serialize)]
pub struct ExecutionResponse {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub trigger_type: String,
    pub inputs: BTreeMap<String, Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: BTreeMap<String, Value>,
    pub error: Option<ExecutionError>,
    pub created_at: DateTime<Utc>,
    pub task_runs: Vec<TaskRun>,
}

impl ExecutionResponse {
    #[must_use]
    pub fn new(execution: Execution, display_status: ExecutionStatus, task_runs: Vec<TaskRun>) -> Self {
        Self {
            id: execution.id.to_string(),
            workflow_id: execution.workflow_id.to_string(),
            status: display_status,
            trigger_type: execution.trigger_type,
            inputs: execution.inputs,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            duration_ms: execution.duration_ms,
            output: execution.output,
            error: execution.error,
            created_at: execution.created_at,
            task_runs,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SubscribeQuery {
    pub from_sequence: Option<u64>,
}
