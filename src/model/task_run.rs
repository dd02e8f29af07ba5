//! TaskRun records: one attempt-sequence of a task within one execution.

use serde::{Deserialize, Serialize};

use super::execution::ExecutionError;
use super::ids::{ExecutionId, TaskRunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl TaskRunStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub execution_id: ExecutionId,
    pub task_name: String,
    pub agent_type: String,
    pub action: String,
    pub status: TaskRunStatus,
    pub attempt: u32,
    pub retry_count_limit: u32,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_ms: Option<i64>,
    pub parameters_resolved: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<ExecutionError>,
}

impl TaskRun {
    #[must_use]
    pub fn new(
        execution_id: ExecutionId,
        task_name: String,
        agent_type: String,
        action: String,
        parameters_resolved: serde_json::Value,
        retry_count_limit: u32,
    ) -> Self {
        Self {
            id: TaskRunId::new(),
            execution_id,
            task_name,
            agent_type,
            action,
            status: TaskRunStatus::Queued,
            attempt: 1,
            retry_count_limit,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            parameters_resolved,
            output: None,
            error: None,
        }
    }
}
