//! Execution records: one run of a workflow against concrete inputs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::{ExecutionId, WorkflowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub trigger_type: String,
    pub inputs: BTreeMap<String, serde_json::Value>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub duration_ms: Option<i64>,
    pub output: BTreeMap<String, serde_json::Value>,
    pub error: Option<ExecutionError>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Execution {
    #[must_use]
    pub fn new(
        workflow_id: WorkflowId,
        inputs: BTreeMap<String, serde_json::Value>,
        trigger_type: String,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            status: ExecutionStatus::Queued,
            trigger_type,
            inputs,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            output: BTreeMap::new(),
            error: None,
            created_at: chrono::Utc::now(),
        }
    }
}
