//! Workflow definitions: the DAG template a user submits, before execution.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ids::WorkflowId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Inactive,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    Stop,
    Continue,
    Retry,
}

impl Default for OnError {
    fn default() -> Self {
        Self::Stop
    }
}

/// A single node in the workflow DAG, as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    pub agent_type: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub timeout_seconds: Option<u64>,
    pub retry_count: Option<u32>,
    pub on_error: Option<OnError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub on_error: OnError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub owner: String,
    pub definition: WorkflowDefinition,
    pub status: WorkflowStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub timeout_seconds: Option<u64>,
    pub max_retries_default: Option<u32>,
}

impl Workflow {
    #[must_use]
    pub fn new(
        name: String,
        owner: String,
        definition: WorkflowDefinition,
        timeout_seconds: Option<u64>,
        max_retries_default: Option<u32>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: WorkflowId::new(),
            name,
            owner,
            definition,
            status: WorkflowStatus::Active,
            created_at: now,
            updated_at: now,
            timeout_seconds,
            max_retries_default,
        }
    }
}
