//! The execution event log's wire shape: one entry per state change a
//! subscriber or the durable log needs to see.

use serde::{Deserialize, Serialize};

use super::execution::ExecutionError;
use super::ids::ExecutionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ExecutionQueued,
    ExecutionStarted,
    TaskQueued,
    TaskStarted,
    TaskRetrying,
    TaskSucceeded,
    TaskFailed,
    TaskSkipped,
    ExecutionCompleted,
    ExecutionFailed,
    ExecutionCancelled,
}

impl EventKind {
    /// Terminal events (a task or execution's final word) are never dropped
    /// for a slow subscriber, unlike progress events for the same run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::TaskSucceeded
                | Self::TaskFailed
                | Self::TaskSkipped
                | Self::ExecutionCompleted
                | Self::ExecutionFailed
                | Self::ExecutionCancelled
        )
    }

    /// Whether this is the execution's own final word, as opposed to one
    /// task among several reaching a terminal state. Only this closes a
    /// subscription and tears down the bus channel; a workflow with more
    /// than one task must keep delivering events past its first completed
    /// task.
    #[must_use]
    pub const fn is_execution_terminal(self) -> bool {
        matches!(
            self,
            Self::ExecutionCompleted | Self::ExecutionFailed | Self::ExecutionCancelled
        )
    }
}

/// Truncation length for a task's output digest, carried on the event
/// instead of the full output (full output is available via `GetExecution`).
pub const OUTPUT_DIGEST_MAX_BYTES: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub execution_id: ExecutionId,
    /// Assigned by the store on append; 0 until persisted.
    pub seq: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
    pub task_name: Option<String>,
    pub attempt: Option<u32>,
    pub error: Option<ExecutionError>,
    pub output_digest: Option<String>,
}

impl ExecutionEvent {
    #[must_use]
    pub fn new(execution_id: ExecutionId, kind: EventKind) -> Self {
        Self {
            execution_id,
            seq: 0,
            ts: chrono::Utc::now(),
            kind,
            task_name: None,
            attempt: None,
            error: None,
            output_digest: None,
        }
    }

    #[must_use]
    pub fn with_task(mut self, task_name: impl Into<String>) -> Self {
        self.task_name = Some(task_name.into());
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: ExecutionError) -> Self {
        self.error = Some(error);
        self
    }

    /// Truncate an output value to a size-limited digest for the event
    /// stream; the full value stays in the task run record.
    #[must_use]
    pub fn with_output_digest(mut self, output: &serde_json::Value) -> Self {
        let rendered = output.to_string();
        let digest = if rendered.len() > OUTPUT_DIGEST_MAX_BYTES {
            let mut truncated = rendered
                .char_indices()
                .take_while(|(idx, _)| *idx < OUTPUT_DIGEST_MAX_BYTES)
                .map(|(_, c)| c)
                .collect::<String>();
            truncated.push('…');
            truncated
        } else {
            rendered
        };
        self.output_digest = Some(digest);
        self
    }
}
