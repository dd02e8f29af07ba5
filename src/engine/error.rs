use thiserror::Error;

use crate::event_bus::EventBusError;
use crate::model::ValidationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(#[from] ValidationError),

    #[error("execution {0} not found")]
    ExecutionNotFound(String),

    #[error("workflow {0} not found")]
    WorkflowNotFound(String),

    #[error("workflow {0} is archived and cannot be executed")]
    WorkflowArchived(String),

    #[error("execution {0} has already reached a terminal state")]
    AlreadyTerminal(String),

    #[error("not authorized to access workflow {0}")]
    Forbidden(String),

    #[error("execution exceeded its timeout")]
    ExecutionTimeout,

    #[error("execution was orphaned by a restart")]
    Orphaned,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    EventBus(#[from] EventBusError),
}

impl EngineError {
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Store(StoreError::Database(_)))
    }
}
