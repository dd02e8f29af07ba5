use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventBusError {
    #[error("failed to publish event: {0}")]
    PublishFailed(String),

    #[error("subscriber lagged behind and could not recover from the store: {0}")]
    ReplayFailed(String),

    #[error("event bus is shut down")]
    Shutdown,
}
