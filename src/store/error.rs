use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no row found for id {0}")]
    NotFound(String),

    #[error("state conflict: expected status {expected}, row is currently {actual}")]
    StateConflict { expected: String, actual: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
