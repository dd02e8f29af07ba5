//! Driver-level failures, classified for the engine's retry policy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("action parameters invalid: {0}")]
    InvalidAction(String),

    #[error("selector timed out: {0}")]
    SelectorTimeout(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("browser process crashed: {0}")]
    DriverCrashed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation exceeded its deadline")]
    Timeout,

    #[error("page pool exhausted or unavailable: {0}")]
    PoolUnavailable(String),
}

impl DriverError {
    /// Whether retrying this exact action is likely to help. Mirrors the
    /// shape of a classification table over transient-vs-permanent causes:
    /// transport hiccups are retryable, malformed requests are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SelectorTimeout(_)
                | Self::Navigation(_)
                | Self::DriverCrashed(_)
                | Self::Timeout
                | Self::PoolUnavailable(_)
        )
    }
}
