use crate::models::SubscriptionStatus;
use thiserror::Error;

/// Engine-level error type.
///
/// Operator-visible variants carry enough context to act on (current state,
/// why an operation was rejected) without exposing internals.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("{operation} is not allowed while the subscription is {current}")]
    IllegalTransition {
        operation: &'static str,
        current: SubscriptionStatus,
    },

    #[error("Redemption queue is full, retry later")]
    QueueFull,

    #[error("Recovery conflict: {0}")]
    RecoveryConflict(String),

    #[error("Store error: {0}")]
    Store(anyhow::Error),

    #[error("Configuration error: {0}")]
    Config(anyhow::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::QueueFull | EngineError::Store(_))
    }
}
