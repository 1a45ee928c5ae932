use thiserror::Error;

/// Failure reported by the key-value collaborator.
///
/// Throttling, capacity and internal server errors are transient; everything
/// else is terminal and must not be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KvError {
    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal store error: {0}")]
    Internal(String),

    #[error("Conditional put failed: {partition}/{sort_key} already exists")]
    Conflict { partition: String, sort_key: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl KvError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KvError::Throttled(_) | KvError::Unavailable(_) | KvError::Internal(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("Timestamp collision for session {session_id} persisted after retry at {timestamp}")]
    Collision {
        session_id: String,
        timestamp: String,
    },

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the underlying failure was transient. Retries have already been
    /// spent by the time a `StoreError` reaches the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Kv(e) if e.is_retryable())
    }
}
