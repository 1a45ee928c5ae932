//! Language-model collaborator contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vesper_store::{Retryable, Role};

/// One plaintext turn sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub role: Role,
    pub content: String,
}

impl ModelTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Failure reported by the model client.
///
/// `status` follows HTTP conventions. A missing status means the request never
/// got a response (connection reset, DNS, and so on).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Model invocation failed: {message}")]
pub struct ModelError {
    pub status: Option<u16>,
    pub message: String,
}

impl ModelError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Transport-level failure with no response status.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Network failures, request timeouts and server errors are worth retrying.
    /// Client errors, quota exhaustion included, are not.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(408) => true,
            Some(status) => status >= 500,
        }
    }
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        ModelError::is_retryable(self)
    }
}

/// User-implemented model invocation client.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete the conversation. `turns` is ordered oldest first and ends with
    /// the new user message.
    async fn complete(&self, turns: &[ModelTurn]) -> Result<String, ModelError>;

    /// Cheap reachability check.
    async fn health(&self) -> Result<(), ModelError> {
        Ok(())
    }
}
