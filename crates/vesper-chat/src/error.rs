use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use vesper_crypto::CryptoError;
use vesper_store::{KvError, StoreError};

use crate::config::ConfigError;
use crate::model::ModelError;
use crate::sanitize;

/// Failure class of a `ChatError`. Callers branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    Authentication,
    Encryption,
    Upstream,
    Storage,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Authentication => "Authentication",
            ErrorKind::Encryption => "Encryption",
            ErrorKind::Upstream => "Upstream",
            ErrorKind::Storage => "Storage",
            ErrorKind::Configuration => "Configuration",
        }
    }
}

/// Service-boundary error: every lower-level failure collapses into one of these.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[error("{} ({status}): {message}", .kind.as_str())]
pub struct ChatError {
    pub kind: ErrorKind,
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl ChatError {
    pub fn new(kind: ErrorKind, status: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, 401, message)
    }

    pub fn encryption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encryption, 400, message)
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, status, message)
    }

    pub fn storage(status: u16, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, status, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, 500, message)
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    /// Message safe to send to the client. Server-side failures get a fixed
    /// text per status; client-side messages are sanitized.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            sanitize::generic_message(self.status).to_string()
        } else {
            sanitize::client_message(&self.message)
        }
    }

    /// JSON body for the client. Details are only included for client errors.
    pub fn to_response_body(&self) -> Value {
        let mut body = json!({
            "error": self.kind.as_str(),
            "message": self.public_message(),
        });
        if !self.is_server_error() && !self.details.is_empty() {
            body["details"] = Value::Object(self.details.clone());
        }
        body
    }
}

impl From<CryptoError> for ChatError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::RngFailed(_)
            | CryptoError::EncryptionFailed(_)
            | CryptoError::KeyDerivationFailed(_) => {
                ChatError::new(ErrorKind::Encryption, 500, err.to_string())
            }
            _ => ChatError::encryption(err.to_string()),
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Kv(KvError::Throttled(_) | KvError::Unavailable(_)) => 503,
            StoreError::Kv(KvError::Conflict { .. }) | StoreError::Collision { .. } => 409,
            StoreError::Kv(KvError::Validation(_))
            | StoreError::InvalidSessionId(_)
            | StoreError::InvalidPayload(_) => 400,
            StoreError::Kv(KvError::NotFound(_)) => 404,
            StoreError::Kv(KvError::Internal(_)) | StoreError::Serialization(_) => 500,
        };
        ChatError::storage(status, err.to_string())
    }
}

impl From<ModelError> for ChatError {
    fn from(err: ModelError) -> Self {
        let status = match err.status {
            None => 502,
            Some(408) => 504,
            Some(429) => 429,
            Some(s @ (502 | 503 | 504)) => s,
            Some(s) if s >= 500 => 502,
            Some(_) => 400,
        };
        let upstream_status = err.status.map(Value::from).unwrap_or(Value::Null);
        ChatError::upstream(status, err.to_string()).with_detail("upstreamStatus", upstream_status)
    }
}

impl From<ConfigError> for ChatError {
    fn from(err: ConfigError) -> Self {
        ChatError::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_carry_default_statuses() {
        assert_eq!(ChatError::authentication("x").status, 401);
        assert_eq!(ChatError::encryption("x").status, 400);
        assert_eq!(ChatError::configuration("x").status, 500);
    }

    #[test]
    fn crypto_errors_map_to_encryption() {
        let err: ChatError = CryptoError::TagMismatch.into();
        assert_eq!(err.kind, ErrorKind::Encryption);
        assert_eq!(err.status, 400);

        let err: ChatError = CryptoError::RngFailed("no entropy".into()).into();
        assert_eq!(err.status, 500);
    }

    #[test]
    fn store_errors_map_by_class() {
        let cases = [
            (StoreError::Kv(KvError::Throttled("t".into())), 503),
            (StoreError::Kv(KvError::Unavailable("u".into())), 503),
            (StoreError::Kv(KvError::Internal("i".into())), 500),
            (
                StoreError::Collision {
                    session_id: "s".into(),
                    timestamp: "t".into(),
                },
                409,
            ),
            (StoreError::Kv(KvError::Validation("v".into())), 400),
            (StoreError::Kv(KvError::NotFound("n".into())), 404),
            (StoreError::InvalidSessionId("empty".into()), 400),
        ];
        for (store_err, status) in cases {
            let err: ChatError = store_err.into();
            assert_eq!(err.kind, ErrorKind::Storage);
            assert_eq!(err.status, status, "{}", err);
        }
    }

    #[test]
    fn model_errors_map_by_class() {
        let cases = [
            (ModelError::network("reset"), 502),
            (ModelError::new(500, "boom"), 502),
            (ModelError::new(503, "busy"), 503),
            (ModelError::new(504, "slow"), 504),
            (ModelError::new(408, "timeout"), 504),
            (ModelError::new(429, "quota"), 429),
            (ModelError::new(400, "bad"), 400),
            (ModelError::new(422, "unprocessable"), 400),
        ];
        for (model_err, status) in cases {
            let err: ChatError = model_err.into();
            assert_eq!(err.kind, ErrorKind::Upstream);
            assert_eq!(err.status, status, "{}", err);
        }
    }

    #[test]
    fn server_errors_hide_internal_detail() {
        let err = ChatError::storage(500, "dynamo table vesper-prod exploded at shard 7");
        assert!(!err.public_message().contains("vesper-prod"));
        let body = err.with_detail("phase", "PERSISTED").to_response_body();
        assert!(body.get("details").is_none());
        assert_eq!(body["error"], "Storage");
    }

    #[test]
    fn client_errors_are_sanitized() {
        let err = ChatError::authentication("Invalid code\n\u{7}".to_string() + &"x".repeat(400))
            .with_detail("phase", "CODE_VALIDATED");
        let message = err.public_message();
        assert!(message.starts_with("Invalid code"));
        assert!(!message.chars().any(char::is_control));
        assert_eq!(message.chars().count(), 200);
        assert_eq!(err.to_response_body()["details"]["phase"], "CODE_VALIDATED");
    }
}
