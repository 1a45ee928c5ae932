use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::payload::StoredPayload;

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(StoreError::InvalidPayload(format!("unknown role {:?}", other))),
        }
    }
}

/// One immutable message in a session's log.
///
/// `timestamp` is the sort key: RFC 3339 UTC with microsecond precision, so
/// string order is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub session_id: String,
    pub timestamp: String,
    pub role: Role,
    pub payload: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl Turn {
    pub fn is_expired_at(&self, unix_secs: i64) -> bool {
        self.expires_at <= unix_secs
    }

    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn parsed_payload(&self) -> Result<StoredPayload, StoreError> {
        StoredPayload::parse(&self.payload)
    }
}

/// Retrieval order by timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryOrder {
    #[default]
    Ascending,
    Descending,
}

/// Aggregates over a session's turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub total_messages: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub total_content_length: usize,
    pub average_content_length: f64,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
    /// Set when the session holds more turns than a stats scan covers.
    pub truncated: bool,
}
