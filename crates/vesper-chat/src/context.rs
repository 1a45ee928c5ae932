//! Per-request context, passed explicitly through every service call.

use chrono::{DateTime, Utc};
use tracing::{info_span, Span};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    span: Span,
}

impl RequestContext {
    pub fn new(session_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self::with_request_id(Uuid::new_v4(), session_id, started_at)
    }

    /// Context with a caller-assigned id, e.g. one propagated from an upstream proxy.
    pub fn with_request_id(
        request_id: Uuid,
        session_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let session_id = session_id.into();
        let span = info_span!("chat_request", %request_id, session_id = %session_id);
        Self {
            request_id,
            session_id,
            started_at,
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_milliseconds().max(0)
    }
}
