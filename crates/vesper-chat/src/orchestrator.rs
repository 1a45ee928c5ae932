//! ChatService: one chat turn, start to finish.
//!
//! A turn walks a fixed sequence of phases:
//!
//! ```text
//! RECEIVED → CODE_VALIDATED → MESSAGE_DECRYPTED → HISTORY_LOADED
//!          → MODEL_INVOKED → RESPONSE_ENCRYPTED → PERSISTED → RESPONDED
//! ```
//!
//! A failure ends the turn with a `ChatError` tagged with the phase that
//! failed. Nothing is rolled back. History turns that cannot be decrypted are
//! reported in the response and never fail the turn.
//!
//! The user and assistant turns are two separate appends. If the second one
//! fails the user turn is left without a reply; `orphaned_turns` finds those.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn, Instrument};
use vesper_crypto::{encrypt, epoch_at, generate, validate, Code, CryptoError, Envelope, SharedSecret};
use vesper_store::{
    validate_session_id, Clock, ConversationStore, KeyValueStore, QueryOrder, Role, SessionStats,
    StoredPayload, Turn,
};

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::{ChatError, ErrorKind};
use crate::health::{check_all, CipherCheck, HealthCheck, HealthReport, ModelCheck, StoreCheck, CHECK_TIMEOUT};
use crate::history::{decrypt_history, CandidatePlan};
use crate::model::{ModelClient, ModelError, ModelTurn};
use crate::wire::{ChatRequest, ChatResponse, HistoryView};

/// Phases of a chat turn, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatPhase {
    Received,
    CodeValidated,
    MessageDecrypted,
    HistoryLoaded,
    ModelInvoked,
    ResponseEncrypted,
    Persisted,
    Responded,
}

impl ChatPhase {
    pub const ALL: [ChatPhase; 8] = [
        ChatPhase::Received,
        ChatPhase::CodeValidated,
        ChatPhase::MessageDecrypted,
        ChatPhase::HistoryLoaded,
        ChatPhase::ModelInvoked,
        ChatPhase::ResponseEncrypted,
        ChatPhase::Persisted,
        ChatPhase::Responded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChatPhase::Received => "RECEIVED",
            ChatPhase::CodeValidated => "CODE_VALIDATED",
            ChatPhase::MessageDecrypted => "MESSAGE_DECRYPTED",
            ChatPhase::HistoryLoaded => "HISTORY_LOADED",
            ChatPhase::ModelInvoked => "MODEL_INVOKED",
            ChatPhase::ResponseEncrypted => "RESPONSE_ENCRYPTED",
            ChatPhase::Persisted => "PERSISTED",
            ChatPhase::Responded => "RESPONDED",
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(self) -> Option<ChatPhase> {
        let position = ChatPhase::ALL.iter().position(|p| *p == self)?;
        ChatPhase::ALL.get(position + 1).copied()
    }
}

/// Phases reached so far by one turn. Phases only ever advance one step.
#[derive(Debug, Clone)]
pub struct PhaseTrace {
    reached: Vec<ChatPhase>,
}

impl Default for PhaseTrace {
    fn default() -> Self {
        Self {
            reached: vec![ChatPhase::Received],
        }
    }
}

impl PhaseTrace {
    pub fn current(&self) -> ChatPhase {
        self.reached.last().copied().unwrap_or(ChatPhase::Received)
    }

    pub fn reached(&self) -> &[ChatPhase] {
        &self.reached
    }

    fn advance(&mut self) -> ChatPhase {
        let from = self.current();
        let to = from.next().unwrap_or(from);
        if to != from {
            self.reached.push(to);
            debug!(phase = to.as_str(), "phase reached");
        }
        to
    }

    /// Tag `err` with the phase that was being attempted.
    fn fail(&self, err: impl Into<ChatError>) -> ChatError {
        let current = self.current();
        let failed = current.next().unwrap_or(current);
        err.into().with_detail("phase", failed.as_str())
    }
}

/// Orchestrates chat turns and session maintenance over shared read-only state.
pub struct ChatService {
    config: Arc<Config>,
    secret: Arc<SharedSecret>,
    kv: Arc<dyn KeyValueStore>,
    store: ConversationStore,
    model: Arc<dyn ModelClient>,
    clock: Arc<dyn Clock>,
}

impl ChatService {
    pub fn new(
        config: Arc<Config>,
        kv: Arc<dyn KeyValueStore>,
        model: Arc<dyn ModelClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = ConversationStore::new(Arc::clone(&kv), Arc::clone(&clock), config.store_options());
        let secret = Arc::new(config.secret().clone());
        Self {
            config,
            secret,
            kv,
            store,
            model,
            clock,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Fresh request context stamped with this service's clock.
    pub fn context(&self, session_id: impl Into<String>) -> RequestContext {
        RequestContext::new(session_id, self.clock.now())
    }

    /// Run one chat turn.
    pub async fn handle_chat(
        &self,
        ctx: &RequestContext,
        request: ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        self.run_chat(ctx, request)
            .instrument(ctx.span().clone())
            .await
    }

    async fn run_chat(
        &self,
        ctx: &RequestContext,
        request: ChatRequest,
    ) -> Result<ChatResponse, ChatError> {
        let mut trace = PhaseTrace::default();
        let session_id = request.session_id.as_str();
        validate_session_id(session_id)
            .map_err(|e| ChatError::from(e).with_detail("phase", ChatPhase::Received.as_str()))?;

        let code = self
            .authenticate(&request.code)
            .map_err(|e| trace.fail(e))?;
        trace.advance();

        let envelope = Envelope::from_hex(&request.encrypted_message).map_err(|e| trace.fail(e))?;
        if !request.iv.is_empty() && !request.iv.eq_ignore_ascii_case(&envelope.iv_hex()) {
            warn!("request iv differs from the envelope iv, using the envelope iv");
        }
        let user_envelope_hex = envelope.to_hex();
        let user_iv_hex = envelope.iv_hex();
        let message = {
            let code = code.clone();
            run_cipher(move || envelope.open(&code))
                .await
                .map_err(|e| trace.fail(e))?
        };
        trace.advance();

        let history = self
            .decrypt_recent(session_id, Some(self.config.history_limit), Some(code.clone()))
            .await;
        let failures = history.failures;
        trace.advance();

        let mut turns: Vec<ModelTurn> = history
            .turns
            .into_iter()
            .map(|t| ModelTurn {
                role: t.role,
                content: t.content,
            })
            .collect();
        turns.push(ModelTurn::user(message));
        let reply = self.invoke_model(&turns).await.map_err(|e| trace.fail(e))?;
        trace.advance();

        let reply_code = generate(&self.secret, epoch_at(self.now_unix())).map_err(|e| trace.fail(e))?;
        let sealed = {
            let code = reply_code.clone();
            run_cipher(move || encrypt(&reply, &code))
                .await
                .map_err(|e| trace.fail(e))?
        };
        trace.advance();

        let persist = self.config.persist_codes;
        let user_payload = StoredPayload::encrypted(
            user_envelope_hex,
            user_iv_hex,
            persist.then(|| code.as_str()),
        );
        let assistant_payload = StoredPayload::encrypted(
            sealed.envelope_hex.clone(),
            sealed.iv_hex.clone(),
            persist.then(|| reply_code.as_str()),
        );
        let user_turn = self
            .store
            .append(session_id, Role::User, &user_payload)
            .await
            .map_err(|e| trace.fail(e))?;
        self.store
            .append(session_id, Role::Assistant, &assistant_payload)
            .await
            .map_err(|e| {
                error!(
                    user_timestamp = %user_turn.timestamp,
                    error = %e,
                    "assistant turn not stored, user turn left without a reply"
                );
                trace.fail(e)
            })?;
        trace.advance();

        let response = ChatResponse {
            encrypted_response: sealed.envelope_hex,
            response_iv: sealed.iv_hex,
            code_used: reply_code.as_str().to_string(),
            session_id: request.session_id.clone(),
            decryption_failures: failures,
        };
        trace.advance();
        info!(
            elapsed_ms = ctx.elapsed_ms(self.clock.now()),
            history_turns = turns.len() - 1,
            history_failures = response.decryption_failures.len(),
            phase = trace.current().as_str(),
            "chat turn complete"
        );
        Ok(response)
    }

    /// Decrypted history of a session, oldest first. `limit` counts back from
    /// the newest turn.
    pub async fn load_history(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        code: &str,
        limit: Option<usize>,
    ) -> Result<HistoryView, ChatError> {
        async {
            validate_session_id(session_id)?;
            let code = self.authenticate(code)?;
            let history = self.decrypt_recent(session_id, limit, Some(code)).await;
            Ok::<_, ChatError>(HistoryView {
                session_id: session_id.to_string(),
                turns: history.turns,
                failures: history.failures,
            })
        }
        .instrument(ctx.span().clone())
        .await
    }

    pub async fn session_stats(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        code: &str,
    ) -> Result<SessionStats, ChatError> {
        async {
            self.authenticate(code)?;
            Ok::<_, ChatError>(self.store.stats(session_id).await?)
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Delete every turn of a session. Returns how many were removed.
    pub async fn delete_session(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        code: &str,
    ) -> Result<usize, ChatError> {
        async {
            self.authenticate(code)?;
            let deleted = self.store.delete_all(session_id).await?;
            info!(deleted, "session deleted");
            Ok::<_, ChatError>(deleted)
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// User turns that never got an assistant reply.
    pub async fn orphaned_turns(
        &self,
        ctx: &RequestContext,
        session_id: &str,
        code: &str,
    ) -> Result<Vec<Turn>, ChatError> {
        async {
            self.authenticate(code)?;
            Ok::<_, ChatError>(self.store.orphaned_user_turns(session_id).await?)
        }
        .instrument(ctx.span().clone())
        .await
    }

    /// Probe the store, the model and the cipher concurrently.
    pub async fn health(&self) -> HealthReport {
        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(StoreCheck(Arc::clone(&self.kv))),
            Arc::new(ModelCheck(Arc::clone(&self.model))),
            Arc::new(CipherCheck::new(Arc::clone(&self.secret), Arc::clone(&self.clock))),
        ];
        check_all(&checks, CHECK_TIMEOUT).await
    }

    fn now_unix(&self) -> u64 {
        unix_secs(self.clock.now())
    }

    fn authenticate(&self, code: &str) -> Result<Code, ChatError> {
        if !validate(code, &self.secret, self.now_unix()) {
            warn!("one-time code rejected");
            return Err(ChatError::authentication("Invalid or expired code"));
        }
        Code::parse(code).map_err(|e| ChatError::authentication(e.to_string()))
    }

    /// The newest `limit` turns of a session, decrypted, oldest first.
    async fn decrypt_recent(
        &self,
        session_id: &str,
        limit: Option<usize>,
        request_code: Option<Code>,
    ) -> crate::history::DecryptedHistory {
        let mut turns = self
            .store
            .query(session_id, limit, QueryOrder::Descending)
            .await;
        turns.reverse();
        let plan = CandidatePlan {
            request_code,
            now_unix: self.now_unix(),
            lookback_epochs: self.config.history_lookback_epochs,
            lookahead_epochs: self.config.history_lookahead_epochs,
        };
        decrypt_history(turns, Arc::clone(&self.secret), Arc::new(plan)).await
    }

    /// Call the model under the configured timeout, retrying transient failures.
    async fn invoke_model(&self, turns: &[ModelTurn]) -> Result<String, ModelError> {
        let timeout = self.config.model_timeout;
        self.config
            .model_retry
            .run("model", || async move {
                match tokio::time::timeout(timeout, self.model.complete(turns)).await {
                    Ok(result) => result,
                    Err(_) => Err(ModelError::new(
                        504,
                        format!("model call timed out after {} ms", timeout.as_millis()),
                    )),
                }
            })
            .await
    }
}

/// Run a key-derivation-bound cipher operation off the async workers.
async fn run_cipher<T, F>(op: F) -> Result<T, ChatError>
where
    F: FnOnce() -> Result<T, CryptoError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(result) => result.map_err(ChatError::from),
        Err(e) => Err(ChatError::new(
            ErrorKind::Encryption,
            500,
            format!("cipher task failed: {}", e),
        )),
    }
}

fn unix_secs(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}
