//! ConversationStore: append-only encrypted turn log per session.
//!
//! Each turn is one key-value item: partition = session id, sort = timestamp.
//! Uniqueness of (session, timestamp) is enforced by the store's conditional
//! put; two writers that land on the same millisecond both succeed because
//! the loser retries once in a microsecond slot after the newest key of that
//! millisecond.
//!
//! Reads favour availability: `query` logs and returns an empty log on store
//! failure. Writes propagate every error.

use std::sync::Arc;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{KvError, StoreError};
use crate::kv::{KeyValueStore, KvItem};
use crate::memory::MAX_BATCH_DELETE;
use crate::payload::StoredPayload;
use crate::retry::RetryPolicy;
use crate::turn::{QueryOrder, Role, SessionStats, Turn};

/// Default number of turns returned by `query`.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Hard cap on turns returned by one `query` and scanned by `stats`.
pub const MAX_QUERY_LIMIT: usize = 1_000;

/// Maximum session id length in bytes.
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// Page size when scanning a session for deletion.
const DELETE_SCAN_PAGE: usize = 100;

/// Spread of the collision retry slot past the newest taken microsecond.
const RETRY_SLOT_JITTER: u16 = 8;

/// Options for `ConversationStore`.
#[derive(Debug, Clone)]
pub struct ConversationStoreOptions {
    /// How long a turn lives before it expires (default: 30 days).
    pub turn_ttl: Duration,
    /// Retry policy for transient store failures.
    pub retry: RetryPolicy,
    /// A trailing user turn younger than this is still waiting for its reply
    /// and is not reported as orphaned (default: 5 minutes).
    pub orphan_grace: Duration,
}

impl Default for ConversationStoreOptions {
    fn default() -> Self {
        Self {
            turn_ttl: Duration::days(30),
            retry: RetryPolicy::default(),
            orphan_grace: Duration::minutes(5),
        }
    }
}

pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    options: ConversationStoreOptions,
}

impl ConversationStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        options: ConversationStoreOptions,
    ) -> Self {
        Self { kv, clock, options }
    }

    pub fn options(&self) -> &ConversationStoreOptions {
        &self.options
    }

    /// Append a turn with a server-generated timestamp.
    ///
    /// On a timestamp collision the write is retried once in the same
    /// millisecond, after the newest key already stored there, so turns read
    /// back in append order. A second collision, or a millisecond with no free
    /// slot, is returned as `StoreError::Collision`.
    pub async fn append(
        &self,
        session_id: &str,
        role: Role,
        payload: &StoredPayload,
    ) -> Result<Turn, StoreError> {
        validate_session_id(session_id)?;

        let now = self.clock.now();
        let mut turn = Turn {
            session_id: session_id.to_string(),
            timestamp: format_timestamp(now.trunc_subsecs(3)),
            role,
            payload: payload.encode(),
            expires_at: (now + self.options.turn_ttl).timestamp(),
        };

        match self.put_turn(&turn).await {
            Ok(()) => {}
            Err(KvError::Conflict { .. }) => {
                let newest = self
                    .options
                    .retry
                    .run("append_newest", || self.kv.query_partition(session_id, 1, false))
                    .await?;
                let newest_sort = newest.first().map(|item| item.sort.as_str());
                let Some(retry_timestamp) = next_slot(now, newest_sort, random_u16()) else {
                    return Err(StoreError::Collision {
                        session_id: session_id.to_string(),
                        timestamp: turn.timestamp,
                    });
                };
                debug!(
                    session_id,
                    collided = %turn.timestamp,
                    retry = %retry_timestamp,
                    "timestamp collision, retrying append"
                );
                turn.timestamp = retry_timestamp;
                match self.put_turn(&turn).await {
                    Ok(()) => {}
                    Err(KvError::Conflict { .. }) => {
                        return Err(StoreError::Collision {
                            session_id: session_id.to_string(),
                            timestamp: turn.timestamp,
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }

        debug!(session_id, role = %role, timestamp = %turn.timestamp, "turn appended");
        Ok(turn)
    }

    /// Turns of a session, oldest first by default.
    ///
    /// `limit` defaults to 100 and is clamped to 1..=1000. Store failures
    /// degrade to an empty result.
    pub async fn query(
        &self,
        session_id: &str,
        limit: Option<usize>,
        order: QueryOrder,
    ) -> Vec<Turn> {
        match self.try_query(session_id, limit, order).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(session_id, error = %e, "history query failed, returning empty history");
                Vec::new()
            }
        }
    }

    /// Strict variant of `query` that propagates store failures.
    pub async fn try_query(
        &self,
        session_id: &str,
        limit: Option<usize>,
        order: QueryOrder,
    ) -> Result<Vec<Turn>, StoreError> {
        validate_session_id(session_id)?;
        let limit = clamp_limit(limit);
        let ascending = order == QueryOrder::Ascending;
        let now = self.clock.unix_secs();

        // Expired items are not evicted immediately, so one page may come back
        // short after filtering. Widen the page once to make up the difference.
        let mut fetch = limit;
        loop {
            let items = self
                .options
                .retry
                .run("query", || self.kv.query_partition(session_id, fetch, ascending))
                .await?;
            let fetched = items.len();
            let turns: Vec<Turn> = decode_items(items)
                .into_iter()
                .filter(|t| !t.is_expired_at(now))
                .collect();

            let short_by = limit.saturating_sub(turns.len());
            if short_by == 0 || fetched < fetch || fetch >= MAX_QUERY_LIMIT {
                return Ok(turns.into_iter().take(limit).collect());
            }
            fetch = (fetch + short_by).min(MAX_QUERY_LIMIT);
        }
    }

    /// Counts and sizes over at most 1000 turns. Larger sessions are flagged
    /// `truncated`.
    pub async fn stats(&self, session_id: &str) -> Result<SessionStats, StoreError> {
        validate_session_id(session_id)?;
        let now = self.clock.unix_secs();
        let items = self
            .options
            .retry
            .run("stats", || self.kv.scan_partition(session_id, MAX_QUERY_LIMIT + 1))
            .await?;
        let truncated = items.len() > MAX_QUERY_LIMIT;
        let items: Vec<KvItem> = items.into_iter().take(MAX_QUERY_LIMIT).collect();

        let mut turns: Vec<Turn> = decode_items(items)
            .into_iter()
            .filter(|t| !t.is_expired_at(now))
            .collect();
        turns.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut stats = SessionStats {
            session_id: session_id.to_string(),
            truncated,
            ..Default::default()
        };
        for turn in &turns {
            match turn.role {
                Role::User => stats.user_messages += 1,
                Role::Assistant => stats.assistant_messages += 1,
            }
            stats.total_content_length += turn.payload.len();
        }
        stats.total_messages = turns.len();
        if stats.total_messages > 0 {
            stats.average_content_length =
                stats.total_content_length as f64 / stats.total_messages as f64;
        }
        stats.first_timestamp = turns.first().map(|t| t.timestamp.clone());
        stats.last_timestamp = turns.last().map(|t| t.timestamp.clone());
        Ok(stats)
    }

    /// Remove every turn of a session. Idempotent; returns 0 for an absent session.
    pub async fn delete_all(&self, session_id: &str) -> Result<usize, StoreError> {
        validate_session_id(session_id)?;
        let mut deleted = 0;
        loop {
            let items = self
                .options
                .retry
                .run("delete_scan", || self.kv.scan_partition(session_id, DELETE_SCAN_PAGE))
                .await?;
            if items.is_empty() {
                break;
            }
            let keys: Vec<String> = items.into_iter().map(|i| i.sort).collect();
            let removed = self.delete_keys(session_id, &keys).await?;
            deleted += removed;
            if removed == 0 {
                // Another writer raced us; whatever remains is theirs to delete.
                break;
            }
        }
        debug!(session_id, deleted, "session deleted");
        Ok(deleted)
    }

    /// User turns that never received an assistant reply.
    ///
    /// The user and assistant turns of one exchange are written by two
    /// separate appends, so a crash in between leaves the user turn behind. A
    /// trailing user turn within the grace period is still in flight and is
    /// not reported. Only the newest 1000 turns are examined.
    pub async fn orphaned_user_turns(&self, session_id: &str) -> Result<Vec<Turn>, StoreError> {
        let mut turns = self
            .try_query(session_id, Some(MAX_QUERY_LIMIT), QueryOrder::Descending)
            .await?;
        turns.reverse();
        let grace_cutoff = self.clock.now() - self.options.orphan_grace;

        let mut orphans = Vec::new();
        for (i, turn) in turns.iter().enumerate() {
            if turn.role != Role::User {
                continue;
            }
            match turns.get(i + 1) {
                Some(next) if next.role == Role::Assistant => {}
                Some(_) => orphans.push(turn.clone()),
                None => {
                    let settled = turn.written_at().map_or(true, |at| at < grace_cutoff);
                    if settled {
                        orphans.push(turn.clone());
                    }
                }
            }
        }
        Ok(orphans)
    }

    /// Delete turns whose expiry has passed but which the store still holds.
    pub async fn purge_expired(&self, session_id: &str) -> Result<usize, StoreError> {
        validate_session_id(session_id)?;
        let now = self.clock.unix_secs();
        let items = self
            .options
            .retry
            .run("purge_scan", || self.kv.scan_partition(session_id, MAX_QUERY_LIMIT))
            .await?;
        let expired: Vec<String> = items
            .into_iter()
            .filter(|i| i.expires_at.is_some_and(|at| at <= now))
            .map(|i| i.sort)
            .collect();
        if expired.is_empty() {
            return Ok(0);
        }
        let purged = self.delete_keys(session_id, &expired).await?;
        debug!(session_id, purged, "expired turns purged");
        Ok(purged)
    }

    async fn put_turn(&self, turn: &Turn) -> Result<(), KvError> {
        let body = serde_json::to_value(turn)
            .map_err(|e| KvError::Validation(format!("turn serialization: {}", e)))?;
        let item = KvItem {
            partition: turn.session_id.clone(),
            sort: turn.timestamp.clone(),
            body,
            expires_at: Some(turn.expires_at),
        };
        self.options
            .retry
            .run("append", || self.kv.put_if_absent(item.clone()))
            .await
    }

    async fn delete_keys(&self, session_id: &str, keys: &[String]) -> Result<usize, StoreError> {
        let mut removed = 0;
        for chunk in keys.chunks(MAX_BATCH_DELETE) {
            removed += self
                .options
                .retry
                .run("batch_delete", || self.kv.batch_delete(session_id, chunk))
                .await?;
        }
        Ok(removed)
    }
}

/// RFC 3339 UTC with exactly six fractional digits.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Timestamp in the same millisecond as `at`, after the newest taken slot.
///
/// `newest_sort` is the partition's greatest sort key. When it falls in the
/// same millisecond its microseconds are taken as occupied; otherwise slot 0 is
/// the only one taken. `jitter` spreads concurrent retries over a few slots.
/// Returns `None` once the millisecond has no free slot left.
fn next_slot(at: DateTime<Utc>, newest_sort: Option<&str>, jitter: u16) -> Option<String> {
    let base = at.trunc_subsecs(3);
    let aligned = format_timestamp(base);
    let millis_prefix = &aligned[..aligned.len() - 4];
    let taken = newest_sort
        .and_then(|sort| sort.strip_prefix(millis_prefix))
        .and_then(|rest| rest.strip_suffix('Z'))
        .and_then(|micros| micros.parse::<u16>().ok())
        .unwrap_or(0);
    if taken >= 999 {
        return None;
    }
    let micros = (taken + 1 + jitter % RETRY_SLOT_JITTER).min(999);
    Some(format_timestamp(base + Duration::microseconds(i64::from(micros))))
}

fn random_u16() -> u16 {
    let mut bytes = [0u8; 2];
    if getrandom::getrandom(&mut bytes).is_err() {
        let nanos = Utc::now().timestamp_subsec_nanos();
        return (nanos % u32::from(u16::MAX)) as u16;
    }
    u16::from_be_bytes(bytes)
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT)
}

/// Session ids are non-empty printable text of at most 128 bytes.
pub fn validate_session_id(session_id: &str) -> Result<(), StoreError> {
    if session_id.is_empty() {
        return Err(StoreError::InvalidSessionId("must not be empty".to_string()));
    }
    if session_id.len() > MAX_SESSION_ID_LENGTH {
        return Err(StoreError::InvalidSessionId(format!(
            "longer than {} bytes",
            MAX_SESSION_ID_LENGTH
        )));
    }
    if session_id.chars().any(char::is_control) {
        return Err(StoreError::InvalidSessionId(
            "contains control characters".to_string(),
        ));
    }
    Ok(())
}

/// Decode stored items, skipping any that do not hold a turn.
fn decode_items(items: Vec<KvItem>) -> Vec<Turn> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Turn>(item.body) {
            Ok(turn) => Some(turn),
            Err(e) => {
                warn!(partition = %item.partition, sort = %item.sort, error = %e, "skipping undecodable turn");
                None
            }
        })
        .collect()
}
