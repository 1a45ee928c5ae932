//! Vesper store: append-only, per-session conversation log over a
//! conditional-put key-value backend.

pub mod clock;
pub mod conversation;
pub mod error;
pub mod kv;
pub mod memory;
pub mod payload;
pub mod retry;
pub mod turn;

pub use clock::{Clock, FixedClock, SystemClock};
pub use conversation::{
    format_timestamp, validate_session_id, ConversationStore, ConversationStoreOptions,
    DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT, MAX_SESSION_ID_LENGTH,
};
pub use error::{KvError, StoreError};
pub use kv::{KeyValueStore, KvItem};
pub use memory::{MemoryKv, MAX_BATCH_DELETE};
pub use payload::{StoredPayload, ENCRYPTED_PREFIX};
pub use retry::{RetryPolicy, Retryable};
pub use turn::{QueryOrder, Role, SessionStats, Turn};
