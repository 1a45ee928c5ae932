//! JSON request and response bodies.

use serde::{Deserialize, Serialize};
use vesper_store::Role;

/// Incoming chat message, encrypted by the client under `code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub session_id: String,
    pub encrypted_message: String,
    /// Duplicate of the IV embedded in `encrypted_message`. Optional; the
    /// embedded copy wins when they differ.
    #[serde(default)]
    pub iv: String,
    pub code: String,
}

/// Reply sealed under `code_used`, which the client needs to decrypt it no
/// matter how many code windows have passed since.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub encrypted_response: String,
    pub response_iv: String,
    pub code_used: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decryption_failures: Vec<HistoryFailure>,
}

/// A stored turn that could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFailure {
    /// Position in the loaded history, oldest first.
    pub index: usize,
    pub timestamp: String,
    pub role: Role,
    pub reason: String,
}

/// A stored turn in plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedTurn {
    pub timestamp: String,
    pub role: Role,
    pub content: String,
}

/// Decrypted history of a session, oldest first, with the turns that failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub session_id: String,
    pub turns: Vec<DecryptedTurn>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<HistoryFailure>,
}
