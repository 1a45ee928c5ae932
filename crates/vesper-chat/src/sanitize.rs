//! Text that leaves the service in error responses.

/// Upper bound on characters in a client-visible error message.
pub const MAX_CLIENT_MESSAGE_CHARS: usize = 200;

/// Strip control characters and cap the length of a client-side message.
pub fn client_message(message: &str) -> String {
    let mut cleaned: String = message
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_CLIENT_MESSAGE_CHARS)
        .collect();
    let trimmed_len = cleaned.trim_end().len();
    cleaned.truncate(trimmed_len);
    cleaned
}

/// Fixed message for a server-side status. Never carries internal detail.
pub fn generic_message(status: u16) -> &'static str {
    match status {
        502 => "The upstream service returned an error",
        503 => "The service is temporarily unavailable",
        504 => "The upstream service did not respond in time",
        _ => "An internal error occurred",
    }
}
