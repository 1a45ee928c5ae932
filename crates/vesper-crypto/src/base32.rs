use data_encoding::BASE32_NOPAD;

use crate::error::CryptoError;

/// Base32 (RFC 4648) encode bytes without padding.
pub fn base32_encode(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data)
}

/// Base32 decode a string to bytes.
///
/// Authenticator apps print secrets in groups and sometimes lower-case, so
/// whitespace, hyphens and `=` padding are dropped and letters upper-cased first.
pub fn base32_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    let normalized: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| CryptoError::InvalidSecret(e.to_string()))
}
