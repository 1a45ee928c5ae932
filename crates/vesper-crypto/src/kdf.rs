//! PBKDF2-HMAC-SHA256 message key derivation.
//!
//! key = PBKDF2-HMAC-SHA256(password = code digits, salt = 16 random bytes, 100_000 rounds)

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::totp::Code;
use crate::types::{AES_KEY_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH};

/// Derive a 256-bit message key from a one-time code and a salt.
///
/// # Arguments
/// * `code` - One-time code the message is bound to
/// * `salt` - Per-message random salt (16 bytes)
///
/// # Returns
/// 32-byte key, wiped when dropped
pub fn derive_message_key(
    code: &Code,
    salt: &[u8],
) -> Result<Zeroizing<[u8; AES_KEY_LENGTH]>, CryptoError> {
    if salt.len() != SALT_LENGTH {
        return Err(CryptoError::KeyDerivationFailed(format!(
            "salt must be {} bytes, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }
    let mut key = Zeroizing::new([0u8; AES_KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(code.as_str().as_bytes(), salt, PBKDF2_ITERATIONS, &mut *key);
    Ok(key)
}

/// Generate a random salt for one message.
pub fn generate_salt() -> Result<[u8; SALT_LENGTH], CryptoError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(salt)
}
