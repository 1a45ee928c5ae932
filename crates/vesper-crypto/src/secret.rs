//! Deployment-wide shared secret for one-time codes.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::base32::base32_decode;
use crate::error::CryptoError;

/// Minimum decoded secret length. RFC 4226 requires at least 128 bits.
pub const MIN_SECRET_LENGTH: usize = 10;

/// Decoded shared secret. Read-only after construction and wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    key: Vec<u8>,
}

impl SharedSecret {
    /// Parse a Base32 secret as distributed to authenticator apps.
    pub fn from_base32(encoded: &str) -> Result<Self, CryptoError> {
        let key = base32_decode(encoded)?;
        Self::from_bytes(key)
    }

    /// Wrap raw secret bytes.
    pub fn from_bytes(key: Vec<u8>) -> Result<Self, CryptoError> {
        if key.len() < MIN_SECRET_LENGTH {
            return Err(CryptoError::InvalidSecret(format!(
                "decoded secret is {} bytes, need at least {}",
                key.len(),
                MIN_SECRET_LENGTH
            )));
        }
        Ok(Self { key })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("len", &self.key.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base32_secret() {
        let secret = SharedSecret::from_base32("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        assert_eq!(secret.as_bytes(), b"12345678901234567890");
    }

    #[test]
    fn rejects_short_secret() {
        let err = SharedSecret::from_base32("MFRA").unwrap_err();
        assert!(err.to_string().contains("at least"));
    }

    #[test]
    fn rejects_malformed_secret() {
        assert!(SharedSecret::from_base32("not base32!").is_err());
    }

    #[test]
    fn debug_redacts_key_material() {
        let secret = SharedSecret::from_base32("JBSWY3DPEHPK3PXP").unwrap();
        let printed = format!("{:?}", secret);
        assert!(printed.contains("len: 10"));
        assert!(!printed.contains("72"));
    }
}
