//! AES-256-GCM message envelopes keyed by one-time codes.
//!
//! Wire format (hex-encoded for transport and storage):
//! [16 bytes: salt][12 bytes: IV][16 bytes: tag][N bytes: ciphertext]
//!
//! Every envelope carries its own salt, so each message is sealed under a
//! fresh key even when many messages share a code.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::kdf::{derive_message_key, generate_salt};
use crate::totp::Code;
use crate::types::{
    AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, ENVELOPE_AAD, ENVELOPE_HEADER_LENGTH,
    SALT_LENGTH,
};

/// Parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub salt: [u8; SALT_LENGTH],
    pub iv: [u8; AES_GCM_IV_LENGTH],
    pub tag: [u8; AES_GCM_TAG_LENGTH],
    pub ciphertext: Vec<u8>,
}

/// Result of sealing a message.
///
/// `iv_hex` duplicates the IV embedded in `envelope_hex` for clients that
/// expect it as a separate field. The embedded copy is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub envelope_hex: String,
    pub iv_hex: String,
}

impl Envelope {
    /// Parse raw envelope bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < ENVELOPE_HEADER_LENGTH {
            return Err(CryptoError::EnvelopeTooShort {
                min: ENVELOPE_HEADER_LENGTH,
                got: bytes.len(),
            });
        }
        let (salt, rest) = bytes.split_at(SALT_LENGTH);
        let (iv, rest) = rest.split_at(AES_GCM_IV_LENGTH);
        let (tag, ciphertext) = rest.split_at(AES_GCM_TAG_LENGTH);

        let mut envelope = Self {
            salt: [0u8; SALT_LENGTH],
            iv: [0u8; AES_GCM_IV_LENGTH],
            tag: [0u8; AES_GCM_TAG_LENGTH],
            ciphertext: ciphertext.to_vec(),
        };
        envelope.salt.copy_from_slice(salt);
        envelope.iv.copy_from_slice(iv);
        envelope.tag.copy_from_slice(tag);
        Ok(envelope)
    }

    /// Parse a hex-encoded envelope. Either hex case is accepted.
    pub fn from_hex(envelope_hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(envelope_hex.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ENVELOPE_HEADER_LENGTH + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Lower-case hex encoding of the envelope.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn iv_hex(&self) -> String {
        hex::encode(self.iv)
    }

    /// Open the envelope with a code, re-deriving the key from the embedded salt.
    pub fn open(&self, code: &Code) -> Result<String, CryptoError> {
        let key = derive_message_key(code, &self.salt)?;
        self.open_with_key(&key)
    }

    pub(crate) fn open_with_key(&self, key: &[u8; AES_KEY_LENGTH]) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        })?;
        let mut buffer = self.ciphertext.clone();
        cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&self.iv),
                ENVELOPE_AAD,
                &mut buffer,
                Tag::from_slice(&self.tag),
            )
            .map_err(|_| {
                buffer.zeroize();
                CryptoError::TagMismatch
            })?;

        String::from_utf8(buffer).map_err(|e| {
            e.into_bytes().zeroize();
            CryptoError::InvalidUtf8
        })
    }
}

/// Generate a random 12-byte IV for AES-GCM.
pub fn generate_iv() -> Result<[u8; AES_GCM_IV_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// Encrypt a message under a key derived from `code` and a fresh salt.
pub fn encrypt(plaintext: &str, code: &Code) -> Result<Sealed, CryptoError> {
    let salt = generate_salt()?;
    let key = derive_message_key(code, &salt)?;
    let iv = generate_iv()?;
    let envelope = seal_with_key(plaintext.as_bytes(), &key, salt, iv)?;
    Ok(Sealed {
        envelope_hex: envelope.to_hex(),
        iv_hex: envelope.iv_hex(),
    })
}

/// Decrypt a hex envelope with a single code.
///
/// Fails on malformed hex, short envelopes and tag mismatch. Plaintext is
/// never returned unless the tag verifies.
pub fn decrypt(envelope_hex: &str, code: &Code) -> Result<String, CryptoError> {
    Envelope::from_hex(envelope_hex)?.open(code)
}

fn seal_with_key(
    plaintext: &[u8],
    key: &[u8; AES_KEY_LENGTH],
    salt: [u8; SALT_LENGTH],
    iv: [u8; AES_GCM_IV_LENGTH],
) -> Result<Envelope, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), ENVELOPE_AAD, &mut buffer)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut tag_bytes = [0u8; AES_GCM_TAG_LENGTH];
    tag_bytes.copy_from_slice(&tag);
    Ok(Envelope {
        salt,
        iv,
        tag: tag_bytes,
        ciphertext: buffer,
    })
}
