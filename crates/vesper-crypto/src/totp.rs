//! Time-windowed one-time codes (RFC 6238, HMAC-SHA1, 30 s step, 6 digits).
//!
//! code = HOTP(secret, floor(unix_secs / 30)) truncated to 6 decimal digits.
//! A code is accepted for the epoch it was generated in and one epoch either
//! side, which absorbs clock skew between client and server.

use std::fmt;
use std::ops::RangeInclusive;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::{Choice, ConstantTimeEq};

use crate::error::CryptoError;
use crate::secret::SharedSecret;
use crate::types::{CODE_DIGITS, CODE_SKEW_EPOCHS, CODE_STEP_SECS};

const CODE_MODULUS: u32 = 1_000_000;

/// A syntactically valid 6-digit one-time code.
///
/// `Debug` is redacted so codes do not leak into logs.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Code(String);

impl Code {
    /// Parse a code, accepting exactly six ASCII digits.
    pub fn parse(s: &str) -> Result<Self, CryptoError> {
        if s.len() != CODE_DIGITS || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CryptoError::InvalidCode {
                expected: CODE_DIGITS,
            });
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time equality.
    pub fn ct_eq(&self, other: &Code) -> bool {
        bool::from(self.0.as_bytes().ct_eq(other.0.as_bytes()))
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Code(******)")
    }
}

/// Epoch index for a Unix timestamp in seconds.
pub fn epoch_at(unix_secs: u64) -> u64 {
    unix_secs / CODE_STEP_SECS
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Epoch index for the current wall-clock time.
pub fn current_epoch() -> u64 {
    epoch_at(unix_now())
}

/// Epochs accepted around `epoch`, ordered current, previous, next.
pub fn window_epochs(epoch: u64) -> Vec<u64> {
    let mut epochs = vec![epoch];
    for offset in 1..=CODE_SKEW_EPOCHS {
        if let Some(previous) = epoch.checked_sub(offset) {
            epochs.push(previous);
        }
        epochs.push(epoch + offset);
    }
    epochs
}

/// Generate the code for `epoch`. Deterministic in (secret, epoch).
pub fn generate(secret: &SharedSecret, epoch: u64) -> Result<Code, CryptoError> {
    let value = hotp(secret.as_bytes(), epoch)?;
    Ok(Code(format!("{:0width$}", value, width = CODE_DIGITS)))
}

/// Check `code` against the candidate window around `now_unix_secs`.
///
/// Malformed input is rejected before any HMAC is computed. Every window code
/// is compared in constant time and the loop never exits early.
pub fn validate(code: &str, secret: &SharedSecret, now_unix_secs: u64) -> bool {
    let Ok(candidate) = Code::parse(code) else {
        return false;
    };

    let mut matched = Choice::from(0u8);
    for epoch in window_epochs(epoch_at(now_unix_secs)) {
        if let Ok(expected) = generate(secret, epoch) {
            matched |= expected.0.as_bytes().ct_eq(candidate.0.as_bytes());
        }
    }
    bool::from(matched)
}

/// Codes for the candidate window around `now_unix_secs`, ordered current,
/// previous, next.
pub fn candidate_window(secret: &SharedSecret, now_unix_secs: u64) -> Result<Vec<Code>, CryptoError> {
    window_epochs(epoch_at(now_unix_secs))
        .into_iter()
        .map(|epoch| generate(secret, epoch))
        .collect()
}

/// Codes for an arbitrary epoch range, newest first.
pub fn codes_for_epochs(
    secret: &SharedSecret,
    epochs: RangeInclusive<u64>,
) -> Result<Vec<Code>, CryptoError> {
    epochs.rev().map(|epoch| generate(secret, epoch)).collect()
}

/// RFC 4226 HOTP with dynamic truncation.
fn hotp(key: &[u8], counter: u64) -> Result<u32, CryptoError> {
    let mut mac = Hmac::<Sha1>::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("HMAC init failed: {}", e)))?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    Ok(binary % CODE_MODULUS)
}
