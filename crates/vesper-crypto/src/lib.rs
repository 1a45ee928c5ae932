//! One-time codes and message envelopes.
//!
//! Codes rotate every 30 seconds from a shared Base32 secret. Each message is
//! sealed with AES-256-GCM under a key derived from a code and a fresh salt.

pub mod base32;
pub mod candidates;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod secret;
pub mod totp;
pub mod types;

pub use base32::{base32_decode, base32_encode};
pub use candidates::{decrypt_any, CandidateCodes};
pub use envelope::{decrypt, encrypt, generate_iv, Envelope, Sealed};
pub use error::CryptoError;
pub use kdf::{derive_message_key, generate_salt};
pub use secret::SharedSecret;
pub use totp::{
    candidate_window, codes_for_epochs, current_epoch, epoch_at, generate, unix_now, validate,
    window_epochs, Code,
};
pub use types::{
    AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, CODE_DIGITS, CODE_SKEW_EPOCHS,
    CODE_STEP_SECS, ENVELOPE_AAD, ENVELOPE_HEADER_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH,
};
