use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Invalid one-time code: expected {expected} ASCII digits")]
    InvalidCode { expected: usize },

    #[error("Invalid Base32 secret: {0}")]
    InvalidSecret(String),

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Envelope too short: expected at least {min} bytes, got {got}")]
    EnvelopeTooShort { min: usize, got: usize },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: authentication tag mismatch")]
    TagMismatch,

    #[error("Decrypted message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Decryption failed with all {tried} candidate codes")]
    NoCandidateMatched { tried: usize },

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
