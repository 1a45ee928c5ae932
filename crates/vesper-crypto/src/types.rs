/// Length of a one-time code in ASCII digits.
pub const CODE_DIGITS: usize = 6;

/// Width of one code epoch in seconds.
pub const CODE_STEP_SECS: u64 = 30;

/// Number of neighbouring epochs accepted on either side of the current one.
pub const CODE_SKEW_EPOCHS: u64 = 1;

/// PBKDF2 salt length in bytes.
pub const SALT_LENGTH: usize = 16;

/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// PBKDF2-HMAC-SHA256 iteration count for message keys.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Header size of an envelope: salt, IV and tag, before the ciphertext.
pub const ENVELOPE_HEADER_LENGTH: usize = SALT_LENGTH + AES_GCM_IV_LENGTH + AES_GCM_TAG_LENGTH;

/// Associated data bound into every envelope.
///
/// Changing this value makes every stored envelope undecryptable.
pub const ENVELOPE_AAD: &[u8] = b"vesper:envelope:v1";
