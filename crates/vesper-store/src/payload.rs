//! Persisted payload text format.
//!
//! Encrypted: `ENCRYPTED:{envelopeHex}:{ivHex}` or
//!            `ENCRYPTED:{envelopeHex}:{ivHex}:{codeHex}`
//! Legacy:    any text without the prefix (stored before encryption existed).
//!
//! `codeHex` is the hex of the code's ASCII digits. It is only present on
//! payloads written with code persistence enabled.

use crate::error::StoreError;

pub const ENCRYPTED_PREFIX: &str = "ENCRYPTED:";

const CODE_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredPayload {
    Encrypted {
        envelope_hex: String,
        iv_hex: String,
        code: Option<String>,
    },
    Legacy(String),
}

impl StoredPayload {
    pub fn encrypted(
        envelope_hex: impl Into<String>,
        iv_hex: impl Into<String>,
        code: Option<&str>,
    ) -> Self {
        StoredPayload::Encrypted {
            envelope_hex: envelope_hex.into(),
            iv_hex: iv_hex.into(),
            code: code.map(str::to_string),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredPayload::Encrypted { .. })
    }

    /// Render to the persisted text form.
    pub fn encode(&self) -> String {
        match self {
            StoredPayload::Encrypted {
                envelope_hex,
                iv_hex,
                code: Some(code),
            } => format!(
                "{}{}:{}:{}",
                ENCRYPTED_PREFIX,
                envelope_hex,
                iv_hex,
                hex::encode(code.as_bytes())
            ),
            StoredPayload::Encrypted {
                envelope_hex,
                iv_hex,
                code: None,
            } => format!("{}{}:{}", ENCRYPTED_PREFIX, envelope_hex, iv_hex),
            StoredPayload::Legacy(text) => text.clone(),
        }
    }

    /// Parse persisted text. A prefixed payload that does not follow the
    /// format is an error, never a fallback to plaintext.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let Some(body) = raw.strip_prefix(ENCRYPTED_PREFIX) else {
            return Ok(StoredPayload::Legacy(raw.to_string()));
        };

        let parts: Vec<&str> = body.split(':').collect();
        let (envelope_hex, iv_hex, code_hex) = match parts.as_slice() {
            [envelope, iv] => (*envelope, *iv, None),
            [envelope, iv, code] => (*envelope, *iv, Some(*code)),
            _ => {
                return Err(StoreError::InvalidPayload(format!(
                    "expected 2 or 3 fields after prefix, got {}",
                    parts.len()
                )))
            }
        };

        check_hex("envelope", envelope_hex)?;
        check_hex("iv", iv_hex)?;
        let code = code_hex.map(decode_code).transpose()?;

        Ok(StoredPayload::Encrypted {
            envelope_hex: envelope_hex.to_string(),
            iv_hex: iv_hex.to_string(),
            code,
        })
    }
}

fn check_hex(field: &str, value: &str) -> Result<(), StoreError> {
    if value.is_empty() || value.len() % 2 != 0 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(StoreError::InvalidPayload(format!("{} field is not hex", field)));
    }
    Ok(())
}

fn decode_code(code_hex: &str) -> Result<String, StoreError> {
    check_hex("code", code_hex)?;
    let bytes =
        hex::decode(code_hex).map_err(|e| StoreError::InvalidPayload(format!("code field: {}", e)))?;
    if bytes.len() != CODE_DIGITS || !bytes.iter().all(u8::is_ascii_digit) {
        return Err(StoreError::InvalidPayload(
            "code field does not hold six digits".to_string(),
        ));
    }
    // All bytes are ASCII digits, so this cannot fail.
    String::from_utf8(bytes).map_err(|e| StoreError::InvalidPayload(e.to_string()))
}
