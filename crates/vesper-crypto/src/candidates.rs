//! Multi-candidate decryption.
//!
//! A stored or delayed message may have been sealed under any of several
//! codes. Callers build an ordered candidate list and `decrypt_any` tries each
//! in turn, returning the first plaintext whose tag verifies.

use crate::envelope::Envelope;
use crate::error::CryptoError;
use crate::totp::Code;

/// Ordered, de-duplicated list of candidate codes.
#[derive(Debug, Clone, Default)]
pub struct CandidateCodes {
    codes: Vec<Code>,
}

impl CandidateCodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a code unless it is already present. Earlier entries keep priority.
    pub fn push(&mut self, code: Code) -> &mut Self {
        if !self.codes.contains(&code) {
            self.codes.push(code);
        }
        self
    }

    pub fn extend<I: IntoIterator<Item = Code>>(&mut self, codes: I) -> &mut Self {
        for code in codes {
            self.push(code);
        }
        self
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn as_slice(&self) -> &[Code] {
        &self.codes
    }
}

/// Try each candidate in order and return the first successful decryption.
///
/// The envelope is parsed once; parse errors are returned as-is since no
/// candidate could succeed. If every candidate fails, a single
/// `NoCandidateMatched` error is returned without saying which came closest.
pub fn decrypt_any(envelope_hex: &str, candidates: &[Code]) -> Result<String, CryptoError> {
    let envelope = Envelope::from_hex(envelope_hex)?;
    for code in candidates {
        if let Ok(plaintext) = envelope.open(code) {
            return Ok(plaintext);
        }
    }
    Err(CryptoError::NoCandidateMatched {
        tried: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::encrypt;

    fn code(s: &str) -> Code {
        Code::parse(s).unwrap()
    }

    #[test]
    fn first_matching_candidate_wins() {
        let sealed = encrypt("late delivery", &code("222222")).unwrap();
        let candidates = [code("111111"), code("222222"), code("333333")];
        assert_eq!(
            decrypt_any(&sealed.envelope_hex, &candidates).unwrap(),
            "late delivery"
        );
    }

    #[test]
    fn aggregated_failure_when_nothing_matches() {
        let sealed = encrypt("secret", &code("999999")).unwrap();
        let candidates = [code("111111"), code("222222")];
        let err = decrypt_any(&sealed.envelope_hex, &candidates).unwrap_err();
        assert!(matches!(err, CryptoError::NoCandidateMatched { tried: 2 }));
        assert_eq!(err.to_string(), "Decryption failed with all 2 candidate codes");
    }

    #[test]
    fn empty_candidate_list_fails() {
        let sealed = encrypt("secret", &code("999999")).unwrap();
        let err = decrypt_any(&sealed.envelope_hex, &[]).unwrap_err();
        assert!(matches!(err, CryptoError::NoCandidateMatched { tried: 0 }));
    }

    #[test]
    fn malformed_envelope_fails_before_trying_candidates() {
        let err = decrypt_any("abcd", &[code("111111")]).unwrap_err();
        assert!(matches!(err, CryptoError::EnvelopeTooShort { .. }));
    }

    #[test]
    fn candidate_codes_deduplicate_and_keep_order() {
        let mut candidates = CandidateCodes::new();
        candidates
            .push(code("111111"))
            .push(code("222222"))
            .push(code("111111"));
        candidates.extend([code("333333"), code("222222")]);
        let order: Vec<&str> = candidates.as_slice().iter().map(Code::as_str).collect();
        assert_eq!(order, ["111111", "222222", "333333"]);
        assert_eq!(candidates.len(), 3);
        assert!(!candidates.is_empty());
    }
}
