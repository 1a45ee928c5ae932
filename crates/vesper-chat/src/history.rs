//! Parallel decryption of stored turns.
//!
//! Key derivation is CPU-bound, so each turn is opened on the blocking pool.
//! Results are collected in input order regardless of completion order, and a
//! turn that fails to open is reported rather than failing the batch.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};
use vesper_crypto::{
    candidate_window, codes_for_epochs, decrypt_any, epoch_at, CandidateCodes, Code, CryptoError,
    SharedSecret, CODE_SKEW_EPOCHS,
};
use vesper_store::{StoredPayload, Turn};

use crate::wire::{DecryptedTurn, HistoryFailure};

/// Which codes to try for stored turns.
#[derive(Debug, Clone)]
pub struct CandidatePlan {
    /// Code the caller just authenticated with.
    pub request_code: Option<Code>,
    /// Unix seconds at which the history is being read.
    pub now_unix: u64,
    pub lookback_epochs: u64,
    pub lookahead_epochs: u64,
}

impl CandidatePlan {
    /// Candidates for one turn, most likely first.
    ///
    /// The code recorded with the payload always leads. A turn written inside
    /// the current window is tried with the request code and the current
    /// window next; an older turn goes straight to the window around its own
    /// write time, since the current codes cannot open it.
    pub fn candidates_for(
        &self,
        secret: &SharedSecret,
        turn: &Turn,
        recorded: Option<&str>,
    ) -> Result<CandidateCodes, CryptoError> {
        let mut candidates = CandidateCodes::new();
        if let Some(code) = recorded.and_then(|c| Code::parse(c).ok()) {
            candidates.push(code);
        }

        let written_unix = turn
            .written_at()
            .map(|written| u64::try_from(written.timestamp()).unwrap_or(0));
        let stale = written_unix.is_some_and(|written| {
            epoch_at(written).abs_diff(epoch_at(self.now_unix)) > CODE_SKEW_EPOCHS
        });

        if stale {
            if let Some(written) = written_unix {
                self.extend_write_time(&mut candidates, secret, written)?;
            }
        }
        if let Some(code) = &self.request_code {
            candidates.push(code.clone());
        }
        candidates.extend(candidate_window(secret, self.now_unix)?);
        if !stale {
            if let Some(written) = written_unix {
                self.extend_write_time(&mut candidates, secret, written)?;
            }
        }
        Ok(candidates)
    }

    fn extend_write_time(
        &self,
        candidates: &mut CandidateCodes,
        secret: &SharedSecret,
        written_unix: u64,
    ) -> Result<(), CryptoError> {
        let epoch = epoch_at(written_unix);
        candidates.extend(candidate_window(secret, written_unix)?);
        let first = epoch.saturating_sub(self.lookback_epochs);
        let last = epoch.saturating_add(self.lookahead_epochs);
        candidates.extend(codes_for_epochs(secret, first..=last)?);
        Ok(())
    }
}

/// Outcome of decrypting a batch of turns.
#[derive(Debug, Clone, Default)]
pub struct DecryptedHistory {
    pub turns: Vec<DecryptedTurn>,
    pub failures: Vec<HistoryFailure>,
}

enum Opened {
    Turn(DecryptedTurn),
    Failed(HistoryFailure),
}

/// Decrypt `turns` concurrently, preserving their order.
pub async fn decrypt_history(
    turns: Vec<Turn>,
    secret: Arc<SharedSecret>,
    plan: Arc<CandidatePlan>,
) -> DecryptedHistory {
    let total = turns.len();
    let tasks = turns.into_iter().enumerate().map(|(index, turn)| {
        let secret = Arc::clone(&secret);
        let plan = Arc::clone(&plan);
        let timestamp = turn.timestamp.clone();
        let role = turn.role;
        let handle = tokio::task::spawn_blocking(move || open_turn(index, &turn, &secret, &plan));
        async move {
            match handle.await {
                Ok(opened) => opened,
                Err(e) => Opened::Failed(HistoryFailure {
                    index,
                    timestamp,
                    role,
                    reason: format!("decryption task failed: {}", e),
                }),
            }
        }
    });

    let mut history = DecryptedHistory::default();
    for opened in join_all(tasks).await {
        match opened {
            Opened::Turn(turn) => history.turns.push(turn),
            Opened::Failed(failure) => {
                warn!(
                    index = failure.index,
                    timestamp = %failure.timestamp,
                    role = %failure.role,
                    reason = %failure.reason,
                    "history turn could not be decrypted"
                );
                history.failures.push(failure);
            }
        }
    }
    debug!(
        total,
        decrypted = history.turns.len(),
        failed = history.failures.len(),
        "history decrypted"
    );
    history
}

fn open_turn(index: usize, turn: &Turn, secret: &SharedSecret, plan: &CandidatePlan) -> Opened {
    let fail = |reason: String| {
        Opened::Failed(HistoryFailure {
            index,
            timestamp: turn.timestamp.clone(),
            role: turn.role,
            reason,
        })
    };

    let payload = match turn.parsed_payload() {
        Ok(payload) => payload,
        Err(e) => return fail(e.to_string()),
    };
    let (envelope_hex, recorded) = match &payload {
        StoredPayload::Legacy(text) => {
            return Opened::Turn(DecryptedTurn {
                timestamp: turn.timestamp.clone(),
                role: turn.role,
                content: text.clone(),
            });
        }
        StoredPayload::Encrypted {
            envelope_hex, code, ..
        } => (envelope_hex, code.as_deref()),
    };

    let candidates = match plan.candidates_for(secret, turn, recorded) {
        Ok(candidates) => candidates,
        Err(e) => return fail(e.to_string()),
    };
    match decrypt_any(envelope_hex, candidates.as_slice()) {
        Ok(content) => Opened::Turn(DecryptedTurn {
            timestamp: turn.timestamp.clone(),
            role: turn.role,
            content,
        }),
        Err(e) => fail(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_crypto::{encrypt, generate};
    use vesper_store::Role;

    const SECRET: &str = "JBSWY3DPEHPK3PXP7WQ6NZXVQ7AFKLMN";
    // 2026-10-19T12:00:00Z
    const T0: u64 = 1_792_411_200;

    fn secret() -> SharedSecret {
        SharedSecret::from_base32(SECRET).unwrap()
    }

    fn turn(timestamp: &str, role: Role, payload: &StoredPayload) -> Turn {
        Turn {
            session_id: "s1".to_string(),
            timestamp: timestamp.to_string(),
            role,
            payload: payload.encode(),
            expires_at: i64::MAX,
        }
    }

    fn plan(now_unix: u64, request_code: Option<Code>) -> CandidatePlan {
        CandidatePlan {
            request_code,
            now_unix,
            lookback_epochs: 4,
            lookahead_epochs: 1,
        }
    }

    #[test]
    fn recent_turns_try_request_code_and_current_window_first() {
        let secret = secret();
        let recorded = generate(&secret, 7).unwrap();
        let request = generate(&secret, epoch_at(T0)).unwrap();
        let t = turn(
            "2026-10-19T12:00:00.000000Z",
            Role::User,
            &StoredPayload::Legacy(String::new()),
        );
        let candidates = plan(T0 + 30, Some(request.clone()))
            .candidates_for(&secret, &t, Some(recorded.as_str()))
            .unwrap();
        let codes = candidates.as_slice();
        assert_eq!(codes[0], recorded);
        assert_eq!(codes[1], request);
        assert_eq!(codes[2], generate(&secret, epoch_at(T0 + 30)).unwrap());
        assert!(codes.contains(&generate(&secret, epoch_at(T0) - 4).unwrap()));
    }

    #[test]
    fn old_turns_try_write_time_window_before_current_codes() {
        let secret = secret();
        let recorded = generate(&secret, 7).unwrap();
        let request = generate(&secret, epoch_at(T0 + 3_600)).unwrap();
        let t = turn(
            "2026-10-19T12:00:00.000000Z",
            Role::User,
            &StoredPayload::Legacy(String::new()),
        );
        let candidates = plan(T0 + 3_600, Some(request.clone()))
            .candidates_for(&secret, &t, Some(recorded.as_str()))
            .unwrap();
        let codes = candidates.as_slice();
        assert_eq!(codes[0], recorded);
        assert_eq!(codes[1], generate(&secret, epoch_at(T0)).unwrap());
        assert_eq!(codes[2], generate(&secret, epoch_at(T0) - 1).unwrap());
        assert_eq!(codes[3], generate(&secret, epoch_at(T0) + 1).unwrap());
        let request_at = codes.iter().position(|c| *c == request).unwrap();
        let write_range_end = codes
            .iter()
            .position(|c| *c == generate(&secret, epoch_at(T0) - 4).unwrap())
            .unwrap();
        assert!(write_range_end < request_at);
        assert!(!codes.contains(&generate(&secret, epoch_at(T0) - 5).unwrap()));
    }

    #[tokio::test]
    async fn recorded_code_opens_turns_outside_every_window() {
        let secret = secret();
        // Far from both the read time and the write time.
        let far_code = generate(&secret, 12_345).unwrap();
        let sealed = encrypt("sealed long ago", &far_code).unwrap();
        let with_code = StoredPayload::encrypted(
            sealed.envelope_hex.clone(),
            sealed.iv_hex.clone(),
            Some(far_code.as_str()),
        );
        let without_code = StoredPayload::encrypted(sealed.envelope_hex, sealed.iv_hex, None);
        let turns = vec![
            turn("2026-10-19T12:00:00.000000Z", Role::User, &with_code),
            turn("2026-10-19T12:00:01.000000Z", Role::User, &without_code),
        ];

        let history = decrypt_history(turns, Arc::new(secret), Arc::new(plan(T0, None))).await;
        assert_eq!(history.turns.len(), 1);
        assert_eq!(history.turns[0].content, "sealed long ago");
        assert_eq!(history.turns[0].timestamp, "2026-10-19T12:00:00.000000Z");
        assert_eq!(history.failures.len(), 1);
        assert_eq!(history.failures[0].index, 1);
    }

    #[tokio::test]
    async fn old_turns_decrypt_from_write_time_window() {
        let secret = secret();
        let written_code = generate(&secret, epoch_at(T0)).unwrap();
        let sealed = encrypt("from an hour ago", &written_code).unwrap();
        let payload = StoredPayload::encrypted(sealed.envelope_hex, sealed.iv_hex, None);
        let turns = vec![turn("2026-10-19T12:00:00.000000Z", Role::User, &payload)];

        let history = decrypt_history(
            turns,
            Arc::new(secret),
            Arc::new(plan(T0 + 3_600, None)),
        )
        .await;
        assert!(history.failures.is_empty());
        assert_eq!(history.turns[0].content, "from an hour ago");
    }

    #[tokio::test]
    async fn legacy_and_corrupt_turns_are_handled_in_order() {
        let secret = secret();
        let code = generate(&secret, epoch_at(T0)).unwrap();
        let good = encrypt("sealed", &code).unwrap();
        let mut corrupt = encrypt("tampered", &code).unwrap();
        // Flip the first ciphertext byte.
        let byte = u8::from_str_radix(&corrupt.envelope_hex[88..90], 16).unwrap();
        corrupt
            .envelope_hex
            .replace_range(88..90, &format!("{:02x}", byte ^ 0xff));

        let turns = vec![
            turn("2026-10-19T12:00:00.000000Z", Role::User, &StoredPayload::Legacy("plain".into())),
            turn(
                "2026-10-19T12:00:01.000000Z",
                Role::Assistant,
                &StoredPayload::encrypted(corrupt.envelope_hex.clone(), corrupt.iv_hex.clone(), None),
            ),
            turn(
                "2026-10-19T12:00:02.000000Z",
                Role::User,
                &StoredPayload::encrypted(good.envelope_hex, good.iv_hex, None),
            ),
            Turn {
                payload: "ENCRYPTED:not-hex:zz".to_string(),
                ..turn("2026-10-19T12:00:03.000000Z", Role::Assistant, &StoredPayload::Legacy(String::new()))
            },
        ];

        let history =
            decrypt_history(turns, Arc::new(secret), Arc::new(plan(T0, Some(code)))).await;
        let contents: Vec<&str> = history.turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["plain", "sealed"]);
        let failed: Vec<usize> = history.failures.iter().map(|f| f.index).collect();
        assert_eq!(failed, [1, 3]);
        assert_eq!(history.failures[0].role, Role::Assistant);
        assert!(history.failures[0].reason.contains("candidate"));
    }
}
