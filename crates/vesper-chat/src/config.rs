//! Service configuration, loaded once at startup.

use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use vesper_crypto::{CryptoError, SharedSecret};
use vesper_store::{ConversationStoreOptions, RetryPolicy, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};

pub const ENV_TOTP_SECRET: &str = "VESPER_TOTP_SECRET";
pub const ENV_TURN_TTL_DAYS: &str = "VESPER_TURN_TTL_DAYS";
pub const ENV_MODEL_TIMEOUT_SECS: &str = "VESPER_MODEL_TIMEOUT_SECS";
pub const ENV_MODEL_MAX_ATTEMPTS: &str = "VESPER_MODEL_MAX_ATTEMPTS";
pub const ENV_PERSIST_CODES: &str = "VESPER_PERSIST_CODES";

const DEFAULT_TURN_TTL_DAYS: i64 = 30;
const DEFAULT_MODEL_TIMEOUT_SECS: u64 = 30;
const MAX_MODEL_ATTEMPTS: u32 = 10;
const MAX_TURN_TTL_DAYS: u64 = 3_650;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("VESPER_TOTP_SECRET is not set")]
    MissingSecret,

    #[error("VESPER_TOTP_SECRET is not a usable Base32 secret: {0}")]
    InvalidSecret(#[source] CryptoError),

    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Read-only service configuration, shared as `Arc<Config>`.
#[derive(Debug, Clone)]
pub struct Config {
    secret: SharedSecret,
    /// Lifetime of a stored turn.
    pub turn_ttl: Duration,
    /// Upper bound on a single model call.
    pub model_timeout: StdDuration,
    pub model_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    /// Record the code next to each stored envelope. Off by default: the
    /// secret plus the turn's write time is enough to regenerate candidates.
    pub persist_codes: bool,
    /// Turns of history sent to the model with each message.
    pub history_limit: usize,
    /// Epochs before a turn's write time tried when decrypting history.
    pub history_lookback_epochs: u64,
    /// Epochs after a turn's write time tried when decrypting history.
    pub history_lookahead_epochs: u64,
}

impl Config {
    pub fn new(secret: SharedSecret) -> Self {
        Self {
            secret,
            turn_ttl: Duration::days(DEFAULT_TURN_TTL_DAYS),
            model_timeout: StdDuration::from_secs(DEFAULT_MODEL_TIMEOUT_SECS),
            model_retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff_ms: 200,
                max_backoff_ms: 2_000,
            },
            store_retry: RetryPolicy::default(),
            persist_codes: false,
            history_limit: DEFAULT_QUERY_LIMIT,
            history_lookback_epochs: 4,
            history_lookahead_epochs: 1,
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_secret = lookup(ENV_TOTP_SECRET)
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingSecret)?;
        let secret = SharedSecret::from_base32(&raw_secret).map_err(ConfigError::InvalidSecret)?;
        let mut config = Self::new(secret);

        if let Some(value) = lookup(ENV_TURN_TTL_DAYS) {
            let days = parse_positive(ENV_TURN_TTL_DAYS, &value)?;
            if days > MAX_TURN_TTL_DAYS {
                return Err(ConfigError::InvalidValue {
                    name: ENV_TURN_TTL_DAYS,
                    value,
                    reason: "must be at most 3650",
                });
            }
            config.turn_ttl = Duration::days(days as i64);
        }
        if let Some(value) = lookup(ENV_MODEL_TIMEOUT_SECS) {
            let secs = parse_positive(ENV_MODEL_TIMEOUT_SECS, &value)?;
            config.model_timeout = StdDuration::from_secs(secs);
        }
        if let Some(value) = lookup(ENV_MODEL_MAX_ATTEMPTS) {
            let attempts = parse_positive(ENV_MODEL_MAX_ATTEMPTS, &value)?;
            if attempts > u64::from(MAX_MODEL_ATTEMPTS) {
                return Err(ConfigError::InvalidValue {
                    name: ENV_MODEL_MAX_ATTEMPTS,
                    value,
                    reason: "must be at most 10",
                });
            }
            config.model_retry.max_attempts = attempts as u32;
        }
        if let Some(value) = lookup(ENV_PERSIST_CODES) {
            config.persist_codes = parse_bool(ENV_PERSIST_CODES, &value)?;
        }
        Ok(config)
    }

    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    pub fn with_turn_ttl(mut self, ttl: Duration) -> Self {
        self.turn_ttl = ttl;
        self
    }

    pub fn with_model_timeout(mut self, timeout: StdDuration) -> Self {
        self.model_timeout = timeout;
        self
    }

    pub fn with_model_retry(mut self, retry: RetryPolicy) -> Self {
        self.model_retry = retry;
        self
    }

    pub fn with_store_retry(mut self, retry: RetryPolicy) -> Self {
        self.store_retry = retry;
        self
    }

    pub fn with_persist_codes(mut self, persist: bool) -> Self {
        self.persist_codes = persist;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.clamp(1, MAX_QUERY_LIMIT);
        self
    }

    /// Options for the conversation store this configuration drives.
    pub fn store_options(&self) -> ConversationStoreOptions {
        ConversationStoreOptions {
            turn_ttl: self.turn_ttl,
            retry: self.store_retry,
            ..Default::default()
        }
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected a positive integer",
        }),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected true or false",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SECRET: &str = "JBSWY3DPEHPK3PXP7WQ6NZXVQ7AFKLMN";

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_with_only_secret() {
        let config = load(&[(ENV_TOTP_SECRET, SECRET)]).unwrap();
        assert_eq!(config.turn_ttl, Duration::days(30));
        assert_eq!(config.model_timeout, StdDuration::from_secs(30));
        assert_eq!(config.model_retry.max_attempts, 3);
        assert!(!config.persist_codes);
        assert_eq!(config.history_limit, 100);
    }

    #[test]
    fn missing_secret_is_fatal() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingSecret)));
        assert!(matches!(
            load(&[(ENV_TOTP_SECRET, "  ")]),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn malformed_secret_is_fatal() {
        let err = load(&[(ENV_TOTP_SECRET, "not base32!")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSecret(_)));
        assert!(err.to_string().contains(ENV_TOTP_SECRET));
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            (ENV_TOTP_SECRET, SECRET),
            (ENV_TURN_TTL_DAYS, "7"),
            (ENV_MODEL_TIMEOUT_SECS, "5"),
            (ENV_MODEL_MAX_ATTEMPTS, "1"),
            (ENV_PERSIST_CODES, "TRUE"),
        ])
        .unwrap();
        assert_eq!(config.turn_ttl, Duration::days(7));
        assert_eq!(config.model_timeout, StdDuration::from_secs(5));
        assert_eq!(config.model_retry.max_attempts, 1);
        assert!(config.persist_codes);
        assert_eq!(config.store_options().turn_ttl, Duration::days(7));
    }

    #[test]
    fn bad_overrides_are_rejected() {
        for (name, value) in [
            (ENV_TURN_TTL_DAYS, "0"),
            (ENV_MODEL_TIMEOUT_SECS, "soon"),
            (ENV_MODEL_MAX_ATTEMPTS, "50"),
            (ENV_PERSIST_CODES, "maybe"),
        ] {
            let err = load(&[(ENV_TOTP_SECRET, SECRET), (name, value)]).unwrap_err();
            assert!(err.to_string().contains(name), "{}", err);
        }
    }

    #[test]
    fn debug_does_not_print_secret() {
        let config = load(&[(ENV_TOTP_SECRET, SECRET)]).unwrap();
        let printed = format!("{:?}", config);
        assert!(!printed.contains(SECRET));
    }
}
