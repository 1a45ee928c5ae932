//! Component health aggregation.
//!
//! Every check runs concurrently and the report always lists every component,
//! including the ones that failed or timed out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use vesper_crypto::{decrypt, encrypt, epoch_at, generate, Code, CryptoError, SharedSecret};
use vesper_store::{Clock, KeyValueStore};

use crate::model::ModelClient;

/// Bound on any single component check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// One checked dependency.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<(), String>;
}

/// Run every check concurrently and wait for all of them.
pub async fn check_all(checks: &[Arc<dyn HealthCheck>], timeout: Duration) -> HealthReport {
    let runs = checks.iter().map(|check| async move {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, check.check()).await {
            Ok(result) => result,
            Err(_) => Err(format!("timed out after {} ms", timeout.as_millis())),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => ComponentHealth {
                name: check.name().to_string(),
                status: HealthStatus::Healthy,
                latency_ms,
                error: None,
            },
            Err(error) => {
                tracing::warn!(component = check.name(), %error, "health check failed");
                ComponentHealth {
                    name: check.name().to_string(),
                    status: HealthStatus::Unhealthy,
                    latency_ms,
                    error: Some(error),
                }
            }
        }
    });

    let components = join_all(runs).await;
    let status = if components.iter().all(|c| c.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };
    HealthReport { status, components }
}

/// Key-value store reachability.
pub struct StoreCheck(pub Arc<dyn KeyValueStore>);

#[async_trait]
impl HealthCheck for StoreCheck {
    fn name(&self) -> &str {
        "store"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.ping().await.map_err(|e| e.to_string())
    }
}

/// Model client reachability.
pub struct ModelCheck(pub Arc<dyn ModelClient>);

#[async_trait]
impl HealthCheck for ModelCheck {
    fn name(&self) -> &str {
        "model"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.health().await.map_err(|e| e.to_string())
    }
}

/// Seal and open a test message under the code current on `clock`.
pub struct CipherCheck {
    secret: Arc<SharedSecret>,
    clock: Arc<dyn Clock>,
}

impl CipherCheck {
    pub fn new(secret: Arc<SharedSecret>, clock: Arc<dyn Clock>) -> Self {
        Self { secret, clock }
    }

    /// Code the check seals under.
    pub fn current_code(&self) -> Result<Code, CryptoError> {
        let now = u64::try_from(self.clock.unix_secs()).unwrap_or(0);
        generate(&self.secret, epoch_at(now))
    }
}

#[async_trait]
impl HealthCheck for CipherCheck {
    fn name(&self) -> &str {
        "cipher"
    }

    async fn check(&self) -> Result<(), String> {
        let code = self.current_code().map_err(|e| e.to_string())?;
        tokio::task::spawn_blocking(move || {
            let sealed = encrypt("health", &code).map_err(|e| e.to_string())?;
            let opened = decrypt(&sealed.envelope_hex, &code).map_err(|e| e.to_string())?;
            if opened == "health" {
                Ok(())
            } else {
                Err("cipher round trip mismatch".to_string())
            }
        })
        .await
        .map_err(|e| format!("cipher check task failed: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_store::{FixedClock, KvError, MemoryKv};

    struct Static {
        name: &'static str,
        result: Result<(), String>,
        delay: Duration,
    }

    #[async_trait]
    impl HealthCheck for Static {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> Result<(), String> {
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    struct DownKv;

    #[async_trait]
    impl KeyValueStore for DownKv {
        async fn put_if_absent(&self, _item: vesper_store::KvItem) -> Result<(), KvError> {
            Err(KvError::Unavailable("down".into()))
        }
        async fn query_partition(
            &self,
            _partition: &str,
            _limit: usize,
            _ascending: bool,
        ) -> Result<Vec<vesper_store::KvItem>, KvError> {
            Err(KvError::Unavailable("down".into()))
        }
        async fn scan_partition(
            &self,
            _partition: &str,
            _cap: usize,
        ) -> Result<Vec<vesper_store::KvItem>, KvError> {
            Err(KvError::Unavailable("down".into()))
        }
        async fn batch_delete(&self, _partition: &str, _keys: &[String]) -> Result<usize, KvError> {
            Err(KvError::Unavailable("down".into()))
        }
        async fn ping(&self) -> Result<(), KvError> {
            Err(KvError::Unavailable("connection refused".into()))
        }
    }

    fn stat(name: &'static str, result: Result<(), String>, delay_ms: u64) -> Arc<dyn HealthCheck> {
        Arc::new(Static {
            name,
            result,
            delay: Duration::from_millis(delay_ms),
        })
    }

    #[tokio::test]
    async fn reports_every_component_even_after_a_failure() {
        let checks = vec![
            stat("fast-fail", Err("boom".into()), 0),
            stat("slow-ok", Ok(()), 30),
            stat("ok", Ok(()), 0),
        ];
        let report = check_all(&checks, CHECK_TIMEOUT).await;
        assert!(!report.is_healthy());
        let names: Vec<&str> = report.components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["fast-fail", "slow-ok", "ok"]);
        assert_eq!(report.component("slow-ok").unwrap().status, HealthStatus::Healthy);
        assert_eq!(report.component("fast-fail").unwrap().error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn slow_checks_time_out() {
        let checks = vec![stat("stuck", Ok(()), 5_000)];
        let report = check_all(&checks, Duration::from_millis(20)).await;
        let stuck = report.component("stuck").unwrap();
        assert_eq!(stuck.status, HealthStatus::Unhealthy);
        assert!(stuck.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn store_and_cipher_checks() {
        let secret = Arc::new(SharedSecret::from_base32("JBSWY3DPEHPK3PXP7WQ6NZXVQ7AFKLMN").unwrap());
        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(StoreCheck(Arc::new(MemoryKv::new()))),
            Arc::new(CipherCheck::new(secret, Arc::new(FixedClock::at_unix(1_792_411_200)))),
        ];
        assert!(check_all(&checks, CHECK_TIMEOUT).await.is_healthy());

        let down: Vec<Arc<dyn HealthCheck>> = vec![Arc::new(StoreCheck(Arc::new(DownKv)))];
        let report = check_all(&down, CHECK_TIMEOUT).await;
        assert!(report.component("store").unwrap().error.as_deref().unwrap().contains("refused"));
    }

    #[test]
    fn cipher_check_follows_the_injected_clock() {
        let secret = Arc::new(SharedSecret::from_base32("JBSWY3DPEHPK3PXP7WQ6NZXVQ7AFKLMN").unwrap());
        let clock = Arc::new(FixedClock::at_unix(30_000_000));
        let check = CipherCheck::new(Arc::clone(&secret), clock.clone());
        assert_eq!(check.current_code().unwrap(), generate(&secret, 1_000_000).unwrap());

        clock.advance(chrono::Duration::seconds(150));
        assert_eq!(check.current_code().unwrap(), generate(&secret, 1_000_005).unwrap());
    }

    #[test]
    fn report_serializes_lowercase_status() {
        let report = HealthReport {
            status: HealthStatus::Healthy,
            components: vec![],
        };
        assert_eq!(serde_json::to_value(&report).unwrap()["status"], "healthy");
    }
}
