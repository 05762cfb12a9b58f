//! Bounded retry executor and primary/fallback RPC combinator
//!
//! [`Backoff::run`] retries an async operation with a randomized, growing
//! delay. Retries are strictly sequential: the next attempt is only started
//! after the previous one has returned. A `fail_trigger` predicate marks
//! errors as terminal, which stops retrying immediately.
//!
//! [`with_fallback`] layers endpoint failover on top: the operation runs
//! against the primary RPC under backoff, and only a network-class failure
//! moves it to the fallback RPC (again under backoff). Any other
//! classification is returned as is.

use crate::chain::RpcPair;
use crate::errors::{classify, sanitize, ChainError, ClassifiedError};
use crate::metrics::metrics;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Lower bound of every retry delay
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Upper bound of every retry delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Failures after which the last error is returned
    #[serde(default = "default_max_failure_count")]
    pub max_failure_count: u32,
}

fn default_min_delay_ms() -> u64 { 250 }
fn default_max_delay_ms() -> u64 { 1000 }
fn default_max_failure_count() -> u32 { 5 }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_failure_count: default_max_failure_count(),
        }
    }
}

impl BackoffConfig {
    /// Delay before the retry that follows `failures` failed attempts.
    ///
    /// The ceiling doubles per failure starting at `min_delay_ms` and is capped
    /// at `max_delay_ms`; the delay is drawn uniformly between the floor and
    /// that ceiling.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let min = self.min_delay_ms;
        let max = self.max_delay_ms.max(min);
        let exp = failures.saturating_sub(1).min(16);
        let ceiling = min.saturating_mul(1u64 << exp).clamp(min, max);

        let delay = if ceiling > min {
            rand::thread_rng().gen_range(min..=ceiling)
        } else {
            min
        };
        Duration::from_millis(delay)
    }
}

/// Sequential retry executor
#[derive(Debug, Clone, Default)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, `fail_trigger` marks its error as
    /// terminal, or `max_failure_count` failures have accumulated.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        fail_trigger: P,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_failures = self.config.max_failure_count.max(1);
        let mut failures: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if failures > 0 {
                        debug!(
                            operation = label,
                            attempts = failures + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if fail_trigger(&err) {
                        debug!(
                            operation = label,
                            error = %sanitize(&err.to_string()),
                            "Terminal error, not retrying"
                        );
                        return Err(err);
                    }

                    failures += 1;
                    if failures >= max_failures {
                        warn!(
                            operation = label,
                            attempts = failures,
                            error = %sanitize(&err.to_string()),
                            "All retry attempts exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.config.delay_for(failures);
                    debug!(
                        operation = label,
                        attempt = failures,
                        max_attempts = max_failures,
                        backoff_ms = delay.as_millis() as u64,
                        error = %sanitize(&err.to_string()),
                        "Transient error, backing off before retry"
                    );
                    metrics().backoff_retries.inc();
                    sleep(delay).await;
                }
            }
        }
    }

    /// Run a raw chain operation, classifying every failure and retrying only
    /// network-class ones.
    pub async fn run_classified<T, F, Fut>(
        &self,
        label: &str,
        recipient_hint: Option<&str>,
        mut operation: F,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        self.run(label, ClassifiedError::is_terminal, || {
            let attempt = operation();
            async move { attempt.await.map_err(|e| classify(&e, recipient_hint)) }
        })
        .await
    }
}

/// Run `operation` against the primary client, moving to the fallback client
/// once when the primary fails with a network-class error.
///
/// Both legs are backoff-wrapped. Terminal classifications from the primary
/// are returned without touching the fallback.
pub async fn with_fallback<'a, C, T, F, Fut>(
    backoff: &Backoff,
    label: &str,
    rpc: &'a RpcPair<C>,
    recipient_hint: Option<&str>,
    mut operation: F,
) -> Result<T, ClassifiedError>
where
    F: FnMut(&'a C) -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    match backoff
        .run_classified(label, recipient_hint, || operation(&rpc.primary))
        .await
    {
        Ok(value) => Ok(value),
        Err(err) if err.is_network() => {
            warn!(
                operation = label,
                error = %err,
                "Primary RPC failed with network error, switching to fallback"
            );
            metrics().fallback_switches.inc();
            backoff
                .run_classified(label, recipient_hint, || operation(&rpc.fallback))
                .await
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> Backoff {
        Backoff::new(BackoffConfig {
            min_delay_ms: 1,
            max_delay_ms: 4,
            max_failure_count: 5,
        })
    }

    #[test]
    fn test_delay_within_bounds() {
        let config = BackoffConfig::default();
        for failures in 1..10 {
            let delay = config.delay_for(failures).as_millis() as u64;
            assert!(delay >= config.min_delay_ms);
            assert!(delay <= config.max_delay_ms);
        }
    }

    #[test]
    fn test_delay_with_degenerate_bounds() {
        let config = BackoffConfig {
            min_delay_ms: 500,
            max_delay_ms: 100,
            max_failure_count: 3,
        };
        assert_eq!(config.delay_for(4), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast()
            .run("op", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast()
            .run("op", |_| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("insufficient".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_max_failure_count() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast()
            .run("op", |_| false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("request failed".to_string()) }
            })
            .await;
        assert_eq!(result, Err("request failed".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast()
            .run("op", |_| false, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("timed out".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_used_on_network_error() {
        let rpc = RpcPair::new("primary", "fallback");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result = with_fallback(&fast(), "get", &rpc, None, |client: &&str| {
            seen.lock().push(*client);
            let client = *client;
            async move {
                if client == "primary" {
                    Err(ChainError::http(429, "Too Many Requests"))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        let seen = seen.lock();
        assert_eq!(seen.iter().filter(|c| **c == "primary").count(), 5);
        assert_eq!(seen.last(), Some(&"fallback"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_skipped_on_terminal_error() {
        let rpc = RpcPair::new("primary", "fallback");
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let result: Result<u64, _> = with_fallback(&fast(), "get", &rpc, None, |client: &&str| {
            seen.lock().push(*client);
            async {
                Err(ChainError::transaction(
                    "Transaction simulation failed",
                    vec!["Transfer: insufficient lamports 100, need 500".to_string()],
                ))
            }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientFunds(Some(400)));
        assert_eq!(*seen.lock(), vec!["primary"]);
    }
}
