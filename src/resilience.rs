//! Shared guard for outbound provider calls.
//!
//! Every call to a race-data or wagering provider goes through a
//! `ProviderGuard`: a process-wide rate limiter, a per-attempt timeout and
//! exponential backoff between attempts. Callers choose which errors are
//! worth another attempt, since a placement may only be resent when the
//! provider confirmed it never took the first one.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProvidersConfig;
use crate::platforms::{BetRequest, PlacementOutcome, WageringProvider};
use crate::types::PlannerError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based retries): base * 2^(attempt-1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl From<&ProvidersConfig> for RetryPolicy {
    fn from(cfg: &ProvidersConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            timeout: Duration::from_secs(cfg.request_timeout_secs),
        }
    }
}

/// Rate limit, timeout and retry wrapper around provider calls.
///
/// Clones share one limiter, so every provider built from the same guard
/// draws from the same request budget.
#[derive(Clone)]
pub struct ProviderGuard {
    limiter: Arc<DefaultDirectRateLimiter>,
    policy: RetryPolicy,
}

impl ProviderGuard {
    pub fn new(policy: RetryPolicy, requests_per_second: u32, burst: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rps);
        let quota = Quota::per_second(rps).allow_burst(burst);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            policy,
        }
    }

    pub fn from_config(cfg: &ProvidersConfig) -> Self {
        Self::new(RetryPolicy::from(cfg), cfg.requests_per_second, cfg.burst)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `call` until it succeeds, fails with an error `retry_if` rejects,
    /// or the retry budget is spent. A timed-out attempt becomes a transient
    /// error that does not confirm non-acceptance.
    pub async fn run<T, F, Fut, R>(
        &self,
        provider: &str,
        operation: &str,
        retry_if: R,
        mut call: F,
    ) -> Result<T, PlannerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PlannerError>>,
        R: Fn(&PlannerError) -> bool,
    {
        let max_retries = self.policy.max_retries;
        let mut attempt = 0;
        loop {
            if attempt > 0 {
                let delay = self.policy.backoff(attempt);
                debug!(provider, operation, attempt, delay_ms = delay.as_millis() as u64, "Retrying after backoff");
                tokio::time::sleep(delay).await;
            }

            self.limiter.until_ready().await;

            let result = match tokio::time::timeout(self.policy.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(PlannerError::transient(
                    provider,
                    format!("{operation} timed out after {:?}", self.policy.timeout),
                    false,
                )),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_retries && retry_if(&e) => {
                    warn!(provider, operation, attempt, error = %e, "Provider call failed, will retry");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Guarded wagering
// ---------------------------------------------------------------------------

/// Wagering provider behind a guard. Only resends a ticket when the
/// provider confirmed the previous attempt was not accepted.
pub struct GuardedWagering {
    inner: Arc<dyn WageringProvider>,
    guard: ProviderGuard,
    name: String,
}

impl GuardedWagering {
    pub fn new(name: impl Into<String>, inner: Arc<dyn WageringProvider>, guard: ProviderGuard) -> Self {
        Self {
            inner,
            guard,
            name: name.into(),
        }
    }
}

#[async_trait]
impl WageringProvider for GuardedWagering {
    async fn place_bet(&self, request: &BetRequest) -> Result<PlacementOutcome, PlannerError> {
        self.guard
            .run(
                &self.name,
                "place_bet",
                PlannerError::confirms_not_accepted,
                || self.inner.place_bet(request),
            )
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
