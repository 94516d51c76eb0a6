//! Typed retry policy
//!
//! Errors are sorted into [`ErrorClass`]es. Network, rate-limit and server
//! failures are retried; client and fatal failures return immediately. One
//! call keeps a single attempt counter. Its limit is the smallest attempt
//! budget among the classes seen so far, and the class of the latest error
//! picks the base delay.
//!
//! Delay after the k-th attempt fails (1-based):
//! `min(cap, base * multiplier^(k-1)) * (1 + U(-jitter, +jitter))`.
//! A rate-limit error carrying `Retry-After` uses that value as-is.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RetrySettings;
use crate::error::{ScrapeError, ScrapeResult};
use crate::fetcher::retry_formatter::RetryContext;
use crate::shutdown::CancelHandle;

/// Retry classification of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Connection reset, DNS failure, timeout
    Network,
    /// HTTP 429 or a rate-limit body
    RateLimit,
    /// HTTP 5xx
    Server,
    /// HTTP 4xx other than 401, 403 and 429
    Client,
    /// Invalid credentials, cancellation, anything unrecoverable
    Fatal,
}

impl ErrorClass {
    /// Whether errors of this class are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::Server)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::RateLimit => "rate-limit",
            Self::Server => "server",
            Self::Client => "client",
            Self::Fatal => "fatal",
        })
    }
}

/// Attempt budget and first delay for one class
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassPolicy {
    /// Total attempts allowed while failing with this class
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
}

impl ClassPolicy {
    /// Build a class policy
    pub const fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }
}

/// Retry policy shared by the paginator and the workers
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    network: ClassPolicy,
    rate_limit: ClassPolicy,
    server: ClassPolicy,
    max_delay: Duration,
    multiplier: f64,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Build from config settings, resolving per-class overrides against the globals.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        let resolve = |class: &crate::config::RetryClassSettings| {
            ClassPolicy::new(
                class.max_attempts.unwrap_or(settings.max_attempts),
                Duration::from_secs_f64(class.base_delay_secs.unwrap_or(settings.base_delay_secs)),
            )
        };
        Self {
            network: resolve(&settings.network),
            rate_limit: resolve(&settings.rate_limit),
            server: resolve(&settings.server),
            max_delay: Duration::from_secs_f64(settings.max_delay_secs),
            multiplier: settings.multiplier,
            jitter: settings.jitter,
        }
    }

    /// Policy with explicit per-class settings and no jitter
    pub fn new(network: ClassPolicy, rate_limit: ClassPolicy, server: ClassPolicy) -> Self {
        Self {
            network,
            rate_limit,
            server,
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }

    /// Override the attempt budget of every retryable class
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        let attempts = max_attempts.max(1);
        self.network.max_attempts = attempts;
        self.rate_limit.max_attempts = attempts;
        self.server.max_attempts = attempts;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the relative jitter (0.1 = +/-10%)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.99);
        self
    }

    /// Settings for a class; `None` for non-retryable classes
    pub fn class_policy(&self, class: ErrorClass) -> Option<ClassPolicy> {
        match class {
            ErrorClass::Network => Some(self.network),
            ErrorClass::RateLimit => Some(self.rate_limit),
            ErrorClass::Server => Some(self.server),
            ErrorClass::Client | ErrorClass::Fatal => None,
        }
    }

    /// Attempts allowed for a class (1 for non-retryable classes)
    pub fn max_attempts(&self, class: ErrorClass) -> u32 {
        self.class_policy(class).map(|p| p.max_attempts).unwrap_or(1)
    }

    /// Delay before retry after the `failure`-th failure (1-based), without jitter
    pub fn base_backoff(&self, class: ErrorClass, failure: u32) -> Duration {
        let Some(policy) = self.class_policy(class) else {
            return Duration::ZERO;
        };
        let exponent = failure.saturating_sub(1).min(63) as i32;
        let secs = policy.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before retry after the `failure`-th failure (1-based), with jitter
    pub fn backoff(&self, class: ErrorClass, failure: u32) -> Duration {
        let base = self.base_backoff(class, failure);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, runs out
    /// of attempts, or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, cancel: &CancelHandle, label: &str, op: F) -> ScrapeResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        self.run_classified(cancel, label, ScrapeError::class, op).await
    }

    /// Like [`RetryPolicy::run`] with a custom classifier.
    pub async fn run_classified<T, C, F, Fut>(
        &self,
        cancel: &CancelHandle,
        label: &str,
        classify: C,
        mut op: F,
    ) -> ScrapeResult<T>
    where
        C: Fn(&ScrapeError) -> ErrorClass,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ScrapeResult<T>>,
    {
        let mut attempt = 0u32;
        let mut budget = u32::MAX;

        loop {
            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }
            attempt += 1;

            let err = match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if err.is_cancelled() {
                return Err(err);
            }

            let class = classify(&err);
            if !class.is_retryable() {
                debug!(label, attempt, class = %class, error = %err, "Non-retryable error");
                return Err(err);
            }

            budget = budget.min(self.max_attempts(class));
            if attempt >= budget {
                warn!(
                    label,
                    attempts = attempt,
                    class = %class,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            let delay = err
                .retry_after()
                .unwrap_or_else(|| self.backoff(class, attempt));

            let ctx = RetryContext::new(attempt + 1, budget, class, delay, label, err.to_string());
            warn!(label, class = %class, delay_ms = delay.as_millis() as u64, "{}", ctx.format_retry());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ScrapeError::Cancelled),
            }
        }
    }
}
