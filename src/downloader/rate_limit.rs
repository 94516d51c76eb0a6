//! Token-bucket rate limiting
//!
//! One permit is consumed per outbound HTTP request. Tokens refill lazily on
//! every call: `tokens = min(capacity, tokens + elapsed * rate)`. Waiters sleep
//! until enough tokens should have accrued, then re-check under the mutex.

use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::shutdown::CancelHandle;

/// Upper bound on a single wait before the predicate is re-checked
const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

/// Lower bound on a single wait, avoids spinning on float rounding
const MIN_WAIT_SLICE: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared by the paginator and all workers
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

/// Snapshot of limiter state for progress reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSnapshot {
    /// Whole tokens currently available
    pub available: u32,
    /// Bucket capacity
    pub capacity: u32,
    /// Time until the bucket is full again
    pub full_in: Duration,
}

impl RateLimiter {
    /// Create a limiter from requests-per-minute and burst size.
    ///
    /// The bucket starts full.
    ///
    /// # Arguments
    /// * `requests_per_minute` - Refill rate (tokens per minute)
    /// * `burst_size` - Bucket capacity
    pub fn new(requests_per_minute: u32, burst_size: u32) -> Self {
        let capacity = f64::from(burst_size.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(requests_per_minute.max(1)) / 60.0,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket capacity
    pub fn capacity(&self) -> u32 {
        self.capacity as u32
    }

    /// Tokens added per second
    pub fn refill_rate(&self) -> f64 {
        self.refill_per_sec
    }

    /// Wait until `n` tokens are available, then take them.
    ///
    /// Returns [`RateLimitError::Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire(&self, n: u32, cancel: &CancelHandle) -> Result<(), RateLimitError> {
        self.check_request(n)?;
        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }
            let wait = match self.take_or_wait(n)? {
                None => return Ok(()),
                Some(wait) => wait.clamp(MIN_WAIT_SLICE, MAX_WAIT_SLICE),
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
            }
        }
    }

    /// Take `n` tokens if available without waiting.
    pub fn try_acquire(&self, n: u32) -> bool {
        if self.check_request(n).is_err() {
            return false;
        }
        matches!(self.take_or_wait(n), Ok(None))
    }

    /// Current state for progress sinks
    pub fn snapshot(&self) -> RateLimitSnapshot {
        let tokens = match self.bucket.lock() {
            Ok(mut bucket) => {
                self.refill(&mut bucket);
                bucket.tokens
            }
            Err(_) => 0.0,
        };
        let missing = (self.capacity - tokens).max(0.0);
        RateLimitSnapshot {
            available: tokens.floor() as u32,
            capacity: self.capacity(),
            full_in: Duration::from_secs_f64(missing / self.refill_per_sec),
        }
    }

    fn check_request(&self, n: u32) -> Result<(), RateLimitError> {
        if n == 0 || f64::from(n) > self.capacity {
            return Err(RateLimitError::InvalidRequest {
                requested: n,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Take tokens, or report how long until they should be available.
    fn take_or_wait(&self, n: u32) -> Result<Option<Duration>, RateLimitError> {
        let mut bucket = self.bucket.lock().map_err(|_| RateLimitError::Poisoned)?;
        self.refill(&mut bucket);
        let needed = f64::from(n);
        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            return Ok(None);
        }
        let deficit = needed - bucket.tokens;
        Ok(Some(Duration::from_secs_f64(deficit / self.refill_per_sec)))
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateLimitError {
    /// Request can never be satisfied
    #[error("cannot acquire {requested} tokens from a bucket of capacity {capacity}")]
    InvalidRequest {
        /// Tokens requested
        requested: u32,
        /// Bucket capacity
        capacity: u32,
    },

    /// Wait was cancelled
    #[error("rate limiter wait cancelled")]
    Cancelled,

    /// Internal lock poisoned by a panicking holder
    #[error("rate limiter state poisoned")]
    Poisoned,
}
