// src/ratelimit.rs
// Token-bucket admission control, one bucket per named external source.
// Tokens are fractional so a slow refill never rounds down to zero
// admitted requests. A token is consumed per request *sent*; nothing is
// refunded on failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{PipelineError, Result};

/// Upper bound on one blocking-wait sleep, so timeouts stay responsive.
const MAX_SLEEP: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket. Shared via `Arc`; all concurrent callers of
/// one source go through the same instance.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    period: Duration,
    inner: Mutex<Bucket>,
}

impl RateLimiter {
    /// `capacity` requests per `period`. Zero capacity or a zero period is
    /// a configuration error, not a "disabled" limiter.
    pub fn new(name: impl Into<String>, capacity: u32, period: Duration) -> Result<Self> {
        let name = name.into();
        if capacity == 0 || period.is_zero() {
            return Err(PipelineError::config(format!(
                "rate limiter '{name}': capacity and period must be nonzero"
            )));
        }
        tracing::info!(
            limiter = %name,
            capacity,
            period_secs = period.as_secs_f64(),
            "rate limiter initialized"
        );
        Ok(Self {
            name,
            capacity: f64::from(capacity),
            period,
            inner: Mutex::new(Bucket {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        })
    }

    // Must hold the lock. Refill is proportional to elapsed wall-clock
    // time and capped at capacity; never retroactive.
    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill);
        let to_add = elapsed.as_secs_f64() / self.period.as_secs_f64() * self.capacity;
        if to_add > 0.0 {
            bucket.tokens = (bucket.tokens + to_add).min(self.capacity);
            bucket.last_refill = now;
        }
    }

    /// Take one token if available, without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            tracing::debug!(limiter = %self.name, remaining = bucket.tokens, "token acquired");
            true
        } else {
            false
        }
    }

    /// Wait for a token, sleeping in bounded increments, until one is
    /// available or `timeout` elapses. `None` waits indefinitely.
    /// Returns false only on timeout.
    pub async fn acquire(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.try_acquire() {
                return true;
            }
            if let Some(d) = deadline {
                if Instant::now() >= d {
                    tracing::warn!(limiter = %self.name, "acquire timed out");
                    return false;
                }
            }
            // Sleep until the next token should exist, capped so we
            // re-check the deadline often enough.
            let time_per_token = self.period.div_f64(self.capacity);
            let mut sleep_for = time_per_token.min(MAX_SLEEP);
            if let Some(d) = deadline {
                sleep_for = sleep_for.min(d.saturating_duration_since(Instant::now()));
            }
            tokio::time::sleep(sleep_for).await;
        }
    }

    /// Current token count after refill. Fractional by design.
    pub fn available(&self) -> f64 {
        let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Restore the bucket to full capacity.
    pub fn reset(&self) {
        let mut bucket = self.inner.lock().expect("rate limiter mutex poisoned");
        bucket.tokens = self.capacity;
        bucket.last_refill = Instant::now();
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lazily constructs and caches exactly one limiter per source name.
#[derive(Debug, Default)]
pub struct RateLimiterRegistry {
    inner: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared limiter for `name`, creating it on first use.
    /// Capacity/period only apply at creation; later callers share the
    /// existing bucket regardless of what they pass.
    pub fn limiter(
        &self,
        name: &str,
        capacity: u32,
        period: Duration,
    ) -> Result<Arc<RateLimiter>> {
        let mut map = self.inner.lock().expect("registry mutex poisoned");
        if let Some(l) = map.get(name) {
            return Ok(Arc::clone(l));
        }
        let limiter = Arc::new(RateLimiter::new(name, capacity, period)?);
        map.insert(name.to_string(), Arc::clone(&limiter));
        Ok(limiter)
    }

    pub fn reset_all(&self) {
        let map = self.inner.lock().expect("registry mutex poisoned");
        for l in map.values() {
            l.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_a_config_error() {
        let err = RateLimiter::new("bad", 0, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        let err = RateLimiter::new("bad", 5, Duration::ZERO).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn grants_at_most_capacity_per_period() {
        let rl = RateLimiter::new("src", 3, Duration::from_secs(1)).unwrap();
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        assert!(!rl.try_acquire());

        // After a full period the bucket is full again, but never more.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!((rl.available() - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_fractional_and_proportional() {
        let rl = RateLimiter::new("src", 2, Duration::from_secs(1)).unwrap();
        assert!(rl.try_acquire());
        assert!(rl.try_acquire());
        tokio::time::advance(Duration::from_millis(250)).await;
        // 250ms at 2 tokens/s = 0.5 tokens: visible but not spendable.
        let avail = rl.available();
        assert!((avail - 0.5).abs() < 1e-6, "got {avail}");
        assert!(!rl.try_acquire());
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(rl.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_waits_for_next_token() {
        let rl = Arc::new(RateLimiter::new("src", 1, Duration::from_millis(200)).unwrap());
        assert!(rl.try_acquire());
        let got = rl.acquire(Some(Duration::from_secs(1))).await;
        assert!(got);
    }

    #[tokio::test(start_paused = true)]
    async fn blocking_acquire_times_out_without_tokens() {
        let rl = RateLimiter::new("src", 1, Duration::from_secs(3600)).unwrap();
        assert!(rl.try_acquire());
        let got = rl.acquire(Some(Duration::from_millis(300))).await;
        assert!(!got);
    }

    #[test]
    fn registry_shares_one_bucket_per_name() {
        let reg = RateLimiterRegistry::new();
        let a = reg.limiter("youtube", 2, Duration::from_secs(60)).unwrap();
        let b = reg.limiter("youtube", 999, Duration::from_secs(1)).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.try_acquire());
        assert!(b.try_acquire());
        // Both handles drained the same bucket.
        assert!(!a.try_acquire());
    }
}
