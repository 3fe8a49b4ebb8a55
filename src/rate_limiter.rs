//! Request admission control using a token bucket
//!
//! The RateLimiter is shared by every fetch worker of a [`BatchDownloader`](crate::BatchDownloader)
//! and bounds how fast new HTTP requests are initiated across the whole batch.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Token bucket shared by all fetch workers
///
/// # Algorithm
///
/// - One token admits one request
/// - Tokens refill continuously at `rate` tokens per second
/// - The bucket holds at most `capacity` tokens (`rate`, but never less than one),
///   so an idle limiter allows a burst of `capacity` requests before the
///   steady-state spacing of `1 / rate` seconds sets in
///
/// Refill and consumption happen inside one short mutex-protected section, so
/// concurrent workers never lose or double-spend tokens. Cloning is cheap and
/// clones share the same bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    inner: Option<Arc<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    /// Tokens added per second
    rate: f64,
    /// Maximum number of stored tokens
    capacity: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter admitting `rate` requests per second (None = unlimited)
    ///
    /// Non-positive or non-finite rates are treated as unlimited; configuration
    /// validation rejects them before they get here.
    ///
    /// # Examples
    ///
    /// ```
    /// use asset_dl::rate_limiter::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(Some(2.0));
    /// assert!(limiter.try_acquire());
    /// assert!(limiter.try_acquire());
    /// assert!(!limiter.try_acquire());
    ///
    /// let unlimited = RateLimiter::new(None);
    /// assert!(unlimited.try_acquire());
    /// ```
    #[must_use]
    pub fn new(rate: Option<f64>) -> Self {
        let inner = rate.filter(|r| r.is_finite() && *r > 0.0).map(|rate| {
            let capacity = rate.max(1.0);
            Arc::new(Bucket {
                rate,
                capacity,
                state: Mutex::new(BucketState {
                    tokens: capacity,
                    last_refill: Instant::now(),
                }),
            })
        });
        Self { inner }
    }

    /// Configured rate in tokens per second, None when unlimited
    pub fn rate(&self) -> Option<f64> {
        self.inner.as_ref().map(|b| b.rate)
    }

    /// Take one token if available
    ///
    /// Refills the bucket for the time elapsed since the previous call, then
    /// returns `true` and consumes a token if at least one is available.
    /// Never blocks; callers that get `false` retry later.
    pub fn try_acquire(&self) -> bool {
        let Some(bucket) = &self.inner else {
            return true;
        };

        // A panic elsewhere cannot leave the two fields inconsistent, so a
        // poisoned lock is still usable.
        let mut state = bucket.state.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * bucket.rate).min(bucket.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Poll [`try_acquire`](Self::try_acquire) until a token is granted
    ///
    /// Sleeps `poll_interval` between attempts. Waiters are not queued, so the
    /// order in which concurrent callers get through is unspecified.
    pub async fn acquire(&self, poll_interval: Duration) {
        let mut waited = 0u32;
        while !self.try_acquire() {
            waited += 1;
            tokio::time::sleep(poll_interval).await;
        }
        if waited > 0 {
            tracing::trace!(polls = waited, "rate limiter granted token after waiting");
        }
    }

    /// Tokens currently stored, without refilling
    #[cfg(test)]
    fn available(&self) -> f64 {
        self.inner.as_ref().map_or(f64::INFINITY, |b| {
            b.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .tokens
        })
    }

    /// Empty the bucket and restart the refill clock
    #[cfg(test)]
    fn drain(&self) {
        if let Some(bucket) = &self.inner {
            let mut state = bucket.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.tokens = 0.0;
            state.last_refill = Instant::now();
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_new_none_is_unlimited() {
        let limiter = RateLimiter::new(None);
        assert_eq!(limiter.rate(), None);
        for _ in 0..10_000 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn test_invalid_rates_are_unlimited() {
        assert_eq!(RateLimiter::new(Some(0.0)).rate(), None);
        assert_eq!(RateLimiter::new(Some(-3.0)).rate(), None);
        assert_eq!(RateLimiter::new(Some(f64::INFINITY)).rate(), None);
    }

    #[test]
    fn test_starts_with_full_bucket() {
        let limiter = RateLimiter::new(Some(5.0));
        assert_eq!(limiter.rate(), Some(5.0));

        for i in 0..5 {
            assert!(limiter.try_acquire(), "token {i} should be granted");
        }
        assert!(
            !limiter.try_acquire(),
            "bucket of capacity 5 should be empty after 5 grants"
        );
    }

    #[test]
    fn test_fractional_rate_still_holds_one_token() {
        let limiter = RateLimiter::new(Some(0.5));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let limiter = RateLimiter::new(Some(3.0));
        std::thread::sleep(Duration::from_millis(50));
        limiter.try_acquire();
        assert!(
            limiter.available() <= 2.0 + f64::EPSILON,
            "idle time must not grow the bucket beyond capacity, got {}",
            limiter.available()
        );
    }

    #[test]
    fn test_refills_with_elapsed_time() {
        let limiter = RateLimiter::new(Some(100.0));
        limiter.drain();
        assert!(!limiter.try_acquire());

        // 100 tokens/s -> one token every 10ms
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.try_acquire(), "token should have refilled after 30ms");
    }

    #[test]
    fn test_clones_share_bucket() {
        let limiter = RateLimiter::new(Some(2.0));
        let other = limiter.clone();

        assert!(limiter.try_acquire());
        assert!(other.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(!other.try_acquire());
    }

    #[test]
    fn test_concurrent_grants_never_exceed_capacity() {
        // Low rate so refill during the test is negligible
        let limiter = RateLimiter::new(Some(10.0));
        let granted = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let granted = Arc::clone(&granted);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if limiter.try_acquire() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let granted = granted.load(Ordering::SeqCst);
        assert!(
            (10..=20).contains(&granted),
            "800 racing attempts should get about 10 tokens, got {granted}"
        );
    }

    #[tokio::test]
    async fn test_acquire_unlimited_returns_immediately() {
        let limiter = RateLimiter::new(None);
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.acquire(Duration::from_millis(50)).await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(Some(10.0));
        limiter.drain();

        let start = Instant::now();
        limiter.acquire(Duration::from_millis(5)).await;
        let elapsed = start.elapsed();

        // One token at 10 tokens/s takes ~100ms
        assert!(
            elapsed >= Duration::from_millis(90),
            "should wait for a refill, waited {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(1),
            "should not wait too long, waited {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_burst_beyond_rate_is_throttled() {
        let rate = 20.0;
        let limiter = RateLimiter::new(Some(rate));

        let start = Instant::now();
        for _ in 0..40 {
            limiter.acquire(Duration::from_millis(5)).await;
        }
        let elapsed = start.elapsed();

        // First 20 come from the initial bucket, the next 20 arrive at 1/20s spacing
        assert!(
            elapsed >= Duration::from_millis(900),
            "40 grants at 20/s with a burst of 20 should take ~1s, took {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(3),
            "throttling should not be excessive, took {elapsed:?}"
        );
    }
}
