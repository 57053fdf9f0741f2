// crates/open-mem-server/src/llm/rate_limit.rs
// Per-model token-bucket rate limiting for quota-sensitive providers

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// Requests per minute granted to a model without an explicit entry.
const DEFAULT_RPM: u32 = 10;

/// One token bucket: capacity refills continuously at `rpm / 60` per second.
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rpm: u32) -> Self {
        let capacity = rpm as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = Instant::now();
    }

    /// Take one token, returning how long the caller must wait first.
    fn take(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            self.tokens = 0.0;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}

/// Process-wide registry of token buckets keyed by model name.
///
/// Singleton with explicit reset for tests; no other ambient mutable
/// globals exist besides this and the mode-loader cache.
pub struct RateLimiterRegistry {
    buckets: Mutex<HashMap<String, Bucket>>,
}

static REGISTRY: OnceLock<RateLimiterRegistry> = OnceLock::new();

impl RateLimiterRegistry {
    pub fn global() -> &'static RateLimiterRegistry {
        REGISTRY.get_or_init(|| RateLimiterRegistry {
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Wait for a slot for `model`. When the bucket is empty the caller is
    /// delayed until refill grants one token.
    pub async fn acquire(&self, model: &str, rpm: Option<u32>) {
        let wait = {
            let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
            let bucket = buckets
                .entry(model.to_string())
                .or_insert_with(|| Bucket::new(rpm.unwrap_or(DEFAULT_RPM)));
            bucket.take()
        };
        if !wait.is_zero() {
            tracing::debug!(model, wait_ms = wait.as_millis() as u64, "rate limit wait");
            tokio::time::sleep(wait).await;
        }
    }

    /// Drop all buckets. Tests call this to get deterministic behavior.
    pub fn reset(&self) {
        self.buckets
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bucket_grants_without_wait() {
        let mut bucket = Bucket::new(60);
        assert_eq!(bucket.take(), Duration::ZERO);
    }

    #[test]
    fn empty_bucket_reports_wait() {
        let mut bucket = Bucket::new(60); // 1 token/sec
        for _ in 0..60 {
            bucket.take();
        }
        let wait = bucket.take();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn registry_acquire_and_reset() {
        let registry = RateLimiterRegistry::global();
        registry.reset();
        // A generous bucket never delays the first call
        let start = Instant::now();
        registry.acquire("test-model", Some(600)).await;
        assert!(start.elapsed() < Duration::from_millis(100));
        registry.reset();
    }
}
