//! Per-IP rate limiting using a token bucket.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket rate limiter keyed by client IP.
///
/// Each IP starts with `capacity` tokens and regains them continuously at
/// `capacity` per `period`, so bursts up to `capacity` are allowed.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<IpAddr, TokenBucket>,
    capacity: f64,
    period: Duration,
    blocked_count: AtomicU64,
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(capacity: u32, period: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: f64::from(capacity.max(1)),
            period,
            blocked_count: AtomicU64::new(0),
        }
    }

    /// Takes a token for `ip`. Returns `false` if the bucket is empty.
    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(ip).or_insert(TokenBucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        let per_sec = self.capacity / self.period.as_secs_f64().max(f64::EPSILON);
        bucket.tokens = (bucket.tokens + elapsed * per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            self.blocked_count.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total number of rejected requests.
    pub fn blocked_count(&self) -> u64 {
        self.blocked_count.load(Ordering::Relaxed)
    }

    /// Forgets buckets that have been full for at least one period.
    pub fn cleanup_old_entries(&self) {
        let cutoff = self.period;
        self.buckets
            .retain(|_, bucket| bucket.last_refill.elapsed() < cutoff);
    }

    pub fn tracked_ips(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_allows_burst_then_blocks() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..5 {
            assert!(limiter.check_rate_limit(IP));
        }
        assert!(!limiter.check_rate_limit(IP));
        assert_eq!(limiter.blocked_count(), 1);

        // Other clients have their own bucket.
        assert!(limiter.check_rate_limit(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_refills_over_time() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check_rate_limit(IP));
        assert!(limiter.check_rate_limit(IP));
        assert!(!limiter.check_rate_limit(IP));

        // One token every 30 seconds.
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(limiter.check_rate_limit(IP));
        assert!(!limiter.check_rate_limit(IP));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_drops_quiet_clients() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.check_rate_limit(IP);
        assert_eq!(limiter.tracked_ips(), 1);
        tokio::time::advance(Duration::from_secs(61)).await;
        limiter.cleanup_old_entries();
        assert_eq!(limiter.tracked_ips(), 0);
    }
}
