//! Fixed-window rate limiter (§4.11/C11).
//!
//! A `KeyedStore`-backed limiter so admission state is shared across
//! process instances behind the same Redis. Fail-open: a store error
//! admits the request rather than denying it, since the limiter is
//! supplementary, not a security boundary.

use std::sync::Arc;
use std::time::Duration;

use otp_store::KeyedStore;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub window: Duration,
    pub max_requests: i64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { window: Duration::from_secs(60), max_requests: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

pub struct RateLimiter {
    store: Arc<dyn KeyedStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyedStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    /// Increments the counter for `(client_ip, path)`; sets the
    /// window TTL on the first increment. Denies once the count
    /// exceeds `max_requests`, with `retry_after_secs` equal to the
    /// counter's remaining TTL. Store failures fail open (§4.11).
    pub async fn check(&self, client_ip: &str, path: &str) -> Admission {
        let key = format!("ratelimit:{client_ip}:{path}");

        let count = match self.store.incr(&key).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, key, "rate limiter store error, failing open");
                return Admission::Allowed;
            }
        };

        if count == 1 {
            if let Err(e) = self.store.expire(&key, self.config.window).await {
                warn!(error = %e, key, "failed to set rate limit window ttl");
            }
        }

        if count > self.config.max_requests {
            let retry_after = self
                .store
                .pttl(&key)
                .await
                .ok()
                .flatten()
                .map(|ttl| ttl.as_secs().max(1))
                .unwrap_or(self.config.window.as_secs());
            return Admission::Denied { retry_after_secs: retry_after };
        }

        Admission::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otp_store::InMemoryStore;

    fn limiter(max_requests: i64) -> RateLimiter {
        RateLimiter::new(Arc::new(InMemoryStore::new()), RateLimiterConfig { window: Duration::from_secs(60), max_requests })
    }

    #[tokio::test]
    async fn admits_up_to_max_requests_per_window() {
        let limiter = limiter(3);
        for _ in 0..3 {
            assert_eq!(limiter.check("1.2.3.4", "/api/auth/sms/send").await, Admission::Allowed);
        }
        assert!(matches!(limiter.check("1.2.3.4", "/api/auth/sms/send").await, Admission::Denied { .. }));
    }

    #[tokio::test]
    async fn distinct_paths_have_independent_counters() {
        let limiter = limiter(1);
        assert_eq!(limiter.check("1.2.3.4", "/a").await, Admission::Allowed);
        assert_eq!(limiter.check("1.2.3.4", "/b").await, Admission::Allowed);
    }

    #[tokio::test]
    async fn distinct_ips_have_independent_counters() {
        let limiter = limiter(1);
        assert_eq!(limiter.check("1.1.1.1", "/a").await, Admission::Allowed);
        assert_eq!(limiter.check("2.2.2.2", "/a").await, Admission::Allowed);
    }
}
