/// Windowed request quotas kept in the key/value store
///
/// A bucket is a counter keyed by (scope, limitee, window). The first request of a
/// window creates it at `limit` with the window as TTL; every request decrements it.
/// A non-negative result admits the request with that many left, anything below
/// zero is rejected until the key expires.
mod local;

pub use local::{flood_guard, FloodGuard};

use crate::error::{TapglueError, TapglueResult};
use crate::keys;
use crate::kv::KvStore;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Outcome of an admitted request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    limit: u32,
    window_secs: u64,
}

/// Stable, opaque bucket name for a secret
pub fn limitee_of(secret: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(secret.as_bytes()))
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>, limit: u32, window_secs: u64) -> Self {
        Self {
            kv,
            limit,
            window_secs: window_secs.max(1),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count one request against the limitee's current window
    pub async fn request(&self, scope: &str, limitee: &str) -> TapglueResult<Quota> {
        let key = keys::rate_limit(scope, limitee, self.window_secs);

        self.kv
            .set_nx_ex(&key, &self.limit.to_string(), self.window_secs)
            .await?;
        let remaining = self.kv.decr(&key).await?;

        let ttl = match self.kv.ttl(&key).await? {
            secs if secs >= 0 => secs,
            // Counter lost its TTL or vanished between calls; give it a fresh window
            _ => {
                self.kv.expire(&key, self.window_secs).await?;
                self.window_secs as i64
            }
        };
        let reset_at = Utc::now() + Duration::seconds(ttl);

        if remaining < 0 {
            debug!(scope, limitee, "rate limit exceeded");
            return Err(TapglueError::RateLimited { reset_at });
        }

        Ok(Quota {
            limit: self.limit,
            remaining,
            reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use std::time::Duration as StdDuration;

    #[tokio::test(start_paused = true)]
    async fn test_window_admits_limit_then_resets() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), 5, 2);

        for expected in (0..5).rev() {
            let quota = limiter.request("application", "app").await.unwrap();
            assert_eq!(quota.remaining, expected);
        }
        assert!(matches!(
            limiter.request("application", "app").await,
            Err(TapglueError::RateLimited { .. })
        ));

        tokio::time::advance(StdDuration::from_secs(2)).await;
        let quota = limiter.request("application", "app").await.unwrap();
        assert_eq!(quota.remaining, 4);
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()), 1, 60);
        tokio_test::assert_ok!(limiter.request("application", "a").await);
        tokio_test::assert_err!(limiter.request("application", "a").await);
        tokio_test::assert_ok!(limiter.request("application", "b").await);
        tokio_test::assert_ok!(limiter.request("other", "a").await);
    }

    #[test]
    fn test_limitee_is_opaque() {
        let limitee = limitee_of("secret-token");
        assert!(!limitee.contains("secret"));
        assert_eq!(limitee, limitee_of("secret-token"));
    }
}
