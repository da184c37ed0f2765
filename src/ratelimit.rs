//! Fixed-window request rate limiter
//!
//! Counters live in Redis so every process sees the same window. The
//! first request in a window sets the window expiry; counts above the
//! maximum are rejected with a retry-after hint. If Redis is unreachable
//! the limiter fails open: this is cross-cutting middleware, and
//! availability wins over strict enforcement here (unlike the search
//! cooldown, which fails closed).

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::warn;

/// Limiter key: authenticated identity when available, else network origin
pub fn limiter_key(identity: Option<&str>, addr: &SocketAddr) -> String {
    match identity {
        Some(id) => format!("rl:user:{}", id),
        None => format!("rl:ip:{}", addr.ip()),
    }
}

/// Outcome of a limiter check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed,
    /// Over the window maximum; retry after this many seconds
    Limited { retry_after_secs: u64 },
}

/// Fixed-window counter backed by the shared cache
#[derive(Clone)]
pub struct RateLimiter {
    conn: ConnectionManager,
    window: Duration,
    max: u64,
}

impl RateLimiter {
    pub fn new(conn: ConnectionManager, window: Duration, max: u64) -> Self {
        Self { conn, window, max }
    }

    /// Count a request against `key`. Any cache error logs and allows.
    pub async fn check(&self, key: &str) -> LimitDecision {
        let mut conn = self.conn.clone();

        let count: u64 = match conn.incr(key, 1u64).await {
            Ok(c) => c,
            Err(e) => {
                warn!("rate limiter cache unreachable, failing open: {}", e);
                return LimitDecision::Allowed;
            }
        };

        // First request in the window owns the expiry
        if count == 1 {
            if let Err(e) = conn
                .expire::<_, ()>(key, self.window.as_secs() as i64)
                .await
            {
                warn!("rate limiter expiry not set, failing open: {}", e);
                return LimitDecision::Allowed;
            }
        }

        if count <= self.max {
            return LimitDecision::Allowed;
        }

        let retry_after_secs = match conn.ttl::<_, i64>(key).await {
            Ok(ttl) if ttl > 0 => ttl as u64,
            Ok(_) => self.window.as_secs(),
            Err(e) => {
                warn!("rate limiter ttl lookup failed: {}", e);
                self.window.as_secs()
            }
        };

        LimitDecision::Limited { retry_after_secs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_key_prefers_identity() {
        let addr: SocketAddr = "203.0.113.9:443".parse().unwrap();
        assert_eq!(limiter_key(Some("amira"), &addr), "rl:user:amira");
        assert_eq!(limiter_key(None, &addr), "rl:ip:203.0.113.9");
    }

    // Window counting is exercised against a live Redis in deployment
    // smoke tests; the driver round-trip is not unit-testable here.
}
