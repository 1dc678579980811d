//! Fixed-window request rate limiting.
//!
//! Three buckets: general API traffic (keyed by user id, or client IP
//! when unauthenticated), AI endpoints (per user), and auth endpoints
//! (per client IP). Windows are one minute wide; a rejected request
//! carries the seconds until the window rolls over for `Retry-After`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;

/// Which limit applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// General API traffic: 100/min.
    General,
    /// AI endpoints: 20/min.
    Ai,
    /// Auth endpoints: 10/min per IP.
    Auth,
}

/// Verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Within the limit.
    Allowed,
    /// Over the limit; retry after this many seconds.
    Limited {
        /// Seconds until the window resets.
        retry_after: u64,
    },
}

#[derive(Debug, Clone, Copy)]
struct Window {
    minute: u64,
    count: u32,
}

/// Process-local fixed-window rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<(Bucket, String), Window>>,
}

impl RateLimiter {
    /// Build a limiter from config.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn limit_for(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::General => self.config.general_per_minute,
            Bucket::Ai => self.config.ai_per_minute,
            Bucket::Auth => self.config.auth_per_minute,
        }
    }

    /// Count one request against `(bucket, key)` and decide.
    pub fn check(&self, bucket: Bucket, key: &str) -> Decision {
        let now_seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.check_at(bucket, key, now_seconds)
    }

    /// Clock-injected variant for tests.
    pub fn check_at(&self, bucket: Bucket, key: &str, now_seconds: u64) -> Decision {
        let minute = now_seconds / 60;
        let limit = self.limit_for(bucket);

        let Ok(mut windows) = self.windows.lock() else {
            return Decision::Allowed;
        };

        // Drop stale windows opportunistically so the map stays bounded.
        if windows.len() > 10_000 {
            windows.retain(|_, w| w.minute >= minute);
        }

        let window = windows
            .entry((bucket, key.to_owned()))
            .or_insert(Window { minute, count: 0 });
        if window.minute != minute {
            window.minute = minute;
            window.count = 0;
        }

        if window.count >= limit {
            return Decision::Limited {
                retry_after: 60 - (now_seconds % 60),
            };
        }
        window.count += 1;
        Decision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            general_per_minute: 3,
            ai_per_minute: 2,
            auth_per_minute: 1,
        })
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let limiter = limiter();
        let t = 600; // minute 10
        assert_eq!(limiter.check_at(Bucket::General, "u1", t), Decision::Allowed);
        assert_eq!(limiter.check_at(Bucket::General, "u1", t), Decision::Allowed);
        assert_eq!(limiter.check_at(Bucket::General, "u1", t), Decision::Allowed);
        assert!(matches!(
            limiter.check_at(Bucket::General, "u1", t),
            Decision::Limited { .. }
        ));
    }

    #[test]
    fn test_window_rollover_resets_count() {
        let limiter = limiter();
        for _ in 0..3 {
            limiter.check_at(Bucket::General, "u1", 600);
        }
        assert!(matches!(
            limiter.check_at(Bucket::General, "u1", 600),
            Decision::Limited { .. }
        ));
        assert_eq!(
            limiter.check_at(Bucket::General, "u1", 660),
            Decision::Allowed
        );
    }

    #[test]
    fn test_buckets_are_independent() {
        let limiter = limiter();
        assert_eq!(limiter.check_at(Bucket::Auth, "ip1", 0), Decision::Allowed);
        assert!(matches!(
            limiter.check_at(Bucket::Auth, "ip1", 0),
            Decision::Limited { .. }
        ));
        // Same key in another bucket is unaffected.
        assert_eq!(limiter.check_at(Bucket::Ai, "ip1", 0), Decision::Allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter();
        limiter.check_at(Bucket::Auth, "ip1", 0);
        assert_eq!(limiter.check_at(Bucket::Auth, "ip2", 0), Decision::Allowed);
    }

    #[test]
    fn test_retry_after_counts_to_window_edge() {
        let limiter = limiter();
        limiter.check_at(Bucket::Auth, "ip1", 615);
        let Decision::Limited { retry_after } = limiter.check_at(Bucket::Auth, "ip1", 615) else {
            panic!("expected limited");
        };
        assert_eq!(retry_after, 45);
    }
}
