//! Per-identity daily invocation quota.
//!
//! Each caller identity (normally the source address) gets a bucket that is
//! opened against the start of the current UTC day. The first request of a
//! day opens a fresh bucket; later requests increment it until the limit is
//! reached. A bucket from an earlier day is replaced, never carried over.
//!
//! State is process-local: several service instances each enforce their own
//! independent quota, so the limit is best-effort under horizontal scaling.
//! Requests with no identity are always allowed. This is abuse deterrence,
//! not a security control.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Default number of invocations per identity per day.
pub const DEFAULT_DAILY_LIMIT: u32 = 30;

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Whether the limiter is active. When `false` every call is allowed.
    pub enabled: bool,
    /// Maximum invocations per identity per UTC day. The first call of a
    /// day is always allowed, so `0` behaves like `1`.
    pub daily_limit: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

/// Counter for one identity within one day.
#[derive(Debug, Clone, PartialEq)]
struct RateBucket {
    count: u32,
    opened_at: DateTime<Utc>,
}

/// Outcome of [`RateLimiter::check_and_consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Calls left today after this one. `None` when no identity was given.
    pub remaining: Option<u32>,
}

impl RateDecision {
    fn unmetered() -> Self {
        Self {
            allowed: true,
            remaining: None,
        }
    }
}

/// Daily per-identity request counter.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, RateBucket>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.config.daily_limit
    }

    /// Check the quota for `identity` and consume one unit if allowed.
    pub fn check_and_consume(&self, identity: Option<&str>) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::unmetered();
        }
        let Some(identity) = identity.map(str::trim).filter(|id| !id.is_empty()) else {
            return RateDecision::unmetered();
        };

        let limit = self.config.daily_limit;
        let today = self.clock.day_start();
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());

        // Opportunistically drop buckets from previous days.
        if buckets.len() > 1024 {
            buckets.retain(|_, b| b.opened_at == today);
        }

        match buckets.get_mut(identity) {
            Some(bucket) if bucket.opened_at == today => {
                if bucket.count >= limit {
                    debug!(identity = %identity, limit, "Daily limit reached");
                    return RateDecision {
                        allowed: false,
                        remaining: Some(0),
                    };
                }
                bucket.count += 1;
                RateDecision {
                    allowed: true,
                    remaining: Some(limit - bucket.count),
                }
            }
            // Absent, or opened on an earlier day: the first request of the
            // day always goes through.
            _ => {
                buckets.insert(
                    identity.to_string(),
                    RateBucket {
                        count: 1,
                        opened_at: today,
                    },
                );
                RateDecision {
                    allowed: true,
                    remaining: Some(limit.saturating_sub(1)),
                }
            }
        }
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.buckets.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("enabled", &self.config.enabled)
            .field("daily_limit", &self.config.daily_limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn limiter(limit: u32) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::with_clock(
            RateLimitConfig {
                enabled: true,
                daily_limit: limit,
            },
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_config_defaults() {
        let cfg = RateLimitConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.daily_limit, 30);
    }

    #[test]
    fn test_allows_exactly_limit_calls() {
        let (limiter, _) = limiter(30);
        for i in 0..30 {
            let d = limiter.check_and_consume(Some("10.0.0.1"));
            assert!(d.allowed, "call {} should be allowed", i + 1);
            assert_eq!(d.remaining, Some(30 - (i + 1)));
        }
        let rejected = limiter.check_and_consume(Some("10.0.0.1"));
        assert!(!rejected.allowed);
        assert_eq!(rejected.remaining, Some(0));
    }

    #[test]
    fn test_new_day_resets_bucket() {
        let (limiter, clock) = limiter(2);
        assert!(limiter.check_and_consume(Some("ip")).allowed);
        assert!(limiter.check_and_consume(Some("ip")).allowed);
        assert!(!limiter.check_and_consume(Some("ip")).allowed);

        clock.advance(chrono::Duration::hours(14));
        assert!(limiter.check_and_consume(Some("ip")).allowed);
        assert!(limiter.check_and_consume(Some("ip")).allowed);
        assert!(!limiter.check_and_consume(Some("ip")).allowed);
    }

    #[test]
    fn test_missing_identity_fails_open() {
        let (limiter, _) = limiter(1);
        for _ in 0..5 {
            let d = limiter.check_and_consume(None);
            assert!(d.allowed);
            assert_eq!(d.remaining, None);
            assert!(limiter.check_and_consume(Some("  ")).allowed);
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_identities_tracked_independently() {
        let (limiter, _) = limiter(1);
        assert!(limiter.check_and_consume(Some("a")).allowed);
        assert!(limiter.check_and_consume(Some("b")).allowed);
        assert!(!limiter.check_and_consume(Some("a")).allowed);
    }

    #[test]
    fn test_disabled_allows_everything() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            daily_limit: 0,
        });
        assert!(limiter.check_and_consume(Some("ip")).allowed);
    }

    #[test]
    fn test_zero_limit_still_admits_first_call_of_day() {
        let (limiter, clock) = limiter(0);
        let first = limiter.check_and_consume(Some("ip"));
        assert!(first.allowed);
        assert_eq!(first.remaining, Some(0));
        assert!(!limiter.check_and_consume(Some("ip")).allowed);

        clock.advance(chrono::Duration::days(1));
        assert!(limiter.check_and_consume(Some("ip")).allowed);
    }

    #[test]
    fn test_config_serde_partial() {
        let cfg: RateLimitConfig = serde_json::from_str(r#"{"daily_limit": 5}"#).unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.daily_limit, 5);
    }
}
