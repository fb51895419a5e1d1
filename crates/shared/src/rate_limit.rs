//! Fixed-window rate limiting on the shared quota store.
//!
//! "N actions per window per identity" with a fixed-window counter: the
//! count resets at each window boundary instead of sliding, so a burst
//! straddling a boundary can reach up to 2x the nominal rate. That is an
//! accepted approximation, not a bug (see the window-boundary test).

use serde::Serialize;
use time::OffsetDateTime;

use crate::store::QuotaStore;

/// Window granularity for a quota. The window id is derived from wall
/// clock truncated to the granularity, so every instance of the service
/// agrees on the current bucket without coordination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaWindow {
    /// Rolling 60-second buckets (unix timestamp / 60).
    Minute,
    /// UTC calendar day.
    Day,
}

impl QuotaWindow {
    pub fn ttl_seconds(&self) -> u64 {
        match self {
            QuotaWindow::Minute => 60,
            QuotaWindow::Day => 86_400,
        }
    }

    /// Deterministic bucket label for the given instant.
    pub fn id_at(&self, now: OffsetDateTime) -> String {
        match self {
            QuotaWindow::Minute => (now.unix_timestamp() / 60).to_string(),
            QuotaWindow::Day => now.date().to_string(),
        }
    }

    pub fn current_id(&self) -> String {
        self.id_at(OffsetDateTime::now_utc())
    }

    /// Seconds until the current window rolls over, used as a retry-after
    /// hint on denial.
    fn seconds_until_rollover(&self, now: OffsetDateTime) -> u64 {
        let window = self.ttl_seconds() as i64;
        let elapsed = now.unix_timestamp().rem_euclid(window);
        (window - elapsed) as u64
    }
}

/// Outcome of a quota check.
#[derive(Clone, Debug, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    /// Actions left in the current window after this check.
    pub remaining: u32,
    /// Set on denial: seconds until the window rolls over.
    pub retry_after_seconds: Option<u64>,
}

/// Generic per-identity fixed-window rate limiter.
///
/// Used for auth abuse throttling (per-IP, per-minute) and the free-tier
/// daily signal quota (per-account, per-day).
#[derive(Clone)]
pub struct RateLimiter {
    store: QuotaStore,
}

impl RateLimiter {
    pub fn new(store: QuotaStore) -> Self {
        Self { store }
    }

    /// Check the quota for `(purpose, identity)` and consume one action if
    /// allowed. Denial never consumes quota: the stored counter tops out
    /// at exactly `limit` no matter how many further attempts arrive in
    /// the same window.
    pub async fn check_and_consume(
        &self,
        purpose: &str,
        identity: &str,
        limit: u32,
        window: QuotaWindow,
    ) -> RateLimitResult {
        self.check_and_consume_at(purpose, identity, limit, window, OffsetDateTime::now_utc())
            .await
    }

    /// Same as [`check_and_consume`](Self::check_and_consume) with an
    /// explicit clock, so window rollover is testable.
    pub async fn check_and_consume_at(
        &self,
        purpose: &str,
        identity: &str,
        limit: u32,
        window: QuotaWindow,
        now: OffsetDateTime,
    ) -> RateLimitResult {
        if limit == 0 {
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_seconds: Some(window.seconds_until_rollover(now)),
            };
        }

        let key = counter_key(purpose, identity, &window.id_at(now));
        let count = self
            .store
            .get(&key)
            .await
            .and_then(|value| value.parse::<i64>().ok());

        match count {
            None => {
                // First action in this window: initialize the counter and
                // bind it to the window length so it resets to absent when
                // the window ends.
                self.store.set_with_ttl(&key, "1", window.ttl_seconds()).await;
                RateLimitResult {
                    allowed: true,
                    remaining: limit - 1,
                    retry_after_seconds: None,
                }
            }
            Some(current) if current < limit as i64 => {
                let new_count = self.store.increment(&key).await;
                RateLimitResult {
                    allowed: true,
                    remaining: (limit as i64 - new_count).max(0) as u32,
                    retry_after_seconds: None,
                }
            }
            Some(_) => RateLimitResult {
                allowed: false,
                remaining: 0,
                retry_after_seconds: Some(window.seconds_until_rollover(now)),
            },
        }
    }

    /// Current counter value for the window, without consuming quota.
    pub async fn current_count(&self, purpose: &str, identity: &str, window: QuotaWindow) -> u32 {
        self.current_count_at(purpose, identity, window, OffsetDateTime::now_utc())
            .await
    }

    pub async fn current_count_at(
        &self,
        purpose: &str,
        identity: &str,
        window: QuotaWindow,
        now: OffsetDateTime,
    ) -> u32 {
        let key = counter_key(purpose, identity, &window.id_at(now));
        self.store
            .get(&key)
            .await
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(0)
    }
}

fn counter_key(purpose: &str, identity: &str, window_id: &str) -> String {
    format!("rate:{}:{}:{}", purpose, identity, window_id)
}
