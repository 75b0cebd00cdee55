//! Passive tracking of exchange-reported rate-limit usage.
//!
//! Responses on connections that return limits carry the full current picture, so every
//! report replaces the previous snapshot. Nothing here throttles requests.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use crate::ws::types::response::{RateLimit, RateLimitType};

#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    /// Limits in the order the exchange reported them
    pub limits: Vec<RateLimit>,
    pub updated_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    /// Limits of one type, e.g. every `ORDERS` window.
    pub fn of_type(&self, rate_limit_type: RateLimitType) -> impl Iterator<Item = &RateLimit> {
        self.limits
            .iter()
            .filter(move |limit| limit.rate_limit_type == rate_limit_type)
    }
}

#[derive(Debug, Default)]
pub struct RateLimitTracker {
    snapshot: RwLock<Option<RateLimitSnapshot>>,
}

impl RateLimitTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the snapshot. An empty report is still a report.
    pub fn record(&self, limits: Vec<RateLimit>) {
        let snapshot = RateLimitSnapshot {
            limits,
            updated_at: Utc::now(),
        };

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    /// Latest snapshot, `None` until the first response that reports limits.
    #[must_use]
    pub fn snapshot(&self) -> Option<RateLimitSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(count, limit)` of the most constrained window of `rate_limit_type`.
    #[must_use]
    pub fn usage(&self, rate_limit_type: RateLimitType) -> Option<(u64, u64)> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);

        guard
            .as_ref()?
            .of_type(rate_limit_type)
            .min_by_key(|limit| limit.remaining())
            .map(|limit| (limit.count, limit.limit))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn limits(value: serde_json::Value) -> Vec<RateLimit> {
        serde_json::from_value(value).expect("valid limits")
    }

    #[test]
    fn empty_until_first_report() {
        let tracker = RateLimitTracker::new();

        assert_eq!(tracker.snapshot(), None);
        assert_eq!(tracker.usage(RateLimitType::RequestWeight), None);
    }

    #[test]
    fn report_replaces_snapshot_wholesale() {
        let tracker = RateLimitTracker::new();
        tracker.record(limits(json!([
            { "rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "intervalNum": 1, "limit": 1200, "count": 5 },
            { "rateLimitType": "ORDERS", "interval": "SECOND", "intervalNum": 10, "limit": 50, "count": 1 }
        ])));
        tracker.record(limits(json!([
            { "rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "intervalNum": 1, "limit": 1200, "count": 7 }
        ])));

        let snapshot = tracker.snapshot().expect("snapshot");
        assert_eq!(snapshot.limits.len(), 1, "old ORDERS entry must not survive");
        assert_eq!(tracker.usage(RateLimitType::RequestWeight), Some((7, 1200)));
        assert_eq!(tracker.usage(RateLimitType::Orders), None);
    }

    #[test]
    fn usage_picks_tightest_window() {
        let tracker = RateLimitTracker::new();
        tracker.record(limits(json!([
            { "rateLimitType": "ORDERS", "interval": "SECOND", "intervalNum": 10, "limit": 50, "count": 45 },
            { "rateLimitType": "ORDERS", "interval": "DAY", "intervalNum": 1, "limit": 160_000, "count": 100 }
        ])));

        assert_eq!(tracker.usage(RateLimitType::Orders), Some((45, 50)));
    }
}
