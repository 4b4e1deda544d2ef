//! Client-side aggregation of live payloads.
//!
//! Each feature folds its payloads into a view: a bounded list of recent
//! items, the latest value, the latest value per API, or per-minute usage
//! buckets.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use ratelane_proto::{LivePayload, UsageDatapoint};
use serde::Serialize;

/// Default number of minute buckets kept by [`UsageSeries`] (one day).
pub const DEFAULT_USAGE_BUCKETS: usize = 1440;

/// How a feature folds incoming payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Keep only the newest payload.
    Latest,
    /// Keep the newest payload per API.
    LatestPerApi,
    /// Sum usage into one bucket per minute and API.
    PerMinute,
    /// Sliding window of the last `n` payloads.
    Window(usize),
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::LatestPerApi => f.write_str("latest per api"),
            Self::PerMinute => f.write_str("per minute"),
            Self::Window(n) => write!(f, "window({n})"),
        }
    }
}

/// A view that absorbs payloads of type `P`.
pub trait Aggregator<P>: Send + 'static {
    /// Fold one payload in.
    fn push(&mut self, payload: P);

    /// Number of retained entries.
    fn len(&self) -> usize;

    /// Whether nothing has been retained.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The most recent `capacity` payloads, oldest first.
#[derive(Debug, Clone)]
pub struct RecentBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentBuffer<T> {
    /// Buffer holding at most `capacity` items (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest item.
    #[must_use]
    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    /// Items oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> RecentBuffer<T> {
    /// Copy of the items, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl<T: Send + 'static> Aggregator<T> for RecentBuffer<T> {
    fn push(&mut self, payload: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(payload);
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Only the newest payload.
#[derive(Debug, Clone)]
pub struct LatestValue<T> {
    value: Option<T>,
    updates: u64,
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self {
            value: None,
            updates: 0,
        }
    }
}

impl<T> LatestValue<T> {
    /// The newest payload.
    #[must_use]
    pub const fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Number of payloads seen.
    #[must_use]
    pub const fn updates(&self) -> u64 {
        self.updates
    }
}

impl<T: Send + 'static> Aggregator<T> for LatestValue<T> {
    fn push(&mut self, payload: T) {
        self.value = Some(payload);
        self.updates += 1;
    }

    fn len(&self) -> usize {
        usize::from(self.value.is_some())
    }
}

/// Newest payload per API, ordered by API id.
///
/// Payloads that are not scoped to an API are ignored.
#[derive(Debug, Clone)]
pub struct LatestByApi<T> {
    entries: BTreeMap<String, T>,
}

impl<T> Default for LatestByApi<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> LatestByApi<T> {
    /// Newest payload for `api_id`.
    #[must_use]
    pub fn get(&self, api_id: &str) -> Option<&T> {
        self.entries.get(api_id)
    }

    /// `(api_id, payload)` pairs ordered by API id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<T: LivePayload> Aggregator<T> for LatestByApi<T> {
    fn push(&mut self, payload: T) {
        let Some(api_id) = payload.api_id().map(str::to_owned) else {
            return;
        };
        self.entries.insert(api_id, payload);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Usage summed into one bucket per minute and API.
///
/// Bucket timestamps are truncated to the minute. Latency is averaged,
/// weighted by request count. Oldest buckets are evicted past `max_buckets`.
#[derive(Debug, Clone)]
pub struct UsageSeries {
    buckets: BTreeMap<(DateTime<Utc>, String), UsageDatapoint>,
    max_buckets: usize,
}

impl Default for UsageSeries {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_USAGE_BUCKETS)
    }
}

impl UsageSeries {
    /// Series keeping at most `max_buckets` buckets (at least one).
    #[must_use]
    pub fn with_capacity(max_buckets: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            max_buckets: max_buckets.max(1),
        }
    }

    /// Buckets ordered by minute, then API.
    pub fn points(&self) -> impl Iterator<Item = &UsageDatapoint> {
        self.buckets.values()
    }

    /// Newest bucket.
    #[must_use]
    pub fn latest(&self) -> Option<&UsageDatapoint> {
        self.buckets.values().next_back()
    }

    /// Requests across all buckets.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.buckets.values().map(|p| p.requests).sum()
    }

    /// Rate-limited requests across all buckets.
    #[must_use]
    pub fn total_rate_limited(&self) -> u64 {
        self.buckets.values().map(|p| p.rate_limited).sum()
    }
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(ts)
}

fn merge_latency(a: Option<f64>, a_weight: u64, b: Option<f64>, b_weight: u64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => {
            let total = a_weight + b_weight;
            if total == 0 {
                Some((a + b) / 2.0)
            } else {
                Some((a * a_weight as f64 + b * b_weight as f64) / total as f64)
            }
        }
        (Some(x), None) | (None, Some(x)) => Some(x),
        (None, None) => None,
    }
}

impl Aggregator<UsageDatapoint> for UsageSeries {
    fn push(&mut self, mut point: UsageDatapoint) {
        let minute = truncate_to_minute(point.timestamp);
        point.timestamp = minute;

        match self.buckets.get_mut(&(minute, point.api_id.clone())) {
            Some(bucket) => {
                bucket.avg_latency_ms = merge_latency(
                    bucket.avg_latency_ms,
                    bucket.requests,
                    point.avg_latency_ms,
                    point.requests,
                );
                bucket.requests += point.requests;
                bucket.rate_limited += point.rate_limited;
                bucket.errors += point.errors;
            }
            None => {
                self.buckets.insert((minute, point.api_id.clone()), point);
            }
        }

        while self.buckets.len() > self.max_buckets {
            self.buckets.pop_first();
        }
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use ratelane_proto::{ApiHealth, ApiStatusUpdate};

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, s).unwrap()
    }

    fn point(api: &str, ts: DateTime<Utc>, requests: u64, latency: Option<f64>) -> UsageDatapoint {
        UsageDatapoint {
            api_id: api.to_string(),
            timestamp: ts,
            requests,
            rate_limited: 1,
            errors: 0,
            avg_latency_ms: latency,
        }
    }

    // ==================== RecentBuffer ====================

    #[test]
    fn test_recent_buffer_evicts_oldest() {
        let mut buf = RecentBuffer::new(3);
        for i in 0..5 {
            buf.push(i);
        }
        assert_eq!(buf.to_vec(), vec![2, 3, 4]);
        assert_eq!(buf.latest(), Some(&4));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_recent_buffer_zero_capacity_keeps_one() {
        let mut buf = RecentBuffer::new(0);
        buf.push("a");
        buf.push("b");
        assert_eq!(buf.to_vec(), vec!["b"]);
    }

    // ==================== LatestValue / LatestByApi ====================

    #[test]
    fn test_latest_value_replaces() {
        let mut latest = LatestValue::default();
        assert!(latest.is_empty());
        latest.push(1);
        latest.push(2);
        assert_eq!(latest.get(), Some(&2));
        assert_eq!(latest.updates(), 2);
        assert_eq!(latest.len(), 1);
    }

    #[test]
    fn test_latest_by_api_keeps_one_per_api() {
        let status = |api: &str, status| ApiStatusUpdate {
            api_id: api.to_string(),
            status,
            message: None,
            checked_at: at(10, 0, 0),
        };

        let mut view = LatestByApi::default();
        view.push(status("payments", ApiHealth::Healthy));
        view.push(status("search", ApiHealth::Healthy));
        view.push(status("payments", ApiHealth::Down));

        assert_eq!(view.len(), 2);
        assert_eq!(view.get("payments").map(|s| s.status), Some(ApiHealth::Down));
        let order: Vec<&str> = view.iter().map(|(api, _)| api).collect();
        assert_eq!(order, vec!["payments", "search"]);
    }

    // ==================== UsageSeries ====================

    #[test]
    fn test_usage_series_merges_same_minute() {
        let mut series = UsageSeries::default();
        series.push(point("payments", at(10, 0, 5), 10, Some(100.0)));
        series.push(point("payments", at(10, 0, 55), 30, Some(200.0)));

        assert_eq!(series.len(), 1);
        let bucket = series.latest().unwrap();
        assert_eq!(bucket.timestamp, at(10, 0, 0));
        assert_eq!(bucket.requests, 40);
        assert_eq!(bucket.rate_limited, 2);
        assert_eq!(bucket.avg_latency_ms, Some(175.0));
    }

    #[test]
    fn test_usage_series_separates_apis_and_minutes() {
        let mut series = UsageSeries::default();
        series.push(point("payments", at(10, 0, 5), 1, None));
        series.push(point("search", at(10, 0, 5), 1, None));
        series.push(point("payments", at(10, 1, 0), 1, None));

        assert_eq!(series.len(), 3);
        assert_eq!(series.total_requests(), 3);
        assert_eq!(series.latest().unwrap().timestamp, at(10, 1, 0));
    }

    #[test]
    fn test_usage_series_evicts_oldest_minute() {
        let mut series = UsageSeries::with_capacity(2);
        series.push(point("a", at(10, 0, 0), 1, None));
        series.push(point("a", at(10, 1, 0), 1, None));
        series.push(point("a", at(10, 2, 0), 1, None));

        let minutes: Vec<_> = series.points().map(|p| p.timestamp).collect();
        assert_eq!(minutes, vec![at(10, 1, 0), at(10, 2, 0)]);
    }

    #[test]
    fn test_merge_latency_missing_side() {
        assert_eq!(merge_latency(None, 0, Some(5.0), 3), Some(5.0));
        assert_eq!(merge_latency(None, 0, None, 0), None);
        assert_eq!(merge_latency(Some(4.0), 0, Some(6.0), 0), Some(5.0));
    }

    proptest! {
        #[test]
        fn prop_usage_series_preserves_request_total(
            entries in prop::collection::vec((0u32..3, 0u32..60, 0u32..60, 0u64..1000), 1..50)
        ) {
            let mut series = UsageSeries::default();
            let mut expected = 0u64;
            for (api, minute, second, requests) in entries {
                expected += requests;
                series.push(point(&format!("api-{api}"), at(10, minute, second), requests, None));
            }
            prop_assert_eq!(series.total_requests(), expected);
            prop_assert!(series.len() <= 3 * 60);
        }

        #[test]
        fn prop_recent_buffer_never_exceeds_capacity(cap in 1usize..20, n in 0usize..100) {
            let mut buf = RecentBuffer::new(cap);
            for i in 0..n {
                buf.push(i);
            }
            prop_assert_eq!(buf.len(), n.min(cap));
        }
    }
}
