//! Observability metrics for admission decisions.
//!
//! Provides counters about admission behavior for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking admission statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Requests allowed through, including bypassed ones
    requests_allowed: AtomicU64,
    /// Requests denied by a rate rule
    requests_rate_limited: AtomicU64,
    /// Requests denied by an active ban
    requests_banned: AtomicU64,
    /// Explicit reports recorded
    reports_recorded: AtomicU64,
    /// Idle clients removed from the registry
    clients_purged: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_allowed(&self) {
        self.inner.requests_allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rate_limited(&self) {
        self.inner
            .requests_rate_limited
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_banned(&self) {
        self.inner.requests_banned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_report(&self) {
        self.inner.reports_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_purged(&self, count: usize) {
        self.inner
            .clients_purged
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get the total number of requests allowed.
    pub fn requests_allowed(&self) -> u64 {
        self.inner.requests_allowed.load(Ordering::Relaxed)
    }

    /// Get the total number of requests denied by rate rules.
    pub fn requests_rate_limited(&self) -> u64 {
        self.inner.requests_rate_limited.load(Ordering::Relaxed)
    }

    /// Get the total number of requests denied by bans.
    pub fn requests_banned(&self) -> u64 {
        self.inner.requests_banned.load(Ordering::Relaxed)
    }

    /// Get the total number of reports recorded.
    pub fn reports_recorded(&self) -> u64 {
        self.inner.reports_recorded.load(Ordering::Relaxed)
    }

    /// Get the total number of clients purged.
    pub fn clients_purged(&self) -> u64 {
        self.inner.clients_purged.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_allowed: self.requests_allowed(),
            requests_rate_limited: self.requests_rate_limited(),
            requests_banned: self.requests_banned(),
            reports_recorded: self.reports_recorded(),
            clients_purged: self.clients_purged(),
        }
    }

    /// Reset all metrics to zero.
    pub fn reset(&self) {
        self.inner.requests_allowed.store(0, Ordering::Relaxed);
        self.inner.requests_rate_limited.store(0, Ordering::Relaxed);
        self.inner.requests_banned.store(0, Ordering::Relaxed);
        self.inner.reports_recorded.store(0, Ordering::Relaxed);
        self.inner.clients_purged.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Requests allowed through, including bypassed ones
    pub requests_allowed: u64,
    /// Requests denied by a rate rule
    pub requests_rate_limited: u64,
    /// Requests denied by an active ban
    pub requests_banned: u64,
    /// Explicit reports recorded
    pub reports_recorded: u64,
    /// Idle clients removed from the registry
    pub clients_purged: u64,
}

impl MetricsSnapshot {
    /// Total requests denied for any reason.
    pub fn requests_denied(&self) -> u64 {
        self.requests_rate_limited
            .saturating_add(self.requests_banned)
    }

    /// Total requests decided (allowed + denied).
    pub fn total_requests(&self) -> u64 {
        self.requests_allowed.saturating_add(self.requests_denied())
    }

    /// Ratio of denied requests to all decided requests (0.0 to 1.0).
    ///
    /// Returns 0.0 if no requests have been decided.
    pub fn denial_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.requests_denied() as f64 / total as f64
        }
    }
}
