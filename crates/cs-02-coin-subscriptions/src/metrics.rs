//! Metrics for subscription handling and coin state notifications
//!
//! Lock-free counters shared between the request handlers and the notifier.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the subscription service.
#[derive(Debug, Default)]
pub struct NotifierMetrics {
    /// Keys accepted into the registry
    pub subscriptions_added: AtomicU64,
    /// Registration calls that hit a peer's cap
    pub capacity_truncations: AtomicU64,
    /// `CoinStateUpdate` messages queued
    pub updates_sent: AtomicU64,
    /// Coin states carried by those messages
    pub coin_states_sent: AtomicU64,
    /// Messages that could not be queued
    pub send_failures: AtomicU64,
}

impl NotifierMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration call
    pub fn record_subscribe(&self, added: usize, truncated: bool) {
        self.subscriptions_added
            .fetch_add(added as u64, Ordering::Relaxed);
        if truncated {
            self.capacity_truncations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one delivered update
    pub fn record_update(&self, items: usize) {
        self.updates_sent.fetch_add(1, Ordering::Relaxed);
        self.coin_states_sent
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    /// Record a failed delivery
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> NotifierMetricsSnapshot {
        NotifierMetricsSnapshot {
            subscriptions_added: self.subscriptions_added.load(Ordering::Relaxed),
            capacity_truncations: self.capacity_truncations.load(Ordering::Relaxed),
            updates_sent: self.updates_sent.load(Ordering::Relaxed),
            coin_states_sent: self.coin_states_sent.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`NotifierMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierMetricsSnapshot {
    /// Keys accepted into the registry
    pub subscriptions_added: u64,
    /// Registration calls that hit a peer's cap
    pub capacity_truncations: u64,
    /// `CoinStateUpdate` messages queued
    pub updates_sent: u64,
    /// Coin states carried by those messages
    pub coin_states_sent: u64,
    /// Messages that could not be queued
    pub send_failures: u64,
}
