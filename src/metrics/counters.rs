//! Atomic lifecycle counters
//!
//! Lock-free counters that can be safely updated from any driver task.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance
pub static METRICS: Metrics = Metrics::new();

/// Atomic metrics counters
pub struct Metrics {
    pub connections_constructed: AtomicU64,
    pub connections_opened: AtomicU64,
    pub connections_failed: AtomicU64,
    pub connections_closed: AtomicU64,
    pub connections_active: AtomicU64,
    /// Closed registry entries rebuilt on lookup
    pub connections_replaced: AtomicU64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            connections_constructed: AtomicU64::new(0),
            connections_opened: AtomicU64::new(0),
            connections_failed: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            connections_replaced: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn connection_constructed(&self) {
        self.connections_constructed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_failed(&self) {
        self.connections_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Only called for connections that reached `Open`
    #[inline]
    pub fn connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_replaced(&self) {
        self.connections_replaced.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_constructed: self.connections_constructed.load(Ordering::Relaxed),
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_failed: self.connections_failed.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            connections_replaced: self.connections_replaced.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub connections_constructed: u64,
    pub connections_opened: u64,
    pub connections_failed: u64,
    pub connections_closed: u64,
    pub connections_active: u64,
    pub connections_replaced: u64,
}
