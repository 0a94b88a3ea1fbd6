//! Pipeline counters.
//!
//! Every stage of the notification pipeline bumps a counter here so that
//! dropped samples, malformed payloads and persistence failures are
//! observable without being treated as errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::mailbox::PushOutcome;

/// Thread-safe pipeline counters.
#[derive(Debug)]
pub struct PipelineMetrics {
    started_at: Instant,
    signals_dispatched: AtomicU64,
    measurements_decoded: AtomicU64,
    malformed_payloads: AtomicU64,
    mailbox_delivered: AtomicU64,
    mailbox_dropped: AtomicU64,
    measurements_published: AtomicU64,
    observer_drops: AtomicU64,
    persistence_failures: AtomicU64,
    live_observers: AtomicU64,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            signals_dispatched: AtomicU64::new(0),
            measurements_decoded: AtomicU64::new(0),
            malformed_payloads: AtomicU64::new(0),
            mailbox_delivered: AtomicU64::new(0),
            mailbox_dropped: AtomicU64::new(0),
            measurements_published: AtomicU64::new(0),
            observer_drops: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            live_observers: AtomicU64::new(0),
        }
    }

    /// Create zeroed counters behind an `Arc`.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// A signal was handed to the router.
    pub fn record_dispatch(&self) {
        self.signals_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// A notification decoded into a measurement.
    pub fn record_decoded(&self) {
        self.measurements_decoded.fetch_add(1, Ordering::Relaxed);
    }

    /// A notification on the watched path did not have the expected shape.
    pub fn record_malformed(&self) {
        self.malformed_payloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Count the outcome of a mailbox push.
    pub fn record_push(&self, outcome: PushOutcome) {
        match outcome {
            PushOutcome::Delivered => {
                self.mailbox_delivered.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Dropped => {
                self.mailbox_dropped.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::Closed => {}
        }
    }

    /// A measurement was fanned out to observers.
    pub fn record_published(&self) {
        self.measurements_published.fetch_add(1, Ordering::Relaxed);
    }

    /// An observer's sink was full and it missed a measurement.
    pub fn record_observer_drop(&self) {
        self.observer_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// The persistence sink rejected a measurement.
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A live observer subscribed.
    pub fn observer_added(&self) {
        self.live_observers.fetch_add(1, Ordering::Relaxed);
    }

    /// A live observer went away.
    pub fn observer_removed(&self) {
        let _ = self
            .live_observers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Get a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            signals_dispatched: self.signals_dispatched.load(Ordering::Relaxed),
            measurements_decoded: self.measurements_decoded.load(Ordering::Relaxed),
            malformed_payloads: self.malformed_payloads.load(Ordering::Relaxed),
            mailbox_delivered: self.mailbox_delivered.load(Ordering::Relaxed),
            mailbox_dropped: self.mailbox_dropped.load(Ordering::Relaxed),
            measurements_published: self.measurements_published.load(Ordering::Relaxed),
            observer_drops: self.observer_drops.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            live_observers: self.live_observers.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds since the counters were created.
    pub uptime_secs: u64,
    /// Signals dispatched by the router.
    pub signals_dispatched: u64,
    /// Notifications decoded into measurements.
    pub measurements_decoded: u64,
    /// Notifications skipped because of their shape.
    pub malformed_payloads: u64,
    /// Measurements accepted by the mailbox.
    pub mailbox_delivered: u64,
    /// Measurements discarded because the mailbox was occupied.
    pub mailbox_dropped: u64,
    /// Measurements fanned out to observers.
    pub measurements_published: u64,
    /// Measurements an observer missed because its sink was full.
    pub observer_drops: u64,
    /// Persistence errors (logged, not retried).
    pub persistence_failures: u64,
    /// Currently subscribed live observers.
    pub live_observers: u64,
}
