//! Delivery metrics for the progress bus.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters describing how progress events reach observers.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Events appended to any job log.
    published: AtomicU64,
    /// Live deliveries into observer backlogs.
    delivered: AtomicU64,
    /// Events handed to late observers from history.
    replayed: AtomicU64,
    /// Observers attached.
    attached: AtomicU64,
    /// Observers that went away on their own.
    detached: AtomicU64,
    /// Observers disconnected for exceeding their backlog.
    overruns: AtomicU64,
    /// Last time an observer was disconnected for overrun.
    last_overrun_time: RwLock<Option<Instant>>,
}

impl DeliveryMetrics {
    /// Records an appended event.
    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a live delivery to one observer.
    pub fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a replay of `count` historical events.
    pub fn record_replay(&self, count: usize) {
        self.replayed.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a new observer.
    pub fn record_attach(&self) {
        self.attached.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an observer that dropped its handle.
    pub fn record_detach(&self) {
        self.detached.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an observer disconnected for overrun.
    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
        *self.last_overrun_time.write() = Some(Instant::now());
    }

    /// Returns the number of published events.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Returns the number of live deliveries.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of replayed events.
    #[must_use]
    pub fn replayed(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    /// Returns the number of attached observers.
    #[must_use]
    pub fn attached(&self) -> u64 {
        self.attached.load(Ordering::Relaxed)
    }

    /// Returns the number of detached observers.
    #[must_use]
    pub fn detached(&self) -> u64 {
        self.detached.load(Ordering::Relaxed)
    }

    /// Returns the number of overrun disconnects.
    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Seconds since the last overrun, if any.
    #[must_use]
    pub fn seconds_since_last_overrun(&self) -> Option<f64> {
        self.last_overrun_time
            .read()
            .map(|at| at.elapsed().as_secs_f64())
    }

    /// Percentage of attached observers that were disconnected for overrun.
    #[must_use]
    pub fn overrun_rate(&self) -> f64 {
        let attached = self.attached();
        if attached == 0 {
            0.0
        } else {
            (self.overruns() as f64 / attached as f64) * 100.0
        }
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "published": self.published(),
            "delivered": self.delivered(),
            "replayed": self.replayed(),
            "attached": self.attached(),
            "detached": self.detached(),
            "overruns": self.overruns(),
            "overrun_rate_percent": (self.overrun_rate() * 100.0).round() / 100.0,
            "seconds_since_last_overrun": self.seconds_since_last_overrun(),
        })
    }
}
