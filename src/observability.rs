//! Pipeline counters and tracing setup

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber; `RUST_LOG` wins over `default_directive`
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Counters recorded by the enrichment pipeline and queue
#[derive(Debug, Default)]
pub struct Metrics {
    entries_enqueued: AtomicU64,
    runs_completed: AtomicU64,
    runs_failed: AtomicU64,
    fetch_failures: AtomicU64,
    summarization_failures: AtomicU64,
    notifications_sent: AtomicU64,
    notification_failures: AtomicU64,
    stale_writes: AtomicU64,
}

macro_rules! counter {
    ($method:ident, $field:ident) => {
        pub fn $method(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = stringify!($field), "Metric incremented");
        }
    };
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    counter!(entry_enqueued, entries_enqueued);
    counter!(run_completed, runs_completed);
    counter!(run_failed, runs_failed);
    counter!(fetch_failed, fetch_failures);
    counter!(summarization_failed, summarization_failures);
    counter!(notification_sent, notifications_sent);
    counter!(notification_failed, notification_failures);
    counter!(stale_write, stale_writes);

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_enqueued: self.entries_enqueued.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            summarization_failures: self.summarization_failures.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notification_failures: self.notification_failures.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub entries_enqueued: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub fetch_failures: u64,
    pub summarization_failures: u64,
    pub notifications_sent: u64,
    pub notification_failures: u64,
    pub stale_writes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.run_completed();
        metrics.run_completed();
        metrics.fetch_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_completed, 2);
        assert_eq!(snapshot.fetch_failures, 1);
        assert_eq!(snapshot.notifications_sent, 0);
    }
}
