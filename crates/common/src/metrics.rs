/*
 * Export statistics.
 *
 * Atomic counters recorded by workers as export responses arrive. The
 * controller snapshots them periodically into the coordinator stream.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ExportMetrics {
    pub requests_sent: AtomicU64,
    pub retries: AtomicU64,
    pub files_returned: AtomicU64,
    pub data_bytes: AtomicU64,
    pub spans_completed: AtomicU64,
    pub request_nanos: AtomicU64,
}

impl ExportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one evaluated export request.
    pub fn record_export(&self, files: u64, bytes: u64, duration: Duration) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        self.files_returned.fetch_add(files, Ordering::Relaxed);
        self.data_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.request_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    /// Records a span re-enqueued after a lock conflict.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an assigned span reaching completion.
    pub fn record_span_completed(&self) {
        self.spans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExportMetricsSnapshot {
        ExportMetricsSnapshot {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            files_returned: self.files_returned.load(Ordering::Relaxed),
            data_bytes: self.data_bytes.load(Ordering::Relaxed),
            spans_completed: self.spans_completed.load(Ordering::Relaxed),
            request_nanos: self.request_nanos.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of export statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMetricsSnapshot {
    pub requests_sent: u64,
    pub retries: u64,
    pub files_returned: u64,
    pub data_bytes: u64,
    pub spans_completed: u64,
    pub request_nanos: u64,
}

impl ExportMetricsSnapshot {
    /// Average time spent per evaluated export.
    pub fn avg_request_time(&self) -> Duration {
        if self.requests_sent == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.request_nanos / self.requests_sent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_export() {
        let metrics = ExportMetrics::new();
        metrics.record_export(1, 500, Duration::from_millis(20));
        metrics.record_export(2, 300, Duration::from_millis(10));
        metrics.record_retry();
        metrics.record_span_completed();

        let snap = metrics.snapshot();
        assert_eq!(snap.requests_sent, 2);
        assert_eq!(snap.files_returned, 3);
        assert_eq!(snap.data_bytes, 800);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.spans_completed, 1);
        assert_eq!(snap.avg_request_time(), Duration::from_millis(15));
    }

    #[test]
    fn test_empty_snapshot() {
        let snap = ExportMetrics::new().snapshot();
        assert_eq!(snap, ExportMetricsSnapshot::default());
        assert_eq!(snap.avg_request_time(), Duration::ZERO);
    }
}
