/*
 * Settings for the backup data processor.
 *
 * Mirrors the cluster settings that govern export behavior. Durations and
 * sizes default to the production values; tests override them through the
 * builder.
 */

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct ProcessorSettings {
    /// Time since the read-as-of time above which retried reads run with
    /// priority.
    pub read_with_priority_after: Duration,

    /// Per-prior-attempt minimum wait before making another attempt.
    pub read_retry_delay: Duration,

    /// Deadline for a single export attempt; exceeding it fails the backup.
    pub read_timeout: Duration,

    /// Target size for individual output files.
    pub file_size: u64,

    /// Split backup data on timestamps when writing revision history.
    pub split_keys_on_timestamps: bool,

    /// Pre-split request spans to range boundaries before requesting them.
    pub presplit_request_spans: bool,

    /// Log each export request and response verbosely.
    pub export_request_verbose_tracing: bool,

    /// Concurrent export request limit; the worker cap is twice this.
    pub export_requests_limit: usize,

    /// Upload chunk size for external-storage writers. Each worker holds one
    /// write buffer, so this is also the per-worker memory reservation.
    pub write_chunk_size: u64,

    /// Target SST size requested from the store per export.
    pub export_target_file_size: u64,

    /// Route output to a discard sink (testing only).
    pub testing_discard_data: bool,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            read_with_priority_after: Duration::from_secs(60),
            read_retry_delay: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5 * 60),
            file_size: 128 << 20,
            split_keys_on_timestamps: true,
            presplit_request_spans: true,
            export_request_verbose_tracing: false,
            export_requests_limit: 3,
            write_chunk_size: 8 << 20,
            export_target_file_size: 16 << 20,
            testing_discard_data: false,
        }
    }
}

impl ProcessorSettings {
    /// Upper bound on worker concurrency.
    pub fn worker_cap(&self) -> usize {
        self.export_requests_limit * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ProcessorSettings::default();
        assert_eq!(settings.read_with_priority_after, Duration::from_secs(60));
        assert_eq!(settings.read_retry_delay, Duration::from_secs(5));
        assert_eq!(settings.read_timeout, Duration::from_secs(300));
        assert_eq!(settings.file_size, 128 << 20);
        assert!(settings.split_keys_on_timestamps);
        assert!(settings.presplit_request_spans);
        assert_eq!(settings.worker_cap(), 6);
    }

    #[test]
    fn test_serde_round_trip() {
        let settings = ProcessorSettings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: ProcessorSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.file_size, settings.file_size);
        assert_eq!(back.read_timeout, settings.read_timeout);
    }

    #[test]
    fn test_builder_overrides() {
        let settings = ProcessorSettingsBuilder::default()
            .file_size(1024u64)
            .read_retry_delay(Duration::from_millis(10))
            .build()
            .unwrap();
        assert_eq!(settings.file_size, 1024);
        assert_eq!(settings.read_retry_delay, Duration::from_millis(10));
        // Untouched fields keep their defaults.
        assert_eq!(settings.export_target_file_size, 16 << 20);
    }
}
