/*
 * Export caller.
 *
 * Builds and sends one export request against the store. The one-byte
 * response target makes the store paginate after a single SST, and mid-key
 * splitting stays on for every follow-up of a span once the first response
 * split mid-key.
 */

use crate::splitter::SpanRequest;
use backup_common::{BackupError, ProcessorSettings, Result, Timestamp};
use backup_proto::{
    AdmissionHeader, AdmissionPriority, AdmissionSource, ExportError, ExportRequest,
    ExportResponse, MvccFilter, RequestHeader, UserPriority, WaitPolicy,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Non-transactional access to the store's export evaluation.
#[async_trait]
pub trait KvExporter: Send + Sync {
    async fn export(&self, req: ExportRequest)
        -> std::result::Result<ExportResponse, ExportError>;
}

/// Response-size sentinel that forces pagination after one SST.
pub const TARGET_BYTES_SENTINEL: i64 = 1;

/// Builds the request for one attempt at `span`.
pub fn build_export_request(
    span: &SpanRequest,
    mvcc_filter: MvccFilter,
    settings: &ProcessorSettings,
    priority: bool,
) -> ExportRequest {
    let mut split_mid_key = settings.split_keys_on_timestamps;
    // Once a span started splitting we must continue until it is finished,
    // whatever the setting currently says.
    if !span.first_key_ts.is_empty() {
        split_mid_key = true;
    }

    let header = if priority {
        // Reads this far in the past just abort any transactions they hit.
        RequestHeader {
            target_bytes: TARGET_BYTES_SENTINEL,
            timestamp: span.end,
            return_elastic_resume_spans: true,
            wait_policy: WaitPolicy::Block,
            user_priority: UserPriority::Max,
        }
    } else {
        // Erroring out on conflicting transactions lets the worker move on
        // to other spans and come back to this one later.
        RequestHeader {
            target_bytes: TARGET_BYTES_SENTINEL,
            timestamp: span.end,
            return_elastic_resume_spans: true,
            wait_policy: WaitPolicy::Error,
            user_priority: UserPriority::Normal,
        }
    };

    let admission = AdmissionHeader {
        priority: AdmissionPriority::BulkNormal,
        create_time_nanos: Timestamp::now().wall_nanos,
        source: AdmissionSource::Sql,
        no_memory_reserved_at_source: true,
    };

    ExportRequest {
        span: span.span.clone(),
        resume_key_ts: span.first_key_ts,
        start_time: span.start,
        mvcc_filter,
        target_file_size: settings.export_target_file_size,
        split_mid_key,
        header,
        admission,
    }
}

/// Sends one export with a per-attempt deadline. The outer error is fatal
/// for the processor; the inner result carries KV-level failure detail for
/// classification.
pub async fn send_export(
    kv: &dyn KvExporter,
    req: ExportRequest,
    timeout: Duration,
    verbose: bool,
) -> Result<std::result::Result<ExportResponse, ExportError>> {
    let span_str = req.span.to_string();
    if verbose {
        debug!(
            span = %span_str,
            resume_key_ts = %req.resume_key_ts,
            split_mid_key = req.split_mid_key,
            wait_policy = ?req.header.wait_policy,
            user_priority = ?req.header.user_priority,
            "sending export request"
        );
    }

    match tokio::time::timeout(timeout, kv.export(req)).await {
        Ok(result) => {
            if verbose {
                match &result {
                    Ok(resp) => debug!(
                        span = %span_str,
                        files = resp.files.len(),
                        resumed = resp.resume_span.is_some(),
                        "export response"
                    ),
                    Err(e) => debug!(span = %span_str, error = %e, "export error"),
                }
            }
            Ok(result)
        }
        Err(_) => Err(BackupError::ExportTimeout { span: span_str }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backup_common::{KeySpan, ProcessorSettingsBuilder};

    fn request_span(first_key_ts: Timestamp) -> SpanRequest {
        SpanRequest {
            span: KeySpan::new(*b"a", *b"z"),
            first_key_ts,
            start: Timestamp::EMPTY,
            end: Timestamp::from_unix_nanos(100),
            attempts: 0,
            last_tried: None,
            finishes_spec: true,
        }
    }

    #[test]
    fn test_request_headers_without_priority() {
        let settings = ProcessorSettings::default();
        let req = build_export_request(
            &request_span(Timestamp::EMPTY),
            MvccFilter::Latest,
            &settings,
            false,
        );
        assert_eq!(req.header.target_bytes, TARGET_BYTES_SENTINEL);
        assert_eq!(req.header.wait_policy, WaitPolicy::Error);
        assert_eq!(req.header.user_priority, UserPriority::Normal);
        assert_eq!(req.header.timestamp, Timestamp::from_unix_nanos(100));
        assert_eq!(req.admission.priority, AdmissionPriority::BulkNormal);
        assert!(req.admission.no_memory_reserved_at_source);
    }

    #[test]
    fn test_request_headers_with_priority() {
        let settings = ProcessorSettings::default();
        let req = build_export_request(
            &request_span(Timestamp::EMPTY),
            MvccFilter::Latest,
            &settings,
            true,
        );
        assert_eq!(req.header.wait_policy, WaitPolicy::Block);
        assert_eq!(req.header.user_priority, UserPriority::Max);
    }

    #[test]
    fn test_split_mid_key_follows_setting() {
        let on = ProcessorSettings::default();
        let req = build_export_request(
            &request_span(Timestamp::EMPTY),
            MvccFilter::All,
            &on,
            false,
        );
        assert!(req.split_mid_key);

        let off = ProcessorSettingsBuilder::default()
            .split_keys_on_timestamps(false)
            .build()
            .unwrap();
        let req = build_export_request(
            &request_span(Timestamp::EMPTY),
            MvccFilter::All,
            &off,
            false,
        );
        assert!(!req.split_mid_key);
    }

    #[test]
    fn test_split_mid_key_latches_on_resume() {
        // Once a resume timestamp exists, splitting stays on even with the
        // setting off.
        let off = ProcessorSettingsBuilder::default()
            .split_keys_on_timestamps(false)
            .build()
            .unwrap();
        let req = build_export_request(
            &request_span(Timestamp::from_unix_nanos(5)),
            MvccFilter::All,
            &off,
            false,
        );
        assert!(req.split_mid_key);
        assert_eq!(req.resume_key_ts, Timestamp::from_unix_nanos(5));
    }

    struct StalledExporter;

    #[async_trait]
    impl KvExporter for StalledExporter {
        async fn export(
            &self,
            _req: ExportRequest,
        ) -> std::result::Result<ExportResponse, ExportError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_fatal() {
        let req = build_export_request(
            &request_span(Timestamp::EMPTY),
            MvccFilter::Latest,
            &ProcessorSettings::default(),
            false,
        );
        let err = send_export(&StalledExporter, req, Duration::from_millis(20), false)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::ExportTimeout { .. }));
    }
}
