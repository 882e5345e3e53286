/*
 * The export contract with the KV store.
 *
 * An export request asks one span's leaseholder to serialize the requested
 * MVCC versions into SSTs. The response-size sentinel of one byte makes
 * the store paginate after a single SST, returning a resume span for the
 * remainder.
 */

use crate::spec::MvccFilter;
use backup_common::{KeySpan, RowCounts, Timestamp};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// How a request behaves when it meets conflicting intents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitPolicy {
    /// Queue behind the conflicting transaction.
    #[default]
    Block,
    /// Return a lock conflict error instead of waiting.
    Error,
}

/// Transaction priority carried by the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserPriority {
    #[default]
    Normal,
    /// Aborts conflicting transactions instead of deferring to them.
    Max,
}

/// Admission-control classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionPriority {
    BulkLow,
    #[default]
    BulkNormal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionSource {
    #[default]
    Sql,
    Root,
}

/// Batch-level header attached to every export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    /// Response-size target. The sentinel value of 1 forces pagination
    /// after a single SST.
    pub target_bytes: i64,
    /// Read timestamp; exports read as of the backup end time.
    pub timestamp: Timestamp,
    pub return_elastic_resume_spans: bool,
    pub wait_policy: WaitPolicy,
    pub user_priority: UserPriority,
}

/// Admission header attached to every export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionHeader {
    pub priority: AdmissionPriority,
    pub create_time_nanos: i64,
    pub source: AdmissionSource,
    pub no_memory_reserved_at_source: bool,
}

/// One export request against the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub span: KeySpan,
    /// When resuming mid-key, the version timestamp to resume at.
    pub resume_key_ts: Timestamp,
    /// Exclusive lower bound of the exported interval.
    pub start_time: Timestamp,
    pub mvcc_filter: MvccFilter,
    /// Target SST size; the store may cut before the span is drained.
    pub target_file_size: u64,
    /// Permit SSTs that end between two versions of the same key.
    pub split_mid_key: bool,
    pub header: RequestHeader,
    pub admission: AdmissionHeader,
}

/// Aggregate entry counts keyed by index ID, as produced by export
/// evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOpSummary {
    pub data_size: u64,
    pub entry_counts: HashMap<u64, u64>,
}

/// One immutable SST produced by an export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedFile {
    pub span: KeySpan,
    pub path: String,
    pub sst: Bytes,
    pub exported: BulkOpSummary,
    /// Timestamp of the last version written when the file ends mid-key;
    /// empty when the file ends at a key boundary.
    pub end_key_ts: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportResponse {
    pub files: Vec<ExportedFile>,
    /// Remainder of the request span when the response was paginated.
    pub resume_span: Option<KeySpan>,
    /// Start of the revision interval actually read.
    pub start_time: Timestamp,
}

/// Failure detail surfaced by the KV layer for an export.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportError {
    #[error("conflicting intents on key {key:?}")]
    WriteIntent { key: Vec<u8> },

    #[error("batch timestamp must be after replica GC threshold {threshold}")]
    BeforeGcThreshold {
        threshold: Timestamp,
        /// Set when the range is marked as excluded from backups, in which
        /// case the missing data was never going to be read.
        data_excluded_from_backup: bool,
    },

    #[error("export unavailable: {0}")]
    Unavailable(String),
}

/// Splits a bulk-op summary into row and index-entry counts. Entries
/// belonging to a primary index count as rows; everything else is an index
/// entry.
pub fn count_rows(summary: &BulkOpSummary, pk_ids: &HashMap<u64, bool>) -> RowCounts {
    let mut counts = RowCounts {
        data_size: summary.data_size,
        ..Default::default()
    };
    for (index_id, entries) in &summary.entry_counts {
        if pk_ids.get(index_id).copied().unwrap_or(false) {
            counts.rows += entries;
        } else {
            counts.index_entries += entries;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_rows_splits_by_pk() {
        let summary = BulkOpSummary {
            data_size: 1000,
            entry_counts: HashMap::from([(1, 10), (2, 7), (3, 5)]),
        };
        let pk_ids = HashMap::from([(1, true), (2, false)]);

        let counts = count_rows(&summary, &pk_ids);
        assert_eq!(counts.rows, 10);
        // Unknown index IDs count as index entries.
        assert_eq!(counts.index_entries, 12);
        assert_eq!(counts.data_size, 1000);
    }

    #[test]
    fn test_export_error_display() {
        let err = ExportError::BeforeGcThreshold {
            threshold: Timestamp::from_unix_nanos(5),
            data_excluded_from_backup: false,
        };
        assert!(err.to_string().contains("GC threshold"));
    }

    #[test]
    fn test_response_round_trip() {
        let resp = ExportResponse {
            files: vec![ExportedFile {
                span: KeySpan::new(*b"a", *b"c"),
                path: "data/1.sst".to_string(),
                sst: Bytes::from_static(b"sst-bytes"),
                exported: BulkOpSummary::default(),
                end_key_ts: Timestamp::EMPTY,
            }],
            resume_span: Some(KeySpan::new(*b"c", *b"z")),
            start_time: Timestamp::from_unix_nanos(1),
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: ExportResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.files.len(), 1);
        assert_eq!(back.files[0].sst, Bytes::from_static(b"sst-bytes"));
        assert_eq!(back.resume_span, Some(KeySpan::new(*b"c", *b"z")));
    }
}
