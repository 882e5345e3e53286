/*
 * Progress messages streamed back to the coordinator.
 *
 * Each progress message reports either one closed output file or a
 * data-less span completion. The controller annotates messages with the
 * processor's completion fraction before forwarding them.
 */

use backup_common::{ExportMetricsSnapshot, KeySpan, RowCounts, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata for one run of fragments inside an output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub span: KeySpan,
    /// Object name of the output file holding this run.
    pub path: String,
    pub entry_counts: RowCounts,
    /// Locality tier string of the destination, empty for the default URI.
    pub locality_kv: String,
    /// Set when the fragment was exported over a non-default time interval
    /// (resumed revision-history reads).
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
}

/// Progress details for one closed file or data-less completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorProgress {
    pub files: Vec<FileMetadata>,
    pub completed_spans: u32,
    /// Start of the revision interval covered by the reported files.
    pub rev_start: Timestamp,
}

/// A progress message stamped with node identity and completion fraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkProcessorProgress {
    pub node_id: u32,
    pub flow_id: String,
    pub details: ProcessorProgress,
    /// Fraction of assigned spans completed, keyed by processor ID.
    pub completed_fraction: HashMap<i32, f32>,
}

/// Periodic roll-up of export statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportStatsSummary {
    pub node_id: u32,
    pub flow_id: String,
    pub stats: ExportMetricsSnapshot,
}

/// The stream a processor produces for its coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CoordinatorMessage {
    Progress(BulkProcessorProgress),
    TraceSummary(ExportStatsSummary),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_round_trip() {
        let msg = CoordinatorMessage::Progress(BulkProcessorProgress {
            node_id: 3,
            flow_id: "f-1".to_string(),
            details: ProcessorProgress {
                files: vec![FileMetadata {
                    span: KeySpan::new(*b"a", *b"z"),
                    path: "42/3/x.sst".to_string(),
                    entry_counts: RowCounts {
                        rows: 5,
                        index_entries: 0,
                        data_size: 100,
                    },
                    locality_kv: String::new(),
                    start_time: None,
                    end_time: None,
                }],
                completed_spans: 1,
                rev_start: Timestamp::EMPTY,
            },
            completed_fraction: HashMap::from([(7, 0.5)]),
        });

        let json = serde_json::to_string(&msg).unwrap();
        let back: CoordinatorMessage = serde_json::from_str(&json).unwrap();
        match back {
            CoordinatorMessage::Progress(p) => {
                assert_eq!(p.node_id, 3);
                assert_eq!(p.details.completed_spans, 1);
                assert_eq!(p.details.files[0].path, "42/3/x.sst");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
