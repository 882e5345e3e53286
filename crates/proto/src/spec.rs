/*
 * The coordinator's backup assignment.
 *
 * A BackupSpec tells one node which spans to export, over which time
 * interval, and where the output goes. Locality-keyed URIs let the
 * coordinator fan output into per-region destinations.
 */

use backup_common::{KeySpan, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which MVCC versions an export returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MvccFilter {
    /// Only the latest version of each key.
    #[default]
    Latest,
    /// Every version in the requested interval (revision history).
    All,
}

/// Opaque encryption options, forwarded to manifest assembly untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionOptions {
    pub mode: String,
    pub key_ref: String,
}

/// The per-node backup assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSpec {
    pub job_id: u64,
    pub user: String,

    /// Spans carried over from prior backups in the chain.
    pub spans: Vec<KeySpan>,
    /// Spans new to this backup; these export from time zero.
    pub introduced_spans: Vec<KeySpan>,

    pub backup_start_time: Timestamp,
    pub backup_end_time: Timestamp,
    pub mvcc_filter: MvccFilter,

    pub default_uri: String,
    /// Destinations keyed by locality tier strings like "region=us-east1".
    pub uris_by_locality_kv: HashMap<String, String>,

    /// Index IDs that are primary indexes, used to split row counts from
    /// secondary index entry counts.
    pub pk_ids: HashMap<u64, bool>,

    pub encryption: Option<EncryptionOptions>,
}

impl BackupSpec {
    /// Number of assigned spans, for completion accounting.
    pub fn total_spans(&self) -> usize {
        self.spans.len() + self.introduced_spans.len()
    }
}

/// One key=value locality tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityTier {
    pub key: String,
    pub value: String,
}

impl LocalityTier {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for LocalityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// A node's placement, ordered from least to most specific tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    pub tiers: Vec<LocalityTier>,
}

/// Identity of the node and flow running a processor, stamped onto
/// progress messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContext {
    pub node_id: u32,
    pub flow_id: String,
    pub processor_id: i32,
    pub locality: Locality,
}
