/*
 * Distributed KV Backup - Common Types
 *
 * Shared types, errors, settings, and storage access used across the
 * backup wire protocol and the data processor.
 */

pub mod error;
pub mod memory;
pub mod metrics;
pub mod settings;
pub mod span;
pub mod storage;

pub use error::{BackupError, Result};
pub use memory::BoundAccount;
pub use metrics::{ExportMetrics, ExportMetricsSnapshot};
pub use settings::{ProcessorSettings, ProcessorSettingsBuilder};
pub use span::{Key, KeySpan, RowCounts, Timestamp};
pub use storage::{build_operator, parse_destination, Destination, StorageBackend};
