/*
 * Error types for the backup data processor.
 */

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("range lookup failed: {0}")]
    RangeLookup(String),

    #[error("memory budget exceeded: {requested} requested, {available} available")]
    MemoryExceeded { requested: u64, available: u64 },

    #[error(
        "could not reserve memory for minimum number of backup workers \
         ({workers} x {per_worker_bytes})"
    )]
    WorkerMemory {
        workers: usize,
        per_worker_bytes: u64,
        #[source]
        source: Box<BackupError>,
    },

    #[error("export request timeout for span {span}")]
    ExportTimeout { span: String },

    #[error("exporting {span}: {message}")]
    Export { span: String, message: String },

    #[error("invalid resume span: {0}")]
    InvalidResumeSpan(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("progress channel closed: {0}")]
    Progress(String),

    #[error("backup cancelled")]
    Cancelled,

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<opendal::Error> for BackupError {
    fn from(e: opendal::Error) -> Self {
        BackupError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
