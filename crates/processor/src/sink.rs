/*
 * File SST sink.
 *
 * Accumulates exported fragments into size-targeted output files on
 * external storage. A file may only be cut at a key boundary: restore
 * depends on no output file ending between two versions of the same key,
 * so size alone never triggers a cut.
 */

use backup_common::{BackupError, Result, Timestamp};
use backup_proto::{FileMetadata, ProcessorProgress};
use bytes::Bytes;
use opendal::Operator;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// One exported fragment plus the bookkeeping the sink needs.
#[derive(Debug, Clone)]
pub struct ExportedSpan {
    pub metadata: FileMetadata,
    pub data: Bytes,
    /// Start of the revision interval the response covered.
    pub rev_start: Timestamp,
    /// 1 when this fragment finishes an assigned span, else 0.
    pub completed_spans: u32,
    /// True iff the fragment ends exactly on a key boundary.
    pub at_key_boundary: bool,
}

/// Shared sink configuration.
#[derive(Debug, Clone)]
pub struct SinkConf {
    pub job_id: u64,
    pub node_id: u32,
    /// Path prefix under the destination root.
    pub prefix: String,
    /// Cut files once they accumulate this many bytes, at a safe boundary.
    pub target_file_size: u64,
    /// Upload chunk size for storage writers.
    pub write_chunk_size: u64,
}

/// Per-worker streaming sink.
pub struct FileSink {
    conf: SinkConf,
    storage: Operator,
    progress: mpsc::Sender<ProcessorProgress>,
    out: Option<OpenFile>,
}

struct OpenFile {
    writer: opendal::Writer,
    path: String,
    size: u64,
    /// Metadata runs for the fragments written so far; contiguous
    /// fragments with matching time bounds merge into one run.
    files: Vec<FileMetadata>,
    completed_spans: u32,
    rev_start: Timestamp,
    /// Whether fragments in this file carry explicit time bounds.
    revision_times: bool,
    /// Whether the last appended fragment ended at a key boundary.
    at_key_boundary: bool,
}

impl FileSink {
    pub fn new(
        conf: SinkConf,
        storage: Operator,
        progress: mpsc::Sender<ProcessorProgress>,
    ) -> Self {
        Self {
            conf,
            storage,
            progress,
            out: None,
        }
    }

    /// Appends one fragment, cutting or starting files as the invariants
    /// require.
    pub async fn write(&mut self, exported: ExportedSpan) -> Result<()> {
        let has_times =
            exported.metadata.start_time.is_some() || exported.metadata.end_time.is_some();

        let should_flush = match &self.out {
            Some(out) => {
                let regressed = out
                    .files
                    .last()
                    .is_some_and(|last| exported.metadata.span.start < last.span.end);
                let mixed_times = !out.files.is_empty() && out.revision_times != has_times;
                // Cutting for size is only legal at a key boundary and
                // between non-overlapping fragments.
                let size_cut = out.size >= self.conf.target_file_size
                    && out.at_key_boundary
                    && !regressed;
                regressed || mixed_times || size_cut
            }
            None => false,
        };
        if should_flush {
            self.flush_file().await?;
        }

        let out = self.ensure_open().await?;

        out.writer
            .write(exported.data.clone())
            .await
            .map_err(|e| BackupError::Storage(format!("writing to {}: {e}", out.path)))?;
        out.size += exported.data.len() as u64;
        out.completed_spans += exported.completed_spans;
        out.at_key_boundary = exported.at_key_boundary;
        out.revision_times = has_times;
        if out.rev_start.is_empty() {
            out.rev_start = exported.rev_start;
        }

        let mut metadata = exported.metadata;
        metadata.path = out.path.clone();
        match out.files.last_mut() {
            Some(last)
                if last.span.end == metadata.span.start
                    && last.start_time == metadata.start_time
                    && last.end_time == metadata.end_time =>
            {
                last.span.end = metadata.span.end;
                last.entry_counts.add(&metadata.entry_counts);
            }
            _ => out.files.push(metadata),
        }

        Ok(())
    }

    /// Reports a span that completed without producing any data. The span
    /// must still appear in completion accounting.
    pub async fn write_with_no_data(&mut self, completed_spans: u32) -> Result<()> {
        self.send_progress(ProcessorProgress {
            files: Vec::new(),
            completed_spans,
            rev_start: Timestamp::EMPTY,
        })
        .await
    }

    /// Closes any open file and reports it.
    pub async fn flush(&mut self) -> Result<()> {
        self.flush_file().await
    }

    async fn flush_file(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        out.writer
            .close()
            .await
            .map_err(|e| BackupError::Storage(format!("closing {}: {e}", out.path)))?;
        debug!(
            path = %out.path,
            size = out.size,
            runs = out.files.len(),
            "flushed backup file"
        );
        self.send_progress(ProcessorProgress {
            files: out.files,
            completed_spans: out.completed_spans,
            rev_start: out.rev_start,
        })
        .await
    }

    async fn ensure_open(&mut self) -> Result<&mut OpenFile> {
        if self.out.is_none() {
            let name = format!(
                "{}/{}/{}.sst",
                self.conf.job_id,
                self.conf.node_id,
                Uuid::now_v7()
            );
            let path = if self.conf.prefix.is_empty() {
                name
            } else {
                format!("{}/{}", self.conf.prefix, name)
            };
            let writer = self
                .storage
                .writer_with(&path)
                .chunk(self.conf.write_chunk_size as usize)
                .await
                .map_err(|e| BackupError::Storage(format!("opening {path}: {e}")))?;
            debug!(path = %path, "opened backup file");
            self.out = Some(OpenFile {
                writer,
                path,
                size: 0,
                files: Vec::new(),
                completed_spans: 0,
                rev_start: Timestamp::EMPTY,
                revision_times: false,
                at_key_boundary: false,
            });
        }
        match self.out.as_mut() {
            Some(out) => Ok(out),
            None => Err(BackupError::Unexpected("sink file missing after open".into())),
        }
    }

    async fn send_progress(&self, progress: ProcessorProgress) -> Result<()> {
        self.progress
            .send(progress)
            .await
            .map_err(|_| BackupError::Progress("progress receiver dropped".into()))
    }
}
