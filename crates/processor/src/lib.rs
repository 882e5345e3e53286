/*
 * Distributed KV Backup - Data Processor
 *
 * The per-node engine of a backup. Given a set of assigned key spans and a
 * time interval, it:
 * 1. Splits the spans along range boundaries
 * 2. Fans them out to a pool of export workers sized by memory reservation
 * 3. Streams returned SST fragments into size-targeted files on external
 *    storage
 * 4. Reports per-span completion and periodic statistics to the
 *    coordinator
 */

pub mod export;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod shutdown;
pub mod sink;
pub mod splitter;

pub use export::{build_export_request, send_export, KvExporter, TARGET_BYTES_SENTINEL};
pub use pool::{reserve_worker_memory, WorkerReservation, MINIMUM_WORKER_COUNT};
pub use processor::BackupProcessor;
pub use queue::{chunk_size_for, WorkQueue, MAX_CHUNK_SIZE};
pub use retry::{classify, RetryPolicy, Verdict};
pub use shutdown::CancelToken;
pub use sink::{ExportedSpan, FileSink, SinkConf};
pub use splitter::{split_request_spans, RangeOracle, SpanRequest};
