/*
 * Work queue.
 *
 * A fixed-capacity MPMC queue of span chunks. Capacity is presized to the
 * total request-span count so a worker re-enqueueing a retry can never
 * block: every retry replaces a span that was already dequeued.
 */

use crate::splitter::SpanRequest;
use backup_common::{BackupError, Result};
use crossbeam_queue::ArrayQueue;

/// Upper bound on spans per chunk.
pub const MAX_CHUNK_SIZE: usize = 100;

#[derive(Debug)]
pub struct WorkQueue {
    inner: ArrayQueue<Vec<SpanRequest>>,
}

impl WorkQueue {
    /// Creates a queue with room for `total_spans` chunks.
    pub fn with_span_capacity(total_spans: usize) -> Self {
        Self {
            inner: ArrayQueue::new(total_spans.max(1)),
        }
    }

    /// Enqueues one chunk. Fails only if the capacity invariant was
    /// violated, which would otherwise have deadlocked every worker.
    pub fn push(&self, chunk: Vec<SpanRequest>) -> Result<()> {
        self.inner.push(chunk).map_err(|_| {
            BackupError::Unexpected("work queue over capacity; retry would have blocked".into())
        })
    }

    /// Re-enqueues a span for another attempt.
    pub fn push_retry(&self, span: SpanRequest) -> Result<()> {
        self.push(vec![span])
    }

    /// Non-blocking receive. `None` means no work is available right now,
    /// which lets a draining worker flush and exit.
    pub fn try_pop(&self) -> Option<Vec<SpanRequest>> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Chunk size aiming for at least four chunks per worker, within
/// `[1, MAX_CHUNK_SIZE]`.
pub fn chunk_size_for(total_spans: usize, workers: usize) -> usize {
    ((total_spans / (workers.max(1) * 4)) + 1).min(MAX_CHUNK_SIZE)
}

/// Fills the queue with the initial request spans. When presplitting is
/// off, every span travels as its own chunk.
pub fn fill(
    queue: &WorkQueue,
    requests: Vec<SpanRequest>,
    chunk_size: usize,
    chunked: bool,
) -> Result<()> {
    if !chunked {
        for request in requests {
            queue.push(vec![request])?;
        }
        return Ok(());
    }

    let mut chunk = Vec::with_capacity(chunk_size);
    for request in requests {
        chunk.push(request);
        if chunk.len() >= chunk_size {
            queue.push(std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size)))?;
        }
    }
    if !chunk.is_empty() {
        queue.push(chunk)?;
    }
    Ok(())
}
