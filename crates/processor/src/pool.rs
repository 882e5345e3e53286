/*
 * Worker pool sizing.
 *
 * Worker concurrency is an outcome of memory admission: each worker holds
 * one external-storage write buffer, so the pool only grows as far as the
 * account will grant, and the processor backs off under memory pressure
 * instead of failing fast.
 */

use backup_common::{BackupError, BoundAccount, ProcessorSettings, Result};
use tracing::warn;

/// The floor for worker concurrency. Two workers keep the non-blocking
/// queue drain safe: a retry pushed by one live worker is picked up by
/// another.
pub const MINIMUM_WORKER_COUNT: usize = 2;

/// Holds the pool's memory reservation; dropping it returns exactly the
/// reserved bytes to the account.
#[derive(Debug)]
pub struct WorkerReservation {
    account: BoundAccount,
    bytes: u64,
}

impl WorkerReservation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for WorkerReservation {
    fn drop(&mut self) {
        self.account.shrink(self.bytes);
    }
}

/// Reserves per-worker memory and returns the resulting concurrency.
///
/// At least `MINIMUM_WORKER_COUNT` workers' worth must be granted or the
/// processor fails; beyond that the pool grows one worker at a time up to
/// the configured cap.
pub fn reserve_worker_memory(
    settings: &ProcessorSettings,
    account: &BoundAccount,
) -> Result<(usize, WorkerReservation)> {
    let max_workers = settings.worker_cap().max(MINIMUM_WORKER_COUNT);
    let per_worker = settings.write_chunk_size;

    account
        .grow(MINIMUM_WORKER_COUNT as u64 * per_worker)
        .map_err(|e| BackupError::WorkerMemory {
            workers: MINIMUM_WORKER_COUNT,
            per_worker_bytes: per_worker,
            source: Box::new(e),
        })?;

    let mut workers = MINIMUM_WORKER_COUNT;
    while workers < max_workers {
        if account.grow(per_worker).is_err() {
            warn!("backup worker count restricted by memory limit");
            break;
        }
        workers += 1;
    }

    Ok((
        workers,
        WorkerReservation {
            account: account.clone(),
            bytes: workers as u64 * per_worker,
        },
    ))
}
