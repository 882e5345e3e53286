/*
 * Bounded memory accounting.
 *
 * The processor sizes its worker pool by how much memory a shared account
 * will grant, so it backs off under memory pressure instead of failing
 * fast. The account serializes its own growth and shrink.
 */

use crate::{BackupError, Result};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct BoundAccount {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    limit: u64,
    used: Mutex<u64>,
}

impl BoundAccount {
    pub fn new(limit: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit,
                used: Mutex::new(0),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    /// Reserves `bytes` from the account.
    pub fn grow(&self, bytes: u64) -> Result<()> {
        let mut used = self.lock_used();
        let available = self.inner.limit - *used;
        if bytes > available {
            return Err(BackupError::MemoryExceeded {
                requested: bytes,
                available,
            });
        }
        *used += bytes;
        Ok(())
    }

    /// Returns `bytes` to the account.
    pub fn shrink(&self, bytes: u64) {
        let mut used = self.lock_used();
        *used = used.saturating_sub(bytes);
    }

    pub fn used(&self) -> u64 {
        *self.lock_used()
    }

    pub fn limit(&self) -> u64 {
        self.inner.limit
    }

    fn lock_used(&self) -> std::sync::MutexGuard<'_, u64> {
        self.inner.used.lock().unwrap_or_else(|e| e.into_inner())
    }
}
