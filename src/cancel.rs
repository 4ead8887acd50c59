//! Cooperative cancellation.
//!
//! A [`CancelToken`] is created per run and handed down to every long-running
//! operation: driver I/O loops, ingest row loops, batch-insert consumers, and
//! the per-table diff loop. Operations check at loop heads and abort with a
//! `Cancelled` error. There is no forced interruption; blocking calls return
//! at their next natural boundary.

use crate::error::SqError;
use eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Cloning is cheap; all clones observe the same
/// state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` if cancellation has been requested.
    /// Call this at loop heads.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(SqError::cancelled().into());
        }
        Ok(())
    }
}
