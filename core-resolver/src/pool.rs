//! Shared worker pool bounding concurrent extraction calls.
//!
//! A thin wrapper over a tokio [`Semaphore`]. Every resolver call, including
//! prefetches from every session, takes one permit for the duration of its
//! upstream call, so total outstanding extraction work never exceeds the
//! pool size no matter how many groups are active.
//!
//! Waiting for a permit counts against the caller's deadline: a saturated
//! pool turns into [`ResolutionError::Timeout`], never into an immediate
//! failure.

use crate::error::{ResolutionError, Result};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout_at, Instant};

/// Held while an extraction call runs. Dropping it frees the slot.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Pool with `size` slots (minimum 1).
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Wait for a free slot until `deadline`.
    pub async fn acquire_until(&self, deadline: Instant) -> Result<WorkerPermit> {
        let permit = timeout_at(deadline, Arc::clone(&self.semaphore).acquire_owned())
            .await
            .map_err(|_| ResolutionError::Timeout)?
            .map_err(|_| ResolutionError::Upstream("worker pool closed".to_string()))?;
        Ok(WorkerPermit { _permit: permit })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held by running extraction calls.
    pub fn in_flight(&self) -> usize {
        self.size.saturating_sub(self.available())
    }
}
