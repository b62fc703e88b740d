//! Process-wide admission gate for browser sessions.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::ScreenshotError;

/// Default number of concurrent browser sessions.
pub const DEFAULT_RENDER_CONCURRENCY: usize = 10;

/// Bounds how many renders run at once.
///
/// Waiters are admitted in FIFO order (tokio's semaphore is fair); there is
/// no per-workspace or per-URL fairness beyond that.
#[derive(Debug, Clone)]
pub struct RenderScheduler {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl RenderScheduler {
    /// Create a scheduler with `capacity` slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`ScreenshotError::SchedulerClosed`] if the scheduler was closed.
    pub async fn admit(&self) -> Result<RenderTicket, ScreenshotError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ScreenshotError::SchedulerClosed)?;
        debug!(in_flight = self.in_flight(), "Render admitted");
        Ok(RenderTicket { _permit: permit })
    }

    /// Take a slot only if one is free right now.
    #[cfg(test)]
    fn try_admit(&self) -> Option<RenderTicket> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| RenderTicket { _permit: permit })
    }

    /// Stop admitting. Pending and future `admit` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of tickets currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}

impl Default for RenderScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_CONCURRENCY)
    }
}

/// A held render slot.
///
/// The slot is returned when the ticket is dropped, so every exit path
/// (success, error, cancellation) releases it exactly once.
#[derive(Debug)]
pub struct RenderTicket {
    _permit: OwnedSemaphorePermit,
}
