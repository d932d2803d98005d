//! Bounded translation worker pool
//!
//! A single pool is shared by every session. Each job holds a semaphore permit
//! for its whole blocking run, so a burst of chunks queues on the semaphore
//! instead of spawning unbounded blocking threads.

use std::sync::Arc;

use tokio::sync::Semaphore;

use super::TranslationError;

/// Shared, bounded executor for blocking translation calls
#[derive(Clone, Debug)]
pub struct TranslationPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl TranslationPool {
    /// Create a pool running at most `size` jobs at once
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Maximum concurrent jobs
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a permit
    #[must_use]
    pub fn in_flight(&self) -> usize {
        if self.permits.is_closed() {
            return 0;
        }
        self.size - self.permits.available_permits()
    }

    /// Whether [`drain`](Self::drain) has closed the pool
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Run a blocking job once a permit is free
    ///
    /// # Errors
    ///
    /// Returns [`TranslationError::PoolClosed`] after shutdown,
    /// [`TranslationError::Worker`] if the job panicked, or the job's own error.
    pub async fn run<F, T>(&self, job: F) -> Result<T, TranslationError>
    where
        F: FnOnce() -> Result<T, TranslationError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TranslationError::PoolClosed)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| TranslationError::Worker(e.to_string()))?
    }

    /// Wait for in-flight jobs to finish, then refuse new ones
    pub async fn drain(&self) {
        let all = u32::try_from(self.size).unwrap_or(u32::MAX);
        match self.permits.acquire_many(all).await {
            Ok(permits) => drop(permits),
            Err(_) => return,
        }
        self.permits.close();
        tracing::info!(size = self.size, "Translation pool drained");
    }
}
