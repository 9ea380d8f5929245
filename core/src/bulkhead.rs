//! Bulkhead implementation for concurrency limiting
//!
//! A bulkhead caps how many calls run through it at once. Calls beyond the
//! cap wait for a permit for at most `max_wait_time` and are then rejected
//! with [`Error::BulkheadFull`] without running.

use crate::{
    context::Context,
    errors::Error,
    runner::{Func, Middleware, Runner, SharedRunner, sanitize_runner},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A semaphore-based bulkhead for limiting concurrent operations
///
/// Waiters are admitted in FIFO order.
#[derive(Debug)]
pub struct BulkheadSemaphore {
    /// Maximum number of concurrent permits
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl BulkheadSemaphore {
    /// Create a new bulkhead semaphore with the given concurrency limit
    ///
    /// # Panics
    ///
    /// Panics if `limit` is 0.
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "Bulkhead limit must be greater than 0");
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    /// Try to acquire a permit without waiting
    ///
    /// Returns `None` if the bulkhead is at capacity.
    pub fn try_acquire(&self) -> Option<BulkheadGuard> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| BulkheadGuard { _permit: permit })
    }

    /// Wait up to `max_wait` for a permit; a zero `max_wait` waits indefinitely
    pub async fn acquire(&self, max_wait: Duration) -> Option<BulkheadGuard> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        let permit = if max_wait.is_zero() {
            acquire.await.ok()?
        } else {
            tokio::time::timeout(max_wait, acquire).await.ok()?.ok()?
        };
        Some(BulkheadGuard { _permit: permit })
    }

    /// Get the current number of acquired permits
    pub fn acquired(&self) -> usize {
        self.limit.saturating_sub(self.available())
    }

    /// Get the maximum number of permits (bulkhead limit)
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Get the number of available permits
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Guard that releases a bulkhead permit when dropped
///
/// This ensures that permits are always released, even if the guarded
/// operation fails, panics or is dropped mid-flight.
#[derive(Debug)]
pub struct BulkheadGuard {
    _permit: OwnedSemaphorePermit,
}

/// Bulkhead configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    /// Maximum concurrent calls; 0 disables the bulkhead
    pub workers: usize,

    /// How long a call may wait for a free worker; zero waits indefinitely
    pub max_wait_time: Duration,
}

/// Bulkhead runner
pub struct Bulkhead {
    semaphore: Option<BulkheadSemaphore>,
    max_wait_time: Duration,
    next: SharedRunner,
}

impl Bulkhead {
    pub fn new(config: Config, next: Option<SharedRunner>) -> Self {
        Self {
            semaphore: (config.workers > 0).then(|| BulkheadSemaphore::new(config.workers)),
            max_wait_time: config.max_wait_time,
            next: sanitize_runner(next),
        }
    }

    /// The underlying semaphore, `None` when the bulkhead is disabled
    pub fn semaphore(&self) -> Option<&BulkheadSemaphore> {
        self.semaphore.as_ref()
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("semaphore", &self.semaphore)
            .field("max_wait_time", &self.max_wait_time)
            .finish()
    }
}

#[async_trait]
impl Runner for Bulkhead {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        let Some(semaphore) = &self.semaphore else {
            return self.next.run(ctx, f).await;
        };

        let recorder = ctx.recorder();
        recorder.inc_bulkhead_queued();

        let guard = tokio::select! {
            biased;
            _ = ctx.done() => {
                recorder.inc_bulkhead_rejection();
                return Err(ctx.err().unwrap_or(Error::Cancelled));
            }
            guard = semaphore.acquire(self.max_wait_time) => guard,
        };

        let Some(_guard) = guard else {
            recorder.inc_bulkhead_rejection();
            tracing::debug!(
                limit = semaphore.limit(),
                waited_ms = self.max_wait_time.as_millis() as u64,
                "bulkhead full, call rejected"
            );
            return Err(Error::BulkheadFull {
                limit: semaphore.limit(),
            });
        };

        recorder.inc_bulkhead_processed();
        self.next.run(ctx.clone(), f).await
    }
}

/// Standalone bulkhead runner
pub fn new(config: Config) -> SharedRunner {
    Arc::new(Bulkhead::new(config, None))
}

/// Middleware giving every wrapped runner its own bulkhead
pub fn middleware(config: Config) -> Middleware {
    Middleware::new(move |next| Arc::new(Bulkhead::new(config, next)) as SharedRunner)
}
