//! Time-bucketed rolling statistics for the circuit breaker
//!
//! The window is a ring of buckets, each covering one `bucket_duration`
//! slice of monotonic time. The active slot is `elapsed / bucket_duration
//! mod quantity`; when time moves past a boundary every slot skipped since
//! the last observation is cleared before reuse, so the aggregate decays as
//! old buckets fall out. Rotation is lazy, there is no background timer.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source anchored at creation
///
/// Immune to wall-clock jumps; under a paused tokio clock it follows the
/// test's virtual time.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    anchor: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
        }
    }

    /// Time elapsed since the clock was created
    pub fn now(&self) -> Duration {
        self.anchor.elapsed()
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct Bucket {
    total: AtomicU64,
    failed: AtomicU64,
}

impl Bucket {
    fn clear(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

/// Aggregate of all live buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub total: u64,
    pub failed: u64,
}

impl WindowSnapshot {
    /// Failure percentage in 0..=100; zero for an empty window
    pub fn error_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.failed as f64 / self.total as f64) * 100.0
        }
    }
}

#[derive(Debug)]
pub struct SlidingWindow {
    buckets: Box<[Bucket]>,
    bucket_duration: Duration,
    clock: Clock,
    /// Absolute index of the newest bucket observed so far
    cursor: AtomicU64,
    rotation: Mutex<()>,
}

impl SlidingWindow {
    /// # Panics
    ///
    /// Panics if `quantity` or `bucket_duration` is zero.
    pub fn new(quantity: usize, bucket_duration: Duration, clock: Clock) -> Self {
        assert!(quantity > 0, "window needs at least one bucket");
        assert!(!bucket_duration.is_zero(), "bucket duration must be non-zero");

        let buckets = (0..quantity).map(|_| Bucket::default()).collect();
        let window = Self {
            buckets,
            bucket_duration,
            clock,
            cursor: AtomicU64::new(0),
            rotation: Mutex::new(()),
        };
        window
            .cursor
            .store(window.absolute_index(), Ordering::Release);
        window
    }

    pub fn quantity(&self) -> usize {
        self.buckets.len()
    }

    pub fn bucket_duration(&self) -> Duration {
        self.bucket_duration
    }

    pub fn record_success(&self) {
        self.record(false);
    }

    pub fn record_failure(&self) {
        self.record(true);
    }

    /// Sum of every live bucket
    pub fn snapshot(&self) -> WindowSnapshot {
        self.advance();
        self.buckets
            .iter()
            .fold(WindowSnapshot::default(), |acc, bucket| WindowSnapshot {
                total: acc.total + bucket.total.load(Ordering::Relaxed),
                failed: acc.failed + bucket.failed.load(Ordering::Relaxed),
            })
    }

    /// Drop every recorded outcome
    pub fn reset(&self) {
        let _rotation = self.lock_rotation();
        for bucket in self.buckets.iter() {
            bucket.clear();
        }
        self.cursor
            .store(self.absolute_index(), Ordering::Release);
    }

    fn record(&self, failed: bool) {
        let slot = self.advance();
        let bucket = &self.buckets[slot];
        bucket.total.fetch_add(1, Ordering::Relaxed);
        if failed {
            bucket.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn absolute_index(&self) -> u64 {
        let elapsed = self.clock.now().as_nanos();
        (elapsed / self.bucket_duration.as_nanos()) as u64
    }

    /// Rotate to the current bucket, clearing skipped ones; returns its slot
    fn advance(&self) -> usize {
        let now = self.absolute_index();
        let quantity = self.buckets.len() as u64;

        if now > self.cursor.load(Ordering::Acquire) {
            let _rotation = self.lock_rotation();
            let seen = self.cursor.load(Ordering::Acquire);
            if now > seen {
                let skipped = (now - seen).min(quantity);
                for step in 0..skipped {
                    let slot = (now - step) % quantity;
                    self.buckets[slot as usize].clear();
                }
                self.cursor.store(now, Ordering::Release);
            }
        }

        (now % quantity) as usize
    }

    fn lock_rotation(&self) -> std::sync::MutexGuard<'_, ()> {
        self.rotation
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
