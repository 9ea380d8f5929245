//! Failure injection runner
//!
//! Adds latency and errors to calls on demand, for exercising the rest of a
//! chain under faults. The [`Injector`] is shared and can be retuned while
//! calls are flowing through the runner.

use crate::{
    context::Context,
    errors::{ConfigError, Error},
    metrics::{CHAOS_KIND_ERROR, CHAOS_KIND_LATENCY},
    runner::{Func, Middleware, Runner, SharedRunner, sanitize_runner},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    latency: Duration,
    error_percent: u32,
}

/// Tunable fault settings
#[derive(Debug, Default)]
pub struct Injector {
    faults: Mutex<Faults>,
}

impl Injector {
    /// An injector that injects nothing until tuned
    pub fn new() -> Self {
        Self::default()
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults().latency = latency;
    }

    /// Share of calls (0..=100) that should fail with [`Error::FailureInjected`]
    pub fn set_error_percent(&self, percent: u32) -> Result<(), ConfigError> {
        if percent > 100 {
            return Err(ConfigError::InvalidPercent {
                field: "error_percent",
                value: percent,
            });
        }
        self.faults().error_percent = percent;
        Ok(())
    }

    pub fn latency(&self) -> Duration {
        self.faults().latency
    }

    pub fn error_percent(&self) -> u32 {
        self.faults().error_percent
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Shared injector; `None` gets one with 100ms latency and no errors
    pub injector: Option<Arc<Injector>>,
}

impl Config {
    pub fn defaults(&mut self) {
        if self.injector.is_none() {
            let injector = Injector::new();
            injector.set_latency(DEFAULT_LATENCY);
            self.injector = Some(Arc::new(injector));
        }
    }
}

#[derive(Debug, Default)]
struct Stats {
    total: u64,
    errors: u64,
}

impl Stats {
    fn error_percent(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.errors * 100 / self.total
        }
    }
}

/// Failure injection runner
///
/// Errors are injected while the error rate this runner has observed is
/// below the injector's target, so over time the rate converges on it.
pub struct Chaos {
    injector: Arc<Injector>,
    stats: Mutex<Stats>,
    next: SharedRunner,
}

impl Chaos {
    pub fn new(mut config: Config, next: Option<SharedRunner>) -> Self {
        config.defaults();
        Self {
            injector: config.injector.unwrap_or_default(),
            stats: Mutex::new(Stats::default()),
            next: sanitize_runner(next),
        }
    }

    pub fn injector(&self) -> &Arc<Injector> {
        &self.injector
    }

    fn stats(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn inject(&self, ctx: Context, f: Func) -> Result<(), Error> {
        let recorder = ctx.recorder();
        let faults = *self.injector.faults();

        if !faults.latency.is_zero() {
            recorder.inc_chaos_injected_failure(CHAOS_KIND_LATENCY);
            tokio::select! {
                biased;
                _ = ctx.done() => return Err(ctx.err().unwrap_or(Error::Cancelled)),
                _ = tokio::time::sleep(faults.latency) => {}
            }
        }

        let current = self.stats().error_percent();
        let target = u64::from(faults.error_percent);
        if target >= 100 || current < target {
            recorder.inc_chaos_injected_failure(CHAOS_KIND_ERROR);
            tracing::debug!(error_percent = current, "injecting failure");
            return Err(Error::FailureInjected);
        }

        self.next.run(ctx.clone(), f).await
    }
}

impl std::fmt::Debug for Chaos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chaos")
            .field("injector", &self.injector)
            .finish()
    }
}

#[async_trait]
impl Runner for Chaos {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        let result = self.inject(ctx, f).await;

        let mut stats = self.stats();
        stats.total += 1;
        if result.is_err() {
            stats.errors += 1;
        }
        result
    }
}

/// Standalone failure injection runner
pub fn new(config: Config) -> SharedRunner {
    Arc::new(Chaos::new(config, None))
}

/// Middleware sharing the configured injector between every runner it wraps
pub fn middleware(mut config: Config) -> Middleware {
    config.defaults();
    Middleware::new(move |next| Arc::new(Chaos::new(config.clone(), next)) as SharedRunner)
}
