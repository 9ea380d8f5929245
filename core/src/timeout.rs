//! Timeout runner
//!
//! Runs the inner runner on a detached task and stops waiting for it once
//! the deadline passes. The task keeps running to completion in the
//! background unless `cancel` is set, in which case its context is
//! cancelled and a cooperative unit of work can stop early.

use crate::{
    context::Context,
    errors::Error,
    runner::{Func, Middleware, Runner, SharedRunner, sanitize_runner},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    /// Maximum time to wait for the inner runner; zero means one second
    pub timeout: Duration,

    /// Cancel the inner call's context once the wait is over
    pub cancel: bool,
}

impl Config {
    pub fn defaults(&mut self) {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
    }
}

/// Timeout runner
pub struct Timeout {
    config: Config,
    next: SharedRunner,
}

impl Timeout {
    pub fn new(mut config: Config, next: Option<SharedRunner>) -> Self {
        config.defaults();
        Self {
            config,
            next: sanitize_runner(next),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl std::fmt::Debug for Timeout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeout")
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl Runner for Timeout {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        let child = ctx.with_timeout(self.config.timeout);
        let (tx, rx) = oneshot::channel();

        let next = Arc::clone(&self.next);
        let task_ctx = child.clone();
        tokio::spawn(async move {
            let result = next.run(task_ctx, f).await;
            // Nobody is listening once the caller gave up.
            let _ = tx.send(result);
        });

        let outcome = tokio::select! {
            result = rx => result.unwrap_or(Err(Error::Aborted)),
            _ = child.done() => {
                if ctx.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    ctx.recorder().inc_timeout();
                    tracing::debug!(
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        "call timed out"
                    );
                    Err(Error::Timeout)
                }
            }
        };

        if self.config.cancel {
            child.cancel();
        }
        outcome
    }
}

/// Standalone timeout runner
pub fn new(config: Config) -> SharedRunner {
    Arc::new(Timeout::new(config, None))
}

pub fn middleware(config: Config) -> Middleware {
    Middleware::new(move |next| Arc::new(Timeout::new(config, next)) as SharedRunner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulkhead::{self, Bulkhead};
    use crate::metrics::testing::{CountingRecorder, recorded_context};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn sleeping(duration: Duration, result: Result<(), &'static str>) -> Func {
        Func::new(move |_ctx| async move {
            tokio::time::sleep(duration).await;
            result.map_err(Error::execution)
        })
    }

    fn runner(timeout: Duration, cancel: bool) -> Timeout {
        Timeout::new(Config { timeout, cancel }, None)
    }

    #[test]
    fn test_zero_timeout_defaults_to_one_second() {
        let runner = runner(Duration::ZERO, false);
        assert_eq!(runner.config().timeout, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_returns_its_own_result() {
        let runner = runner(Duration::from_millis(100), false);
        let (ctx, recorder) = recorded_context();

        runner
            .run(ctx.clone(), sleeping(Duration::from_millis(10), Ok(())))
            .await
            .unwrap();

        let err = runner
            .run(ctx, sleeping(Duration::from_millis(10), Err("upstream")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upstream");
        assert_eq!(CountingRecorder::count(&recorder.timeouts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let runner = runner(Duration::from_millis(100), false);
        let (ctx, recorder) = recorded_context();

        let started = tokio::time::Instant::now();
        let err = runner
            .run(ctx, sleeping(Duration::from_secs(1), Ok(())))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        assert_eq!(CountingRecorder::count(&recorder.timeouts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_flag_cancels_inner_context() {
        let observed = Arc::new(AtomicBool::new(false));
        let seen = observed.clone();
        let f = Func::new(move |ctx: Context| {
            let seen = seen.clone();
            async move {
                ctx.cancellation_token().cancelled().await;
                seen.store(true, Ordering::SeqCst);
                Ok(())
            }
        });

        let err = runner(Duration::from_millis(50), true)
            .run(Context::new(), f)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_cancel_inner_call_keeps_running() {
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let f = Func::new(move |ctx: Context| {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                done.store(!ctx.is_cancelled(), Ordering::SeqCst);
                Ok(())
            }
        });

        let err = runner(Duration::from_millis(50), false)
            .run(Context::new(), f)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_cancellation_is_not_a_timeout() {
        let (ctx, recorder) = recorded_context();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = runner(Duration::from_secs(5), false)
            .run(ctx, sleeping(Duration::from_secs(10), Ok(())))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(CountingRecorder::count(&recorder.timeouts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_deadline_bounds_timeout() {
        let ctx = Context::new().with_timeout(Duration::from_millis(20));

        let started = tokio::time::Instant::now();
        let err = runner(Duration::from_secs(5), false)
            .run(ctx, sleeping(Duration::from_secs(1), Ok(())))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout));
        assert_eq!(started.elapsed(), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_timeout_runs_the_call() {
        let (ctx, recorder) = recorded_context();

        runner(Duration::MAX, false)
            .run(ctx, sleeping(Duration::from_millis(10), Ok(())))
            .await
            .expect("call should finish before an unbounded timeout");

        assert_eq!(CountingRecorder::count(&recorder.timeouts), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_call_releases_bulkhead_slot_when_done() {
        let bulkhead = Arc::new(Bulkhead::new(
            bulkhead::Config {
                workers: 1,
                max_wait_time: Duration::from_millis(1),
            },
            None,
        ));
        let timeout = Timeout::new(
            Config {
                timeout: Duration::from_millis(10),
                cancel: false,
            },
            Some(bulkhead.clone() as SharedRunner),
        );

        let err = timeout
            .run(Context::new(), sleeping(Duration::from_millis(100), Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        let semaphore = bulkhead.semaphore().unwrap();
        assert_eq!(semaphore.available(), 0, "detached call still holds the slot");

        let err = timeout
            .run(Context::new(), sleeping(Duration::ZERO, Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BulkheadFull { limit: 1 }));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(semaphore.available(), 1);

        timeout
            .run(Context::new(), sleeping(Duration::ZERO, Ok(())))
            .await
            .expect("slot is free once the detached call finishes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_call_is_aborted() {
        let f = Func::new(|_ctx| async {
            if true {
                panic!("unit panicked");
            }
            Ok(())
        });

        let err = runner(Duration::from_secs(1), false)
            .run(Context::new(), f)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }
}
