//! Observability hooks for runners
//!
//! Runners never own a recorder. They look one up on the [`Context`] of
//! each call, so attaching a recorder once with [`middleware`] makes every
//! runner further down the chain report through it. Without an attached
//! recorder all events go to [`NoopRecorder`].

mod exporter;

pub use exporter::MetricsRecorder;

use crate::circuit::CircuitState;
use crate::context::Context;
use crate::errors::Error;
use crate::runner::{Func, Middleware, Runner, SharedRunner, sanitize_runner};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

/// Chaos failure kinds reported through [`Recorder::inc_chaos_injected_failure`]
pub const CHAOS_KIND_LATENCY: &str = "latency";
pub const CHAOS_KIND_ERROR: &str = "error";

/// Receiver of runner events
///
/// Called synchronously on the hot path; implementations must return promptly.
pub trait Recorder: Send + Sync {
    /// A recorder reporting under the given runner id
    fn with_id(&self, id: &str) -> Arc<dyn Recorder>;

    fn observe_command_execution(&self, started: Instant, success: bool);

    fn inc_retry(&self);

    fn inc_timeout(&self);

    fn inc_bulkhead_queued(&self);

    fn inc_bulkhead_processed(&self);

    fn inc_bulkhead_rejection(&self);

    fn inc_circuit_breaker_state(&self, state: CircuitState);

    fn inc_chaos_injected_failure(&self, kind: &str);
}

/// Recorder that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn with_id(&self, _id: &str) -> Arc<dyn Recorder> {
        Arc::new(NoopRecorder)
    }

    fn observe_command_execution(&self, _started: Instant, _success: bool) {}

    fn inc_retry(&self) {}

    fn inc_timeout(&self) {}

    fn inc_bulkhead_queued(&self) {}

    fn inc_bulkhead_processed(&self) {}

    fn inc_bulkhead_rejection(&self) {}

    fn inc_circuit_breaker_state(&self, _state: CircuitState) {}

    fn inc_chaos_injected_failure(&self, _kind: &str) {}
}

/// Attach `recorder` (scoped to `id`) to every call and measure each execution
///
/// Place it first in a chain so that the whole chain reports through it.
pub fn middleware(id: impl Into<String>, recorder: Arc<dyn Recorder>) -> Middleware {
    let id = id.into();
    Middleware::new(move |next| {
        Arc::new(Measured {
            recorder: recorder.with_id(&id),
            next: sanitize_runner(next),
        }) as SharedRunner
    })
}

struct Measured {
    recorder: Arc<dyn Recorder>,
    next: SharedRunner,
}

#[async_trait]
impl Runner for Measured {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        let ctx = ctx.with_recorder(self.recorder.clone());
        let started = Instant::now();
        let result = self.next.run(ctx, f).await;
        self.recorder
            .observe_command_execution(started, result.is_ok());
        result
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{CountingRecorder, SharedCounting};
    use super::*;
    use crate::runner::{runner_chain, runner_fn};

    #[tokio::test]
    async fn test_middleware_observes_executions() {
        let counters = Arc::new(CountingRecorder::default());
        let runner = runner_chain([middleware(
            "payments",
            Arc::new(SharedCounting(counters.clone())),
        )]);

        runner
            .run(Context::new(), Func::new(|_ctx| async { Ok(()) }))
            .await
            .unwrap();
        let _ = runner
            .run(
                Context::new(),
                Func::new(|_ctx| async { Err(Error::execution("declined")) }),
            )
            .await;

        assert_eq!(CountingRecorder::count(&counters.executions), 2);
        assert_eq!(CountingRecorder::count(&counters.failed_executions), 1);
        assert_eq!(*counters.ids.lock().unwrap(), vec!["payments".to_string()]);
    }

    #[tokio::test]
    async fn test_middleware_attaches_recorder_for_inner_runners() {
        let counters = Arc::new(CountingRecorder::default());
        let inner = Middleware::new(|_next| {
            runner_fn(|ctx, _f| async move {
                assert!(ctx.attached_recorder().is_some());
                ctx.recorder().inc_timeout();
                Err(Error::Timeout)
            })
        });
        let runner = runner_chain([
            middleware("inner", Arc::new(SharedCounting(counters.clone()))),
            inner,
        ]);

        let result = runner
            .run(Context::new(), Func::new(|_ctx| async { Ok(()) }))
            .await;

        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(CountingRecorder::count(&counters.timeouts), 1);
    }
}
