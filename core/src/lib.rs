//! ResilienceMachines - composable fault-tolerance runners for async Rust
//!
//! This crate wraps async units of work in small, stackable execution
//! policies:
//! - Circuit breaker driven by a state machine (Closed → Open → HalfOpen)
//!   over a time-bucketed sliding window of outcomes
//! - Bulkhead limiting concurrent executions with bounded waiting
//! - Timeout racing each call against its deadline
//! - Retry with exponential backoff and jitter
//! - Chaos injection of latency and errors
//! - Metrics recording through a pluggable [`Recorder`]
//!
//! Every policy is a [`Runner`]; [`Middleware`] wraps one runner in another
//! and [`runner_chain`] stacks a list of middlewares, first one outermost.
//!
//! # Example
//!
//! ```rust
//! use resilience_machines::{bulkhead, circuit, runner_chain, timeout, Context, Func, Runner};
//! use std::time::Duration;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = runner_chain([
//!         timeout::middleware(timeout::Config {
//!             timeout: Duration::from_millis(500),
//!             cancel: true,
//!         }),
//!         bulkhead::middleware(bulkhead::Config {
//!             workers: 10,
//!             max_wait_time: Duration::from_millis(50),
//!         }),
//!         circuit::middleware(circuit::Config::default())?,
//!     ]);
//!
//!     // Execute with full protection
//!     runner
//!         .run(Context::new(), Func::new(|_ctx| async { Ok(()) }))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod bulkhead;
pub mod callbacks;
pub mod chaos;
pub mod circuit;
pub mod classifier;
pub mod context;
pub mod errors;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod timeout;
pub mod window;

pub use builder::CircuitBuilder;
pub use bulkhead::{Bulkhead, BulkheadGuard, BulkheadSemaphore};
pub use callbacks::Callbacks;
pub use chaos::{Chaos, Injector};
pub use circuit::{CircuitBreaker, CircuitState};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use context::Context;
pub use errors::{BoxError, ConfigError, Error};
pub use metrics::{MetricsRecorder, NoopRecorder, Recorder};
pub use retry::Retry;
pub use runner::{
    ExecFuture, Func, Middleware, PassThrough, Runner, RunnerFn, SharedRunner, runner_chain,
    runner_fn, sanitize_runner,
};
pub use timeout::Timeout;
pub use window::{SlidingWindow, WindowSnapshot};
