//! Execution contract and middleware composition
//!
//! A [`Runner`] executes a [`Func`]; a [`Middleware`] wraps one runner in
//! another. [`runner_chain`] nests a list of middlewares so that the first
//! one is outermost and runs first.

use crate::context::Context;
use crate::errors::Error;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Boxed future returned by a unit of work
pub type ExecFuture = BoxFuture<'static, Result<(), Error>>;

/// A unit of work: called with an execution context, resolves to success or failure
///
/// `Func` is cheap to clone so that retries can call it again and timeouts
/// can hand it to a detached task.
#[derive(Clone)]
pub struct Func {
    inner: Arc<dyn Fn(Context) -> ExecFuture + Send + Sync>,
}

impl Func {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx: Context| Box::pin(f(ctx)) as ExecFuture),
        }
    }

    pub fn call(&self, ctx: Context) -> ExecFuture {
        (self.inner)(ctx)
    }
}

impl std::fmt::Debug for Func {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Func").field("inner", &"<closure>").finish()
    }
}

/// An execution policy
///
/// Implementations may keep state across calls; they are shared between
/// concurrent callers as [`SharedRunner`].
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error>;
}

pub type SharedRunner = Arc<dyn Runner>;

/// Runner that calls the unit of work directly and returns its result unmodified
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl Runner for PassThrough {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        f.call(ctx).await
    }
}

/// Adapter turning an async closure into a [`Runner`]
pub struct RunnerFn<F> {
    f: F,
}

impl<F, Fut> RunnerFn<F>
where
    F: Fn(Context, Func) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Runner for RunnerFn<F>
where
    F: Fn(Context, Func) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        (self.f)(ctx, f).await
    }
}

/// Shorthand for `Arc::new(RunnerFn::new(f))`
pub fn runner_fn<F, Fut>(f: F) -> SharedRunner
where
    F: Fn(Context, Func) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(RunnerFn::new(f))
}

/// Replace a missing runner with [`PassThrough`]
pub fn sanitize_runner(next: Option<SharedRunner>) -> SharedRunner {
    next.unwrap_or_else(|| Arc::new(PassThrough))
}

/// Transform from an inner runner into a wrapping runner
///
/// The inner runner is `None` for the innermost middleware of a chain;
/// implementations pass it through [`sanitize_runner`].
#[derive(Clone)]
pub struct Middleware {
    wrap: Arc<dyn Fn(Option<SharedRunner>) -> SharedRunner + Send + Sync>,
}

impl Middleware {
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(Option<SharedRunner>) -> SharedRunner + Send + Sync + 'static,
    {
        Self {
            wrap: Arc::new(wrap),
        }
    }

    /// Apply this middleware around `next`
    pub fn wrap(&self, next: Option<SharedRunner>) -> SharedRunner {
        (self.wrap)(next)
    }
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware").field("wrap", &"<closure>").finish()
    }
}

/// Compose middlewares into a single runner
///
/// `runner_chain([a, b, c])` is `a(b(c(None)))`: `a` sees each call first
/// and the unit of work runs after `c`. An empty chain is a [`PassThrough`].
pub fn runner_chain<I>(middlewares: I) -> SharedRunner
where
    I: IntoIterator<Item = Middleware>,
{
    let middlewares: Vec<Middleware> = middlewares.into_iter().collect();
    let next = middlewares
        .iter()
        .rev()
        .fold(None, |next, middleware| Some(middleware.wrap(next)));
    sanitize_runner(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracing_middleware(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Middleware {
        Middleware::new(move |next| {
            let next = sanitize_runner(next);
            let log = log.clone();
            runner_fn(move |ctx, f| {
                let next = next.clone();
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("{name}:before"));
                    let result = next.run(ctx, f).await;
                    log.lock().unwrap().push(format!("{name}:after"));
                    result
                }
            })
        })
    }

    fn short_circuit() -> Middleware {
        Middleware::new(|_next| runner_fn(|_ctx, _f| async { Err(Error::FailureInjected) }))
    }

    #[tokio::test]
    async fn test_pass_through_returns_unit_result() {
        let ok = PassThrough
            .run(Context::new(), Func::new(|_ctx| async { Ok(()) }))
            .await;
        assert!(ok.is_ok());

        let err = PassThrough
            .run(
                Context::new(),
                Func::new(|_ctx| async { Err(Error::execution("bad gateway")) }),
            )
            .await;
        assert_eq!(err.unwrap_err().to_string(), "bad gateway");
    }

    #[tokio::test]
    async fn test_chain_runs_outermost_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runner = runner_chain([
            tracing_middleware("a", log.clone()),
            tracing_middleware("b", log.clone()),
            tracing_middleware("c", log.clone()),
        ]);

        let unit_log = log.clone();
        runner
            .run(
                Context::new(),
                Func::new(move |_ctx| {
                    let log = unit_log.clone();
                    async move {
                        log.lock().unwrap().push("unit".to_string());
                        Ok(())
                    }
                }),
            )
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:before", "b:before", "c:before", "unit", "c:after", "b:after", "a:after"
            ]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner_runners() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner_chain([
            short_circuit(),
            tracing_middleware("b", log.clone()),
            tracing_middleware("c", log.clone()),
        ]);

        let unit_calls = calls.clone();
        let result = runner
            .run(
                Context::new(),
                Func::new(move |_ctx| {
                    unit_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }),
            )
            .await;

        assert!(matches!(result, Err(Error::FailureInjected)));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_pass_through() {
        let runner = runner_chain(Vec::new());
        let result = runner
            .run(
                Context::new(),
                Func::new(|_ctx| async { Err(Error::execution("inner")) }),
            )
            .await;

        assert!(matches!(result, Err(Error::Execution(_))));
    }

    #[tokio::test]
    async fn test_func_can_be_called_repeatedly() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let f = Func::new(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        });

        for _ in 0..3 {
            f.clone().call(Context::new()).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
