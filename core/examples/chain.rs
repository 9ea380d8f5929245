//! A full chain of runners around a flaky dependency
//!
//! Run with `RUST_LOG=resilience_machines=debug` to see the runners' decisions.

use resilience_machines::{
    Context, Error, Func, Injector, MetricsRecorder, Runner, bulkhead, chaos, circuit, metrics,
    retry, runner_chain, timeout,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chain=info,resilience_machines=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let injector = Arc::new(Injector::new());
    injector.set_latency(Duration::from_millis(5));
    injector.set_error_percent(40)?;

    let runner = runner_chain([
        metrics::middleware("inventory", Arc::new(MetricsRecorder::new())),
        retry::middleware(retry::Config {
            times: 2,
            wait_base: Duration::from_millis(10),
            ..Default::default()
        })?,
        timeout::middleware(timeout::Config {
            timeout: Duration::from_millis(200),
            cancel: true,
        }),
        bulkhead::middleware(bulkhead::Config {
            workers: 4,
            max_wait_time: Duration::from_millis(50),
        }),
        circuit::middleware(circuit::Config {
            minimum_request_to_open: 10,
            wait_duration_in_open_state: Duration::from_millis(300),
            ..Default::default()
        })?,
        chaos::middleware(chaos::Config {
            injector: Some(injector.clone()),
        }),
    ]);

    let mut handles = Vec::new();
    for id in 0..40 {
        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            let f = Func::new(move |ctx: Context| async move {
                tokio::select! {
                    _ = ctx.done() => Err(ctx.err().unwrap_or(Error::Cancelled)),
                    _ = tokio::time::sleep(Duration::from_millis(20)) => Ok(()),
                }
            });
            (id, runner.run(Context::new(), f).await)
        }));
    }

    let (mut ok, mut failed) = (0, 0);
    for handle in handles {
        let (id, result) = handle.await?;
        match result {
            Ok(()) => ok += 1,
            Err(err) => {
                failed += 1;
                tracing::info!(call = id, error = %err, policy = err.is_policy(), "call failed");
            }
        }
    }

    tracing::info!(ok, failed, "chain finished");
    Ok(())
}
