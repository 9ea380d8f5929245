//! Timeout runner racing calls against their deadline
//!
//! Run with `RUST_LOG=resilience_machines=debug` to see the runner's decisions.

use resilience_machines::{Context, Error, Func, Runner, timeout};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A call that takes `latency` and notices when its context is cancelled
fn report(latency: Duration, stopped: Arc<AtomicBool>) -> Func {
    Func::new(move |ctx: Context| {
        let stopped = stopped.clone();
        async move {
            tokio::select! {
                _ = ctx.done() => {
                    stopped.store(true, Ordering::SeqCst);
                    Err(ctx.err().unwrap_or(Error::Cancelled))
                }
                _ = tokio::time::sleep(latency) => Ok(()),
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "timeout=info,resilience_machines=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let detached = timeout::new(timeout::Config {
        timeout: Duration::from_millis(100),
        cancel: false,
    });
    let cancelling = timeout::new(timeout::Config {
        timeout: Duration::from_millis(100),
        cancel: true,
    });

    let stopped = Arc::new(AtomicBool::new(false));
    detached
        .run(Context::new(), report(Duration::from_millis(20), stopped.clone()))
        .await?;
    tracing::info!("fast report finished within its deadline");

    if let Err(err) = detached
        .run(Context::new(), report(Duration::from_millis(300), stopped.clone()))
        .await
    {
        tracing::info!(error = %err, "slow report left running in the background");
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    tracing::info!(stopped = stopped.load(Ordering::SeqCst), "detached report after deadline");

    let stopped = Arc::new(AtomicBool::new(false));
    let result = cancelling
        .run(Context::new(), report(Duration::from_millis(300), stopped.clone()))
        .await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    if let Err(err) = result {
        tracing::info!(
            error = %err,
            stopped = stopped.load(Ordering::SeqCst),
            "slow report cancelled at its deadline"
        );
    }

    let parent = Context::new().with_timeout(Duration::from_millis(30));
    if let Err(err) = detached
        .run(parent, report(Duration::from_millis(300), Arc::default()))
        .await
    {
        tracing::info!(error = %err, "caller deadline shorter than the runner's");
    }

    Ok(())
}
