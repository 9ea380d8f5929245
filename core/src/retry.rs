//! Retry runner with exponential backoff and jitter

use crate::{
    context::Context,
    errors::{ConfigError, Error},
    runner::{Func, Middleware, Runner, SharedRunner, sanitize_runner},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TIMES: u32 = 3;
const DEFAULT_WAIT_BASE: Duration = Duration::from_millis(20);
const DEFAULT_JITTER_FACTOR: f64 = 0.5;
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Retries after the first attempt; zero means the default of 3
    pub times: u32,

    /// Wait before the first retry, doubled on every following one
    pub wait_base: Duration,

    /// Wait `wait_base` between every attempt instead of backing off
    pub disable_backoff: bool,

    /// Share of each wait that is randomized (0.0 = none, 1.0 = full jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            times: DEFAULT_TIMES,
            wait_base: DEFAULT_WAIT_BASE,
            disable_backoff: false,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl Config {
    pub fn defaults(&mut self) {
        if self.times == 0 {
            self.times = DEFAULT_TIMES;
        }
        if self.wait_base.is_zero() {
            self.wait_base = DEFAULT_WAIT_BASE;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidJitter(self.jitter_factor));
        }
        Ok(())
    }
}

/// Retry runner
pub struct Retry {
    config: Config,
    next: SharedRunner,
}

impl Retry {
    pub fn new(mut config: Config, next: Option<SharedRunner>) -> Result<Self, ConfigError> {
        config.defaults();
        config.validate()?;
        Ok(Self {
            config,
            next: sanitize_runner(next),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wait before retry number `attempt` (zero based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = self.config.wait_base.as_millis() as u64;
        let delay_ms = if self.config.disable_backoff {
            base_ms
        } else {
            base_ms.saturating_mul(1u64 << attempt.min(MAX_BACKOFF_SHIFT))
        };

        if self.config.jitter_factor == 0.0 {
            return Duration::from_millis(delay_ms);
        }

        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: delay_ms,
            multiplier: 1.0,
            max_delay_ms: delay_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, self.config.jitter_factor))
    }
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retry").field("config", &self.config).finish()
    }
}

#[async_trait]
impl Runner for Retry {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        let mut attempt = 0;
        loop {
            let result = self.next.run(ctx.clone(), f.clone()).await;
            if result.is_ok() || attempt >= self.config.times {
                return result;
            }

            let delay = self.backoff(attempt);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "call failed, retrying"
            );

            tokio::select! {
                biased;
                _ = ctx.done() => return Err(ctx.err().unwrap_or(Error::Cancelled)),
                _ = tokio::time::sleep(delay) => {}
            }

            ctx.recorder().inc_retry();
            attempt += 1;
        }
    }
}

/// Standalone retry runner
pub fn new(config: Config) -> Result<SharedRunner, ConfigError> {
    Ok(Arc::new(Retry::new(config, None)?))
}

pub fn middleware(config: Config) -> Result<Middleware, ConfigError> {
    let config = Retry::new(config, None)?.config;
    Ok(Middleware::new(move |next| {
        Arc::new(Retry {
            config,
            next: sanitize_runner(next),
        }) as SharedRunner
    }))
}
