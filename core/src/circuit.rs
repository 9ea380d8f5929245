//! Circuit breaker runner driven by a state machine
//!
//! The breaker gates calls on the failure rate of a time-bucketed sliding
//! window. `Closed` lets everything through and records outcomes; once the
//! window holds at least `minimum_request_to_open` calls with an error rate
//! of `error_percent_threshold_to_open` or more, the circuit trips `Open`
//! and rejects every call. After `wait_duration_in_open_state` the next call
//! moves it to `HalfOpen` and is let through as a probe:
//! `successful_required_on_half_open` consecutive successes close it again,
//! a single failure reopens it.
//!
//! The Open -> HalfOpen check is lazy, evaluated by incoming calls, so no
//! background timer is involved.

use crate::{
    callbacks::Callbacks,
    classifier::{DefaultClassifier, FailureClassifier, FailureContext},
    context::Context,
    errors::{ConfigError, Error},
    metrics::Recorder,
    runner::{Func, Middleware, Runner, SharedRunner, sanitize_runner},
    window::{Clock, SlidingWindow, WindowSnapshot},
};
use async_trait::async_trait;
use state_machines::state_machine;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_ERROR_PERCENT_THRESHOLD_TO_OPEN: u32 = 50;
const DEFAULT_MINIMUM_REQUEST_TO_OPEN: u32 = 20;
const DEFAULT_SUCCESSFUL_REQUIRED_ON_HALF_OPEN: u32 = 1;
const DEFAULT_WAIT_DURATION_IN_OPEN_STATE: Duration = Duration::from_secs(5);
const DEFAULT_METRICS_SLIDING_WINDOW_BUCKET_QUANTITY: usize = 10;
const DEFAULT_METRICS_BUCKET_DURATION: Duration = Duration::from_secs(1);

pub(crate) const DEFAULT_NAME: &str = "circuit-breaker";

/// Circuit breaker configuration
///
/// Zero values are replaced by their defaults, see [`Config::defaults`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Error percentage (0..=100) of the window that opens the circuit
    pub error_percent_threshold_to_open: u32,

    /// Calls the window must hold before the error rate is evaluated
    pub minimum_request_to_open: u32,

    /// Consecutive successful probes needed to close from HalfOpen
    pub successful_required_on_half_open: u32,

    /// Time spent Open before a probe is let through
    pub wait_duration_in_open_state: Duration,

    /// Number of buckets in the sliding window
    pub metrics_sliding_window_bucket_quantity: usize,

    /// Time span covered by each bucket
    pub metrics_bucket_duration: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            error_percent_threshold_to_open: DEFAULT_ERROR_PERCENT_THRESHOLD_TO_OPEN,
            minimum_request_to_open: DEFAULT_MINIMUM_REQUEST_TO_OPEN,
            successful_required_on_half_open: DEFAULT_SUCCESSFUL_REQUIRED_ON_HALF_OPEN,
            wait_duration_in_open_state: DEFAULT_WAIT_DURATION_IN_OPEN_STATE,
            metrics_sliding_window_bucket_quantity: DEFAULT_METRICS_SLIDING_WINDOW_BUCKET_QUANTITY,
            metrics_bucket_duration: DEFAULT_METRICS_BUCKET_DURATION,
        }
    }
}

impl Config {
    /// Replace zero values with defaults; applying it twice changes nothing
    pub fn defaults(&mut self) {
        if self.error_percent_threshold_to_open == 0 {
            self.error_percent_threshold_to_open = DEFAULT_ERROR_PERCENT_THRESHOLD_TO_OPEN;
        }
        if self.minimum_request_to_open == 0 {
            self.minimum_request_to_open = DEFAULT_MINIMUM_REQUEST_TO_OPEN;
        }
        if self.successful_required_on_half_open == 0 {
            self.successful_required_on_half_open = DEFAULT_SUCCESSFUL_REQUIRED_ON_HALF_OPEN;
        }
        if self.wait_duration_in_open_state.is_zero() {
            self.wait_duration_in_open_state = DEFAULT_WAIT_DURATION_IN_OPEN_STATE;
        }
        if self.metrics_sliding_window_bucket_quantity == 0 {
            self.metrics_sliding_window_bucket_quantity =
                DEFAULT_METRICS_SLIDING_WINDOW_BUCKET_QUANTITY;
        }
        if self.metrics_bucket_duration.is_zero() {
            self.metrics_bucket_duration = DEFAULT_METRICS_BUCKET_DURATION;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_percent_threshold_to_open > 100 {
            return Err(ConfigError::InvalidPercent {
                field: "error_percent_threshold_to_open",
                value: self.error_percent_threshold_to_open,
            });
        }
        Ok(())
    }
}

/// Public view of the breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    fn from_machine(state: &str) -> Self {
        match state {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared data visible to the state machine guards
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub window: Arc<SlidingWindow>,
    pub clock: Clock,
}

impl CircuitContext {
    fn new(name: String, config: Config) -> Self {
        let clock = Clock::new();
        let window = Arc::new(SlidingWindow::new(
            config.metrics_sliding_window_bucket_quantity,
            config.metrics_bucket_duration,
            clock,
        ));
        Self {
            name,
            config,
            window,
            clock,
        }
    }
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self::new(DEFAULT_NAME.to_string(), Config::default())
    }
}

impl std::fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("window", &self.window.snapshot())
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    /// Clock reading at the last transition into Open
    pub opened_at: Duration,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub consecutive_successes: u32,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [timeout_elapsed],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

/// Whether a window snapshot crosses the open thresholds
pub fn exceeds_threshold(config: &Config, snapshot: WindowSnapshot) -> bool {
    snapshot.total > 0
        && snapshot.total >= u64::from(config.minimum_request_to_open)
        && snapshot.error_percent() >= f64::from(config.error_percent_threshold_to_open)
}

impl Circuit<Closed> {
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        exceeds_threshold(&ctx.config, ctx.window.snapshot())
    }
}

impl Circuit<HalfOpen> {
    /// A failed probe always reopens the circuit
    fn should_open(&self, _ctx: &CircuitContext) -> bool {
        true
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        self.state_data_half_open().is_some_and(|data| {
            data.consecutive_successes >= ctx.config.successful_required_on_half_open
        })
    }
}

impl Circuit<Open> {
    fn timeout_elapsed(&self, ctx: &CircuitContext) -> bool {
        self.state_data_open().is_some_and(|data| {
            ctx.clock.now().saturating_sub(data.opened_at) >= ctx.config.wait_duration_in_open_state
        })
    }
}

/// Circuit breaker runner
///
/// The state lives in a [`DynamicCircuit`] behind a mutex; an atomic mirror
/// of it lets Closed-state calls skip the lock entirely. Outcome counters
/// are lock-free, and every transition re-checks the machine's real state
/// and the window while holding the lock.
pub struct CircuitBreaker {
    machine: Mutex<DynamicCircuit>,
    state: AtomicU8,
    context: CircuitContext,
    classifier: Arc<dyn FailureClassifier>,
    callbacks: Callbacks,
    next: SharedRunner,
}

impl CircuitBreaker {
    /// Create a breaker around `next` (use builder() for more options)
    pub fn new(config: Config, next: Option<SharedRunner>) -> Result<Self, ConfigError> {
        Self::builder(DEFAULT_NAME).config(config).build_with(next)
    }

    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    /// Assemble a breaker from an already validated configuration
    pub(crate) fn from_parts(
        name: String,
        config: Config,
        classifier: Option<Arc<dyn FailureClassifier>>,
        callbacks: Callbacks,
        next: Option<SharedRunner>,
    ) -> Self {
        let context = CircuitContext::new(name, config);
        let machine = DynamicCircuit::new(context.clone());

        Self {
            machine: Mutex::new(machine),
            state: AtomicU8::new(CircuitState::Closed as u8),
            context,
            classifier: classifier.unwrap_or_else(|| Arc::new(DefaultClassifier)),
            callbacks,
            next: sanitize_runner(next),
        }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Current aggregate of the sliding window
    pub fn window_snapshot(&self) -> WindowSnapshot {
        self.context.window.snapshot()
    }

    /// Force the circuit back to Closed with an empty window
    pub fn reset(&self) {
        let mut machine = self.lock_machine();
        *machine = DynamicCircuit::new(self.context.clone());
        self.context.window.reset();
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        tracing::info!(circuit = %self.context.name, "circuit reset");
    }

    fn lock_machine(&self) -> MutexGuard<'_, DynamicCircuit> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a call may run, moving Open -> HalfOpen when due
    fn admit(&self, recorder: &dyn Recorder) -> Result<(), Error> {
        if self.state() == CircuitState::Closed {
            return Ok(());
        }

        let mut machine = self.lock_machine();
        if machine.current_state() == "Open"
            && machine.handle(CircuitEvent::AttemptReset).is_ok()
        {
            self.transitioned(&machine, recorder);
        }

        if machine.current_state() == "Open" {
            tracing::debug!(circuit = %self.context.name, "call rejected, circuit open");
            return Err(Error::CircuitOpen {
                circuit: self.context.name.clone(),
            });
        }
        Ok(())
    }

    /// Record a finished call and drive Closed -> Open, HalfOpen -> Open|Closed
    fn record(&self, result: &Result<(), Error>, duration: Duration, recorder: &dyn Recorder) {
        let failed = match result {
            Ok(()) => false,
            Err(error) => {
                let ctx = FailureContext {
                    circuit_name: &self.context.name,
                    error,
                    duration,
                };
                if !self.classifier.should_trip(&ctx) {
                    return;
                }
                true
            }
        };

        if failed {
            self.context.window.record_failure();
        } else {
            self.context.window.record_success();
        }

        match self.state() {
            CircuitState::Closed => {
                if !exceeds_threshold(&self.context.config, self.context.window.snapshot()) {
                    return;
                }
                let mut machine = self.lock_machine();
                if machine.current_state() == "Closed"
                    && machine.handle(CircuitEvent::Trip).is_ok()
                {
                    self.mark_open(&mut machine);
                    self.transitioned(&machine, recorder);
                }
            }
            CircuitState::HalfOpen => {
                let mut machine = self.lock_machine();
                if machine.current_state() != "HalfOpen" {
                    return;
                }

                if failed {
                    if machine.handle(CircuitEvent::Trip).is_ok() {
                        self.mark_open(&mut machine);
                        self.transitioned(&machine, recorder);
                    }
                    return;
                }

                if let Some(data) = machine.half_open_data_mut() {
                    data.consecutive_successes += 1;
                }
                if machine.handle(CircuitEvent::Close).is_ok() {
                    self.context.window.reset();
                    self.transitioned(&machine, recorder);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Stamp the Open transition time that the wait is measured from
    fn mark_open(&self, machine: &mut DynamicCircuit) {
        if let Some(data) = machine.open_data_mut() {
            data.opened_at = self.context.clock.now();
        }
    }

    /// Publish a transition; called with the machine lock held
    fn transitioned(&self, machine: &DynamicCircuit, recorder: &dyn Recorder) {
        let state = CircuitState::from_machine(machine.current_state());
        let previous = CircuitState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));

        match state {
            CircuitState::Open => {
                let snapshot = self.context.window.snapshot();
                tracing::warn!(
                    circuit = %self.context.name,
                    from = %previous,
                    total = snapshot.total,
                    failed = snapshot.failed,
                    "circuit opened"
                );
            }
            _ => tracing::info!(
                circuit = %self.context.name,
                from = %previous,
                to = %state,
                "circuit state changed"
            ),
        }

        recorder.inc_circuit_breaker_state(state);
        self.callbacks.trigger(state, &self.context.name);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("config", &self.context.config)
            .field("classifier", &self.classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[async_trait]
impl Runner for CircuitBreaker {
    async fn run(&self, ctx: Context, f: Func) -> Result<(), Error> {
        self.admit(ctx.recorder())?;

        let started = self.context.clock.now();
        let result = self.next.run(ctx.clone(), f).await;
        let duration = self.context.clock.now().saturating_sub(started);

        self.record(&result, duration, ctx.recorder());
        result
    }
}

/// Standalone circuit breaker runner
pub fn new(config: Config) -> Result<SharedRunner, ConfigError> {
    Ok(Arc::new(CircuitBreaker::new(config, None)?))
}

/// Middleware creating an independent breaker for every runner it wraps
pub fn middleware(config: Config) -> Result<Middleware, ConfigError> {
    CircuitBreaker::builder(DEFAULT_NAME)
        .config(config)
        .into_middleware()
}
