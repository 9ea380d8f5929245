//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, Config},
    classifier::FailureClassifier,
    errors::ConfigError,
    runner::{Middleware, SharedRunner},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
///
/// Zero values fall back to defaults when the breaker is built; an error
/// threshold above 100 is rejected with [`ConfigError::InvalidPercent`].
#[derive(Debug, Clone)]
pub struct CircuitBuilder {
    name: String,
    config: Config,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Error percentage (0..=100) at which the circuit opens
    pub fn error_percent_threshold(mut self, percent: u32) -> Self {
        self.config.error_percent_threshold_to_open = percent;
        self
    }

    /// Calls the window must hold before the error rate is evaluated
    pub fn minimum_requests(mut self, requests: u32) -> Self {
        self.config.minimum_request_to_open = requests;
        self
    }

    /// Set the success threshold (successes needed to close from half-open)
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.successful_required_on_half_open = threshold;
        self
    }

    pub fn open_wait(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    /// Size the sliding window as `quantity` buckets of `bucket_duration`
    pub fn window(mut self, quantity: usize, bucket_duration: Duration) -> Self {
        self.config.metrics_sliding_window_bucket_quantity = quantity;
        self.config.metrics_bucket_duration = bucket_duration;
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// The classifier determines whether a given error should count toward
    /// opening the circuit. Use this to ignore "expected" errors like
    /// validation failures or client errors, while still tripping on
    /// server errors.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use resilience_machines::{CircuitBreaker, FailureContext, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(
    ///         |ctx: &FailureContext<'_>| ctx.duration > Duration::from_secs(1),
    ///     )))
    ///     .build()
    ///     .unwrap();
    ///
    /// assert!(circuit.is_closed());
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    fn resolved_config(&self) -> Result<Config, ConfigError> {
        let mut config = self.config.clone();
        config.defaults();
        config.validate()?;
        Ok(config)
    }

    /// Build a standalone circuit breaker
    pub fn build(self) -> Result<CircuitBreaker, ConfigError> {
        self.build_with(None)
    }

    /// Build a circuit breaker delegating to `next`
    pub fn build_with(self, next: Option<SharedRunner>) -> Result<CircuitBreaker, ConfigError> {
        let config = self.resolved_config()?;
        Ok(CircuitBreaker::from_parts(
            self.name,
            config,
            self.failure_classifier,
            self.callbacks,
            next,
        ))
    }

    /// Middleware producing a fresh breaker, with its own state, per wrap
    pub fn into_middleware(self) -> Result<Middleware, ConfigError> {
        let config = self.resolved_config()?;
        let CircuitBuilder {
            name,
            failure_classifier,
            callbacks,
            ..
        } = self;

        Ok(Middleware::new(move |next| {
            Arc::new(CircuitBreaker::from_parts(
                name.clone(),
                config.clone(),
                failure_classifier.clone(),
                callbacks.clone(),
                next,
            )) as SharedRunner
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitState;
    use crate::context::Context;
    use crate::errors::Error;
    use crate::runner::{Func, Runner};

    fn failing() -> Func {
        Func::new(|_ctx| async { Err(Error::execution("boom")) })
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let circuit = CircuitBuilder::new("test").build().unwrap();

        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.name(), "test");
        assert_eq!(circuit.config(), &Config::default());
    }

    #[tokio::test]
    async fn test_builder_custom_config() {
        let circuit = CircuitBuilder::new("test")
            .error_percent_threshold(25)
            .minimum_requests(8)
            .success_threshold(3)
            .open_wait(Duration::from_secs(60))
            .window(4, Duration::from_millis(250))
            .build()
            .unwrap();

        let config = circuit.config();
        assert_eq!(config.error_percent_threshold_to_open, 25);
        assert_eq!(config.minimum_request_to_open, 8);
        assert_eq!(config.successful_required_on_half_open, 3);
        assert_eq!(config.wait_duration_in_open_state, Duration::from_secs(60));
        assert_eq!(config.metrics_sliding_window_bucket_quantity, 4);
        assert_eq!(config.metrics_bucket_duration, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_builder_zero_values_take_defaults() {
        let circuit = CircuitBuilder::new("test")
            .minimum_requests(0)
            .window(0, Duration::ZERO)
            .build()
            .unwrap();

        assert_eq!(circuit.config(), &Config::default());
    }

    #[test]
    fn test_builder_rejects_invalid_percent() {
        let err = CircuitBuilder::new("test")
            .error_percent_threshold(150)
            .into_middleware()
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidPercent { value: 150, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_builder_with_callbacks() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let opened = seen.clone();
        let half_opened = seen.clone();
        let closed = seen.clone();

        let circuit = CircuitBuilder::new("payments")
            .minimum_requests(2)
            .open_wait(Duration::from_secs(1))
            .on_open(move |name| opened.lock().unwrap().push(format!("open:{name}")))
            .on_half_open(move |name| half_opened.lock().unwrap().push(format!("half_open:{name}")))
            .on_close(move |name| closed.lock().unwrap().push(format!("close:{name}")))
            .build()
            .unwrap();

        let _ = circuit.run(Context::new(), failing()).await;
        let _ = circuit.run(Context::new(), failing()).await;
        assert!(circuit.is_open());

        tokio::time::advance(Duration::from_secs(1)).await;
        circuit
            .run(Context::new(), Func::new(|_ctx| async { Ok(()) }))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["open:payments", "half_open:payments", "close:payments"]
        );
    }
}
