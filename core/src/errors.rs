//! Error types for runner execution and configuration

use std::error::Error as StdError;

/// Boxed error produced by a unit of work
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors returned from [`Runner::run`](crate::Runner::run)
///
/// Every variant except [`Error::Execution`] is produced by a policy. The
/// wrapped unit's own failure always travels untouched inside `Execution`,
/// so callers can tell the two apart with a plain `match`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The timeout runner's deadline fired before the inner call finished
    #[error("timeout while executing")]
    Timeout,

    /// The circuit is open, the call was rejected without running
    #[error("circuit '{circuit}' is open")]
    CircuitOpen { circuit: String },

    /// No bulkhead slot could be acquired in time
    #[error("bulkhead is full (limit: {limit})")]
    BulkheadFull { limit: usize },

    /// The chaos runner decided to fail this call
    #[error("failure injected")]
    FailureInjected,

    /// The caller's context was cancelled while a policy was waiting
    #[error("execution context cancelled")]
    Cancelled,

    /// A detached execution finished without reporting its outcome
    #[error("execution ended without reporting an outcome")]
    Aborted,

    /// The unit of work failed
    #[error(transparent)]
    Execution(BoxError),
}

impl Error {
    /// Wrap a unit of work's own failure
    pub fn execution(err: impl Into<BoxError>) -> Self {
        Error::Execution(err.into())
    }

    /// The unit of work's error, if this is an execution failure
    pub fn execution_source(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Error::Execution(e) => Some(e.as_ref()),
            _ => None,
        }
    }

    /// True for errors synthesized by a policy rather than by the unit
    pub fn is_policy(&self) -> bool {
        !matches!(self, Error::Execution(_))
    }
}

/// Invalid configuration, detected when a runner is constructed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be a percentage within 0..=100, got {value}")]
    InvalidPercent { field: &'static str, value: u32 },

    #[error("jitter factor must be within 0.0..=1.0, got {0}")]
    InvalidJitter(f64),
}
