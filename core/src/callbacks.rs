//! User hooks fired on circuit breaker state transitions

use crate::circuit::CircuitState;
use std::sync::Arc;

/// Hook receiving the circuit name
pub type TransitionHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-state transition hooks
///
/// Hooks run synchronously while the breaker holds its transition lock;
/// they must not call back into the same breaker's `reset`.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<TransitionHook>,
    pub on_close: Option<TransitionHook>,
    pub on_half_open: Option<TransitionHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the hook registered for entering `state`
    pub fn trigger(&self, state: CircuitState, circuit: &str) {
        let hook = match state {
            CircuitState::Open => &self.on_open,
            CircuitState::Closed => &self.on_close,
            CircuitState::HalfOpen => &self.on_half_open,
        };
        if let Some(hook) = hook {
            hook(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
