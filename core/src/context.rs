//! Execution context handed to runners and units of work
//!
//! A [`Context`] is a cheap, cloneable handle combining cooperative
//! cancellation, an optional deadline and an optional metrics recorder.
//! Derived contexts inherit the parent's cancellation and can only shorten
//! its deadline, never extend it.

use crate::errors::Error;
use crate::metrics::{NoopRecorder, Recorder};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    recorder: Option<Arc<dyn Recorder>>,
}

impl Context {
    /// A root context: never cancelled unless [`cancel`](Self::cancel) is called
    pub fn new() -> Self {
        Self::default()
    }

    /// A root context driven by an existing cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// Derive a context that is cancelled with its parent but can also be
    /// cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
            recorder: self.recorder.clone(),
        }
    }

    /// Derive a child whose deadline is `now + timeout`, or the parent's
    /// deadline if that comes first
    ///
    /// A timeout too large to express as an instant adds no deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.child(),
        }
    }

    /// Derive a child with the given deadline, bounded by the parent's
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut child = self.child();
        child.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        child
    }

    /// Attach a recorder; shares this context's cancellation
    pub fn with_recorder(&self, recorder: Arc<dyn Recorder>) -> Self {
        Self {
            token: self.token.clone(),
            deadline: self.deadline,
            recorder: Some(recorder),
        }
    }

    /// The attached recorder, or a no-op recorder when none is attached
    pub fn recorder(&self) -> &dyn Recorder {
        match &self.recorder {
            Some(recorder) => recorder.as_ref(),
            None => &NoopRecorder,
        }
    }

    /// The attached recorder, if any
    pub fn attached_recorder(&self) -> Option<&Arc<dyn Recorder>> {
        self.recorder.as_ref()
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| d <= Instant::now())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Completes once the context is cancelled or its deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    /// Why the context is done, if it is
    ///
    /// Cancellation wins over an expired deadline.
    pub fn err(&self) -> Option<Error> {
        if self.is_cancelled() {
            Some(Error::Cancelled)
        } else if self.is_expired() {
            Some(Error::Timeout)
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}
