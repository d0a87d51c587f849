//! Cancellable delayed tasks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A spawned task that runs `action` after `delay` unless cancelled first.
///
/// Dropping a `PendingTask` cancels it, so replacing the one stored on a
/// connection is always cancel-then-replace.
#[derive(Debug)]
pub struct PendingTask {
    handle: Option<JoinHandle<()>>,
    delay: Duration,
}

impl PendingTask {
    /// Spawn `action` to run after `delay` on the current runtime.
    pub fn schedule<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        Self {
            handle: Some(handle),
            delay,
        }
    }

    /// The delay this task was scheduled with.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns true once the action has run or the task was cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Abort the task. Safe to call more than once.
    pub fn cancel(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }

    /// Let the task run to completion without keeping a handle. Used by the
    /// task itself when it fires.
    pub fn detach(mut self) {
        self.handle.take();
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
