//! Time-bounded resource guard.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

struct GuardState {
    operation: String,
    released: AtomicBool,
    active: Arc<AtomicUsize>,
}

impl GuardState {
    /// Returns true if this call did the release.
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        true
    }
}

/// Keeps the host awake for one operation.
///
/// Released explicitly, on drop, or by the hard timeout, whichever comes
/// first. Only the first of those has any effect.
pub struct ResourceGuard {
    state: Arc<GuardState>,
    timeout: JoinHandle<()>,
}

impl ResourceGuard {
    pub(crate) fn acquire(operation: &str, timeout: Duration, active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(GuardState {
            operation: operation.to_string(),
            released: AtomicBool::new(false),
            active,
        });

        let timer_state = state.clone();
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if timer_state.release() {
                tracing::warn!(
                    operation = %timer_state.operation,
                    "Resource guard hit its {:?} timeout",
                    timeout
                );
            }
        });

        tracing::trace!(operation, "Resource guard acquired");
        Self { state, timeout }
    }

    pub fn operation(&self) -> &str {
        &self.state.operation
    }

    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Release now. Idempotent.
    pub fn release(&self) {
        if self.state.release() {
            self.timeout.abort();
            tracing::trace!(operation = %self.state.operation, "Resource guard released");
        }
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_release_idempotent() {
        let active = Arc::new(AtomicUsize::new(0));
        let guard = ResourceGuard::acquire("dispatch", Duration::from_secs(10), active.clone());
        assert_eq!(active.load(Ordering::SeqCst), 1);
        assert_eq!(guard.operation(), "dispatch");

        guard.release();
        guard.release();
        assert!(guard.is_released());
        assert_eq!(active.load(Ordering::SeqCst), 0);

        drop(guard);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout_releases() {
        let active = Arc::new(AtomicUsize::new(0));
        let guard = ResourceGuard::acquire("slow", Duration::from_secs(2), active.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!guard.is_released());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(guard.is_released());
        assert_eq!(active.load(Ordering::SeqCst), 0);

        // Late explicit release is a no-op
        guard.release();
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases() {
        let active = Arc::new(AtomicUsize::new(0));
        {
            let _guard = ResourceGuard::acquire("scoped", Duration::from_secs(60), active.clone());
            assert_eq!(active.load(Ordering::SeqCst), 1);
        }
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
