use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cleanup guard returned by every listener registration in this crate.
///
/// Dropping the subscription detaches the underlying listener, so holding it
/// is what keeps an observer alive. Call [`Subscription::detach`] to remove
/// the listener eagerly, or [`Subscription::forget`] to leave it attached for
/// the lifetime of the host object.
pub struct Subscription {
    cleanup: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    /// Creates a subscription whose cleanup callback runs exactly once, on
    /// drop or on an explicit [`detach`](Subscription::detach).
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Returns a subscription that performs no cleanup work.
    pub fn noop() -> Self {
        Self { cleanup: None }
    }

    /// Removes the listener now instead of waiting for drop.
    pub fn detach(mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }

    /// Keeps the listener attached permanently by discarding the guard
    /// without running its cleanup.
    pub fn forget(mut self) {
        self.cleanup.take();
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::noop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("armed", &self.cleanup.is_some())
            .finish()
    }
}

/// Shared flag that records whether a subscription's cleanup already ran.
///
/// Useful when a registration needs to answer "is this listener still
/// attached" from another thread or task.
pub fn tracked() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
    let attached = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&attached);
    (attached, move || flag.store(false, Ordering::SeqCst))
}
