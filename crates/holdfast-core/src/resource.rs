//! Retained resources.

use parking_lot::Mutex;

/// Something the native engine may still touch while a handle is live.
///
/// `release()` must be idempotent: the registry calls it exactly once, but a
/// dispose path racing a free notification may reach the same resource twice
/// through different owners.
pub trait RetainedResource: Send + Sync {
    fn release(&self);

    /// Short name for diagnostics.
    fn label(&self) -> &'static str {
        "resource"
    }
}

/// Resource that runs a closure on first release.
pub struct OnRelease<F: FnOnce() + Send> {
    action: Mutex<Option<F>>,
    label: &'static str,
}

impl<F: FnOnce() + Send> OnRelease<F> {
    pub fn new(label: &'static str, action: F) -> Self {
        Self {
            action: Mutex::new(Some(action)),
            label,
        }
    }

    pub fn is_released(&self) -> bool {
        self.action.lock().is_none()
    }
}

impl<F: FnOnce() + Send> RetainedResource for OnRelease<F> {
    fn release(&self) {
        // Take before running so the closure never runs under the lock.
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_on_release_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let resource = OnRelease::new("flag", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!resource.is_released());
        resource.release();
        resource.release();
        assert!(resource.is_released());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(resource.label(), "flag");
    }
}
