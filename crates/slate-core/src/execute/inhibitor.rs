//! Single-flight guard for document evaluation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reentrant counter of active evaluation requests.
///
/// Evaluation is allowed only while the count is zero. Every acquisition
/// returns an [`InhibitGuard`] that releases on drop, so the count is restored
/// on every exit path, including cancellation.
///
/// # Example
///
/// ```
/// use slate_core::execute::EvaluationInhibitor;
///
/// let inhibitor = EvaluationInhibitor::new();
/// let guard = inhibitor.try_acquire().unwrap();
/// assert!(!inhibitor.can_evaluate());
/// assert!(inhibitor.try_acquire().is_none());
///
/// drop(guard);
/// assert!(inhibitor.can_evaluate());
/// ```
#[derive(Clone, Default)]
pub struct EvaluationInhibitor {
    count: Arc<AtomicUsize>,
}

impl EvaluationInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_evaluate(&self) -> bool {
        self.count.load(Ordering::Acquire) == 0
    }

    /// Acquire for an evaluation, if nothing else holds the inhibitor.
    pub fn try_acquire(&self) -> Option<InhibitGuard> {
        self.count
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InhibitGuard {
                count: self.count.clone(),
            })
    }

    /// Acquire unconditionally. Nests with other holders.
    pub fn inhibit(&self) -> InhibitGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InhibitGuard {
            count: self.count.clone(),
        }
    }
}

/// Releases one hold on an [`EvaluationInhibitor`] when dropped.
#[must_use = "the inhibitor is released as soon as the guard is dropped"]
pub struct InhibitGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for InhibitGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}
