//! Handle that undoes a registration.

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

/// Returned by every subscribe/listen call.
///
/// `dispose` runs the teardown at most once; later calls are no-ops.
/// Dropping a `Disposer` without disposing leaves the registration in place.
#[must_use = "dropping a Disposer keeps the registration alive; call dispose() to remove it"]
pub struct Disposer {
    teardown: Mutex<Option<Teardown>>,
}

impl Disposer {
    pub(crate) fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn dispose(&self) {
        // Take first so the teardown runs without the lock held.
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.teardown.lock().is_none()
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
