use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Keeps the task graph alive while work is in flight *outside* of it.
///
/// The cache's asynchronous load path hands closures to the loader pool; from
/// the scheduler's point of view every stream can be empty while a loader
/// thread still owes a completion that will refill one. A stage that defers
/// work like that reserves the gateway before submitting and releases it once
/// the completion has been enqueued *and flushed*; the scheduler refuses to
/// declare quiescence while any gateway is reserved.
#[derive(Clone)]
pub struct Gateway {
    pending: Arc<AtomicUsize>,
}

impl Gateway {
    pub(crate) fn new(pending: Arc<AtomicUsize>) -> Self {
        Self { pending }
    }

    /// Announce a deferred completion.
    pub fn reserve(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// The deferred completion has been delivered (enqueued and flushed).
    pub fn release(&self) {
        let previous = self.pending.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "gateway released more often than reserved");
    }
}
