//! Bounded submission of site tasks.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::metrics;

/// Counting gate limiting how many site tasks may be outstanding.
///
/// A slot is taken before a site task is submitted and given back only when
/// the [`SubmissionSlot`] is dropped, which the site task does when it has
/// fully finished. A feed producing sites faster than they are crawled
/// therefore blocks at submission instead of queueing without bound.
#[derive(Debug, Clone)]
pub struct SubmissionGate {
    slots: Arc<Semaphore>,
    capacity: usize,
}

/// One outstanding site task. Dropping it frees the slot.
#[derive(Debug)]
pub struct SubmissionSlot {
    _permit: OwnedSemaphorePermit,
}

impl Drop for SubmissionSlot {
    fn drop(&mut self) {
        metrics::QUEUED_SITE_TASKS.dec();
    }
}

impl SubmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot.
    ///
    /// Returns `None` if `shutdown` fires first; no slot is taken then.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Option<SubmissionSlot> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            permit = Arc::clone(&self.slots).acquire_owned() => {
                let permit = permit.ok()?;
                metrics::QUEUED_SITE_TASKS.inc();
                Some(SubmissionSlot { _permit: permit })
            }
        }
    }

    /// Slots currently held.
    pub fn outstanding(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test]
    async fn test_blocks_when_full_and_unblocks_on_release() {
        let gate = SubmissionGate::new(2);
        let shutdown = CancellationToken::new();

        let first = gate.acquire(&shutdown).await.unwrap();
        let _second = gate.acquire(&shutdown).await.unwrap();
        assert_eq!(gate.outstanding(), 2);

        let mut third = tokio_test::task::spawn(gate.acquire(&shutdown));
        assert_pending!(third.poll());
        assert_pending!(third.poll());

        drop(first);
        assert!(third.is_woken());
        let slot = assert_ready!(third.poll());
        assert!(slot.is_some());
        assert_eq!(gate.outstanding(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_releases_blocked_submitter() {
        let gate = SubmissionGate::new(1);
        let shutdown = CancellationToken::new();
        let _held = gate.acquire(&shutdown).await.unwrap();

        let mut blocked = tokio_test::task::spawn(gate.acquire(&shutdown));
        assert_pending!(blocked.poll());

        shutdown.cancel();
        assert!(assert_ready!(blocked.poll()).is_none());
        assert_eq!(gate.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_no_slot_after_shutdown_even_if_free() {
        let gate = SubmissionGate::new(4);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(gate.acquire(&shutdown).await.is_none());
        assert_eq!(gate.outstanding(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(SubmissionGate::new(0).capacity(), 1);
    }
}
