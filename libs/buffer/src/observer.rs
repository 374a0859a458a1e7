//! Change observers: long-poll and streaming subscriptions over data items
//!
//! A [`ChangeObserver`] is owned by a streaming session and registered with
//! the circular buffer for a set of data item ids. The buffer signals it
//! inside the commit-locked section with the committed sequence; the
//! session waits on its own task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
pub(crate) struct ObserverInner {
    notify: Notify,
    /// Lowest signalled sequence not yet consumed.
    sequence: Mutex<Option<u64>>,
}

impl ObserverInner {
    pub(crate) fn signal(&self, sequence: u64) {
        {
            let mut slot = self.sequence.lock();
            match *slot {
                Some(existing) if existing <= sequence => {}
                _ => *slot = Some(sequence),
            }
        }
        self.notify.notify_one();
    }
}

/// A subscription handle signalled when a watched data item commits.
#[derive(Debug, Clone, Default)]
pub struct ChangeObserver {
    inner: Arc<ObserverInner>,
}

impl ChangeObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn handle(&self) -> std::sync::Weak<ObserverInner> {
        Arc::downgrade(&self.inner)
    }

    /// True when a signal is pending.
    pub fn was_signalled(&self) -> bool {
        self.inner.sequence.lock().is_some()
    }

    /// Consume and return the pending sequence, if any.
    pub fn take_sequence(&self) -> Option<u64> {
        self.inner.sequence.lock().take()
    }

    /// Peek at the pending sequence without consuming it.
    pub fn peek_sequence(&self) -> Option<u64> {
        *self.inner.sequence.lock()
    }

    /// Discard any pending signal at or below `sequence`; a session calls
    /// this after reading the buffer up to that point.
    pub fn consume_through(&self, sequence: u64) {
        let mut slot = self.inner.sequence.lock();
        if matches!(*slot, Some(s) if s <= sequence) {
            *slot = None;
        }
    }

    /// Wait until signalled or until `timeout` elapses. Returns `true`
    /// when a signal is pending.
    pub async fn wait_for(&self, timeout: Duration) -> bool {
        if self.was_signalled() {
            return true;
        }
        let _ = tokio::time::timeout(timeout, self.inner.notify.notified()).await;
        self.was_signalled()
    }
}
