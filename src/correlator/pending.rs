//! One-slot handoff between a waiting request and the read task.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{trace, warn};

use crate::error::{MavLinkError, Result};
use crate::link::LinkHandle;

type Matcher<T> = Box<dyn Fn(&T) -> bool + Send>;

struct Pending<T> {
    matches: Matcher<T>,
    reply: oneshot::Sender<T>,
}

/// Slot holding at most one outstanding expectation
///
/// The read task offers every candidate reply; the first one accepted by the
/// matcher resolves the waiter and empties the slot.
pub struct PendingSlot<T> {
    inner: Mutex<Option<Pending<T>>>,
}

impl<T> Default for PendingSlot<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }
}

impl<T: Clone> PendingSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new expectation, replacing any stale one
    ///
    /// Must be called before the request goes out so a fast reply is not missed.
    pub fn arm<F>(&self, matches: F) -> oneshot::Receiver<T>
    where
        F: Fn(&T) -> bool + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let previous = self.lock().replace(Pending {
            matches: Box::new(matches),
            reply,
        });
        if previous.is_some() {
            trace!("Replacing stale pending expectation");
        }
        rx
    }

    /// Offer an inbound message; returns true if it resolved the waiter
    pub fn offer(&self, value: &T) -> bool {
        let mut slot = self.lock();
        let matched = slot.as_ref().is_some_and(|pending| (pending.matches)(value));
        if !matched {
            return false;
        }

        match slot.take() {
            // The waiter may have given up already
            Some(pending) => pending.reply.send(value.clone()).is_ok(),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Pending<T>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Wait for an armed reply, the deadline, or the link going away
///
/// # Errors
///
/// * `Timeout` when nothing matched within `wait`
/// * `LinkClosed` / `ConnectionLost` when the link stops first
pub async fn await_reply<T>(
    rx: oneshot::Receiver<T>,
    wait: Duration,
    link: &LinkHandle,
    operation: &'static str,
) -> Result<T> {
    let cancel = link.shutdown_token();

    tokio::select! {
        reply = timeout(wait, rx) => match reply {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(link.closed_error()),
            Err(_) => {
                warn!("Timed out after {:?} waiting for {}", wait, operation);
                Err(MavLinkError::Timeout { operation })
            }
        },
        _ = cancel.cancelled() => Err(link.closed_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_resolves_matching_waiter_once() {
        let slot = PendingSlot::<u16>::new();
        let mut rx = slot.arm(|v| *v == 7);

        assert!(!slot.offer(&3));
        assert!(slot.is_armed());
        assert!(slot.offer(&7));
        assert!(!slot.is_armed());
        assert!(!slot.offer(&7));

        assert_eq!(rx.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_arm_replaces_stale_expectation() {
        let slot = PendingSlot::<u16>::new();
        let mut stale = slot.arm(|_| true);
        let mut fresh = slot.arm(|v| *v == 1);

        assert!(slot.offer(&1));
        assert!(stale.try_recv().is_err());
        assert_eq!(fresh.try_recv().unwrap(), 1);
    }

    #[test]
    fn test_offer_after_waiter_dropped() {
        let slot = PendingSlot::<u16>::new();
        drop(slot.arm(|_| true));
        assert!(!slot.offer(&1));
        assert!(!slot.is_armed());
    }

    #[test]
    fn test_waiter_stays_pending_until_match() {
        let slot = PendingSlot::<u16>::new();
        let mut rx = tokio_test::task::spawn(slot.arm(|v| *v == 7));

        tokio_test::assert_pending!(rx.poll());
        assert!(!slot.offer(&3));
        tokio_test::assert_pending!(rx.poll());

        assert!(slot.offer(&7));
        assert!(rx.is_woken());
        assert_eq!(tokio_test::assert_ready_ok!(rx.poll()), 7);
    }

    #[test]
    fn test_clear() {
        let slot = PendingSlot::<u16>::new();
        let _rx = slot.arm(|_| true);
        slot.clear();
        assert!(!slot.offer(&1));
    }
}
