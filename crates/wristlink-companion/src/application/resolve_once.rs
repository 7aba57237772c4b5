//! Single-assignment result slots for vendor callbacks.
//!
//! Vendor SDK callbacks are allowed to fire more than once.  Wrapping the
//! callback side in a [`ResolveOnce`] makes the first value win and turns
//! every later call into a no-op, while the awaiting side gets an ordinary
//! `oneshot::Receiver`.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

/// The resolving half of a single-assignment slot.
///
/// Clones share the same slot: whichever clone resolves first wins.
pub struct ResolveOnce<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> ResolveOnce<T> {
    /// Creates a slot and returns its resolver and the receiver that observes
    /// it.  The receiver yields `Err` if every resolver is dropped unresolved.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Stores `value` if the slot is still empty.
    ///
    /// Returns `true` for the call that filled the slot and `false` for every
    /// call after it.
    pub fn resolve(&self, value: T) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // A dropped receiver only means nobody is waiting any more.
                let _ = tx.send(value);
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T> Clone for ResolveOnce<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_value_wins() {
        // Arrange
        let (resolver, rx) = ResolveOnce::new();

        // Act
        let first = resolver.resolve(1);
        let second = resolver.resolve(2);

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(rx.await, Ok(1));
    }

    #[tokio::test]
    async fn test_clones_share_the_slot() {
        let (resolver, rx) = ResolveOnce::new();
        let other = resolver.clone();

        assert!(other.resolve("from clone"));
        assert!(!resolver.resolve("from original"));
        assert!(resolver.is_resolved());
        assert_eq!(rx.await, Ok("from clone"));
    }

    #[tokio::test]
    async fn test_receiver_errors_when_all_resolvers_dropped() {
        let (resolver, rx) = ResolveOnce::<u8>::new();
        let other = resolver.clone();

        drop(resolver);
        drop(other);

        assert!(rx.await.is_err());
    }

    #[test]
    fn test_receiver_pending_until_resolved() {
        use tokio_test::{assert_pending, assert_ready_eq, task};

        let (resolver, rx) = ResolveOnce::new();
        let mut rx = task::spawn(rx);

        assert_pending!(rx.poll());
        assert!(resolver.resolve(3));
        assert!(rx.is_woken());
        assert_ready_eq!(rx.poll(), Ok(3));
    }

    #[test]
    fn test_resolve_after_receiver_dropped_still_claims_slot() {
        let (resolver, rx) = ResolveOnce::new();
        drop(rx);

        assert!(resolver.resolve(5));
        assert!(!resolver.resolve(6));
    }
}
