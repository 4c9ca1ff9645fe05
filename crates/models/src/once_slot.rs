use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// Single-assignment result slot.
///
/// Several signals may race to resolve the same wait point (failure callback,
/// status poll, cancellation); only the first `settle` reaches the receiver.
#[derive(Debug)]
pub struct OnceSlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> OnceSlot<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Resolve the slot. Returns `false` if it was already settled or the
    /// receiver is gone.
    pub fn settle(&self, value: T) -> bool {
        let tx = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match tx {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
