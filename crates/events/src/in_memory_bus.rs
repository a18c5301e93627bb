//! Channel-backed bus for single-process deployments and tests.

use std::sync::Mutex;
use std::sync::mpsc::{Sender, channel};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// A publisher panicked while holding the subscriber list.
    #[error("event bus subscriber list is poisoned")]
    Poisoned,
}

/// Fan-out over std mpsc channels, one sender per live subscription.
///
/// Every subscriber gets its own unbounded channel; a slow consumer buffers,
/// it never blocks publishers. Closed channels (dropped subscriptions) are
/// pruned on the next publish. Within one bus, delivery order matches
/// publish order.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    senders: Mutex<Vec<Sender<M>>>,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut senders = self.senders.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        // A failed send means the subscription was dropped; forget it.
        senders.retain(|sender| sender.send(message.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (sender, receiver) = channel();
        if let Ok(mut senders) = self.senders.lock() {
            senders.push(sender);
        }
        Subscription::from(receiver)
    }
}
