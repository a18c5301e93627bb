//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport** for events after they have been appended to
//! the event store. It deliberately promises very little:
//!
//! - **Store first, publish second**: the store is the source of truth; a lost
//!   or duplicated bus message never loses a fact.
//! - **At-least-once delivery**: consumers may see a message twice and must be
//!   idempotent (the refund projection tracks per-stream cursors for this).
//! - **No persistence**: a consumer that needs history replays the store, it
//!   does not ask the bus.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription receives a copy of every message published after it was
/// created (broadcast semantics). Subscriptions are single-consumer: hand one
/// to exactly one thread and let it drain.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(envelope) => process(envelope)?,
///         Err(RecvTimeoutError::Timeout) => continue,
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> From<Receiver<M>> for Subscription<M> {
    fn from(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }
}

impl<M> Subscription<M> {
    /// Block until the next message arrives or the bus is gone.
    pub fn recv(&self) -> Result<M, RecvError> {
        self.receiver.recv()
    }

    /// Take the next message if one is already queued.
    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait up to `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Collect everything currently queued, without blocking.
    ///
    /// Handy for tests and synchronous catch-up loops: publication happens
    /// inside command execution, so by the time a command returns its
    /// envelopes are already sitting here.
    pub fn drain(&self) -> Vec<M> {
        let mut queued = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            queued.push(message);
        }
        queued
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// Messages flow one way:
///
/// ```text
/// Command → Event Store (append) → Event Bus (publish) → Consumers
///                                                            ├─ Projections
///                                                            └─ Notification sinks
/// ```
///
/// `publish()` can fail (bus shut down, channel full). Because events are
/// already persisted by then, the caller may retry or surface the failure
/// without risking data loss. Implementations must be `Send + Sync`; multiple
/// threads publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
