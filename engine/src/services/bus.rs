//! Observation channels between the coordinators and their observers
//!
//! State (alarm status, progress) travels over [`ObservationBus`], which keeps
//! only the latest value. One-off occurrences (termination, network notices)
//! travel over [`EventBus`]. Both hand out subscription handles that detach on
//! drop.

use tokio::sync::{broadcast, watch};
use tracing::warn;

/// Latest-value state channel
#[derive(Debug)]
pub struct ObservationBus<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone + PartialEq> ObservationBus<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Replaces the current value. Observers are only woken when it changed.
    pub fn publish(&self, value: T) {
        self.sender.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn current(&self) -> T {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Handle on an [`ObservationBus`]; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription<T> {
    receiver: watch::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    pub fn latest(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Waits for the next value. `None` once the bus is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn unsubscribe(self) {}
}

/// Fan-out channel for discrete events; clones publish to the same subscribers
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, event: E) {
        // Nobody listening is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription<E> {
        EventSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug)]
pub struct EventSubscription<E> {
    receiver: broadcast::Receiver<E>,
}

impl<E: Clone> EventSubscription<E> {
    /// Next event, skipping over any this subscriber was too slow to see
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, dropping old events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
