//! Debounced snapshot broadcasting.
//!
//! Workers mark the engine dirty whenever they publish a snapshot. The
//! notifier waits a short gap so bursts (such as a 30-frame transition)
//! collapse, then sends the latest snapshot to every subscriber if it differs
//! meaningfully from the last one sent.
//!
//! Each subscriber owns a small bounded buffer. A subscriber that stops
//! reading misses snapshots instead of stalling the others.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use crate::constants::SUBSCRIBER_BUFFER;
use crate::core::Shared;
use crate::core::mailbox::Received;
use crate::state::{GammaSnapshot, state_changed};

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, SyncSender<Arc<GammaSnapshot>>>,
    closed: bool,
}

/// The set of live subscriptions.
#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<Subscribers>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. After [`close_all`](Self::close_all) the returned
    /// subscription is already finished.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (sender, receiver) = mpsc::sync_channel(SUBSCRIBER_BUFFER);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        if !inner.closed {
            inner.senders.insert(id, sender);
        }
        Subscription {
            id,
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.lock().senders.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().senders.is_empty()
    }

    /// Send to every subscriber without blocking. Full buffers skip this
    /// snapshot; disconnected subscribers are dropped.
    pub fn broadcast(&self, snapshot: &Arc<GammaSnapshot>) {
        let mut inner = self.lock();
        inner
            .senders
            .retain(|id, sender| match sender.try_send(Arc::clone(snapshot)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    log_debug!("Subscriber {id} is not keeping up, skipping snapshot");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
    }

    /// End every subscription stream.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.senders.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A stream of snapshots. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: Receiver<Arc<GammaSnapshot>>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    /// Block for the next snapshot. `None` once the engine has shut down.
    pub fn recv(&self) -> Option<Arc<GammaSnapshot>> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<GammaSnapshot>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Arc<GammaSnapshot>, TryRecvError> {
        self.receiver.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

pub(crate) fn run(shared: Arc<Shared>) {
    let mut last: Option<Arc<GammaSnapshot>> = None;

    loop {
        match shared.dirty.recv() {
            Received::Value(()) => {}
            Received::Timeout => continue,
            Received::Closed => break,
        }

        thread::sleep(shared.timing.notify_debounce);
        if shared.is_stopping() {
            break;
        }
        shared.dirty.take();

        let snapshot = shared.snapshot();
        if !state_changed(last.as_deref(), &snapshot) {
            continue;
        }
        last = Some(Arc::clone(&snapshot));

        if !shared.subscribers.is_empty() {
            shared.subscribers.broadcast(&snapshot);
        }
    }
    log_debug!("Notifier stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(temp: u32) -> Arc<GammaSnapshot> {
        Arc::new(GammaSnapshot {
            current_temp: temp,
            ..Default::default()
        })
    }

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new());
        let first = registry.subscribe();
        let second = registry.subscribe();

        registry.broadcast(&snapshot(5000));
        assert_eq!(first.try_recv().unwrap().current_temp, 5000);
        assert_eq!(second.try_recv().unwrap().current_temp, 5000);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscription = registry.subscribe();
        assert_eq!(registry.len(), 1);
        drop(subscription);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_slow_subscriber_misses_snapshots() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscription = registry.subscribe();

        for temp in 0..(SUBSCRIBER_BUFFER as u32 + 10) {
            registry.broadcast(&snapshot(temp));
        }
        assert_eq!(registry.len(), 1);

        let received: Vec<u32> = std::iter::from_fn(|| subscription.try_recv().ok())
            .map(|s| s.current_temp)
            .collect();
        assert_eq!(received.len(), SUBSCRIBER_BUFFER);
        assert_eq!(received[0], 0);
    }

    #[test]
    fn test_close_all_ends_streams() {
        let registry = Arc::new(SubscriberRegistry::new());
        let subscription = registry.subscribe();
        registry.close_all();

        assert_eq!(subscription.recv(), None);
        assert_eq!(registry.subscribe().recv(), None);
    }
}
