//! Single-slot, newest-wins message box.
//!
//! Used for the scheduler trigger, the transition target and the notifier's
//! dirty flag: in each case only the latest value matters, so a put replaces
//! whatever is still waiting instead of queueing behind it.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq)]
pub enum Received<T> {
    Value(T),
    Timeout,
    Closed,
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Store `value`, replacing any value not yet taken.
    pub fn put(&self, value: T) {
        let mut slot = self.lock();
        if slot.closed {
            return;
        }
        slot.value = Some(value);
        self.ready.notify_all();
    }

    /// Take the waiting value without blocking.
    pub fn take(&self) -> Option<T> {
        self.lock().value.take()
    }

    /// Whether a value is waiting. Does not consume it.
    pub fn is_pending(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Block until a value arrives or the mailbox is closed.
    pub fn recv(&self) -> Received<T> {
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Received::Closed;
            }
            if let Some(value) = slot.value.take() {
                return Received::Value(value);
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Received<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if slot.closed {
                return Received::Closed;
            }
            if let Some(value) = slot.value.take() {
                return Received::Value(value);
            }
            let now = Instant::now();
            if now >= deadline {
                return Received::Timeout;
            }
            slot = self
                .ready
                .wait_timeout(slot, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Wake every waiter with [`Received::Closed`]. Later puts are ignored.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        slot.value = None;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
