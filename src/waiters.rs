//! Pending-operation bookkeeping.
//!
//! A pending operation is a key mapped to a list of one-shot result slots.
//! Whoever drains the list first (the adapter event or the timeout) resolves
//! every slot with the same outcome; the loser finds nothing to drain.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// A single registered caller.
#[derive(Debug)]
struct Waiter<T> {
    id: u64,
    slot: oneshot::Sender<Result<T>>,
}

/// Slots drained from a [`WaiterRegistry`], ready to be resolved.
#[must_use = "drained waiters must be resolved"]
#[derive(Debug)]
pub(crate) struct Drained<T> {
    waiters: Vec<Waiter<T>>,
}

impl<T> Drained<T> {
    /// Number of drained slots.
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Check if nothing was pending.
    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Resolve every slot with an outcome built by `outcome`.
    ///
    /// Slots whose caller has gone away are skipped silently.
    pub(crate) fn resolve_with(self, mut outcome: impl FnMut() -> Result<T>) {
        for waiter in self.waiters {
            let _ = waiter.slot.send(outcome());
        }
    }
}

impl<T: Clone> Drained<T> {
    /// Resolve every slot with the same successful value.
    pub(crate) fn succeed(self, value: T) {
        self.resolve_with(|| Ok(value.clone()));
    }
}

/// Ordered lists of pending callers keyed by operation target.
#[derive(Debug)]
pub(crate) struct WaiterRegistry<K, T> {
    pending: HashMap<K, Vec<Waiter<T>>>,
    next_id: u64,
}

impl<K: Eq + Hash, T> WaiterRegistry<K, T> {
    pub(crate) fn new() -> Self {
        Self {
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register a caller for `key`. Returns the waiter id and its receiver.
    pub(crate) fn register(&mut self, key: K) -> (u64, oneshot::Receiver<Result<T>>) {
        let (slot, receiver) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.pending
            .entry(key)
            .or_default()
            .push(Waiter { id, slot });
        (id, receiver)
    }

    /// Take every waiter registered for `key`.
    pub(crate) fn drain(&mut self, key: &K) -> Drained<T> {
        Drained {
            waiters: self.pending.remove(key).unwrap_or_default(),
        }
    }

    /// Take every waiter for every key.
    pub(crate) fn drain_all(&mut self) -> Drained<T> {
        Drained {
            waiters: self.pending.drain().flat_map(|(_, list)| list).collect(),
        }
    }

    /// Remove one waiter without touching the others sharing its key.
    ///
    /// Returns the number of waiters left for `key`, or `None` if the waiter
    /// was no longer registered.
    pub(crate) fn remove(&mut self, key: &K, id: u64) -> Option<usize> {
        let list = self.pending.get_mut(key)?;
        let before = list.len();
        list.retain(|waiter| waiter.id != id);
        let remaining = list.len();

        if remaining == 0 {
            self.pending.remove(key);
        }
        (remaining < before).then_some(remaining)
    }

    /// Number of waiters pending for `key`.
    pub(crate) fn pending_for(&self, key: &K) -> usize {
        self.pending.get(key).map_or(0, Vec::len)
    }

    /// Check if any waiter is pending.
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<K: Eq + Hash, T> Default for WaiterRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a closure when dropped.
///
/// Used to withdraw a waiter when the future awaiting it is cancelled.
pub(crate) struct OnDrop<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> OnDrop<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F: FnOnce()> Drop for OnDrop<F> {
    fn drop(&mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Wait for a registered slot to resolve, or expire the operation after `timeout`.
///
/// `expire` must drain the registry entry and resolve it with a timeout error.
/// If an adapter event drained the entry first, `expire` finds nothing and the
/// slot already holds the event's outcome.
pub(crate) async fn wait_or_expire<T>(
    mut receiver: oneshot::Receiver<Result<T>>,
    timeout: Duration,
    expire: impl FnOnce(),
) -> Result<T> {
    let outcome = tokio::select! {
        biased;
        outcome = &mut receiver => outcome,
        _ = tokio::time::sleep(timeout) => {
            expire();
            receiver.await
        }
    };

    outcome.unwrap_or_else(|_| Err(Error::Internal("waiter dropped without a result".to_string())))
}
