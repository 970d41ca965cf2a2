//! Per-key serialization of async work.
//!
//! Tasks submitted under the same key run one at a time in submission
//! order. A task's place in line is taken when `serialize_by_key` is
//! called, not when the returned future is first polled. Tasks under
//! different keys do not wait on each other. A key's entry is dropped from
//! the map as soon as nothing is running or waiting on it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Line state for one key.
struct KeyState {
    /// Ticket handed to the next submission.
    next: u64,
    /// Ticket currently allowed to run.
    serving: u64,
    /// Waiting tickets whose futures were dropped before their turn.
    abandoned: BTreeSet<u64>,
    turn: watch::Sender<u64>,
}

/// Serializes async tasks by string key.
#[derive(Clone, Default)]
pub struct KeyedQueue {
    slots: Arc<DashMap<String, KeyState>>,
}

impl KeyedQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once every task submitted earlier for `key` has settled.
    ///
    /// The output is the task's own output. A failed, panicked or cancelled
    /// task does not block its successors.
    pub fn serialize_by_key<F, T>(
        &self,
        key: impl Into<String>,
        task: F,
    ) -> impl Future<Output = T>
    where
        F: Future<Output = T>,
    {
        let (ticket, mut turn) = self.take_ticket(key.into());
        let mine = ticket.number;
        async move {
            let _ticket = ticket;
            // A closed channel means the key was retired, which only
            // happens once no ticket is outstanding.
            let _ = turn.wait_for(|serving| *serving >= mine).await;
            task.await
        }
    }

    /// Number of keys with running or waiting tasks.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no key has running or waiting tasks.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `key` has running or waiting tasks.
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    fn take_ticket(&self, key: String) -> (Ticket, watch::Receiver<u64>) {
        let (number, turn) = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                let number = state.next;
                state.next += 1;
                (number, state.turn.subscribe())
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(0);
                entry.insert(KeyState {
                    next: 1,
                    serving: 0,
                    abandoned: BTreeSet::new(),
                    turn: tx,
                });
                (0, rx)
            }
        };
        let ticket = Ticket {
            slots: Arc::clone(&self.slots),
            key,
            number,
        };
        (ticket, turn)
    }
}

/// A place in line for one key. Dropping it hands the turn on.
struct Ticket {
    slots: Arc<DashMap<String, KeyState>>,
    key: String,
    number: u64,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let Entry::Occupied(mut entry) = self.slots.entry(self.key.clone()) else {
            return;
        };

        let state = entry.get_mut();
        if state.serving != self.number {
            // Still waiting; skip this ticket when its turn comes.
            state.abandoned.insert(self.number);
            return;
        }

        state.serving += 1;
        while state.abandoned.remove(&state.serving) {
            state.serving += 1;
        }

        if state.serving == state.next {
            entry.remove();
        } else {
            let serving = state.serving;
            state.turn.send_replace(serving);
        }
    }
}
