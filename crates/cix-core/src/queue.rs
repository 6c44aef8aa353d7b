//! Priority request queue.
//!
//! Items are ordered by `(priority, arrival)`, lower priority values first.
//! Each id has at most one queued entry: a second `put` with the same id
//! replaces the first and takes the new priority and a fresh arrival stamp.

use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::trace;

/// `(priority, arrival sequence)`
type Slot = (u32, u64);

struct State<K, T> {
    entries: BTreeMap<Slot, (K, T)>,
    slots: HashMap<K, Slot>,
    next_seq: u64,
    closed: bool,
}

/// Blocking multi-producer multi-consumer priority queue keyed by id.
pub struct PriorityQueue<K, T> {
    state: Mutex<State<K, T>>,
    ready: Condvar,
}

impl<K, T> Default for PriorityQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> PriorityQueue<K, T>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: BTreeMap::new(),
                slots: HashMap::new(),
                next_seq: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue `payload` under `id`, replacing any entry already queued for it.
    ///
    /// Returns `false` (dropping the payload) once the queue is closed.
    pub fn put(&self, priority: u32, id: K, payload: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }

        if let Some(old) = state.slots.remove(&id) {
            state.entries.remove(&old);
            trace!(priority, "Replaced queued request");
        }

        let slot = (priority, state.next_seq);
        state.next_seq += 1;
        state.slots.insert(id.clone(), slot);
        state.entries.insert(slot, (id, payload));
        drop(state);

        self.ready.notify_one();
        true
    }

    /// Take the most urgent item, blocking until one is available.
    ///
    /// After [`close`](Self::close) the remaining items are still handed out;
    /// `None` is returned once the queue is closed and empty.
    pub fn get(&self) -> Option<(K, T)> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = Self::pop_first(&mut state) {
                return Some(item);
            }
            if state.closed {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Take the most urgent item if one is queued.
    pub fn try_get(&self) -> Option<(K, T)> {
        Self::pop_first(&mut self.state.lock())
    }

    /// Cancel the entry queued under `id`. Never blocks on an empty queue;
    /// returns whether an entry was removed.
    pub fn remove_id(&self, id: &K) -> bool {
        let mut state = self.state.lock();
        match state.slots.remove(id) {
            Some(slot) => {
                state.entries.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Cancel every entry whose id matches `pred`. Returns how many were
    /// removed.
    pub fn remove_matching(&self, pred: impl Fn(&K) -> bool) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<(K, Slot)> = state
            .slots
            .iter()
            .filter(|(id, _)| pred(id))
            .map(|(id, slot)| (id.clone(), *slot))
            .collect();

        for (id, slot) in &doomed {
            state.slots.remove(id);
            state.entries.remove(slot);
        }
        doomed.len()
    }

    /// Whether an entry is queued under `id`.
    pub fn contains(&self, id: &K) -> bool {
        self.state.lock().slots.contains_key(id)
    }

    /// Stop accepting work and wake every blocked consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    fn pop_first(state: &mut State<K, T>) -> Option<(K, T)> {
        let (_, (id, payload)) = state.entries.pop_first()?;
        state.slots.remove(&id);
        Some((id, payload))
    }
}

impl<K, T> std::fmt::Debug for PriorityQueue<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityQueue")
            .field("len", &state.entries.len())
            .field("closed", &state.closed)
            .finish()
    }
}
