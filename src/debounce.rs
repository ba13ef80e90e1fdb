use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, join_all};
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::Result;

/// Deferred store write. Only the most recent job per key ever runs.
pub type Job = BoxFuture<'static, Result<()>>;

pub type Waiter = oneshot::Sender<Result<()>>;

struct Slot {
    generation: u64,
    job: Job,
    waiters: Vec<Waiter>,
}

struct State<K> {
    next_generation: u64,
    slots: HashMap<K, Slot>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key trailing-edge debouncer.
///
/// Scheduling a job for a key that already has one pending replaces the job and
/// restarts the window. Everyone who scheduled under that key is told the outcome
/// of the job that finally runs.
pub struct Debouncer<K> {
    window: Duration,
    state: Arc<Mutex<State<K>>>,
}

impl<K> Clone for Debouncer<K> {
    fn clone(&self) -> Self {
        Self {
            window: self.window,
            state: Arc::clone(&self.state),
        }
    }
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + std::fmt::Debug + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Arc::new(Mutex::new(State {
                next_generation: 0,
                slots: HashMap::new(),
            })),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Must be called from inside a tokio runtime.
    pub fn schedule(&self, key: K, job: Job) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut state = lock(&self.state);
            let generation = state.next_generation;
            state.next_generation += 1;
            match state.slots.get_mut(&key) {
                Some(slot) => {
                    slot.generation = generation;
                    slot.job = job;
                    slot.waiters.push(tx);
                    trace!(?key, "debounced job replaced");
                }
                None => {
                    state.slots.insert(
                        key.clone(),
                        Slot {
                            generation,
                            job,
                            waiters: vec![tx],
                        },
                    );
                }
            }
            generation
        };

        let state = Arc::clone(&self.state);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let due = {
                let mut state = lock(&state);
                match state.slots.get(&key) {
                    Some(slot) if slot.generation == generation => state.slots.remove(&key),
                    _ => None,
                }
            };
            if let Some(slot) = due {
                run(slot).await;
            }
        });
        rx
    }

    /// Runs every pending job now instead of waiting out the window.
    pub async fn flush(&self) {
        let due: Vec<Slot> = {
            let mut state = lock(&self.state);
            state.slots.drain().map(|(_, slot)| slot).collect()
        };
        join_all(due.into_iter().map(run)).await;
    }

    /// Drops the pending job for `key`. Waiters are released with `Ok(())`.
    pub fn cancel(&self, key: &K) -> bool {
        match self.take(key) {
            Some(waiters) => {
                notify(waiters, &Ok(()));
                true
            }
            None => false,
        }
    }

    /// Drops the pending job for `key` and hands its waiters to the caller,
    /// who becomes responsible for resolving them.
    pub fn take(&self, key: &K) -> Option<Vec<Waiter>> {
        let removed = lock(&self.state).slots.remove(key);
        removed.map(|slot| slot.waiters)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        lock(&self.state).slots.contains_key(key)
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).slots.len()
    }
}

async fn run(slot: Slot) {
    let result = slot.job.await;
    notify(slot.waiters, &result);
}

pub(crate) fn notify(waiters: Vec<Waiter>, result: &Result<()>) {
    for waiter in waiters {
        let _ = waiter.send(result.as_ref().map(|_| ()).map_err(|err| err.replicate()));
    }
}
