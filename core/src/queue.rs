//! Deduplicating work queue keyed by resource.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! already waiting is a no-op; adding a key that is being processed marks
//! it dirty and it is queued again once the worker calls [`WorkQueue::done`].

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

struct QueueState<K> {
    queue: VecDeque<K>,
    // waiting to be processed, queued or not
    dirty: HashSet<K>,
    processing: HashSet<K>,
    delayed: usize,
}

impl<K: Clone + Eq + Hash> QueueState<K> {
    fn add(&mut self, key: K) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.dirty.is_empty() && self.processing.is_empty() && self.delayed == 0
    }
}

struct Shared<K> {
    state: Mutex<QueueState<K>>,
    ready: Notify,
    idle: Notify,
    cancel: CancellationToken,
}

pub struct WorkQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    delayed: 0,
                }),
                ready: Notify::new(),
                idle: Notify::new(),
                cancel,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        match self.shared.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add(&self, key: K) {
        if self.lock().add(key) {
            self.shared.ready.notify_one();
        }
    }

    /// Adds `key` once `delay` has passed, unless the queue shuts down first.
    pub fn add_after(&self, key: K, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        self.lock().delayed += 1;

        let queue = self.clone();
        tokio::spawn(async move {
            let expired = tokio::select! {
                _ = tokio::time::sleep(delay) => true,
                _ = queue.shared.cancel.cancelled() => false,
            };
            let (queued, idle) = {
                let mut state = queue.lock();
                state.delayed -= 1;
                let queued = expired && state.add(key);
                (queued, state.is_idle())
            };
            if queued {
                queue.shared.ready.notify_one();
            }
            if idle {
                queue.shared.idle.notify_waiters();
            }
        });
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn next(&self) -> Option<K> {
        loop {
            if self.shared.cancel.is_cancelled() {
                return None;
            }
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    if !state.queue.is_empty() {
                        self.shared.ready.notify_one();
                    }
                    return Some(key);
                }
            }
            tokio::select! {
                _ = self.shared.ready.notified() => {}
                _ = self.shared.cancel.cancelled() => return None,
            }
        }
    }

    /// Marks `key` as processed, re-queueing it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let (requeued, idle) = {
            let mut state = self.lock();
            state.processing.remove(key);
            let requeued = state.dirty.contains(key);
            if requeued {
                state.queue.push_back(key.clone());
            }
            (requeued, state.is_idle())
        };
        if requeued {
            self.shared.ready.notify_one();
        }
        if idle {
            self.shared.idle.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nothing queued, in flight or scheduled for later.
    pub fn is_idle(&self) -> bool {
        self.lock().is_idle()
    }

    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.shared.idle.notified());
            notified.as_mut().enable();
            if self.is_idle() || self.shared.cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.shared.cancel.cancelled() => return,
            }
        }
    }

    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
