//! Work queue with per-key serialisation.
//!
//! A key is handed to at most one worker at a time. Adding a key that is
//! currently being processed marks it dirty; it is queued again once the
//! worker calls [`WorkQueue::done`]. Adding a key that is already queued is a
//! no-op, so bursts of events collapse into one pass.
//!
//! Each key has at most one delayed add pending. A later request for the
//! same key keeps the earlier deadline; an immediate add or a forget drops
//! the pending one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

struct Inner<K> {
    queue: VecDeque<K>,
    /// Keys waiting for a pass (queued, or deferred behind a running pass).
    dirty: HashSet<K>,
    processing: HashSet<K>,
    /// Pending delayed add per key: deadline and timer generation.
    delayed: HashMap<K, (Instant, u64)>,
    next_timer: u64,
    shutting_down: bool,
}

pub struct WorkQueue<K> {
    inner: Mutex<Inner<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: HashSet::new(),
                processing: HashSet::new(),
                delayed: HashMap::new(),
                next_timer: 0,
                shutting_down: false,
            }),
            notify: Notify::new(),
        })
    }

    pub fn add(&self, key: K) {
        let mut inner = self.inner.lock().unwrap();
        inner.delayed.remove(&key);
        if inner.shutting_down || inner.dirty.contains(&key) {
            return;
        }
        inner.dirty.insert(key.clone());
        if inner.processing.contains(&key) {
            return;
        }
        inner.queue.push_back(key);
        drop(inner);
        self.notify.notify_one();
    }

    /// Add the key once `delay` has elapsed, unless it is already queued or
    /// an earlier delayed add for it is pending.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        let timer = {
            let mut inner = self.inner.lock().unwrap();
            // Queued keys get a pass soon, which schedules its own follow-up
            if inner.shutting_down || inner.dirty.contains(&key) {
                return;
            }
            if let Some((pending, _)) = inner.delayed.get(&key) {
                if *pending <= deadline {
                    return;
                }
            }
            inner.next_timer += 1;
            let timer = inner.next_timer;
            inner.delayed.insert(key.clone(), (deadline, timer));
            timer
        };

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.fire(key, timer);
        });
    }

    /// Timer expiry: only the timer still registered for the key adds it.
    fn fire(&self, key: K, timer: u64) {
        {
            let mut inner = self.inner.lock().unwrap();
            let current = inner.delayed.get(&key).map(|(_, t)| *t);
            if current != Some(timer) {
                return;
            }
            inner.delayed.remove(&key);
        }
        self.add(key);
    }

    /// Whether a delayed add is pending for the key.
    pub fn is_delayed(&self, key: &K) -> bool {
        self.inner.lock().unwrap().delayed.contains_key(key)
    }

    /// Wait for the next key. Returns `None` after shutdown.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if inner.shutting_down {
                    return None;
                }
                if let Some(key) = inner.queue.pop_front() {
                    inner.dirty.remove(&key);
                    inner.processing.insert(key.clone());
                    let more = !inner.queue.is_empty();
                    drop(inner);
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Finish processing a key, re-queueing it if it was added meanwhile.
    pub fn done(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shutting_down {
            inner.queue.push_back(key.clone());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Forget a pending key, e.g. after its record was removed.
    pub fn forget(&self, key: &K) {
        let mut inner = self.inner.lock().unwrap();
        inner.delayed.remove(key);
        if inner.dirty.remove(key) {
            inner.queue.retain(|k| k != key);
        }
    }

    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shutting_down = true;
        inner.delayed.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().unwrap().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
