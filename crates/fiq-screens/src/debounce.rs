//! Per-key cancel-and-replace timers.
//!
//! Each key holds at most one pending job. Scheduling again for the same key
//! aborts the pending timer and replaces the job. A timer that has fired is
//! detached from the map before its job runs, so later reschedules never
//! abort work that already started.

use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct Pending {
    ticket: u64,
    timer: JoinHandle<()>,
    job: Option<Job>,
}

/// Debounced jobs keyed by `K`.
pub struct Debouncer<K> {
    runtime: Handle,
    pending: Arc<Mutex<FxHashMap<K, Pending>>>,
    tickets: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Creates a debouncer bound to the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runtime(Handle::current())
    }

    /// Creates a debouncer spawning timers on `runtime`.
    #[must_use]
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            tickets: AtomicU64::new(1),
        }
    }

    /// Runs `job` after `delay` unless `key` is rescheduled or cancelled first.
    pub fn schedule<F>(&self, key: K, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        let timer_key = key.clone();
        // Held across spawn + insert so the timer cannot observe the map first.
        let mut map = self.pending.lock();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let job = {
                let mut map = pending.lock();
                match map.get(&timer_key) {
                    Some(entry) if entry.ticket == ticket => {
                        map.remove(&timer_key).and_then(|entry| entry.job)
                    }
                    _ => None,
                }
            };
            if let Some(job) = job {
                job.await;
            }
        });
        let replaced = map.insert(
            key,
            Pending {
                ticket,
                timer,
                job: Some(Box::pin(job)),
            },
        );
        if let Some(previous) = replaced {
            previous.timer.abort();
        }
    }

    /// Drops the pending job for `key`. Returns true if one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.lock().remove(key) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Drops every pending job.
    pub fn cancel_all(&self) {
        for (_, entry) in self.pending.lock().drain() {
            entry.timer.abort();
        }
    }

    /// Returns true if a job is waiting for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Number of waiting jobs.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs every pending job now, concurrently, and waits for all of them.
    pub async fn flush(&self) {
        let jobs = {
            let mut map = self.pending.lock();
            map.drain()
                .filter_map(|(_, mut entry)| {
                    entry.timer.abort();
                    entry.job.take()
                })
                .collect::<Vec<_>>()
        };
        let handles = jobs
            .into_iter()
            .map(|job| self.runtime.spawn(job))
            .collect::<Vec<_>>();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        for (_, entry) in self.pending.lock().drain() {
            entry.timer.abort();
        }
    }
}

impl<K> std::fmt::Debug for Debouncer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}
