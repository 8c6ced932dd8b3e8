//! Thread-affinity coordinator for backends whose native connections must
//! stay on one thread.
//!
//! A fixed pool of workers each drains its own queue. The first call for a
//! connection key assigns it a worker round-robin; every later call for the
//! same key is queued on that worker and the caller blocks for the result.
//! Different keys can therefore run in parallel while one key is strictly
//! sequential.

use crate::error::{ReconError, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

/// Default number of coordinator workers
pub const DEFAULT_AFFINITY_WORKERS: usize = 4;

type Job = Box<dyn FnOnce(&mut WorkerState) + Send + 'static>;

struct Pinned {
    value: Box<dyn Any>,
    leases: usize,
}

/// Resources owned by one worker thread, keyed by connection key.
///
/// Values never leave the worker, so they need not be `Send`.
#[derive(Default)]
pub struct WorkerState {
    pinned: HashMap<String, Pinned>,
}

impl WorkerState {
    /// Take a lease on the resource for `key`, opening it on first lease
    pub fn lease<T, F>(&mut self, key: &str, open: F) -> Result<()>
    where
        T: 'static,
        F: FnOnce() -> Result<T>,
    {
        if let Some(pinned) = self.pinned.get_mut(key) {
            pinned.leases += 1;
            return Ok(());
        }
        let value = open()?;
        self.pinned.insert(
            key.to_string(),
            Pinned {
                value: Box::new(value),
                leases: 1,
            },
        );
        Ok(())
    }

    /// Drop one lease; the resource is closed when the last lease goes.
    /// Returns true when the resource was closed.
    pub fn release(&mut self, key: &str) -> bool {
        let Some(pinned) = self.pinned.get_mut(key) else {
            return false;
        };
        pinned.leases = pinned.leases.saturating_sub(1);
        if pinned.leases == 0 {
            self.pinned.remove(key);
            true
        } else {
            false
        }
    }

    pub fn get_mut<T: 'static>(&mut self, key: &str) -> Option<&mut T> {
        self.pinned
            .get_mut(key)
            .and_then(|pinned| pinned.value.downcast_mut::<T>())
    }

    pub fn leases(&self, key: &str) -> usize {
        self.pinned.get(key).map(|p| p.leases).unwrap_or(0)
    }
}

struct Worker {
    sender: Option<mpsc::Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

/// Pins connection keys to dedicated worker threads
pub struct AffinityCoordinator {
    workers: Vec<Worker>,
    assignments: Mutex<HashMap<String, usize>>,
    next_worker: AtomicUsize,
}

impl AffinityCoordinator {
    pub fn new(worker_count: usize) -> Result<Self> {
        let worker_count = worker_count.max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let (sender, receiver) = mpsc::channel::<Job>();
            let handle = thread::Builder::new()
                .name(format!("tabrecon-affinity-{}", index))
                .spawn(move || {
                    let mut state = WorkerState::default();
                    while let Ok(job) = receiver.recv() {
                        job(&mut state);
                    }
                    log::debug!("Affinity worker {} stopped", index);
                })?;
            workers.push(Worker {
                sender: Some(sender),
                handle: Some(handle),
            });
        }

        log::debug!("Started {} affinity workers", worker_count);
        Ok(Self {
            workers,
            assignments: Mutex::new(HashMap::new()),
            next_worker: AtomicUsize::new(0),
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Worker index assigned to `key`, assigning one on first use
    pub fn assign(&self, key: &str) -> usize {
        let mut assignments = self.assignments.lock();
        if let Some(&index) = assignments.get(key) {
            return index;
        }
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        assignments.insert(key.to_string(), index);
        log::debug!("Pinned connection '{}' to affinity worker {}", key, index);
        index
    }

    /// Existing assignment for `key`, if any
    pub fn assignment(&self, key: &str) -> Option<usize> {
        self.assignments.lock().get(key).copied()
    }

    /// Run `job` on the worker pinned to `key` and wait for its result.
    ///
    /// Errors and panics inside the job come back to the caller. Must not be
    /// called from inside a job for the same key.
    pub fn run<R, F>(&self, key: &str, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut WorkerState) -> Result<R> + Send + 'static,
    {
        let index = self.assign(key);
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);

        let wrapped: Job = Box::new(move |state| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| job(state)));
            let _ = reply_tx.send(outcome);
        });

        let sender = self.workers[index]
            .sender
            .as_ref()
            .ok_or_else(|| ReconError::coordinator("affinity worker is shut down"))?;
        sender
            .send(wrapped)
            .map_err(|_| ReconError::coordinator(format!("affinity worker {} is gone", index)))?;

        match reply_rx.recv() {
            Ok(Ok(result)) => result,
            Ok(Err(payload)) => Err(ReconError::coordinator(format!(
                "job for '{}' panicked: {}",
                key,
                panic_message(payload.as_ref())
            ))),
            Err(_) => Err(ReconError::coordinator(format!(
                "affinity worker {} dropped the job for '{}'",
                index, key
            ))),
        }
    }
}

impl Drop for AffinityCoordinator {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.sender.take();
        }
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl std::fmt::Debug for AffinityCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AffinityCoordinator")
            .field("workers", &self.workers.len())
            .field("assignments", &self.assignments.lock().len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
