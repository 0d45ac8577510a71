//! Worker thread groups.
//!
//! The scheduler owns named groups of execution threads ("slots") and binds
//! stateful workers to them. Every handler submitted for a worker executes
//! serialized on the worker's bound thread, so worker state never needs
//! internal locking: the `Arc<Mutex<W>>` holding the state is only ever
//! locked from that one thread's job loop and is uncontended by
//! construction.
//!
//! Lifecycle:
//! - `add_worker` binds a worker to a new slot, or colocates it on an idle
//!   slot of the same group when `share_existing_thread` is set.
//! - `start_group` spawns every idle slot thread; running slots are left
//!   alone.
//! - `stop_group` raises each slot's stop flag and joins every member
//!   thread before returning; no worker handler runs after it returns.
//! - `remove_worker_by_id` stops and removes one slot without disturbing
//!   siblings in the group.
//!
//! Operating on an unknown group name is a logged no-op; groups may not yet
//! exist during startup ordering races.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How often a slot thread re-checks its stop flag while idle.
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Lock a mutex, recovering the data if a holder panicked.
pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative cancellation flag for long-running worker loops.
#[derive(Clone)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Typed handle to a worker bound to a scheduler thread.
///
/// `submit` enqueues a closure that receives exclusive `&mut` access to the
/// worker state and runs on the bound thread, serialized with every other
/// handler of workers sharing that thread.
pub struct WorkerHandle<W> {
    jobs: Sender<Job>,
    state: Arc<Mutex<W>>,
    stop: StopToken,
    id: Option<String>,
}

impl<W> Clone for WorkerHandle<W> {
    fn clone(&self) -> Self {
        Self {
            jobs: self.jobs.clone(),
            state: Arc::clone(&self.state),
            stop: self.stop.clone(),
            id: self.id.clone(),
        }
    }
}

impl<W: Send + 'static> WorkerHandle<W> {
    pub fn submit(&self, handler: impl FnOnce(&mut W) + Send + 'static) -> Result<()> {
        let state = Arc::clone(&self.state);
        self.jobs
            .send(Box::new(move || {
                let mut worker = lock_unpoisoned(&state);
                handler(&mut worker);
            }))
            .map_err(|_| anyhow!("worker thread mailbox is closed"))
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Placement and lifecycle options for `add_worker`.
pub struct WorkerSpec<W> {
    group: String,
    worker_id: Option<String>,
    share_existing_thread: bool,
    on_start: Option<Box<dyn FnOnce(&mut W, StopToken) + Send>>,
    on_stop: Option<Box<dyn FnOnce(&mut W) + Send>>,
}

impl<W: Send + 'static> WorkerSpec<W> {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            worker_id: None,
            share_existing_thread: false,
            on_start: None,
            on_stop: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = Some(id.into());
        self
    }

    /// Reuse an idle thread of the group instead of spawning a new one.
    /// If no idle thread exists, a new one is created; this never blocks.
    pub fn share_existing_thread(mut self) -> Self {
        self.share_existing_thread = true;
        self
    }

    /// Runs exactly once on the slot thread when it transitions to started,
    /// before any queued handler. A long-running hook (e.g. a capture loop)
    /// must poll the provided `StopToken`.
    pub fn on_start(mut self, hook: impl FnOnce(&mut W, StopToken) + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Runs exactly once on the slot thread after its job loop exits.
    pub fn on_stop(mut self, hook: impl FnOnce(&mut W) + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(hook));
        self
    }
}

struct ThreadSlot {
    jobs_tx: Sender<Job>,
    /// Held while the slot is idle; moved into the thread on start and
    /// handed back through the join handle on stop, so queued jobs survive
    /// a stop/start cycle.
    jobs_rx: Option<Receiver<Job>>,
    join: Option<JoinHandle<Receiver<Job>>>,
    stop: Arc<AtomicBool>,
    worker_id: Option<String>,
    on_start: Vec<Job>,
    on_stop: Vec<Job>,
}

impl ThreadSlot {
    fn new() -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel();
        Self {
            jobs_tx,
            jobs_rx: Some(jobs_rx),
            join: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker_id: None,
            on_start: Vec::new(),
            on_stop: Vec::new(),
        }
    }

    fn is_running(&self) -> bool {
        self.join.is_some()
    }
}

#[derive(Default)]
pub struct WorkerScheduler {
    groups: HashMap<String, Vec<ThreadSlot>>,
}

impl WorkerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `worker` to a thread slot in `spec.group` and return its handle.
    pub fn add_worker<W: Send + 'static>(
        &mut self,
        worker: W,
        spec: WorkerSpec<W>,
    ) -> WorkerHandle<W> {
        let WorkerSpec {
            group,
            worker_id,
            share_existing_thread,
            on_start,
            on_stop,
        } = spec;

        let slots = self.groups.entry(group.clone()).or_insert_with(|| {
            log::info!("creating worker group: {}", group);
            Vec::new()
        });

        let index = if share_existing_thread {
            slots.iter().position(|slot| !slot.is_running())
        } else {
            None
        };
        let index = match index {
            Some(index) => {
                log::info!("reusing idle worker thread in group: {}", group);
                index
            }
            None => {
                log::info!("creating worker thread in group: {}", group);
                slots.push(ThreadSlot::new());
                slots.len() - 1
            }
        };
        let slot = &mut slots[index];
        if worker_id.is_some() {
            slot.worker_id = worker_id.clone();
        }

        let state = Arc::new(Mutex::new(worker));
        let stop = StopToken(Arc::clone(&slot.stop));

        if let Some(hook) = on_start {
            let state = Arc::clone(&state);
            let token = stop.clone();
            slot.on_start.push(Box::new(move || {
                let mut worker = lock_unpoisoned(&state);
                hook(&mut worker, token);
            }));
        }
        if let Some(hook) = on_stop {
            let state = Arc::clone(&state);
            slot.on_stop.push(Box::new(move || {
                let mut worker = lock_unpoisoned(&state);
                hook(&mut worker);
            }));
        }

        WorkerHandle {
            jobs: slot.jobs_tx.clone(),
            state,
            stop,
            id: worker_id,
        }
    }

    /// Start every idle thread in the group. Running threads are untouched.
    pub fn start_group(&mut self, name: &str) -> Result<()> {
        let Some(slots) = self.groups.get_mut(name) else {
            log::warn!("worker group not found: {}", name);
            return Ok(());
        };
        for slot in slots.iter_mut() {
            if slot.is_running() {
                continue;
            }
            let Some(jobs_rx) = slot.jobs_rx.take() else {
                continue;
            };
            slot.stop.store(false, Ordering::SeqCst);
            let stop = Arc::clone(&slot.stop);
            let start_hooks: Vec<Job> = slot.on_start.drain(..).collect();
            let stop_hooks: Vec<Job> = slot.on_stop.drain(..).collect();
            let handle = std::thread::Builder::new()
                .name(format!("{name}-worker"))
                .spawn(move || {
                    for hook in start_hooks {
                        hook();
                    }
                    loop {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        match jobs_rx.recv_timeout(JOB_POLL_INTERVAL) {
                            Ok(job) => job(),
                            Err(RecvTimeoutError::Timeout) => continue,
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                    for hook in stop_hooks {
                        hook();
                    }
                    jobs_rx
                })?;
            slot.join = Some(handle);
        }
        log::info!("started worker group: {}", name);
        Ok(())
    }

    /// Request cooperative termination of every running thread in the group
    /// and block until each has exited. After this returns, no handler of
    /// the group's workers runs until the group is started again.
    pub fn stop_group(&mut self, name: &str) {
        let Some(slots) = self.groups.get_mut(name) else {
            log::warn!("worker group not found: {}", name);
            return;
        };
        log::info!("stopping worker group: {}", name);
        for slot in slots.iter_mut() {
            slot.stop.store(true, Ordering::SeqCst);
        }
        for slot in slots.iter_mut() {
            let Some(join) = slot.join.take() else {
                continue;
            };
            match join.join() {
                Ok(jobs_rx) => slot.jobs_rx = Some(jobs_rx),
                Err(_) => {
                    log::error!("worker thread in group {} panicked", name);
                    let (jobs_tx, jobs_rx) = mpsc::channel();
                    slot.jobs_tx = jobs_tx;
                    slot.jobs_rx = Some(jobs_rx);
                }
            }
            slot.stop.store(false, Ordering::SeqCst);
        }
        log::info!("worker group stopped: {}", name);
    }

    pub fn stop_all_groups(&mut self) {
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in names {
            self.stop_group(&name);
        }
    }

    /// Stop and remove the slot bound to `id`, blocking until its thread
    /// has exited. Sibling slots in the group keep running.
    pub fn remove_worker_by_id(&mut self, id: &str, group: &str) {
        let Some(slots) = self.groups.get_mut(group) else {
            log::warn!("worker group not found: {}", group);
            return;
        };
        let Some(index) = slots
            .iter()
            .position(|slot| slot.worker_id.as_deref() == Some(id))
        else {
            log::warn!("no worker with id {} in group: {}", id, group);
            return;
        };
        let slot = &mut slots[index];
        slot.stop.store(true, Ordering::SeqCst);
        if let Some(join) = slot.join.take() {
            if join.join().is_err() {
                log::error!("worker thread for id {} in group {} panicked", id, group);
            }
        }
        slots.remove(index);
        log::info!("removed worker with id {} from group: {}", id, group);
    }

    #[cfg(test)]
    fn running_count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|slots| slots.iter().filter(|slot| slot.is_running()).count())
            .unwrap_or(0)
    }
}

impl Drop for WorkerScheduler {
    fn drop(&mut self) {
        self.stop_all_groups();
    }
}
