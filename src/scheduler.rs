//! Prioritised, deduplicating task scheduler.
//!
//! Work runs on a dedicated [`rayon`] pool. Tasks wait in a shared
//! [`BinaryHeap`] ordered by `(priority, submission order)`; every new task
//! spawns one pool job that pops the most urgent live task when a thread
//! frees up, so the pool always works on what is visible first rather than
//! on what was asked for first.
//!
//! ## Deduplication
//!
//! There is at most one task per [`Fingerprint`]. Submitting a fingerprint
//! that already has a task attaches another waiter to it; the job runs once
//! and its result is cloned to every waiter. Completion removes the task
//! and takes its waiters under the same lock, so a late submission either
//! attaches in time or starts a fresh task. It never waits on a task that
//! has already finished.
//!
//! ## Cancellation and priority changes
//!
//! Both act on a single waiter ([`TaskHandle`]). A task's priority is the
//! most urgent of its waiters. Changing it pushes a new heap entry and the
//! old one is skipped when popped. A queued task whose last waiter is
//! cancelled is dropped; a running one finishes and its result is
//! discarded.
//!
//! ## Timeouts
//!
//! With a timeout configured, a watchdog thread sweeps running tasks. An
//! overdue task is detached from its fingerprint and its waiters receive
//! [`SchedulerError::Timeout`] while the worker is still busy. The worker is
//! never interrupted; whatever it returns later is dropped. A job that
//! returns late but before the next sweep is failed the same way.

use crate::types::Fingerprint;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use log::{debug, warn};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::any::Any;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("task exceeded its {0:?} timeout")]
    Timeout(Duration),
    #[error("task cancelled")]
    Cancelled,
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
}

/// The pool or its timeout watchdog could not be started.
#[derive(Error, Debug)]
pub enum StartError {
    #[error(transparent)]
    Pool(#[from] ThreadPoolBuildError),
    #[error("timeout watchdog: {0}")]
    Watchdog(#[from] io::Error),
}

/// Sweep interval bounds for the timeout watchdog.
const MIN_SWEEP: Duration = Duration::from_millis(5);
const MAX_SWEEP: Duration = Duration::from_millis(250);

/// Scheduling priority. Lower runs sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(pub u32);

impl Priority {
    /// Inside the viewport.
    pub const VISIBLE: Priority = Priority(0);
    /// Just outside the viewport.
    pub const NEAR: Priority = Priority(10);
    pub const PREFETCH: Priority = Priority(20);
    /// Requested earlier, no longer near the viewport.
    pub const BACKGROUND: Priority = Priority(100);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Priority::VISIBLE => f.write_str("visible"),
            Priority::NEAR => f.write_str("near"),
            Priority::PREFETCH => f.write_str("prefetch"),
            Priority::BACKGROUND => f.write_str("background"),
            Priority(n) => write!(f, "{n}"),
        }
    }
}

/// Identifies one submission (one waiter), not the shared task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(pub(crate) u64);

type Job<T> = Box<dyn FnOnce() -> T + Send>;
type Completion<T> = Box<dyn FnOnce(TaskHandle, Result<T, SchedulerError>) + Send>;

struct Waiter<T> {
    handle: TaskHandle,
    priority: Priority,
    on_complete: Completion<T>,
}

struct Task<T> {
    /// Taken when a worker starts the task.
    job: Option<Job<T>>,
    waiters: Vec<Waiter<T>>,
    priority: Priority,
    /// Creation order; ties between equal priorities go to the older task.
    order: u64,
    /// Ticket of the task's live heap entry.
    ticket: u64,
    running: bool,
    started: Option<Instant>,
}

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    priority: Priority,
    order: u64,
    ticket: u64,
    fingerprint: Fingerprint,
}

impl Ord for QueueEntry {
    // BinaryHeap pops the greatest, so the most urgent entry must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.priority, other.order, other.ticket).cmp(&(self.priority, self.order, self.ticket))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct State<T> {
    tasks: HashMap<Fingerprint, Task<T>>,
    handles: HashMap<TaskHandle, Fingerprint>,
    queue: BinaryHeap<QueueEntry>,
    next_handle: u64,
    next_order: u64,
    next_ticket: u64,
    running: usize,
    shutdown: bool,
}

impl<T> State<T> {
    fn push_entry(&mut self, fingerprint: Fingerprint) {
        let Some(task) = self.tasks.get_mut(&fingerprint) else {
            return;
        };
        self.next_ticket += 1;
        task.ticket = self.next_ticket;
        self.queue.push(QueueEntry {
            priority: task.priority,
            order: task.order,
            ticket: task.ticket,
            fingerprint,
        });
    }

    /// Recompute a task's priority from its waiters and requeue it if it
    /// changed while queued.
    fn reprioritize(&mut self, fingerprint: Fingerprint) {
        let Some(task) = self.tasks.get_mut(&fingerprint) else {
            return;
        };
        let Some(best) = task.waiters.iter().map(|w| w.priority).min() else {
            return;
        };
        if best == task.priority {
            return;
        }
        task.priority = best;
        if !task.running {
            self.push_entry(fingerprint);
        }
    }

    /// Pop the most urgent live task and mark it running.
    fn take_next(&mut self) -> Option<(Fingerprint, u64, Job<T>)> {
        while let Some(entry) = self.queue.pop() {
            if let Some(task) = self.tasks.get_mut(&entry.fingerprint)
                && task.ticket == entry.ticket
                && !task.running
                && let Some(job) = task.job.take()
            {
                task.running = true;
                task.started = Some(Instant::now());
                self.running += 1;
                return Some((entry.fingerprint, task.order, job));
            }
        }
        None
    }

    /// Detach every task running longer than `limit` and take its waiters.
    fn expire_overdue(&mut self, limit: Duration) -> Vec<Waiter<T>> {
        let overdue: Vec<Fingerprint> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.started.is_some_and(|s| s.elapsed() > limit))
            .map(|(fp, _)| *fp)
            .collect();
        let mut waiters = Vec::new();
        for fingerprint in overdue {
            if let Some(task) = self.tasks.remove(&fingerprint) {
                warn!("{fingerprint:?}: exceeded {limit:?}, worker left to finish");
                waiters.extend(task.waiters);
            }
        }
        for waiter in &waiters {
            self.handles.remove(&waiter.handle);
        }
        waiters
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    timeout: Option<Duration>,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded worker pool running deduplicated, prioritised jobs.
pub struct TaskScheduler<T> {
    pool: ThreadPool,
    shared: Arc<Shared<T>>,
    workers: usize,
    /// Dropping it stops the watchdog.
    _watchdog: Option<Sender<()>>,
}

impl<T: Clone + Send + 'static> TaskScheduler<T> {
    /// Build a pool of `workers` threads. With a `timeout`, waiters of a job
    /// that runs longer than it are failed without waiting for the job.
    pub fn new(workers: usize, timeout: Option<Duration>) -> Result<Self, StartError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("thumbflow-worker-{i}"))
            .build()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                tasks: HashMap::new(),
                handles: HashMap::new(),
                queue: BinaryHeap::new(),
                next_handle: 0,
                next_order: 0,
                next_ticket: 0,
                running: 0,
                shutdown: false,
            }),
            timeout,
        });
        let watchdog = match timeout {
            Some(limit) => Some(spawn_watchdog(Arc::clone(&shared), limit)?),
            None => None,
        };
        Ok(Self {
            pool,
            workers,
            shared,
            _watchdog: watchdog,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Request the result of `job` for `fingerprint`.
    ///
    /// If a task for the fingerprint is queued or running, `job` is dropped
    /// and `on_complete` is attached to the existing task. `on_complete`
    /// runs on a worker thread and receives the handle returned here. After
    /// shutdown it is called immediately with [`SchedulerError::Cancelled`].
    pub fn submit<J, C>(
        &self,
        fingerprint: Fingerprint,
        priority: Priority,
        job: J,
        on_complete: C,
    ) -> TaskHandle
    where
        J: FnOnce() -> T + Send + 'static,
        C: FnOnce(TaskHandle, Result<T, SchedulerError>) + Send + 'static,
    {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let handle = TaskHandle(state.next_handle);
        state.next_handle += 1;

        if state.shutdown {
            drop(guard);
            on_complete(handle, Err(SchedulerError::Cancelled));
            return handle;
        }

        state.handles.insert(handle, fingerprint);
        let waiter = Waiter {
            handle,
            priority,
            on_complete: Box::new(on_complete),
        };

        if let Some(task) = state.tasks.get_mut(&fingerprint) {
            debug!("{fingerprint:?}: attached to existing task");
            task.waiters.push(waiter);
            state.reprioritize(fingerprint);
            return handle;
        }

        let order = state.next_order;
        state.next_order += 1;
        state.tasks.insert(
            fingerprint,
            Task {
                job: Some(Box::new(job)),
                waiters: vec![waiter],
                priority,
                order,
                ticket: 0,
                running: false,
                started: None,
            },
        );
        state.push_entry(fingerprint);
        drop(guard);

        let shared = Arc::clone(&self.shared);
        self.pool.spawn(move || run_next(&shared));
        handle
    }

    /// Detach one waiter. Returns `false` if the handle already resolved.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(fingerprint) = state.handles.remove(&handle) else {
            return false;
        };
        let Some(task) = state.tasks.get_mut(&fingerprint) else {
            return false;
        };
        task.waiters.retain(|w| w.handle != handle);
        if task.waiters.is_empty() {
            if !task.running {
                // Its heap entry goes stale and is skipped.
                state.tasks.remove(&fingerprint);
            }
        } else {
            state.reprioritize(fingerprint);
        }
        true
    }

    /// Change one waiter's priority. Returns `false` if the handle already
    /// resolved.
    pub fn set_priority(&self, handle: TaskHandle, priority: Priority) -> bool {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let Some(&fingerprint) = state.handles.get(&handle) else {
            return false;
        };
        let Some(waiter) = state
            .tasks
            .get_mut(&fingerprint)
            .and_then(|t| t.waiters.iter_mut().find(|w| w.handle == handle))
        else {
            return false;
        };
        waiter.priority = priority;
        state.reprioritize(fingerprint);
        true
    }

    /// Detach every waiter. Queued tasks are dropped; running ones finish
    /// with nobody listening. Returns the number of waiters detached.
    pub fn cancel_all(&self) -> usize {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let detached = state.handles.len();
        state.handles.clear();
        state.tasks.retain(|_, task| {
            task.waiters.clear();
            task.running
        });
        state.queue.clear();
        if detached > 0 {
            debug!("cancelled {detached} pending requests");
        }
        detached
    }

    /// Tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        let state = self.shared.lock();
        state.tasks.values().filter(|t| !t.running).count()
    }

    /// Workers currently busy, including ones still finishing a timed-out
    /// task.
    pub fn in_flight(&self) -> usize {
        self.shared.lock().running
    }

    /// Stop accepting work and fail every queued task with
    /// [`SchedulerError::Cancelled`]. Running tasks still deliver.
    pub fn shutdown(&self) {
        let waiters: Vec<Waiter<T>> = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.queue.clear();
            let queued: Vec<Fingerprint> = state
                .tasks
                .iter()
                .filter(|(_, t)| !t.running)
                .map(|(fp, _)| *fp)
                .collect();
            let mut waiters = Vec::new();
            for fingerprint in queued {
                if let Some(task) = state.tasks.remove(&fingerprint) {
                    waiters.extend(task.waiters);
                }
            }
            for waiter in &waiters {
                state.handles.remove(&waiter.handle);
            }
            waiters
        };
        if !waiters.is_empty() {
            debug!("shutdown: cancelling {} queued requests", waiters.len());
        }
        for waiter in waiters {
            (waiter.on_complete)(waiter.handle, Err(SchedulerError::Cancelled));
        }
    }
}

impl<T> Drop for TaskScheduler<T> {
    fn drop(&mut self) {
        let waiters: Vec<Waiter<T>> = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            state.queue.clear();
            state.handles.clear();
            let tasks = std::mem::take(&mut state.tasks);
            let (running, queued): (HashMap<_, _>, HashMap<_, _>) =
                tasks.into_iter().partition(|(_, t)| t.running);
            state.tasks = running;
            queued.into_values().flat_map(|t| t.waiters).collect()
        };
        for waiter in waiters {
            (waiter.on_complete)(waiter.handle, Err(SchedulerError::Cancelled));
        }
    }
}

/// Body of one pool job: run the most urgent task, then fan its result out.
fn run_next<T: Clone>(shared: &Shared<T>) {
    let Some((fingerprint, order, job)) = shared.lock().take_next() else {
        return;
    };

    let started = Instant::now();
    let result = match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(_) if shared.timeout.is_some_and(|limit| started.elapsed() > limit) => {
            let limit = shared.timeout.unwrap_or_default();
            warn!("{fingerprint:?}: exceeded {limit:?}");
            Err(SchedulerError::Timeout(limit))
        }
        Ok(value) => Ok(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("{fingerprint:?}: worker panicked: {message}");
            Err(SchedulerError::WorkerPanicked(message))
        }
    };

    let waiters = {
        let mut state = shared.lock();
        state.running -= 1;
        // A timed-out task was detached and the fingerprint may belong to a
        // newer task by now.
        let ours = state.tasks.get(&fingerprint).is_some_and(|t| t.order == order);
        let waiters = if ours {
            state
                .tasks
                .remove(&fingerprint)
                .map(|t| t.waiters)
                .unwrap_or_default()
        } else {
            Vec::new()
        };
        for waiter in &waiters {
            state.handles.remove(&waiter.handle);
        }
        waiters
    };
    for waiter in waiters {
        (waiter.on_complete)(waiter.handle, result.clone());
    }
}

/// Periodically fail the waiters of overdue running tasks. Exits when the
/// scheduler drops its end of the stop channel.
fn spawn_watchdog<T: Clone + Send + 'static>(
    shared: Arc<Shared<T>>,
    limit: Duration,
) -> io::Result<Sender<()>> {
    let (stop_tx, stop_rx) = bounded::<()>(0);
    let sweep = (limit / 4).clamp(MIN_SWEEP, MAX_SWEEP);
    thread::Builder::new()
        .name("thumbflow-watchdog".into())
        .spawn(move || {
            loop {
                match stop_rx.recv_timeout(sweep) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                let waiters = shared.lock().expire_overdue(limit);
                for waiter in waiters {
                    (waiter.on_complete)(waiter.handle, Err(SchedulerError::Timeout(limit)));
                }
            }
        })?;
    Ok(stop_tx)
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
