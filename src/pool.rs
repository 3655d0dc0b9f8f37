//! Fixed-size worker pool shared by all parallel scans.
//!
//! One pool lives for the whole process. Tasks are plain closures pushed
//! onto a global FIFO; workers pull from it and park when idle. There is no
//! work stealing: every scan in this daemon fans out coarse, similarly-sized
//! tasks, so a single injector is enough and keeps the pool small.
//!
//! # Nested dispatch
//!
//! A task may enqueue child tasks and wait for them. Waiting never blocks
//! on a condition variable: [`Batch::join`] and [`JobHandle::join`] drain
//! tasks from the shared queue while they wait, so a parent running on a
//! worker cannot starve its own children even on a one-worker pool.
//!
//! # Panic policy
//!
//! Panics never cross the pool boundary. Each task runs under
//! `catch_unwind`; a panic marks its batch (or job) failed and is surfaced
//! as [`TaskPanicked`] when the owner joins.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal};
use crossbeam_utils::sync::{Parker, Unparker};
use crossbeam_utils::Backoff;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task in a batch or job panicked; the owning request must be aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskPanicked;

impl std::fmt::Display for TaskPanicked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pool task panicked")
    }
}

impl std::error::Error for TaskPanicked {}

struct Shared {
    injector: Injector<Task>,
    unparkers: Vec<Unparker>,
    next_unpark: AtomicUsize,
    shutdown: AtomicBool,
}

impl Shared {
    fn pop(&self) -> Option<Task> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => {}
            }
        }
    }

    /// Wakes one parked worker, rotating through them to spread wakeups.
    fn notify_one(&self) {
        if self.unparkers.is_empty() {
            return;
        }
        let idx = self.next_unpark.fetch_add(1, Ordering::Relaxed) % self.unparkers.len();
        self.unparkers[idx].unpark();
    }

    fn notify_all(&self) {
        for unparker in &self.unparkers {
            unparker.unpark();
        }
    }
}

/// Fixed set of OS worker threads consuming a FIFO of closures.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    workers: usize,
}

impl WorkerPool {
    /// Spawns `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let parkers: Vec<Parker> = (0..workers).map(|_| Parker::new()).collect();
        let unparkers = parkers.iter().map(|p| p.unparker().clone()).collect();

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            unparkers,
            next_unpark: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let handles = parkers
            .into_iter()
            .enumerate()
            .map(|(i, parker)| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("statusd-worker-{i}"))
                    .spawn(move || worker_loop(shared, parker))
                    .expect("spawn worker thread")
            })
            .collect();

        Self {
            shared,
            handles,
            workers,
        }
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Number of tasks currently queued (racy snapshot).
    #[inline]
    pub fn queued(&self) -> usize {
        self.shared.injector.len()
    }

    /// Runs one queued task on the calling thread, if any is available.
    ///
    /// Returns `false` when the queue was empty. This is the drain step used
    /// by joiners; it may execute a task from an unrelated batch.
    pub fn try_run_one(&self) -> bool {
        match self.shared.pop() {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Enqueues a task belonging to `batch`.
    pub fn spawn_in<F>(&self, batch: &Batch, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        batch.inner.pending.fetch_add(1, Ordering::AcqRel);
        let inner = Arc::clone(&batch.inner);
        self.shared.injector.push(Box::new(move || {
            if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                inner.panicked.store(true, Ordering::Release);
            }
            inner.pending.fetch_sub(1, Ordering::AcqRel);
        }));
        self.shared.notify_one();
    }

    /// Enqueues a task only if fewer than `cap` tasks are queued.
    ///
    /// Returns `false` without enqueueing when the queue is at capacity;
    /// the caller is expected to run the work inline instead.
    pub fn spawn_in_if_below<F>(&self, batch: &Batch, cap: usize, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.injector.len() >= cap {
            return false;
        }
        self.spawn_in(batch, f);
        true
    }

    /// Starts a value-producing task and returns a handle to await it.
    ///
    /// Used for slow read-only queries whose result is needed only at
    /// response time (tag lookup overlapping the index passes).
    pub fn spawn_job<T, F>(&self, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let inner = Arc::new(JobInner {
            done: AtomicBool::new(false),
            slot: Mutex::new(None),
        });
        let task_inner = Arc::clone(&inner);
        self.shared.injector.push(Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| TaskPanicked);
            *task_inner.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            task_inner.done.store(true, Ordering::Release);
        }));
        self.shared.notify_one();
        JobHandle { inner }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.notify_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, parker: Parker) {
    loop {
        if let Some(task) = shared.pop() {
            task();
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        // Timed park: a lost wakeup costs one timeout, never a hang.
        parker.park_timeout(Duration::from_millis(1));
    }
}

struct BatchInner {
    pending: AtomicUsize,
    panicked: AtomicBool,
}

/// A group of tasks awaited together.
///
/// The batch itself carries no results; tasks communicate through shared
/// state they capture (counters, mutex-guarded slots). Clones share the
/// same pending count, so a clone can be captured by tasks that spawn
/// further tasks into the batch.
#[derive(Clone)]
pub struct Batch {
    inner: Arc<BatchInner>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BatchInner {
                pending: AtomicUsize::new(0),
                panicked: AtomicBool::new(false),
            }),
        }
    }

    /// Waits until every task in this batch has finished.
    ///
    /// The caller drains queued tasks while waiting, so calling this from
    /// inside a worker task is safe (see module docs).
    pub fn join(&self, pool: &WorkerPool) -> Result<(), TaskPanicked> {
        let backoff = Backoff::new();
        while self.inner.pending.load(Ordering::Acquire) != 0 {
            if pool.try_run_one() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        if self.inner.panicked.load(Ordering::Acquire) {
            Err(TaskPanicked)
        } else {
            Ok(())
        }
    }
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

struct JobInner<T> {
    done: AtomicBool,
    slot: Mutex<Option<Result<T, TaskPanicked>>>,
}

/// Handle to a value-producing pool task.
#[must_use = "a JobHandle that is never joined leaks its result"]
pub struct JobHandle<T> {
    inner: Arc<JobInner<T>>,
}

impl<T> JobHandle<T> {
    /// Waits for the job, draining queued tasks while waiting.
    pub fn join(self, pool: &WorkerPool) -> Result<T, TaskPanicked> {
        let backoff = Backoff::new();
        while !self.inner.done.load(Ordering::Acquire) {
            if pool.try_run_one() {
                backoff.reset();
            } else {
                backoff.snooze();
            }
        }
        let mut slot = self.inner.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.take().expect("job marked done without a result")
    }
}
