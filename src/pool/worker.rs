//! Fixed-size pool of worker threads draining a shared queue

use crate::error::Result;
use crate::isolate::isolate;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Unit of work executed by a [`WorkerPool`]
pub type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolQueue {
    tasks: VecDeque<Task>,
    active: usize,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    task_available: Condvar,
    idle: Condvar,
    running: AtomicBool,
    max_queued: Option<usize>,
}

/// Fixed-size worker pool with an optional queue ceiling
pub struct WorkerPool {
    name: String,
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `threads` workers. With `max_queued` set, [`submit`](Self::submit)
    /// rejects tasks once that many are waiting.
    pub fn new(name: impl Into<String>, threads: usize, max_queued: Option<usize>) -> Result<Self> {
        let name = name.into();
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                tasks: VecDeque::new(),
                active: 0,
            }),
            task_available: Condvar::new(),
            idle: Condvar::new(),
            running: AtomicBool::new(true),
            max_queued,
        });

        let pool = Self {
            name,
            shared,
            workers: Mutex::new(Vec::with_capacity(threads)),
        };
        for worker_id in 0..threads {
            let shared = pool.shared.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", pool.name, worker_id))
                .spawn(move || worker_loop(&shared))?;
            pool.workers.lock().push(handle);
        }
        debug!("Worker pool {} started with {} threads", pool.name, threads);
        Ok(pool)
    }

    /// Pool name, used for thread names and logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue a task and wake one worker.
    ///
    /// Returns `false` without blocking if the pool is stopped or the queue is
    /// at its ceiling.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        let mut queue = self.shared.queue.lock();
        // stop() flips the flag under this lock
        if !self.shared.running.load(Ordering::Acquire) {
            return false;
        }
        if let Some(max_queued) = self.shared.max_queued {
            if queue.tasks.len() >= max_queued {
                return false;
            }
        }
        queue.tasks.push_back(Box::new(task));
        self.shared.task_available.notify_one();
        true
    }

    /// Number of tasks waiting to be picked up
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Block until the queue is empty and no task is executing
    pub fn wait_idle(&self) {
        let mut queue = self.shared.queue.lock();
        while self.shared.running.load(Ordering::Acquire)
            && (!queue.tasks.is_empty() || queue.active > 0)
        {
            self.shared.idle.wait(&mut queue);
        }
    }

    /// Whether the pool still accepts tasks
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop the pool: queued tasks are discarded, running tasks finish, and
    /// workers are joined.
    pub fn stop(&self) {
        let discarded = {
            let mut queue = self.shared.queue.lock();
            self.shared.running.store(false, Ordering::Release);
            let discarded = std::mem::take(&mut queue.tasks);
            self.shared.task_available.notify_all();
            self.shared.idle.notify_all();
            discarded
        };
        // Dropped outside the lock: tasks may own completion guards.
        drop(discarded);

        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker of pool {} terminated abnormally", self.name);
            }
        }
        info!("Worker pool {} stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            while shared.running.load(Ordering::Acquire) && queue.tasks.is_empty() {
                shared.task_available.wait(&mut queue);
            }
            if !shared.running.load(Ordering::Acquire) {
                return;
            }
            let Some(task) = queue.tasks.pop_front() else {
                continue;
            };
            queue.active += 1;
            task
        };

        if let Err(panic) = isolate(task) {
            error!("Worker task panicked: {}", panic);
        }

        let mut queue = shared.queue.lock();
        queue.active -= 1;
        if queue.tasks.is_empty() && queue.active == 0 {
            shared.idle.notify_all();
        }
    }
}

struct GroupState {
    pending: Mutex<usize>,
    done: Condvar,
}

/// Counted completion barrier for a batch of tasks submitted to a pool
///
/// Each submitted task holds a completion guard that is released when the
/// task finishes, panics, or is discarded unexecuted.
#[derive(Clone)]
pub struct TaskGroup {
    state: Arc<GroupState>,
}

struct Completion {
    state: Arc<GroupState>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        let mut pending = self.state.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.state.done.notify_all();
        }
    }
}

impl TaskGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self {
            state: Arc::new(GroupState {
                pending: Mutex::new(0),
                done: Condvar::new(),
            }),
        }
    }

    /// Submit `task` to `pool` as part of this group. Returns `false` if the
    /// pool rejected it, in which case it does not count towards the group.
    pub fn submit<F>(&self, pool: &WorkerPool, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        *self.state.pending.lock() += 1;
        let completion = Completion {
            state: self.state.clone(),
        };
        pool.submit(move || {
            let _completion = completion;
            task();
        })
    }

    /// Tasks submitted but not yet finished
    pub fn pending(&self) -> usize {
        *self.state.pending.lock()
    }

    /// Block until every task in the group has finished
    pub fn wait(&self) {
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            self.state.done.wait(&mut pending);
        }
    }

    /// Like [`wait`](Self::wait) with an upper bound; returns whether the group drained
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = self.state.pending.lock();
        while *pending > 0 {
            if self.state.done.wait_until(&mut pending, deadline).timed_out() {
                return *pending == 0;
            }
        }
        true
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}
