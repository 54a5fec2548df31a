//! Adaptive priority task scheduler
//!
//! Every task has a base period and a priority multiplier in
//! `[minimum_priority, 1.0]`; its next run is `now + base_period * priority`.
//! Lowering the priority value makes a task more urgent. A priority that has
//! not been set again within the adjustment window decays back toward 1.0 by
//! doubling each time the task runs.
//!
//! The schedule is an ordered index of `(run_at, sequence)` slots over a
//! separate table of task metadata, so equal run times keep insertion order.
//! A single named thread drives the schedule and runs task bodies with the
//! lock released.

use crate::error::{LagError, Result};
use crate::isolate::isolate;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Identifier handed out by [`TaskScheduler::add_task`]
pub type TaskId = u64;

type TaskAction = Arc<dyn Fn() + Send + Sync>;

// Ordering key of the schedule: run time, then insertion sequence
type Slot = (Instant, u64);

/// Upper bound on computed delays
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Tunables of a [`TaskScheduler`]
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// A priority change that would not move a task earlier only reschedules
    /// it when its next run is further away than this
    pub minimum_reschedule: Duration,
    /// A priority not set again within this window decays toward 1.0
    pub priority_adjustment_window: Duration,
    /// Priority floor; keeps every delay above zero
    pub minimum_priority: f64,
    /// How long the loop sleeps when nothing is scheduled
    pub idle_wakeup: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            minimum_reschedule: Duration::from_secs(10),
            priority_adjustment_window: Duration::from_secs(30),
            minimum_priority: 0.1,
            idle_wakeup: Duration::from_secs(10),
        }
    }
}

struct TaskEntry {
    action: TaskAction,
    base_period: Duration,
    priority: f64,
    last_priority_set: Instant,
    slot: Slot,
}

struct ScheduleState {
    tasks: HashMap<TaskId, TaskEntry>,
    schedule: BTreeMap<Slot, TaskId>,
    next_id: TaskId,
    next_seq: u64,
    running: bool,
}

impl ScheduleState {
    fn next_slot(&mut self, run_at: Instant) -> Slot {
        let seq = self.next_seq;
        self.next_seq += 1;
        (run_at, seq)
    }
}

struct Shared {
    state: Mutex<ScheduleState>,
    wakeup: Condvar,
    config: SchedulerConfig,
}

/// Runs recurring tasks at a cadence controlled by a mutable priority
pub struct TaskScheduler {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn run_at(now: Instant, base_period: Duration, priority: f64) -> Instant {
    let delay = Duration::try_from_secs_f64(base_period.as_secs_f64() * priority)
        .unwrap_or(FAR_FUTURE)
        .min(FAR_FUTURE);
    now.checked_add(delay).unwrap_or(now)
}

impl TaskScheduler {
    /// Create a scheduler and start its scheduling thread
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        if !(config.minimum_priority > 0.0 && config.minimum_priority <= 1.0) {
            return Err(LagError::Config(format!(
                "minimum priority must be in (0, 1], got {}",
                config.minimum_priority
            )));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(ScheduleState {
                tasks: HashMap::new(),
                schedule: BTreeMap::new(),
                next_id: 0,
                next_seq: 0,
                running: true,
            }),
            wakeup: Condvar::new(),
            config,
        });

        let loop_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("lagwatch-scheduler".to_string())
            .spawn(move || scheduling_loop(&loop_shared))?;
        debug!("Task scheduler started");

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Scheduler tunables
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Register a recurring task at priority 1.0; its first run is one full
    /// `base_period` from now.
    pub fn add_task<F>(&self, action: F, base_period: Duration) -> TaskId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let now = Instant::now();
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        let slot = state.next_slot(run_at(now, base_period, 1.0));
        state.schedule.insert(slot, id);
        state.tasks.insert(
            id,
            TaskEntry {
                action: Arc::new(action),
                base_period,
                priority: 1.0,
                last_priority_set: now,
                slot,
            },
        );
        self.shared.wakeup.notify_one();
        trace!("Added task {} with period {:?}", id, base_period);
        id
    }

    /// Change a task's priority, clamped to `[minimum_priority, 1.0]`.
    ///
    /// The task is only moved if that brings its next run earlier, or if its
    /// next run is further away than the minimum reschedule threshold.
    ///
    /// # Errors
    ///
    /// [`LagError::UnknownTask`] if no task has this id.
    pub fn set_priority(&self, id: TaskId, priority: f64) -> Result<()> {
        let config = &self.shared.config;
        let priority = if priority.is_nan() {
            config.minimum_priority
        } else {
            priority.clamp(config.minimum_priority, 1.0)
        };

        let now = Instant::now();
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let entry = state.tasks.get_mut(&id).ok_or(LagError::UnknownTask(id))?;
        entry.priority = priority;
        entry.last_priority_set = now;

        let candidate = run_at(now, entry.base_period, priority);
        let current = entry.slot.0;
        let beyond_threshold = current > now + config.minimum_reschedule;
        if candidate < current || beyond_threshold {
            state.schedule.remove(&entry.slot);
            let seq = state.next_seq;
            state.next_seq += 1;
            entry.slot = (candidate, seq);
            state.schedule.insert(entry.slot, id);
            self.shared.wakeup.notify_one();
            trace!("Task {} rescheduled at priority {}", id, priority);
        }
        Ok(())
    }

    /// Remove a task and its pending run. Unknown ids are ignored.
    pub fn remove_task(&self, id: TaskId) -> bool {
        let mut state = self.shared.state.lock();
        match state.tasks.remove(&id) {
            Some(entry) => {
                state.schedule.remove(&entry.slot);
                true
            }
            None => false,
        }
    }

    /// Next run time of a task
    pub fn scheduled_for(&self, id: TaskId) -> Option<Instant> {
        self.shared.state.lock().tasks.get(&id).map(|e| e.slot.0)
    }

    /// Current priority of a task
    pub fn priority(&self, id: TaskId) -> Option<f64> {
        self.shared.state.lock().tasks.get(&id).map(|e| e.priority)
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Whether no task is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the scheduling loop and join it. A task body that is running
    /// finishes first; no further runs happen.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            self.shared.wakeup.notify_all();
        }

        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Scheduler thread terminated abnormally");
            }
        }
        info!("Task scheduler stopped");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn scheduling_loop(shared: &Shared) {
    let config = &shared.config;
    let mut guard = shared.state.lock();
    while guard.running {
        let next = guard
            .schedule
            .first_key_value()
            .map(|(slot, id)| (*slot, *id));
        let Some((slot, id)) = next else {
            shared.wakeup.wait_for(&mut guard, config.idle_wakeup);
            continue;
        };

        let now = Instant::now();
        if slot.0 > now {
            shared.wakeup.wait_until(&mut guard, slot.0);
            continue;
        }

        let state = &mut *guard;
        state.schedule.remove(&slot);
        let seq = state.next_seq;
        state.next_seq += 1;
        let Some(entry) = state.tasks.get_mut(&id) else {
            continue;
        };
        if now.saturating_duration_since(entry.last_priority_set) > config.priority_adjustment_window
            && entry.priority < 1.0
        {
            entry.priority = (entry.priority * 2.0).min(1.0);
            trace!("Task {} priority decayed to {}", id, entry.priority);
        }
        entry.slot = (run_at(now, entry.base_period, entry.priority), seq);
        state.schedule.insert(entry.slot, id);
        let action = entry.action.clone();

        MutexGuard::unlocked(&mut guard, || {
            if let Err(panic) = isolate(|| action()) {
                error!("Scheduled task {} panicked: {}", id, panic);
            }
        });
    }
}
