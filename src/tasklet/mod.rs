//! Background timers whose actions report through a mailbox.
//!
//! A [`Tasklet`] owns a small pool of worker threads sharing one timer
//! queue. Actions are `Send + 'static` closures; the only channel they get
//! back to the consumer is [`TaskContext::post`], which stamps messages with
//! [`Source::Task`].
//!
//! Recurring tasks run with a fixed delay: the next run is scheduled one
//! interval after the previous run returns, so a task never overlaps itself.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::mailbox::{Delivery, Fault, FaultKind, Message, MessageBody, Poster, Source};
use crate::metrics::Metrics;

/// Identifier of a scheduled task, unique within its tasklet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Numeric value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle returned by the scheduling calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    id: TaskId,
}

impl TaskHandle {
    /// Identifier used as the message source.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }
}

/// Tasklet configuration options.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskletConfig {
    /// Prefix for worker thread names.
    pub name: String,
    /// Worker threads; zero behaves as one.
    pub workers: usize,
}

impl TaskletConfig {
    /// Configuration with `workers` threads named after `name`.
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            workers,
        }
    }
}

impl Default for TaskletConfig {
    fn default() -> Self {
        Self::new("tasklet", 1)
    }
}

/// When a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    first: Duration,
    period: Duration,
    repeat: bool,
}

impl Schedule {
    /// Run once after `delay`. [`TaskContext::reschedule`] re-arms it with the same delay.
    #[must_use]
    pub const fn once(delay: Duration) -> Self {
        Self {
            first: delay,
            period: delay,
            repeat: false,
        }
    }

    /// Run every `interval`, first after one interval.
    #[must_use]
    pub const fn every(interval: Duration) -> Self {
        Self {
            first: interval,
            period: interval,
            repeat: true,
        }
    }

    /// Make the first run happen as soon as a worker is free.
    #[must_use]
    pub const fn immediate(mut self) -> Self {
        self.first = Duration::ZERO;
        self
    }

    /// Whether the task recurs.
    #[must_use]
    pub const fn is_recurring(&self) -> bool {
        self.repeat
    }
}

type Action = Box<dyn FnMut(&mut TaskContext<'_>) + Send>;

/// Per-task gate closed by cancellation; posts check it under the mailbox
/// lock.
#[derive(Debug)]
struct Gate {
    open: AtomicBool,
}

impl Gate {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
        }
    }

    fn close(&self, poster: &Poster) {
        if self.open.swap(false, Ordering::AcqRel) {
            poster.wake_blocked();
        }
    }

    fn post(&self, poster: &Poster, message: Message) -> Delivery {
        poster.post_gated(message, Some(&self.open))
    }
}

/// Access handed to a running action.
pub struct TaskContext<'a> {
    id: TaskId,
    gate: &'a Gate,
    poster: &'a Poster,
    reschedule: bool,
    cancel: bool,
}

impl TaskContext<'_> {
    /// Identifier of the running task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Post `body` to the tasklet's mailbox.
    ///
    /// Returns [`Delivery::Closed`] once the task has been cancelled.
    pub fn post(&self, body: MessageBody) -> Delivery {
        self.gate
            .post(self.poster, Message::new(Source::Task(self.id), body))
    }

    /// Run a one-shot task again after its delay. Ignored for recurring tasks.
    pub fn reschedule(&mut self) {
        self.reschedule = true;
    }

    /// Stop this task after the current run; later posts from this run are dropped.
    pub fn cancel(&mut self) {
        self.cancel = true;
        self.gate.close(self.poster);
    }
}

impl fmt::Debug for TaskContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

struct Entry {
    action: Option<Action>,
    schedule: Schedule,
    gate: Arc<Gate>,
}

#[derive(Default)]
struct Timers {
    due: BinaryHeap<Reverse<(Instant, TaskId)>>,
    tasks: HashMap<TaskId, Entry>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    timers: Mutex<Timers>,
    wake: Condvar,
    poster: Poster,
    name: String,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().expect("tasklet mutex poisoned")
    }
}

/// Timer scheduler with a fixed pool of worker threads.
pub struct Tasklet {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Tasklet {
    /// Start the workers. Messages posted by actions go to `poster`.
    #[instrument(level = "debug", skip(poster), fields(name = %config.name))]
    pub fn new(config: TaskletConfig, poster: Poster) -> crate::Result<Self> {
        let shared = Arc::new(Shared {
            timers: Mutex::new(Timers::default()),
            wake: Condvar::new(),
            poster,
            name: config.name,
        });

        let mut tasklet = Self {
            shared,
            workers: Vec::new(),
        };
        for index in 0..config.workers.max(1) {
            let shared = Arc::clone(&tasklet.shared);
            let worker = thread::Builder::new()
                .name(format!("{}-{index}", tasklet.shared.name))
                .spawn(move || work(&shared))?;
            tasklet.workers.push(worker);
        }
        debug!(workers = tasklet.workers.len(), "tasklet started");
        Ok(tasklet)
    }

    /// Run `action` every `interval`.
    pub fn schedule<F>(&self, interval: Duration, action: F) -> TaskHandle
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        self.schedule_with(Schedule::every(interval), action)
    }

    /// Run `action` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, action: F) -> TaskHandle
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        self.schedule_with(Schedule::once(delay), action)
    }

    /// Run `action` according to `schedule`.
    pub fn schedule_with<F>(&self, schedule: Schedule, action: F) -> TaskHandle
    where
        F: FnMut(&mut TaskContext<'_>) + Send + 'static,
    {
        let mut timers = self.shared.lock();
        timers.next_id += 1;
        let id = TaskId(timers.next_id);
        timers.tasks.insert(
            id,
            Entry {
                action: Some(Box::new(action)),
                schedule,
                gate: Arc::new(Gate::new()),
            },
        );
        timers.due.push(Reverse((Instant::now() + schedule.first, id)));
        drop(timers);
        self.shared.wake.notify_all();
        debug!(tasklet = %self.shared.name, task = %id, ?schedule, "task scheduled");
        TaskHandle { id }
    }

    /// Cancel a task. Returns `false` if it had already finished or been cancelled.
    ///
    /// Once this returns the action will not start again and its posts are
    /// dropped. A run already in progress is not interrupted, but a post it
    /// is blocked in returns [`Delivery::Closed`] right away.
    pub fn cancel(&self, handle: TaskHandle) -> bool {
        let removed = self.shared.lock().tasks.remove(&handle.id);
        match removed {
            Some(entry) => {
                entry.gate.close(&self.shared.poster);
                debug!(tasklet = %self.shared.name, task = %handle.id, "task cancelled");
                true
            }
            None => false,
        }
    }

    /// Whether the task is still pending or running.
    #[must_use]
    pub fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.shared.lock().tasks.contains_key(&handle.id)
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Check whether no task is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the workers and wait for running actions to return.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        {
            let mut timers = self.shared.lock();
            if timers.shutdown {
                return;
            }
            timers.shutdown = true;
            for entry in timers.tasks.values() {
                entry.gate.close(&self.shared.poster);
            }
        }
        self.shared.wake.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!(tasklet = %self.shared.name, "worker thread panicked");
            }
        }
        debug!(tasklet = %self.shared.name, "tasklet stopped");
    }
}

impl fmt::Debug for Tasklet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tasklet")
            .field("name", &self.shared.name)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Tasklet {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for the next due task and take its action out of the table.
fn next_due(shared: &Shared) -> Option<(TaskId, Action, Arc<Gate>)> {
    let mut timers = shared.lock();
    loop {
        if timers.shutdown {
            return None;
        }
        let Some(&Reverse((at, id))) = timers.due.peek() else {
            timers = shared.wake.wait(timers).expect("tasklet mutex poisoned");
            continue;
        };
        let now = Instant::now();
        if at > now {
            timers = shared
                .wake
                .wait_timeout(timers, at - now)
                .expect("tasklet mutex poisoned")
                .0;
            continue;
        }

        timers.due.pop();
        // Cancelled tasks leave stale heap entries behind.
        if let Some(entry) = timers.tasks.get_mut(&id) {
            if let Some(action) = entry.action.take() {
                return Some((id, action, Arc::clone(&entry.gate)));
            }
        }
    }
}

fn work(shared: &Shared) {
    while let Some((id, mut action, gate)) = next_due(shared) {
        trace!(tasklet = %shared.name, task = %id, "running task");
        let mut ctx = TaskContext {
            id,
            gate: &gate,
            poster: &shared.poster,
            reschedule: false,
            cancel: false,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| action(&mut ctx)));
        let (reschedule, cancel) = (ctx.reschedule, ctx.cancel);
        Metrics::record_task_run();

        let mut timers = shared.lock();
        if let Err(payload) = outcome {
            let removed = timers.tasks.remove(&id).is_some();
            drop(timers);
            let detail = panic_message(payload.as_ref());
            warn!(tasklet = %shared.name, task = %id, %detail, "task panicked, cancelling");
            if removed {
                let fault = Fault::new(FaultKind::TaskPanicked, detail);
                gate.post(&shared.poster, Message::error(Source::Task(id), fault));
                gate.close(&shared.poster);
            }
            continue;
        }

        let Some(entry) = timers.tasks.get_mut(&id) else {
            // Cancelled while running.
            continue;
        };
        let period = entry.schedule.period;
        if !cancel && (entry.schedule.repeat || reschedule) {
            entry.action = Some(action);
            timers.due.push(Reverse((Instant::now() + period, id)));
            drop(timers);
            shared.wake.notify_all();
        } else {
            timers.tasks.remove(&id);
            trace!(tasklet = %shared.name, task = %id, "task finished");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_owned()
    }
}
