//! # Scheduled Tasks
//!
//! Recurring and one-shot callbacks with a cancel handle, kept apart
//! from the pipeline's own threads.
//!
//! | Scheduler | Drives recurring tasks from | Runs one-shot tasks |
//! |-----------|-----------------------------|---------------------|
//! | [`TokioScheduler`] | a Tokio interval; each run happens on the blocking pool | on the blocking pool |
//! | [`ManualScheduler`] | explicit [`ManualScheduler::tick`] calls | on [`ManualScheduler::run_pending`] |
//!
//! Dropping a [`TaskHandle`] cancels its task. A run already in progress
//! completes; no new run starts.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A recurring unit of work.
pub type Task = Box<dyn FnMut() + Send>;

/// Work that runs at most once.
pub type OnceTask = Box<dyn FnOnce() + Send>;

/// Runs tasks off the caller's thread.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Runs `task` every `period` until the returned handle is dropped.
    fn schedule_repeating(&self, name: &str, period: Duration, task: Task) -> TaskHandle;

    /// Runs `task` once, soon, unless the returned handle is dropped
    /// first. The task may block.
    fn spawn_once(&self, name: &str, task: OnceTask) -> TaskHandle;
}

/// Cancel-on-drop handle to a scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    cancel: CancellationToken,
}

impl TaskHandle {
    /// Wraps `cancel`; cancelling it stops the task.
    pub fn new(name: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            name: name.into(),
            cancel,
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Scheduler backed by a Tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    /// Uses the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, name: &str, period: Duration, task: Task) -> TaskHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = Arc::new(Mutex::new(task));
        let task_name = name.to_string();
        let period = period.max(Duration::from_millis(1));

        self.handle.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let task = Arc::clone(&task);
                        let run = tokio::task::spawn_blocking(move || {
                            let mut guard = task.lock();
                            let f: &mut Task = &mut guard;
                            f();
                        });
                        if let Err(e) = run.await {
                            warn!(task = %task_name, "scheduled task failed: {e}");
                        }
                    }
                }
            }
            debug!(task = %task_name, "scheduled task stopped");
        });

        TaskHandle::new(name, cancel)
    }

    fn spawn_once(&self, name: &str, task: OnceTask) -> TaskHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_name = name.to_string();

        self.handle.spawn_blocking(move || {
            if token.is_cancelled() {
                debug!(task = %task_name, "one-shot task cancelled before it ran");
                return;
            }
            task();
        });

        TaskHandle::new(name, cancel)
    }
}

struct ManualTask {
    name: String,
    cancel: CancellationToken,
    task: Arc<Mutex<Task>>,
}

struct PendingTask {
    name: String,
    cancel: CancellationToken,
    task: OnceTask,
}

/// Scheduler driven by hand, for deterministic tests and embedding.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<ManualTask>>,
    pending: Mutex<Vec<PendingTask>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Runs every live task once. Returns how many ran.
    pub fn tick(&self) -> usize {
        let due: Vec<(CancellationToken, Arc<Mutex<Task>>)> = {
            let mut tasks = self.tasks.lock();
            tasks.retain(|t| !t.cancel.is_cancelled());
            tasks
                .iter()
                .map(|t| (t.cancel.clone(), Arc::clone(&t.task)))
                .collect()
        };

        let mut ran = 0;
        for (cancel, task) in due {
            if cancel.is_cancelled() {
                continue;
            }
            let mut guard = task.lock();
            let f: &mut Task = &mut guard;
            f();
            ran += 1;
        }
        ran
    }

    /// Runs every one-shot task queued so far, in submission order.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut ran = 0;
        for PendingTask { name, cancel, task } in pending {
            if cancel.is_cancelled() {
                debug!(task = %name, "one-shot task cancelled before it ran");
                continue;
            }
            task();
            ran += 1;
        }
        ran
    }

    /// Number of queued one-shot tasks not yet cancelled.
    pub fn pending_tasks(&self) -> usize {
        self.pending
            .lock()
            .iter()
            .filter(|t| !t.cancel.is_cancelled())
            .count()
    }

    /// Number of recurring tasks not yet cancelled.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .iter()
            .filter(|t| !t.cancel.is_cancelled())
            .count()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, name: &str, _period: Duration, task: Task) -> TaskHandle {
        let cancel = CancellationToken::new();
        self.tasks.lock().push(ManualTask {
            name: name.to_string(),
            cancel: cancel.clone(),
            task: Arc::new(Mutex::new(task)),
        });
        TaskHandle::new(name, cancel)
    }

    fn spawn_once(&self, name: &str, task: OnceTask) -> TaskHandle {
        let cancel = CancellationToken::new();
        self.pending.lock().push(PendingTask {
            name: name.to_string(),
            cancel: cancel.clone(),
            task,
        });
        TaskHandle::new(name, cancel)
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tasks = self.tasks.lock();
        let pending = self.pending.lock();
        f.debug_struct("ManualScheduler")
            .field("tasks", &tasks.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .field("pending", &pending.iter().map(|t| t.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}
