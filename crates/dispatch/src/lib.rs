//! Bounded worker pool for query execution.
//!
//! ## Contract
//!
//! - Submitting more work than available workers queues rather than blocking
//!   the submitter
//! - Cancelling a handle whose work has not started prevents it from ever
//!   starting and leaves no result state behind
//! - Cancelling a handle whose work has already started has no effect on the
//!   in-progress execution (documented limitation)
//! - Worker panics are caught and surfaced through the handle; they never
//!   kill a pool thread

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Thread-name prefix for logging.
    pub name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            name: "query-worker".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[derive(Debug)]
enum TaskState {
    Queued,
    Cancelled,
    Running,
    Done(TaskOutcome),
}

/// Final outcome of one submitted task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Panicked(String),
}

/// Result of a bounded wait on a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitResult {
    Completed,
    Panicked(String),
    Cancelled,
    TimedOut,
}

#[derive(Debug)]
struct TaskShared {
    state: Mutex<TaskState>,
    cond: Condvar,
}

/// Cancellable, awaitable handle to one submitted task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    /// Prevent the task from starting. Returns `true` iff the task had not
    /// begun executing; a started task is unaffected and `false` is
    /// returned.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.state.lock().unwrap();
        if matches!(*state, TaskState::Queued) {
            *state = TaskState::Cancelled;
            self.shared.cond.notify_all();
            true
        } else {
            false
        }
    }

    /// Non-blocking completion check (used to prune in-flight sets).
    pub fn is_finished(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        matches!(*state, TaskState::Done(_) | TaskState::Cancelled)
    }

    /// Wait for the task to reach a final state, up to `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> WaitResult {
        let state = self.shared.state.lock().unwrap();
        let (state, result) = self
            .shared
            .cond
            .wait_timeout_while(state, timeout, |s| {
                matches!(*s, TaskState::Queued | TaskState::Running)
            })
            .unwrap();

        if result.timed_out() && matches!(*state, TaskState::Queued | TaskState::Running) {
            return WaitResult::TimedOut;
        }
        match &*state {
            TaskState::Cancelled => WaitResult::Cancelled,
            TaskState::Done(TaskOutcome::Completed) => WaitResult::Completed,
            TaskState::Done(TaskOutcome::Panicked(msg)) => WaitResult::Panicked(msg.clone()),
            TaskState::Queued | TaskState::Running => WaitResult::TimedOut,
        }
    }
}

struct QueuedTask {
    shared: Arc<TaskShared>,
    work: Box<dyn FnOnce() + Send>,
}

/// Bounded-concurrency executor over named worker threads.
pub struct WorkerPool {
    sender: Option<mpsc::Sender<QueuedTask>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedTask>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|i| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("{}-{i}", config.name))
                    .spawn(move || worker_loop(&receiver))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!(workers = config.workers, "worker pool started");
        Self {
            sender: Some(sender),
            workers,
        }
    }

    /// Queue a unit of work. Never blocks; excess submissions wait in the
    /// queue until a worker frees up.
    pub fn submit<F>(&self, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(TaskShared {
            state: Mutex::new(TaskState::Queued),
            cond: Condvar::new(),
        });
        let task = QueuedTask {
            shared: shared.clone(),
            work: Box::new(work),
        };

        let enqueued = match &self.sender {
            Some(sender) => sender.send(task).is_ok(),
            None => false,
        };
        if !enqueued {
            // Pool already shut down; the task can never start.
            let mut state = shared.state.lock().unwrap();
            *state = TaskState::Cancelled;
            shared.cond.notify_all();
        }

        TaskHandle { shared }
    }

    /// Close the queue and join all workers. Queued-but-unstarted tasks
    /// still run before their worker exits.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.sender.take().is_none() {
            return;
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.release();
    }
}

fn worker_loop(receiver: &Arc<Mutex<mpsc::Receiver<QueuedTask>>>) {
    loop {
        // Hold the lock only for the dequeue, never while running work.
        let task = {
            let receiver = receiver.lock().unwrap();
            receiver.recv()
        };
        let Ok(task) = task else {
            break; // Queue closed.
        };

        {
            let mut state = task.shared.state.lock().unwrap();
            match *state {
                TaskState::Cancelled => continue,
                _ => *state = TaskState::Running,
            }
        }

        let outcome = match catch_unwind(AssertUnwindSafe(task.work)) {
            Ok(()) => TaskOutcome::Completed,
            Err(panic) => {
                let msg = panic_message(&panic);
                debug!(error = %msg, "worker task panicked");
                TaskOutcome::Panicked(msg)
            }
        };

        let mut state = task.shared.state.lock().unwrap();
        *state = TaskState::Done(outcome);
        task.shared.cond.notify_all();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}
