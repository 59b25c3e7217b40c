//! Fixed-size worker thread pool.
//!
//! Tasks are boxed closures sent over a crossbeam channel; each worker thread
//! pulls from the same receiver, so tasks are picked up in FIFO order but may
//! finish out of order. `submit` hands back a `TaskHandle` that the caller
//! waits on for the closure's return value.
//!
//! Stopping closes the channel. Workers keep draining whatever is already
//! queued and exit once the channel is empty, so no accepted task is lost.

use crate::pipeline::error::PoolError;
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolStatus {
    Created,
    Running,
    Stopped,
}

struct PoolState {
    status: PoolStatus,
    sender: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

/// Pool of `width` threads executing submitted closures.
pub struct WorkerPool {
    name: String,
    width: usize,
    state: Mutex<PoolState>,
}

/// Awaitable result of a submitted task.
#[must_use = "dropping a TaskHandle discards the task's result"]
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, String>>,
}

impl<T> TaskHandle<T> {
    /// Block until the task finishes and return its value.
    pub fn wait(self) -> Result<T, PoolError> {
        match self.rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(PoolError::TaskPanicked(message)),
            // The task was dropped without running.
            Err(_) => Err(PoolError::Stopped),
        }
    }

    /// Whether the result is ready to be taken without blocking.
    pub fn is_finished(&self) -> bool {
        !self.rx.is_empty()
    }
}

impl WorkerPool {
    /// Create a stopped pool. `width` is clamped to at least one thread.
    pub fn new(name: impl Into<String>, width: usize) -> Self {
        Self {
            name: name.into(),
            width: width.max(1),
            state: Mutex::new(PoolState {
                status: PoolStatus::Created,
                sender: None,
                workers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn is_running(&self) -> bool {
        self.lock().status == PoolStatus::Running
    }

    /// Tasks queued but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.lock().sender.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> Result<(), PoolError> {
        let mut state = self.lock();
        match state.status {
            PoolStatus::Running => return Err(PoolError::AlreadyStarted),
            PoolStatus::Stopped => return Err(PoolError::Stopped),
            PoolStatus::Created => {}
        }

        let (tx, rx) = crossbeam_channel::unbounded::<Task>();
        let mut workers = Vec::with_capacity(self.width);
        for i in 0..self.width {
            let rx = rx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-worker-{}", self.name, i))
                .spawn(move || {
                    for task in rx.iter() {
                        task();
                    }
                });
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    drop(tx);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    state.status = PoolStatus::Stopped;
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        state.sender = Some(tx);
        state.workers = workers;
        state.status = PoolStatus::Running;
        tracing::debug!("Pool '{}' started with {} worker(s)", self.name, self.width);
        Ok(())
    }

    /// Queue `f` for execution and return a handle to its result.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let task: Task = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f)).map_err(panic_message);
            let _ = tx.send(result);
        });

        let state = self.lock();
        match (state.status, state.sender.as_ref()) {
            (PoolStatus::Created, _) => Err(PoolError::NotStarted),
            (PoolStatus::Running, Some(sender)) => {
                sender.send(task).map_err(|_| PoolError::Stopped)?;
                Ok(TaskHandle { rx })
            }
            _ => Err(PoolError::Stopped),
        }
    }

    /// Stop accepting tasks, let workers drain the queue, and join them.
    /// Calling `stop` again is a no-op.
    pub fn stop(&self) {
        let workers = {
            let mut state = self.lock();
            if state.status == PoolStatus::Stopped {
                return;
            }
            state.status = PoolStatus::Stopped;
            state.sender = None;
            std::mem::take(&mut state.workers)
        };

        let current = std::thread::current().id();
        for handle in workers {
            // A task stopping its own pool cannot join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("Pool '{}' worker thread panicked", self.name);
            }
        }
        tracing::debug!("Pool '{}' stopped", self.name);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("width", &self.width)
            .field("running", &self.is_running())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
