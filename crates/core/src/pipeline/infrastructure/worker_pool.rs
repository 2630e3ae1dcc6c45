use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::shared::frame::Frame;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("transform task failed: {0}")]
    Failed(String),
    #[error("transform task panicked: {0}")]
    Panicked(String),
    #[error("worker pool stopped before the task completed")]
    Disconnected,
}

type Job = Box<dyn FnOnce() + Send + 'static>;
type TaskResult = Result<Frame, TaskError>;

/// Fixed set of worker threads pulling jobs from one shared queue.
///
/// Jobs are not ordered by completion; callers keep their own ordering by
/// holding the returned [`PendingTask`] handles in submission order.
pub struct WorkerPool {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, std::io::Error> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            workers.push(spawn_worker(i, job_rx.clone())?);
        }
        log::debug!("Started {size} transform workers");
        Ok(Self {
            job_tx: Some(job_tx),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues `task` and returns a handle to its eventual result.
    ///
    /// A panic inside `task` is caught and reported as
    /// [`TaskError::Panicked`]; the worker thread survives it.
    pub fn submit<F>(&self, task: F) -> PendingTask
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        let (result_tx, result_rx) = crossbeam_channel::bounded::<TaskResult>(1);
        let abandoned = Arc::new(AtomicBool::new(false));
        let skip = Arc::clone(&abandoned);
        let job: Job = Box::new(move || {
            if skip.load(Ordering::Relaxed) {
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).unwrap_or_else(|payload| {
                Err(TaskError::Panicked(panic_message(payload.as_ref())))
            });
            // The handle may already be gone; nothing to report then.
            let _ = result_tx.send(outcome);
        });

        match &self.job_tx {
            Some(job_tx) if job_tx.send(job).is_ok() => PendingTask {
                state: TaskState::Running(result_rx),
                abandoned,
            },
            _ => PendingTask::failed(TaskError::Disconnected),
        }
    }

    /// Stops accepting jobs and joins every worker once the queue is empty.
    pub fn shutdown(&mut self) {
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::warn!("Transform worker exited abnormally");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(i: usize, job_rx: Receiver<Job>) -> Result<JoinHandle<()>, std::io::Error> {
    std::thread::Builder::new()
        .name(format!("swap-worker-{i}"))
        .spawn(move || {
            for job in job_rx {
                job();
            }
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

enum TaskState {
    Done(TaskResult),
    Running(Receiver<TaskResult>),
}

/// Handle to one submitted transform. Resolves exactly once.
pub struct PendingTask {
    state: TaskState,
    abandoned: Arc<AtomicBool>,
}

impl PendingTask {
    /// An already-resolved task carrying `frame` unchanged.
    pub fn completed(frame: Frame) -> Self {
        Self {
            state: TaskState::Done(Ok(frame)),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failed(error: TaskError) -> Self {
        Self {
            state: TaskState::Done(Err(error)),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Done(_) => true,
            TaskState::Running(rx) => !rx.is_empty(),
        }
    }

    /// Blocks until the task resolves.
    pub fn wait(self) -> TaskResult {
        match self.state {
            TaskState::Done(result) => result,
            TaskState::Running(rx) => rx.recv().unwrap_or(Err(TaskError::Disconnected)),
        }
    }

    /// Gives up on the result. A job that has not started yet is skipped;
    /// one already running finishes and its output is discarded.
    pub fn abandon(self) {
        self.abandoned.store(true, Ordering::Relaxed);
    }
}
