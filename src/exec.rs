//! Executors running the steps of an update cycle.
use std::{sync::Mutex, thread::JoinHandle};

use crossbeam_channel::Sender;

/// Unit of work submitted to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Returned by [`Executor::submit()`] when the job will not run.
#[derive(Debug, thiserror::Error)]
#[error("executor does not accept jobs")]
pub struct RejectedJob;

/// Runs jobs submitted by the updater.
///
/// Jobs of one update cycle are submitted one after another, each job
/// submitting the next, so an executor only has to run them in submission
/// order. Implementations may use a thread pool, a GUI event loop, or a
/// runtime's blocking task spawner.
///
/// A job for which `submit` returns `Ok` must eventually run. The updater
/// considers its cycle running until the last job has run, so an executor
/// that drops accepted jobs blocks all further update checks. Return
/// [`RejectedJob`] instead; the updater then ends the cycle with an error.
pub trait Executor: Send + Sync {
    /// Schedules the job.
    fn submit(&self, job: Job) -> Result<(), RejectedJob>;
}

impl<F> Executor for F
where
    F: Fn(Job) + Send + Sync,
{
    fn submit(&self, job: Job) -> Result<(), RejectedJob> {
        self(job);
        Ok(())
    }
}

/// Default executor with a single worker thread.
///
/// Dropping the queue waits for the jobs already submitted to finish.
#[derive(Debug)]
pub struct WorkQueue {
    sender: Mutex<Option<Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WorkQueue {
    /// Starts a queue whose worker thread has the given name.
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();

        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                tracing::debug!("work queue started");

                for job in receiver {
                    job();
                }

                tracing::debug!("work queue stopped");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());

        if let Some(worker) = worker {
            if worker.thread().id() == std::thread::current().id() {
                // Dropped by one of its own jobs; the loop ends on its own.
                return;
            }

            if worker.join().is_err() {
                tracing::warn!("work queue thread panicked");
            }
        }
    }
}

impl Executor for WorkQueue {
    fn submit(&self, job: Job) -> Result<(), RejectedJob> {
        let sender = match self.sender.lock() {
            Ok(sender) => sender.clone(),
            Err(_) => None,
        };

        match sender {
            Some(sender) => sender.send(job).map_err(|_| {
                tracing::warn!("work queue closed, job rejected");
                RejectedJob
            }),
            None => {
                tracing::warn!("work queue shut down, job rejected");
                Err(RejectedJob)
            }
        }
    }
}

impl Drop for WorkQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
