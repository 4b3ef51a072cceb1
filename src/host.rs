//! In-process implementations of the host capabilities.
//!
//! Managed hosts provide their own durable queue and action runner. Outside of one, a
//! [`QueueScheduler`] plays the deferred queue and [`LocalActions`] plays the action runner, both
//! backed by a [`Worker`].
use std::{
    sync::{
        mpsc::{channel, Sender},
        Mutex,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use serde_json::Value;

use crate::{ActionRunner, DispatchBundle, Error, Operation, Result, Scheduler, Worker};

struct Job {
    operation: Operation,
    bundle: DispatchBundle,
    not_before: Instant,
}

/// A deferred queue drained by a background thread.
///
/// Submissions return immediately. The thread executes them one at a time, in submission order,
/// waiting out each submission's delay first. Failed executions are logged and dropped; nothing
/// is retried. Every accepted submission runs, even if the queue is stopped before it is reached.
///
/// ```no_run
/// # use posthog_deferred::{Capture, ClientConfig, QueueScheduler};
/// let client = ClientConfig::from_env().to_client();
/// let queue = QueueScheduler::start()?;
///
/// client.capture(&queue, Capture::new("user-1", "signed_up"))?;
///
/// // Wait for queued events to be sent before exiting.
/// queue.shutdown()?;
/// # Ok::<(), posthog_deferred::Error>(())
/// ```
pub struct QueueScheduler {
    join_handle: JoinHandle<()>,
    // `None` once stopped. Dropping the sender lets the thread finish the backlog and exit.
    sender: Mutex<Option<Sender<Job>>>,
}

impl QueueScheduler {
    /// Start a queue whose submissions are executed by a [`Worker`].
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the thread failed to start.
    pub fn start() -> Result<QueueScheduler> {
        let worker = Worker::new();
        QueueScheduler::start_with_handler(move |operation, bundle| {
            worker.execute(operation, &bundle)
        })
    }

    /// Start a queue whose submissions are passed to `handler`.
    pub fn start_with_handler<F>(mut handler: F) -> Result<QueueScheduler>
    where
        F: FnMut(Operation, DispatchBundle) -> Result<Value> + Send + 'static,
    {
        let (sender, receiver) = channel::<Job>();

        let join_handle = std::thread::Builder::new()
            .name("posthog-worker".to_owned())
            .spawn(move || {
                for job in receiver {
                    let now = Instant::now();
                    if job.not_before > now {
                        std::thread::sleep(job.not_before - now);
                    }
                    if let Err(err) = handler(job.operation, job.bundle) {
                        log::warn!(target: "posthog",
                                   operation:display = job.operation;
                                   "deferred call failed: {}", err);
                    }
                }
                log::debug!(target: "posthog", "worker thread drained its queue and is exiting");
            })?;

        Ok(QueueScheduler {
            join_handle,
            sender: Mutex::new(Some(sender)),
        })
    }

    /// Stop accepting work. Submissions accepted before this call still run; later ones fail
    /// with [`Error::WorkerStopped`].
    ///
    /// This function does not wait for the thread to finish.
    pub fn stop(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
    }

    /// Stop the queue and block until every accepted submission has run.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::WorkerThreadPanicked)?;

        Ok(())
    }
}

impl Scheduler for QueueScheduler {
    fn run_after(
        &self,
        delay: Duration,
        operation: Operation,
        bundle: DispatchBundle,
    ) -> Result<()> {
        let guard = self.sender.lock().map_err(|_| Error::WorkerStopped)?;
        let Some(sender) = guard.as_ref() else {
            return Err(Error::WorkerStopped);
        };

        sender
            .send(Job {
                operation,
                bundle,
                not_before: Instant::now() + delay,
            })
            .map_err(|_| Error::WorkerStopped)
    }
}

/// Runs actions inline on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct LocalActions {
    worker: Worker,
}

impl LocalActions {
    /// Create an action runner backed by a fresh [`Worker`].
    pub fn new() -> LocalActions {
        LocalActions::default()
    }
}

impl ActionRunner for LocalActions {
    fn run_action(&self, operation: Operation, bundle: DispatchBundle) -> Result<Value> {
        self.worker.execute(operation, &bundle)
    }
}
