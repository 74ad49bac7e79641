//! Runner that receives job messages from a queue and runs them

use std::any::Any;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::RwLock;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::envelope::Envelope;
use crate::queue::{MessageId, Queue};
use crate::{Error, Result};

/// How long a finished job gets to delete its message, independent of shutdown.
const DELETE_TIMEOUT: Duration = Duration::from_secs(1);

/// Back-off after a failed receive, so a broken store is not hammered.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Boxed future returned by a registered job.
pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

type JobFn = Arc<dyn Fn(CancellationToken, Vec<u8>) -> JobFuture + Send + Sync>;

/// Configuration for the job runner.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sqlq::jobs::RunnerConfig;
///
/// let config = RunnerConfig {
///     limit: 8,
///     ..RunnerConfig::default()
/// };
/// assert_eq!(config.poll_interval, Duration::from_millis(100));
/// ```
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// How many jobs can run at the same time.
    pub limit: usize,

    /// How often the queue is polled while it is empty.
    pub poll_interval: Duration,

    /// How far a running job's message timeout is pushed out on each renewal.
    /// Renewal happens every `extend - extend / 5`.
    pub extend: Duration,
}

impl Default for RunnerConfig {
    /// - `limit`: available parallelism
    /// - `poll_interval`: 100 milliseconds
    /// - `extend`: 5 seconds
    fn default() -> Self {
        Self {
            limit: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            poll_interval: Duration::from_millis(100),
            extend: Duration::from_secs(5),
        }
    }
}

/// Runs registered jobs by name when a message for them is received.
///
/// - At most `limit` jobs run at the same time
/// - A running job's message timeout is extended until the job returns
/// - Successful jobs delete their message; failed or panicking jobs leave it
///   to be redelivered once its timeout passes
/// - [`Runner::start`] waits for running jobs before returning
pub struct Runner {
    queue: Queue,
    jobs: HashMap<String, JobFn>,
    config: RunnerConfig,
    job_count: Arc<RwLock<usize>>,
}

impl Runner {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `limit`, `poll_interval` or
    /// `extend` is zero.
    pub fn new(queue: Queue, config: RunnerConfig) -> Result<Self> {
        if config.limit == 0 {
            return Err(Error::invalid_config("limit must be greater than 0"));
        }

        if config.poll_interval.is_zero() {
            return Err(Error::invalid_config(
                "poll_interval must be greater than 0",
            ));
        }

        if config.extend.is_zero() {
            return Err(Error::invalid_config("extend must be greater than 0"));
        }

        Ok(Self {
            queue,
            jobs: HashMap::new(),
            config,
            job_count: Arc::new(RwLock::new(0)),
        })
    }

    /// Register `job` under `name`.
    ///
    /// The job gets a token that is cancelled when the runner shuts down, and
    /// the payload given to [`create`](super::create).
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateJob`] if `name` is already registered.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, job: F) -> Result<()>
    where
        F: Fn(CancellationToken, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        if self.jobs.contains_key(&name) {
            return Err(Error::DuplicateJob(name));
        }

        let job: JobFn = Arc::new(
            move |cancel: CancellationToken, payload: Vec<u8>| -> JobFuture {
                Box::pin(job(cancel, payload))
            },
        );
        self.jobs.insert(name, job);
        Ok(())
    }

    /// Registered job names, sorted.
    pub fn job_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.jobs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of jobs currently running.
    pub async fn in_flight(&self) -> usize {
        *self.job_count.read().await
    }

    /// The queue jobs are received from, for creating jobs with [`create`](super::create).
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Receive and run jobs until `cancel` fires, then wait for running jobs
    /// to finish.
    ///
    /// Job failures and panics are logged, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredJob`] when a message names a job that was
    /// never registered. The message is left in the queue, no further
    /// messages are received, and running jobs are waited for first.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            queue = %self.queue.name(),
            jobs = ?self.job_names(),
            limit = self.config.limit,
            "Starting"
        );

        let tracker = TaskTracker::new();
        let mut result = Ok(());

        while !cancel.is_cancelled() {
            if let Err(e) = self.receive_and_run(&cancel, &tracker).await {
                result = Err(e);
                break;
            }
        }

        let in_flight = self.in_flight().await;
        tracing::info!(in_flight, "Stopping");
        tracker.close();
        tracker.wait().await;
        tracing::info!("Stopped");

        result
    }

    async fn receive_and_run(&self, cancel: &CancellationToken, tracker: &TaskTracker) -> Result<()> {
        if *self.job_count.read().await >= self.config.limit {
            sleep_or_cancel(self.config.poll_interval, cancel).await;
            return Ok(());
        }

        let message = match self
            .queue
            .receive_and_wait(self.config.poll_interval, cancel)
            .await
        {
            Ok(message) => message,
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => {
                tracing::error!(error = %e, "Error receiving job");
                sleep_or_cancel(RECEIVE_ERROR_BACKOFF, cancel).await;
                return Ok(());
            }
        };

        // The message stays in the queue and comes back until max_receive is exhausted.
        let envelope = match Envelope::decode(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    error = %e,
                    "Error decoding job message body"
                );
                return Ok(());
            }
        };

        let Some(job) = self.jobs.get(&envelope.name).cloned() else {
            tracing::error!(
                job = %envelope.name,
                message_id = %message.id,
                "Job not registered"
            );
            return Err(Error::UnregisteredJob(envelope.name));
        };

        *self.job_count.write().await += 1;

        let task = JobTask {
            queue: self.queue.clone(),
            job,
            name: envelope.name,
            id: message.id,
            extend: self.config.extend,
            job_count: self.job_count.clone(),
            tracker: tracker.clone(),
        };
        tracker.spawn(task.run(envelope.payload, cancel.child_token()));

        Ok(())
    }
}

/// One received job, run on its own task.
struct JobTask {
    queue: Queue,
    job: JobFn,
    name: String,
    id: MessageId,
    extend: Duration,
    job_count: Arc<RwLock<usize>>,
    tracker: TaskTracker,
}

impl JobTask {
    async fn run(self, payload: Vec<u8>, cancel: CancellationToken) {
        let renewal = self.tracker.spawn(extend_lease(
            self.queue.clone(),
            self.id.clone(),
            self.name.clone(),
            self.extend,
            cancel.clone(),
        ));

        tracing::info!(job = %self.name, message_id = %self.id, "Running job");
        let started = Instant::now();

        let job = self.job.clone();
        let token = cancel.clone();
        let outcome = AssertUnwindSafe(async move { job(token, payload).await })
            .catch_unwind()
            .await;

        // Ends the job's scope, which stops lease renewal.
        cancel.cancel();

        match outcome {
            Ok(Ok(())) => {
                tracing::info!(
                    job = %self.name,
                    message_id = %self.id,
                    duration = ?started.elapsed(),
                    "Ran job"
                );
                self.acknowledge().await;
            }
            Ok(Err(e)) => {
                tracing::error!(
                    job = %self.name,
                    message_id = %self.id,
                    error = %e,
                    "Error running job"
                );
            }
            Err(panic) => {
                tracing::error!(
                    job = %self.name,
                    message_id = %self.id,
                    panic = %panic_message(&*panic),
                    "Recovered from panic in job"
                );
            }
        }

        if let Err(e) = renewal.await {
            tracing::error!(job = %self.name, error = %e, "Lease renewal task failed");
        }

        *self.job_count.write().await -= 1;
    }

    async fn acknowledge(&self) {
        match tokio::time::timeout(DELETE_TIMEOUT, self.queue.delete(&self.id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    job = %self.name,
                    message_id = %self.id,
                    error = %e,
                    "Error deleting job from queue, it will be retried"
                );
            }
            Err(_) => {
                tracing::error!(
                    job = %self.name,
                    message_id = %self.id,
                    "Timed out deleting job from queue, it will be retried"
                );
            }
        }
    }
}

/// Push the message timeout out by `extend` every `extend - extend / 5` until
/// `cancel` fires.
async fn extend_lease(
    queue: Queue,
    id: MessageId,
    name: String,
    extend: Duration,
    cancel: CancellationToken,
) {
    let period = extend - extend / 5;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        tracing::debug!(job = %name, message_id = %id, "Extending message timeout");
        if let Err(e) = queue.extend(&id, extend).await {
            tracing::warn!(
                job = %name,
                message_id = %id,
                error = %e,
                "Error extending message timeout"
            );
        }
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(duration) => {}
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::queue::QueueOptions;

    async fn queue() -> Queue {
        let store = Store::connect_in_memory().await.unwrap();
        Queue::new(store, QueueOptions::new("test")).unwrap()
    }

    #[test]
    fn config_default_has_sensible_values() {
        let config = RunnerConfig::default();
        assert!(config.limit >= 1);
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.extend, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn new_rejects_zero_limit() {
        let config = RunnerConfig {
            limit: 0,
            ..RunnerConfig::default()
        };
        match Runner::new(queue().await, config) {
            Err(e) => assert!(e.to_string().contains("limit must be greater than 0")),
            Ok(_) => panic!("Expected error for zero limit"),
        }
    }

    #[tokio::test]
    async fn new_rejects_zero_poll_interval() {
        let config = RunnerConfig {
            poll_interval: Duration::ZERO,
            ..RunnerConfig::default()
        };
        match Runner::new(queue().await, config) {
            Err(e) => assert!(e.to_string().contains("poll_interval must be greater than 0")),
            Ok(_) => panic!("Expected error for zero poll_interval"),
        }
    }

    #[tokio::test]
    async fn new_rejects_zero_extend() {
        let config = RunnerConfig {
            extend: Duration::ZERO,
            ..RunnerConfig::default()
        };
        assert!(matches!(
            Runner::new(queue().await, config),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_names() {
        let mut runner = Runner::new(queue().await, RunnerConfig::default()).unwrap();
        runner.register("a", |_, _| async { Ok(()) }).unwrap();
        runner.register("b", |_, _| async { Ok(()) }).unwrap();

        match runner.register("a", |_, _| async { Ok(()) }) {
            Err(Error::DuplicateJob(name)) => assert_eq!(name, "a"),
            other => panic!("expected DuplicateJob, got {other:?}"),
        }
        assert_eq!(runner.job_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn runner_exposes_its_queue() {
        let runner = Runner::new(queue().await, RunnerConfig::default()).unwrap();
        assert_eq!(runner.queue().name(), "test");
    }

    #[test]
    fn panic_message_reads_common_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }
}
