//! Durable job queue with at-least-once delivery and caller-side
//! await-completion. Topics run at configured concurrency; a pool topic at
//! concurrency 1 serializes every transaction of that pool's workers.

use crate::dispatch::job::{Job, JobStatus};
use crate::dispatch::store::JobStore;
use crate::runtime::telemetry::Telemetry;
use anyhow::{bail, Context, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Handler outcome classification. Retryable failures are redelivered up to
/// the configured attempt budget; terminal failures reject the dispatch
/// immediately (unknown actions, validation problems).
#[derive(Debug)]
pub enum JobError {
    Retryable(anyhow::Error),
    Terminal(anyhow::Error),
}

impl JobError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        JobError::Retryable(err.into())
    }

    pub fn terminal(err: impl Into<anyhow::Error>) -> Self {
        JobError::Terminal(err.into())
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Retryable(err) => write!(f, "retryable job failure: {err}"),
            JobError::Terminal(err) => write!(f, "terminal job failure: {err}"),
        }
    }
}

impl std::error::Error for JobError {}

pub type JobHandler =
    Arc<dyn Fn(Job) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync>;

#[derive(Debug, Clone)]
enum JobEvent {
    Retrying { error: String },
    Succeeded { result: Value },
    Failed { error: String },
}

pub struct JobQueue {
    store: Arc<dyn JobStore>,
    telemetry: Arc<Telemetry>,
    topics: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    watchers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<JobEvent>>>,
    max_attempts: u32,
    retry_backoff: Duration,
    shutdown: CancellationToken,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        telemetry: Arc<Telemetry>,
        max_attempts: u32,
        retry_backoff: Duration,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            telemetry,
            topics: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            max_attempts: max_attempts.max(1),
            retry_backoff,
            shutdown,
        })
    }

    /// Registers the consumer for a topic and redelivers any runnable jobs
    /// left over from a previous run (at-least-once).
    pub async fn register_consumer(
        self: &Arc<Self>,
        topic: &str,
        concurrency: usize,
        handler: JobHandler,
    ) -> Result<()> {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        {
            let mut topics = self.topics.lock().expect("topics mutex poisoned");
            if topics.contains_key(topic) {
                bail!("a consumer is already registered for topic {topic}");
            }
            topics.insert(topic.to_owned(), tx.clone());
        }

        let backlog = self
            .store
            .load_runnable(topic)
            .await
            .with_context(|| format!("failed to load runnable jobs for topic {topic}"))?;
        if !backlog.is_empty() {
            tracing::info!(topic, jobs = backlog.len(), "redelivering runnable jobs");
        }
        for job in backlog {
            let _ = tx.send(job);
        }

        let queue = self.clone();
        let topic = topic.to_owned();
        tokio::spawn(queue.consume(topic, concurrency, rx, handler));
        Ok(())
    }

    /// Saves a durable job and blocks until it resolves: `Succeeded` yields
    /// the result, terminal `Failed` rejects, `Retrying` is logged while the
    /// caller keeps waiting.
    pub async fn dispatch(&self, topic: &str, action: &str, data: Value) -> Result<Value> {
        let job = Job::new(topic, action, data);
        let job_id = job.id;
        let (tx, rx) = mpsc::unbounded_channel::<JobEvent>();
        self.watchers
            .lock()
            .expect("watchers mutex poisoned")
            .insert(job_id, tx);

        let outcome = self.dispatch_inner(job, rx).await;

        self.watchers
            .lock()
            .expect("watchers mutex poisoned")
            .remove(&job_id);
        outcome
    }

    async fn dispatch_inner(
        &self,
        job: Job,
        mut rx: mpsc::UnboundedReceiver<JobEvent>,
    ) -> Result<Value> {
        let job_id = job.id;
        let topic = job.topic.clone();
        let action = job.payload.action.clone();

        self.store
            .insert(&job)
            .await
            .with_context(|| format!("failed to save job for topic {topic}"))?;

        let sender = self
            .topics
            .lock()
            .expect("topics mutex poisoned")
            .get(&topic)
            .cloned();
        match sender {
            Some(sender) => {
                let _ = sender.send(job);
            }
            None => {
                tracing::warn!(
                    topic,
                    job = %job_id,
                    "no consumer registered; job stays queued until one arrives"
                );
            }
        }

        tracing::info!(topic, job = %job_id, action, "job saved; awaiting resolution");

        loop {
            let event = rx
                .recv()
                .await
                .context("job event channel closed before resolution")?;
            match event {
                JobEvent::Retrying { error } => {
                    tracing::warn!(
                        topic,
                        job = %job_id,
                        error,
                        "job failed but is being retried"
                    );
                }
                JobEvent::Succeeded { result } => return Ok(result),
                JobEvent::Failed { error } => {
                    bail!("job {job_id} on topic {topic} failed: {error}")
                }
            }
        }
    }

    async fn consume(
        self: Arc<Self>,
        topic: String,
        concurrency: usize,
        mut rx: mpsc::UnboundedReceiver<Job>,
        handler: JobHandler,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

        loop {
            let job = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => {
                    permit.expect("topic semaphore closed")
                }
            };

            let queue = self.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                let _permit = permit;
                queue.process_job(job, handler).await;
            });
        }

        tracing::debug!(topic, "job consumer stopped");
    }

    /// Runs a job to resolution, retrying in place so a topic at
    /// concurrency 1 never starts the next job before this one settles.
    async fn process_job(&self, mut job: Job, handler: JobHandler) {
        // A job dispatched while its consumer registers can be handed over
        // twice: once live and once from the reloaded backlog. The stored
        // status decides whether this copy still runs.
        match self.store.get(job.id).await {
            Ok(Some(stored)) if !stored.is_runnable() => {
                tracing::debug!(
                    topic = %job.topic,
                    job = %job.id,
                    "job already settled; dropping duplicate delivery"
                );
                return;
            }
            Ok(Some(stored)) => job = stored,
            _ => {}
        }

        loop {
            job.status = JobStatus::Active;
            job.attempts = job.attempts.saturating_add(1);
            self.persist(&job).await;

            tracing::info!(
                topic = %job.topic,
                job = %job.id,
                action = %job.payload.action,
                attempt = job.attempts,
                "processing job"
            );

            match handler(job.clone()).await {
                Ok(result) => {
                    job.status = JobStatus::Succeeded;
                    self.persist(&job).await;
                    self.telemetry.record_job_succeeded();
                    self.notify(&job, JobEvent::Succeeded { result });
                    return;
                }
                Err(JobError::Terminal(err)) => {
                    self.settle_failed(&mut job, err).await;
                    return;
                }
                Err(JobError::Retryable(err)) => {
                    if job.attempts >= self.max_attempts {
                        let err = err.context(format!(
                            "exhausted {} attempts",
                            self.max_attempts
                        ));
                        self.settle_failed(&mut job, err).await;
                        return;
                    }

                    job.status = JobStatus::Failed { retryable: true };
                    self.persist(&job).await;
                    self.telemetry.record_job_retry();
                    self.notify(
                        &job,
                        JobEvent::Retrying {
                            error: format!("{err:#}"),
                        },
                    );

                    if !self.retry_backoff.is_zero() {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            _ = tokio::time::sleep(self.retry_backoff) => {}
                        }
                    }
                }
            }
        }
    }

    async fn settle_failed(&self, job: &mut Job, err: anyhow::Error) {
        job.status = JobStatus::Failed { retryable: false };
        self.persist(job).await;
        self.telemetry.record_job_failed();
        tracing::warn!(
            topic = %job.topic,
            job = %job.id,
            error = %format!("{err:#}"),
            "job failed terminally"
        );
        self.notify(
            job,
            JobEvent::Failed {
                error: format!("{err:#}"),
            },
        );
    }

    async fn persist(&self, job: &Job) {
        if let Err(err) = self.store.update(job).await {
            tracing::warn!(
                topic = %job.topic,
                job = %job.id,
                error = %format!("{err:#}"),
                "failed to persist job status"
            );
        }
    }

    fn notify(&self, job: &Job, event: JobEvent) {
        let terminal = matches!(
            event,
            JobEvent::Succeeded { .. } | JobEvent::Failed { .. }
        );
        let mut watchers = self.watchers.lock().expect("watchers mutex poisoned");
        if let Some(sender) = watchers.get(&job.id) {
            let _ = sender.send(event);
        }
        if terminal {
            watchers.remove(&job.id);
        }
    }
}
