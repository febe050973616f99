//! Owns the active worker contexts and the per-pool job consumers. The
//! coordinator is the only writer of the context map; torn-down contexts are
//! retained so a worker's last error stays readable on demand.

use crate::dispatch::actions::{ActionContext, ActionRegistry, pool_topic};
use crate::dispatch::job::Job;
use crate::dispatch::queue::{JobError, JobHandler};
use crate::lifecycle::context::{
    create_worker_context, destroy_worker_context, ErrorEntry, WorkerContext,
};
use crate::registry::Worker;
use crate::runtime::context::AppContext;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub struct LifecycleCoordinator {
    app: Arc<AppContext>,
    contexts: Mutex<HashMap<Uuid, Arc<WorkerContext>>>,
    /// Serializes activations: the liveness check and the insert must not
    /// be separated by the context build, or two racing activations of one
    /// worker both pass the check and one context leaks.
    activation: tokio::sync::Mutex<()>,
}

impl LifecycleCoordinator {
    pub fn new(app: Arc<AppContext>) -> Self {
        Self {
            app,
            contexts: Mutex::new(HashMap::new()),
            activation: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers this pool's durable consumer at concurrency 1. The handler
    /// force-reloads a fresh pool snapshot per job; signing must never use a
    /// stale one. An action missing from the registry is terminal.
    pub async fn register_pool(&self, pid: u64, actions: ActionRegistry) -> Result<()> {
        let pool_cache = self.app.pool_cache.clone();
        let queue = self.app.job_queue.clone();
        let topic = pool_topic(pid);
        let handler: JobHandler = Arc::new(move |job: Job| {
            let pool_cache = pool_cache.clone();
            let actions = actions.clone();
            let queue = queue.clone();
            let topic = topic.clone();
            Box::pin(async move {
                let snapshot = pool_cache
                    .get(pid, true)
                    .await
                    .map_err(JobError::retryable)?;

                let action = match actions.get(&job.payload.action) {
                    Some(action) => action.clone(),
                    None => {
                        return Err(JobError::terminal(anyhow::anyhow!(
                            "no handler registered for action {}",
                            job.payload.action
                        )))
                    }
                };

                action(ActionContext {
                    data: job.payload.data,
                    pool: snapshot.pool,
                    signer: snapshot.signer,
                    queue,
                    topic,
                })
                .await
            })
        });

        self.app
            .job_queue
            .register_consumer(&pool_topic(pid), 1, handler)
            .await
    }

    /// Builds and starts a context for the worker. Fails without starting
    /// anything when validation rejects the worker or one is already live.
    pub async fn activate_worker(&self, worker: &Worker) -> Result<Arc<WorkerContext>> {
        let _activating = self.activation.lock().await;
        {
            let contexts = self.contexts.lock().expect("contexts mutex poisoned");
            if let Some(existing) = contexts.get(&worker.uuid) {
                if !existing.machine.state().is_terminal() {
                    bail!("worker {} is already active", worker.name);
                }
            }
        }

        let ctx = create_worker_context(worker, &self.app).await?;
        self.contexts
            .lock()
            .expect("contexts mutex poisoned")
            .insert(worker.uuid, ctx.clone());
        Ok(ctx)
    }

    /// Tears the worker's context down. A worker that was never activated,
    /// or was already deactivated, is a no-op.
    pub async fn deactivate_worker(&self, uuid: Uuid) {
        let ctx = self
            .contexts
            .lock()
            .expect("contexts mutex poisoned")
            .get(&uuid)
            .cloned();
        match ctx {
            Some(ctx) => destroy_worker_context(&ctx).await,
            None => tracing::debug!(worker = %uuid, "deactivate for unknown worker ignored"),
        }
    }

    pub fn context(&self, uuid: Uuid) -> Option<Arc<WorkerContext>> {
        self.contexts
            .lock()
            .expect("contexts mutex poisoned")
            .get(&uuid)
            .cloned()
    }

    pub fn last_error(&self, uuid: Uuid) -> Option<ErrorEntry> {
        self.context(uuid).and_then(|ctx| ctx.last_error())
    }
}
