//! Durable persistence behind the job queue. Jobs must survive a restart;
//! the queue reloads runnable jobs from here when a consumer registers.

use crate::dispatch::job::Job;
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub trait JobStore: Send + Sync + 'static {
    fn insert<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<()>>;
    fn update<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<()>>;
    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Job>>>;
    /// All jobs for `topic` still owing a resolution, in insertion order.
    fn load_runnable<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<Vec<Job>>>;
}

/// Reference store keeping jobs in process memory. Useful for tests and for
/// deployments that accept losing the queue on restart.
#[derive(Default)]
pub struct InMemoryJobStore {
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    jobs: HashMap<Uuid, Job>,
    order: Vec<Uuid>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.state.lock().expect("job store mutex poisoned").jobs.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().expect("job store mutex poisoned").jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobStore for InMemoryJobStore {
    fn insert<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("job store mutex poisoned");
            state.jobs.insert(job.id, job.clone());
            state.order.push(job.id);
            Ok(())
        })
    }

    fn update<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().expect("job store mutex poisoned");
            state.jobs.insert(job.id, job.clone());
            Ok(())
        })
    }

    fn get(&self, id: Uuid) -> BoxFuture<'_, Result<Option<Job>>> {
        Box::pin(async move { Ok(self.job(id)) })
    }

    fn load_runnable<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<Vec<Job>>> {
        Box::pin(async move {
            let state = self.state.lock().expect("job store mutex poisoned");
            Ok(state
                .order
                .iter()
                .filter_map(|id| state.jobs.get(id))
                .filter(|job| job.topic == topic && job.is_runnable())
                .cloned()
                .collect())
        })
    }
}
