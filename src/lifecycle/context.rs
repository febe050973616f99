//! Process-local worker context: pool/worker snapshots, the lifecycle
//! machine, the per-worker tx queue, and an append-only error log. Contexts
//! are created on activation and destroyed on deactivation; snapshots are
//! explicitly refreshed, never assumed fresh.

use crate::dispatch::actions::pool_topic;
use crate::dispatch::tx_queue::TxDispatchQueue;
use crate::lifecycle::machine::{LifecycleEffects, LifecycleMachine};
use crate::lifecycle::runtime::WorkerRuntime;
use crate::registry::{Pool, PoolRegistry, Signer, SignerResolver, Worker};
use crate::runtime::context::AppContext;
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

#[derive(Debug)]
pub enum ValidationError {
    StakeBelowMinimum { stake: u128, minimum: u128 },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::StakeBelowMinimum { stake, minimum } => write!(
                f,
                "worker stake {stake} is below the required minimum of {minimum} units"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Pool entity frozen together with its resolved signing capability.
#[derive(Clone)]
pub struct PoolSnapshot {
    pub pool: Pool,
    pub signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for PoolSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSnapshot")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl PoolSnapshot {
    pub fn pid(&self) -> u64 {
        self.pool.pid
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub endpoint: String,
    pub pid: u64,
    pub stake: u128,
}

impl From<&Worker> for WorkerSnapshot {
    fn from(worker: &Worker) -> Self {
        Self {
            uuid: worker.uuid,
            name: worker.name.clone(),
            endpoint: worker.endpoint.clone(),
            pid: worker.pid,
            stake: worker.stake,
        }
    }
}

/// Pool snapshot cache keyed by pid. Every lookup states whether it accepts
/// a cached snapshot; signing paths must pass `force_reload = true`.
#[derive(Clone)]
pub struct PoolCache {
    inner: Arc<PoolCacheInner>,
}

struct PoolCacheInner {
    pools: Arc<dyn PoolRegistry>,
    resolver: Arc<dyn SignerResolver>,
    cached: Mutex<HashMap<u64, PoolSnapshot>>,
}

impl PoolCache {
    pub fn new(pools: Arc<dyn PoolRegistry>, resolver: Arc<dyn SignerResolver>) -> Self {
        Self {
            inner: Arc::new(PoolCacheInner {
                pools,
                resolver,
                cached: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub async fn get(&self, pid: u64, force_reload: bool) -> Result<PoolSnapshot> {
        if !force_reload {
            let cached = self
                .inner
                .cached
                .lock()
                .expect("pool cache mutex poisoned")
                .get(&pid)
                .cloned();
            if let Some(snapshot) = cached {
                return Ok(snapshot);
            }
        }

        let pool = match self.inner.pools.get_by_pid(pid).await? {
            Some(pool) => pool,
            None => bail!("pool {pid} not found in registry"),
        };
        let signer = self.inner.resolver.resolve(&pool.owner)?;
        let snapshot = PoolSnapshot { pool, signer };

        self.inner
            .cached
            .lock()
            .expect("pool cache mutex poisoned")
            .insert(pid, snapshot.clone());
        Ok(snapshot)
    }
}

#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub at: SystemTime,
    pub message: String,
}

/// Append-only error history for one worker. Appends also emit a log event.
pub struct ErrorLog {
    worker: String,
    entries: Mutex<Vec<ErrorEntry>>,
}

impl ErrorLog {
    pub fn new(worker: impl Into<String>) -> Self {
        Self {
            worker: worker.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn append(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(worker = %self.worker, %message, "worker error recorded");
        self.entries
            .lock()
            .expect("error log mutex poisoned")
            .push(ErrorEntry {
                at: SystemTime::now(),
                message,
            });
    }

    pub fn last(&self) -> Option<ErrorEntry> {
        self.entries
            .lock()
            .expect("error log mutex poisoned")
            .last()
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("error log mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct WorkerContext {
    pub pool: PoolSnapshot,
    pub worker: WorkerSnapshot,
    pub machine: LifecycleMachine,
    pub tx_queue: Arc<TxDispatchQueue>,
    pub runtime: Arc<WorkerRuntime>,
    pub errors: Arc<ErrorLog>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("pool", &self.pool.pid())
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}

impl WorkerContext {
    pub fn last_error(&self) -> Option<ErrorEntry> {
        self.errors.last()
    }
}

struct WorkerEffects {
    runtime: Arc<WorkerRuntime>,
    refresh_interval: Duration,
}

impl LifecycleEffects for WorkerEffects {
    fn attach(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.runtime.start(self.refresh_interval).await?;
            Ok(())
        })
    }

    fn teardown(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.runtime.shutdown().await;
            Ok(())
        })
    }
}

/// Validates the worker, snapshots its pool with a forced reload, binds the
/// per-worker tx queue to the pool topic, and starts the lifecycle machine.
/// A stake below the configured minimum fails before anything is started.
pub async fn create_worker_context(worker: &Worker, app: &AppContext) -> Result<Arc<WorkerContext>> {
    let minimum = app.config.min_stake();
    if worker.stake < minimum {
        return Err(ValidationError::StakeBelowMinimum {
            stake: worker.stake,
            minimum,
        }
        .into());
    }

    let pool = app.pool_cache.get(worker.pid, true).await?;
    let tx_queue = TxDispatchQueue::new(app.job_queue.clone(), pool_topic(worker.pid));
    let runtime = WorkerRuntime::new(app.runtime_client.clone(), worker.endpoint.clone());
    let errors = Arc::new(ErrorLog::new(worker.name.clone()));

    let effects = Arc::new(WorkerEffects {
        runtime: runtime.clone(),
        refresh_interval: app.config.runtime_update_interval(),
    });
    let sink = errors.clone();
    let machine = LifecycleMachine::spawn(
        effects,
        Arc::new(move |err| sink.append(format!("{err:#}"))),
    );

    tracing::info!(
        worker = %worker.name,
        pid = worker.pid,
        endpoint = %worker.endpoint,
        "worker context created"
    );
    machine.should_start();

    Ok(Arc::new(WorkerContext {
        pool,
        worker: WorkerSnapshot::from(worker),
        machine,
        tx_queue,
        runtime,
        errors,
    }))
}

/// Tears a context down: clears not-yet-dispatched queue entries, kicks the
/// machine and waits for it to stop, releases the runtime, and shuts the
/// local queue. Every step runs even when an earlier one already did its
/// work, so calling this twice is safe.
pub async fn destroy_worker_context(ctx: &WorkerContext) {
    ctx.tx_queue.clear();
    ctx.machine.kick_and_wait().await;
    ctx.runtime.shutdown().await;
    ctx.tx_queue.shutdown().await;
    tracing::info!(
        worker = %ctx.worker.name,
        pid = ctx.worker.pid,
        "worker context destroyed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PoolOwner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn validation_error_names_the_minimum() {
        let err = ValidationError::StakeBelowMinimum {
            stake: 5,
            minimum: 1_000_000_000_000,
        };
        let rendered = format!("{err}");
        assert!(rendered.contains("1000000000000"));
        assert!(rendered.contains("minimum"));
    }

    #[test]
    fn error_log_keeps_history_and_last() {
        let log = ErrorLog::new("worker-a");
        assert!(log.is_empty());
        assert!(log.last().is_none());

        log.append("attach failed");
        log.append("dispatch rejected");

        assert_eq!(log.len(), 2);
        assert_eq!(log.last().unwrap().message, "dispatch rejected");
    }

    struct CountingPools {
        loads: AtomicUsize,
    }

    impl PoolRegistry for CountingPools {
        fn get_by_pid(&self, pid: u64) -> BoxFuture<'_, Result<Option<Pool>>> {
            Box::pin(async move {
                self.loads.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Pool {
                    uuid: Uuid::new_v4(),
                    pid,
                    name: format!("pool-{pid}"),
                    owner: PoolOwner {
                        address: "5owner".to_owned(),
                        relay_address: "relay".to_owned(),
                        key_material: "seed".to_owned(),
                    },
                    enabled: true,
                }))
            })
        }

        fn create(&self, _pools: Vec<Pool>) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn update(&self, _pools: Vec<Pool>) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct StaticResolver;

    struct StaticSigner;

    impl Signer for StaticSigner {
        fn address(&self) -> &str {
            "5owner"
        }

        fn sign(&self, payload: &[u8]) -> Vec<u8> {
            payload.to_vec()
        }
    }

    impl SignerResolver for StaticResolver {
        fn resolve(&self, _owner: &PoolOwner) -> Result<Arc<dyn Signer>> {
            Ok(Arc::new(StaticSigner))
        }
    }

    #[tokio::test]
    async fn pool_cache_honours_force_reload() {
        let pools = Arc::new(CountingPools {
            loads: AtomicUsize::new(0),
        });
        let cache = PoolCache::new(pools.clone(), Arc::new(StaticResolver));

        cache.get(1, false).await.unwrap();
        cache.get(1, false).await.unwrap();
        assert_eq!(pools.loads.load(Ordering::SeqCst), 1, "second read is cached");

        cache.get(1, true).await.unwrap();
        assert_eq!(pools.loads.load(Ordering::SeqCst), 2, "force reload hits the registry");
    }

    #[tokio::test]
    async fn unknown_pool_is_an_error() {
        struct EmptyPools;
        impl PoolRegistry for EmptyPools {
            fn get_by_pid(&self, _pid: u64) -> BoxFuture<'_, Result<Option<Pool>>> {
                Box::pin(async { Ok(None) })
            }
            fn create(&self, _pools: Vec<Pool>) -> BoxFuture<'_, Result<()>> {
                Box::pin(async { Ok(()) })
            }
            fn update(&self, _pools: Vec<Pool>) -> BoxFuture<'_, Result<()>> {
                Box::pin(async { Ok(()) })
            }
        }

        let cache = PoolCache::new(Arc::new(EmptyPools), Arc::new(StaticResolver));
        let err = cache.get(9, true).await.unwrap_err();
        assert!(format!("{err}").contains("pool 9 not found"));
    }
}
