//! Process-wide context built once at startup and threaded explicitly into
//! every component. There are no ambient globals besides the tracing
//! subscriber.

use crate::chain::client::ChainClient;
use crate::dispatch::queue::JobQueue;
use crate::dispatch::store::JobStore;
use crate::lifecycle::context::PoolCache;
use crate::lifecycle::runtime::RuntimeClient;
use crate::registry::{PoolRegistry, SignerResolver, WorkerRegistry};
use crate::runtime::config::OperatorConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::{self, Telemetry};
use crate::sync::cache::BlockCache;
use crate::sync::checkpoint::CheckpointStore;
use crate::sync::engine::{BlockSyncEngine, SyncEngineParams};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct AppContextParams {
    pub config: OperatorConfig,
    pub pools: Arc<dyn PoolRegistry>,
    pub workers: Arc<dyn WorkerRegistry>,
    pub signer_resolver: Arc<dyn SignerResolver>,
    pub runtime_client: Arc<dyn RuntimeClient>,
    pub job_store: Arc<dyn JobStore>,
}

pub struct AppContext {
    pub config: OperatorConfig,
    pub telemetry: Arc<Telemetry>,
    pub fatal: FatalErrorHandler,
    /// Cancelled when the whole process should stop.
    pub root_shutdown: CancellationToken,
    /// Cancelled when the current run should wind down; child of root.
    pub shutdown: CancellationToken,
    pub pools: Arc<dyn PoolRegistry>,
    pub workers: Arc<dyn WorkerRegistry>,
    pub pool_cache: PoolCache,
    pub job_queue: Arc<JobQueue>,
    pub runtime_client: Arc<dyn RuntimeClient>,
}

impl AppContext {
    pub fn new(params: AppContextParams) -> Arc<Self> {
        telemetry::init_tracing();

        let telemetry = Arc::new(Telemetry::default());
        let root_shutdown = CancellationToken::new();
        let shutdown = root_shutdown.child_token();
        let fatal = FatalErrorHandler::new(root_shutdown.clone(), shutdown.clone());

        let job_queue = JobQueue::new(
            params.job_store,
            telemetry.clone(),
            params.config.job_max_attempts(),
            params.config.job_retry_backoff(),
            shutdown.clone(),
        );
        let pool_cache = PoolCache::new(params.pools.clone(), params.signer_resolver.clone());

        Arc::new(Self {
            config: params.config,
            telemetry,
            fatal,
            root_shutdown,
            shutdown,
            pools: params.pools,
            workers: params.workers,
            pool_cache,
            job_queue,
            runtime_client: params.runtime_client,
        })
    }

    /// Builds a sync engine wired to this context's telemetry, fatal handler
    /// and shutdown tree.
    pub fn sync_engine(
        &self,
        chain: Arc<dyn ChainClient>,
        cache: Arc<dyn BlockCache>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> BlockSyncEngine {
        BlockSyncEngine::new(SyncEngineParams {
            chain_name: self.config.chain_name().to_owned(),
            chain,
            cache,
            checkpoints,
            telemetry: self.telemetry.clone(),
            fatal: self.fatal.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown.child_token(),
        })
    }

    pub fn spawn_metrics_reporter(&self) -> JoinHandle<()> {
        telemetry::spawn_metrics_reporter(
            self.telemetry.clone(),
            self.shutdown.clone(),
            self.config.metrics_interval(),
        )
    }

    /// Requests an orderly stop of everything attached to this context.
    pub fn stop(&self) {
        self.root_shutdown.cancel();
    }
}
