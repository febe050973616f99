//! Shared fixtures for the integration tests: a scriptable chain, in-memory
//! stores and registries, and helpers to assemble an application context.
#![allow(dead_code)]

pub mod mock_chain;
pub mod stores;

use poolkeeper::{
    AppContext, AppContextParams, InMemoryJobStore, OperatorConfig, Pool, PoolOwner, Worker,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use mock_chain::MockChain;
pub use stores::{
    FlakyRuntimeClient, MemoryBlockCache, MemoryCheckpointStore, MemoryPoolRegistry,
    MemoryWorkerRegistry, StaticRuntimeClient, TestSignerResolver,
};

pub const TEST_MIN_STAKE: u128 = 1_000_000_000_000;

pub fn sample_pool(pid: u64) -> Pool {
    Pool {
        uuid: Uuid::new_v4(),
        pid,
        name: format!("pool-{pid}"),
        owner: PoolOwner {
            address: format!("5Pool{pid}Owner"),
            relay_address: format!("relay-{pid}-owner"),
            key_material: format!("seed-{pid}"),
        },
        enabled: true,
    }
}

pub fn sample_worker(pid: u64, name: &str, stake: u128) -> Worker {
    Worker {
        uuid: Uuid::new_v4(),
        name: name.to_owned(),
        endpoint: format!("http://{name}:8000"),
        pid,
        stake,
        enabled: true,
    }
}

pub struct TestApp {
    pub app: Arc<AppContext>,
    pub pools: Arc<MemoryPoolRegistry>,
    pub workers: Arc<MemoryWorkerRegistry>,
    pub job_store: Arc<InMemoryJobStore>,
}

/// Builds an [`AppContext`] over in-memory collaborators, with short retry
/// intervals so tests settle quickly.
pub fn test_app(config: OperatorConfig) -> TestApp {
    test_app_with_runtime(config, Arc::new(StaticRuntimeClient))
}

pub fn test_app_with_runtime(
    config: OperatorConfig,
    runtime_client: Arc<dyn poolkeeper::RuntimeClient>,
) -> TestApp {
    let pools = Arc::new(MemoryPoolRegistry::default());
    let workers = Arc::new(MemoryWorkerRegistry::default());
    let job_store = Arc::new(InMemoryJobStore::new());

    let app = AppContext::new(AppContextParams {
        config,
        pools: pools.clone(),
        workers: workers.clone(),
        signer_resolver: Arc::new(TestSignerResolver),
        runtime_client,
        job_store: job_store.clone(),
    });

    TestApp {
        app,
        pools,
        workers,
        job_store,
    }
}

pub fn quick_config(chain: &str) -> OperatorConfig {
    OperatorConfig::builder()
        .chain_name(chain)
        .chain_fetch_spacing(Duration::ZERO)
        .job_retry_backoff(Duration::from_millis(5))
        .runtime_update_interval(Duration::from_secs(60))
        .build()
        .expect("test config should be valid")
}

/// Polls `condition` until it holds or the timeout elapses.
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting until {what}"));
}
