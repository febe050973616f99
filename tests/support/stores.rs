//! In-memory implementations of the external collaborators: block cache,
//! checkpoint store, registries, signer resolution, and worker runtimes.

use anyhow::Result;
use futures::future::BoxFuture;
use poolkeeper::{
    BlockCache, BlockRecord, CacheError, CheckpointStore, Pool, PoolOwner, PoolRegistry,
    RuntimeClient, RuntimeInfo, Signer, SignerResolver, Worker, WorkerRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryBlockCache {
    blocks: Mutex<HashMap<u64, BlockRecord>>,
}

impl MemoryBlockCache {
    pub fn len(&self) -> usize {
        self.blocks.lock().expect("cache mutex poisoned").len()
    }

    pub fn contains(&self, number: u64) -> bool {
        self.blocks
            .lock()
            .expect("cache mutex poisoned")
            .contains_key(&number)
    }
}

impl BlockCache for MemoryBlockCache {
    fn get(&self, number: u64) -> BoxFuture<'_, Result<Option<BlockRecord>>> {
        Box::pin(async move {
            Ok(self
                .blocks
                .lock()
                .expect("cache mutex poisoned")
                .get(&number)
                .cloned())
        })
    }

    fn insert<'a>(&'a self, record: &'a BlockRecord) -> BoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let mut blocks = self.blocks.lock().expect("cache mutex poisoned");
            if blocks.contains_key(&record.number) {
                return Err(CacheError::AlreadyExists {
                    number: record.number,
                });
            }
            blocks.insert(record.number, record.clone());
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCheckpointStore {
    pub fn raw(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .expect("checkpoint mutex poisoned")
            .get(key)
            .cloned()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            Ok(self
                .values
                .lock()
                .expect("checkpoint mutex poisoned")
                .get(key)
                .cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.values
                .lock()
                .expect("checkpoint mutex poisoned")
                .insert(key.to_owned(), value.to_owned());
            Ok(())
        })
    }
}

/// Pool registry that counts loads so tests can assert snapshots are
/// actually re-fetched.
#[derive(Default)]
pub struct MemoryPoolRegistry {
    pools: Mutex<HashMap<u64, Pool>>,
    loads: AtomicUsize,
}

impl MemoryPoolRegistry {
    pub fn put(&self, pool: Pool) {
        self.pools
            .lock()
            .expect("pools mutex poisoned")
            .insert(pool.pid, pool);
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl PoolRegistry for MemoryPoolRegistry {
    fn get_by_pid(&self, pid: u64) -> BoxFuture<'_, Result<Option<Pool>>> {
        Box::pin(async move {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .pools
                .lock()
                .expect("pools mutex poisoned")
                .get(&pid)
                .cloned())
        })
    }

    fn create(&self, pools: Vec<Pool>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for pool in pools {
                self.put(pool);
            }
            Ok(())
        })
    }

    fn update(&self, pools: Vec<Pool>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for pool in pools {
                self.put(pool);
            }
            Ok(())
        })
    }
}

#[derive(Default)]
pub struct MemoryWorkerRegistry {
    workers: Mutex<HashMap<Uuid, Worker>>,
}

impl MemoryWorkerRegistry {
    pub fn put(&self, worker: Worker) {
        self.workers
            .lock()
            .expect("workers mutex poisoned")
            .insert(worker.uuid, worker);
    }
}

impl WorkerRegistry for MemoryWorkerRegistry {
    fn get_by_uuid(&self, uuid: Uuid) -> BoxFuture<'_, Result<Option<Worker>>> {
        Box::pin(async move {
            Ok(self
                .workers
                .lock()
                .expect("workers mutex poisoned")
                .get(&uuid)
                .cloned())
        })
    }

    fn list_by_pid(&self, pid: u64) -> BoxFuture<'_, Result<Vec<Worker>>> {
        Box::pin(async move {
            Ok(self
                .workers
                .lock()
                .expect("workers mutex poisoned")
                .values()
                .filter(|worker| worker.pid == pid)
                .cloned()
                .collect())
        })
    }

    fn create(&self, workers: Vec<Worker>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for worker in workers {
                self.put(worker);
            }
            Ok(())
        })
    }

    fn update(&self, workers: Vec<Worker>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            for worker in workers {
                self.put(worker);
            }
            Ok(())
        })
    }
}

pub struct TestSigner {
    address: String,
}

impl Signer for TestSigner {
    fn address(&self) -> &str {
        &self.address
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut signed = self.address.as_bytes().to_vec();
        signed.extend_from_slice(payload);
        signed
    }
}

pub struct TestSignerResolver;

impl SignerResolver for TestSignerResolver {
    fn resolve(&self, owner: &PoolOwner) -> Result<Arc<dyn Signer>> {
        Ok(Arc::new(TestSigner {
            address: owner.address.clone(),
        }))
    }
}

/// Runtime client answering every endpoint with a key derived from it.
pub struct StaticRuntimeClient;

impl RuntimeClient for StaticRuntimeClient {
    fn fetch_info<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<RuntimeInfo>> {
        Box::pin(async move {
            Ok(RuntimeInfo {
                public_key: format!("0x{}", hex::encode(endpoint.as_bytes())),
                synched_to: Some(0),
            })
        })
    }
}

/// Runtime client that never answers, for attach-failure paths.
pub struct FlakyRuntimeClient;

impl RuntimeClient for FlakyRuntimeClient {
    fn fetch_info<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<RuntimeInfo>> {
        Box::pin(async move { anyhow::bail!("runtime at {endpoint} is unreachable") })
    }
}
