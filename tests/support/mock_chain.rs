//! Scriptable chain client. Tests push finalized headers and inject
//! per-block fetch failures; everything else is derived deterministically
//! from the block number.

use anyhow::Result;
use futures::future::BoxFuture;
use poolkeeper::{
    BlockHash, ChainClient, Header, HeaderStream, SignedBlockParts, StorageKey, StorageProof,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

pub struct MockChain {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Result<Header>>>>,
    part_failures: Mutex<HashMap<u64, usize>>,
    fetches: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            part_failures: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        })
    }

    /// Delivers a finalized header to every subscriber.
    pub fn emit_header(&self, number: u64) {
        let subscribers = self.subscribers.lock().expect("subscribers mutex poisoned");
        for subscriber in subscribers.iter() {
            let _ = subscriber.send(Ok(Header { number }));
        }
    }

    /// The next `times` body fetches of `number` fail with a transient error.
    pub fn fail_block_parts(&self, number: u64, times: usize) {
        self.part_failures
            .lock()
            .expect("failures mutex poisoned")
            .insert(number, times);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn hash_for(number: u64) -> BlockHash {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&number.to_le_bytes());
        bytes[31] = 0x7a;
        BlockHash(bytes)
    }

    fn number_of(hash: BlockHash) -> u64 {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

impl ChainClient for MockChain {
    fn block_hash(&self, number: u64) -> BoxFuture<'_, Result<BlockHash>> {
        Box::pin(async move { Ok(Self::hash_for(number)) })
    }

    fn block_parts(&self, hash: BlockHash) -> BoxFuture<'_, Result<SignedBlockParts>> {
        Box::pin(async move {
            // Holds the body fetch open long enough that concurrent fetches
            // of the same number both observe the cache miss.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;

            let number = Self::number_of(hash);
            {
                let mut failures = self.part_failures.lock().expect("failures mutex poisoned");
                if let Some(remaining) = failures.get_mut(&number) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        anyhow::bail!("injected body fetch failure for block #{number}");
                    }
                }
            }

            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(SignedBlockParts {
                header: number.to_le_bytes().to_vec(),
                justification: format!("just-{number}").into_bytes(),
            })
        })
    }

    fn storage<'a>(&'a self, key: &'a StorageKey, at: BlockHash) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let mut value = key.0.clone();
            value.extend_from_slice(&Self::number_of(at).to_le_bytes());
            Ok(value)
        })
    }

    fn read_proof<'a>(
        &'a self,
        key: &'a StorageKey,
        at: BlockHash,
    ) -> BoxFuture<'a, Result<StorageProof>> {
        Box::pin(async move {
            Ok(StorageProof {
                at,
                proof: vec![key.0.clone()],
            })
        })
    }

    fn events_storage_key(&self) -> BoxFuture<'_, Result<StorageKey>> {
        Box::pin(async move { Ok(StorageKey(b"system-events".to_vec())) })
    }

    fn subscribe_finalized_heads(&self) -> BoxFuture<'_, Result<HeaderStream>> {
        Box::pin(async move {
            let (tx, rx) = mpsc::unbounded_channel();
            self.subscribers
                .lock()
                .expect("subscribers mutex poisoned")
                .push(tx);

            let stream: HeaderStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            }));
            Ok(stream)
        })
    }
}
