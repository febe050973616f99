//! Read capability over a Substrate-style chain. The sync engine and the
//! lifecycle layer only ever talk to this trait; the concrete jsonrpsee
//! implementation lives in `chain::rpc`.

use crate::chain::types::{BlockHash, Header, SignedBlockParts, StorageKey, StorageProof};
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

/// Stream of finalized headers, monotonically increasing by height.
pub type HeaderStream = BoxStream<'static, Result<Header>>;

/// Chain read capability. Assumed network-faulty (callers retry) but not
/// Byzantine; every storage read can be paired with a proof so the value is
/// verifiable against a header's state root.
pub trait ChainClient: Send + Sync + 'static {
    /// Resolves a block number to its canonical hash.
    fn block_hash(&self, number: u64) -> BoxFuture<'_, Result<BlockHash>>;

    /// Fetches the header and justification blobs for a block hash.
    fn block_parts(&self, hash: BlockHash) -> BoxFuture<'_, Result<SignedBlockParts>>;

    /// Reads a storage value at the given block hash.
    fn storage<'a>(
        &'a self,
        key: &'a StorageKey,
        at: BlockHash,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Reads the proof for a storage key at the given block hash.
    fn read_proof<'a>(
        &'a self,
        key: &'a StorageKey,
        at: BlockHash,
    ) -> BoxFuture<'a, Result<StorageProof>>;

    /// The storage key under which the chain stores its per-block event log.
    fn events_storage_key(&self) -> BoxFuture<'_, Result<StorageKey>>;

    /// Subscribes to finalized headers.
    fn subscribe_finalized_heads(&self) -> BoxFuture<'_, Result<HeaderStream>>;
}
