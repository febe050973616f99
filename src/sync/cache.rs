//! Persisted block mirror. The store itself is an external collaborator;
//! this module fixes the record shape and the error contract the sync engine
//! relies on for idempotence.

use crate::chain::types::{BlockHash, StorageProof};
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;

/// One fully fetched block, immutable once written. All storage values carry
/// their read proofs so they can later be verified against the header's
/// state root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: BlockHash,
    pub header: Vec<u8>,
    pub justification: Vec<u8>,
    pub events: Vec<u8>,
    pub events_storage_proof: StorageProof,
    pub grandpa_authorities: Vec<u8>,
    pub grandpa_authorities_storage_proof: StorageProof,
}

/// Insert failures the engine must distinguish. A duplicate key means a
/// concurrent fetch already persisted the same number; the write is a no-op
/// success for the caller, never a retryable error.
#[derive(Debug)]
pub enum CacheError {
    AlreadyExists { number: u64 },
    Store(anyhow::Error),
}

impl CacheError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, CacheError::AlreadyExists { .. })
    }
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::AlreadyExists { number } => {
                write!(f, "block #{number} is already cached")
            }
            CacheError::Store(err) => write!(f, "block cache store error: {err}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::AlreadyExists { .. } => None,
            CacheError::Store(err) => Some(err.as_ref()),
        }
    }
}

/// Durable key-value store of [`BlockRecord`]s keyed by number.
pub trait BlockCache: Send + Sync + 'static {
    fn get(&self, number: u64) -> BoxFuture<'_, Result<Option<BlockRecord>>>;

    /// Append-only insert; must reject an existing number with
    /// [`CacheError::AlreadyExists`] rather than overwrite.
    fn insert<'a>(&'a self, record: &'a BlockRecord) -> BoxFuture<'a, Result<(), CacheError>>;
}
