//! Pool/worker entities and the external CRUD stores they live in. The
//! registries are supplied to the core, not built by it; only the traits and
//! record shapes are fixed here.

use anyhow::Result;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Opaque signing capability bound to a pool owner. The concrete scheme is
/// outside this crate; the dispatch layer only needs an address and a way to
/// sign a payload.
pub trait Signer: Send + Sync + 'static {
    fn address(&self) -> &str;
    fn sign(&self, payload: &[u8]) -> Vec<u8>;
}

/// Resolves stored owner key material into a usable [`Signer`].
pub trait SignerResolver: Send + Sync + 'static {
    fn resolve(&self, owner: &PoolOwner) -> Result<std::sync::Arc<dyn Signer>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOwner {
    /// Owner address in the chain's native format.
    pub address: String,
    /// The same key rendered in the relay chain's address format.
    pub relay_address: String,
    /// Serialized key material, opaque to this crate.
    pub key_material: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub uuid: Uuid,
    pub pid: u64,
    pub name: String,
    pub owner: PoolOwner,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub uuid: Uuid,
    pub name: String,
    pub endpoint: String,
    pub pid: u64,
    /// Stake in minimum chain units.
    pub stake: u128,
    pub enabled: bool,
}

pub trait PoolRegistry: Send + Sync + 'static {
    fn get_by_pid(&self, pid: u64) -> BoxFuture<'_, Result<Option<Pool>>>;
    fn create(&self, pools: Vec<Pool>) -> BoxFuture<'_, Result<()>>;
    fn update(&self, pools: Vec<Pool>) -> BoxFuture<'_, Result<()>>;
}

pub trait WorkerRegistry: Send + Sync + 'static {
    fn get_by_uuid(&self, uuid: Uuid) -> BoxFuture<'_, Result<Option<Worker>>>;
    fn list_by_pid(&self, pid: u64) -> BoxFuture<'_, Result<Vec<Worker>>>;
    fn create(&self, workers: Vec<Worker>) -> BoxFuture<'_, Result<()>>;
    fn update(&self, workers: Vec<Worker>) -> BoxFuture<'_, Result<()>>;
}
