pub mod chain;
pub mod dispatch;
pub mod lifecycle;
pub mod registry;
pub mod runtime;
pub mod sync;

pub use chain::client::{ChainClient, HeaderStream};
pub use chain::rpc::SubstrateRpcClient;
pub use chain::types::{
    BlockHash, Header, SignedBlockParts, StorageKey, StorageProof, GRANDPA_AUTHORITIES_KEY,
};
pub use dispatch::actions::{pool_topic, ActionContext, ActionFn, ActionRegistry};
pub use dispatch::job::{Job, JobPayload, JobStatus};
pub use dispatch::queue::{JobError, JobHandler, JobQueue};
pub use dispatch::store::{InMemoryJobStore, JobStore};
pub use dispatch::tx_queue::{DispatchError, TxDispatchQueue};
pub use lifecycle::context::{
    create_worker_context, destroy_worker_context, ErrorEntry, ErrorLog, PoolCache, PoolSnapshot,
    ValidationError, WorkerContext, WorkerSnapshot,
};
pub use lifecycle::coordinator::LifecycleCoordinator;
pub use lifecycle::machine::{WorkerEffect, WorkerEvent, WorkerState};
pub use lifecycle::ops::{start_mining, stop_mining, START_MINING, STOP_MINING};
pub use lifecycle::runtime::{RuntimeClient, RuntimeInfo, WorkerRuntime};
pub use registry::{Pool, PoolOwner, PoolRegistry, Signer, SignerResolver, Worker, WorkerRegistry};
pub use runtime::config::{OperatorConfig, OperatorConfigBuilder, OperatorConfigParams};
pub use runtime::context::{AppContext, AppContextParams};
pub use runtime::fatal::FatalErrorHandler;
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use sync::cache::{BlockCache, BlockRecord, CacheError};
pub use sync::checkpoint::{CheckpointStore, INITIAL_VERIFIED_HEIGHT};
pub use sync::engine::{BlockSyncEngine, SyncEngineParams};
pub use sync::gates::{ConcurrencyGates, Gate};
pub use sync::machine::{SyncEffect, SyncEvent, SyncState};
