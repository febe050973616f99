//! Action table consulted by each pool's job consumer. Handlers receive a
//! freshly reloaded pool snapshot and its signing capability on every job;
//! an unknown action is a configuration error and is never retried.

use crate::dispatch::queue::{JobError, JobQueue};
use crate::registry::{Pool, Signer};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Durable-queue topic carrying every chain transaction of one pool.
pub fn pool_topic(pid: u64) -> String {
    format!("pool:{pid}:tx")
}

/// Everything an action handler may rely on. `pool` and `signer` are
/// re-resolved per job; handlers must not hold on to them across jobs.
/// `queue` and `topic` let a handler enqueue follow-up work on its own
/// pool topic; a follow-up must not be awaited inside the handler, or it
/// deadlocks on the topic's single slot.
pub struct ActionContext {
    pub data: Value,
    pub pool: Pool,
    pub signer: Arc<dyn Signer>,
    pub queue: Arc<JobQueue>,
    pub topic: String,
}

pub type ActionFn =
    Arc<dyn Fn(ActionContext) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionFn>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: impl Into<String>, handler: ActionFn) -> &mut Self {
        self.actions.insert(action.into(), handler);
        self
    }

    pub fn get(&self, action: &str) -> Option<&ActionFn> {
        self.actions.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::store::InMemoryJobStore;
    use crate::registry::PoolOwner;
    use crate::runtime::telemetry::Telemetry;
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    struct NoopSigner;

    impl Signer for NoopSigner {
        fn address(&self) -> &str {
            "5noop"
        }

        fn sign(&self, _payload: &[u8]) -> Vec<u8> {
            Vec::new()
        }
    }

    fn test_pool() -> Pool {
        Pool {
            uuid: Uuid::new_v4(),
            pid: 7,
            name: "test pool".to_owned(),
            owner: PoolOwner {
                address: "5owner".to_owned(),
                relay_address: "relay-owner".to_owned(),
                key_material: "seed".to_owned(),
            },
            enabled: true,
        }
    }

    #[test]
    fn pool_topics_are_per_pid() {
        assert_eq!(pool_topic(1), "pool:1:tx");
        assert_ne!(pool_topic(1), pool_topic(2));
    }

    #[tokio::test]
    async fn registered_action_is_invoked_with_context() {
        let mut registry = ActionRegistry::new();
        registry.register(
            "START_MINING",
            Arc::new(|ctx: ActionContext| {
                Box::pin(async move {
                    Ok(json!({ "pid": ctx.pool.pid, "data": ctx.data }))
                })
            }),
        );

        let queue = JobQueue::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(Telemetry::default()),
            3,
            Duration::ZERO,
            CancellationToken::new(),
        );
        let handler = registry.get("START_MINING").expect("registered").clone();
        let result = handler(ActionContext {
            data: json!({ "public_key": "0xabc" }),
            pool: test_pool(),
            signer: Arc::new(NoopSigner),
            queue,
            topic: pool_topic(7),
        })
        .await
        .unwrap();

        assert_eq!(result["pid"], json!(7));
        assert_eq!(result["data"]["public_key"], json!("0xabc"));
    }

    #[test]
    fn unknown_actions_are_absent() {
        let registry = ActionRegistry::new();
        assert!(registry.get("BOGUS").is_none());
        assert!(!registry.contains("BOGUS"));
    }
}
