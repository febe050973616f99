//! Chain-scoped checkpoint persistence. The backing store is a plain string
//! get/set with last-write-wins semantics; the typed helpers here keep the
//! verified height monotonic.

use anyhow::{Context, Result};
use futures::future::BoxFuture;

const VERIFIED_HEIGHT: &str = "VERIFIED_HEIGHT";
const EVENTS_STORAGE_KEY: &str = "EVENTS_STORAGE_KEY";

/// Default verified height when no checkpoint has ever been written.
pub const INITIAL_VERIFIED_HEIGHT: u64 = 1;

/// External string store, no transaction guarantees.
pub trait CheckpointStore: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>>;
}

pub fn verified_height_key(chain: &str) -> String {
    format!("{chain}:{VERIFIED_HEIGHT}")
}

pub fn events_storage_key_key(chain: &str) -> String {
    format!("{chain}:{EVENTS_STORAGE_KEY}")
}

/// Reads the verified height for `chain`, defaulting when absent. Every
/// block below the returned height is durably cached.
pub async fn read_verified_height(store: &dyn CheckpointStore, chain: &str) -> Result<u64> {
    let key = verified_height_key(chain);
    match store.get(&key).await? {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("checkpoint {key} holds a non-numeric value {raw:?}")),
        None => Ok(INITIAL_VERIFIED_HEIGHT),
    }
}

/// Persists a new verified height. The stored value never decreases, even if
/// a stale backfill pass reports a lower target.
pub async fn write_verified_height(
    store: &dyn CheckpointStore,
    chain: &str,
    height: u64,
) -> Result<u64> {
    let current = read_verified_height(store, chain).await?;
    let next = current.max(height);
    if next > current || store.get(&verified_height_key(chain)).await?.is_none() {
        store
            .set(&verified_height_key(chain), &next.to_string())
            .await?;
    }
    Ok(next)
}

pub async fn write_events_storage_key(
    store: &dyn CheckpointStore,
    chain: &str,
    key_hex: &str,
) -> Result<()> {
    store.set(&events_storage_key_key(chain), key_hex).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        values: Mutex<HashMap<String, String>>,
    }

    impl CheckpointStore for MemoryStore {
        fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
            Box::pin(async move { Ok(self.values.lock().unwrap().get(key).cloned()) })
        }

        fn set<'a>(&'a self, key: &'a str, value: &'a str) -> BoxFuture<'a, Result<()>> {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_owned(), value.to_owned());
            Box::pin(async move { Ok(()) })
        }
    }

    #[tokio::test]
    async fn missing_checkpoint_defaults() {
        let store = MemoryStore::default();
        let height = read_verified_height(&store, "khala").await.unwrap();
        assert_eq!(height, INITIAL_VERIFIED_HEIGHT);
    }

    #[tokio::test]
    async fn verified_height_round_trips() {
        let store = MemoryStore::default();
        write_verified_height(&store, "khala", 100).await.unwrap();
        assert_eq!(read_verified_height(&store, "khala").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn verified_height_never_decreases() {
        let store = MemoryStore::default();
        write_verified_height(&store, "khala", 100).await.unwrap();
        let stored = write_verified_height(&store, "khala", 40).await.unwrap();
        assert_eq!(stored, 100);
        assert_eq!(read_verified_height(&store, "khala").await.unwrap(), 100);
    }

    #[tokio::test]
    async fn keys_are_chain_scoped() {
        assert_eq!(verified_height_key("khala"), "khala:VERIFIED_HEIGHT");
        assert_eq!(
            events_storage_key_key("khala"),
            "khala:EVENTS_STORAGE_KEY"
        );
    }

    #[tokio::test]
    async fn garbage_checkpoint_is_an_error() {
        let store = MemoryStore::default();
        store
            .set(&verified_height_key("khala"), "not-a-number")
            .await
            .unwrap();
        let err = read_verified_height(&store, "khala").await.unwrap_err();
        assert!(format!("{err:#}").contains("non-numeric"));
    }
}
