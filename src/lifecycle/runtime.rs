//! Handle to a worker's execution runtime. Attach performs the initial info
//! fetch (the public key the mining transactions need) and starts a periodic
//! refresh task; teardown cancels the task and is safe to repeat.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeInfo {
    /// Worker public key in hex, required by mining dispatches.
    pub public_key: String,
    /// Highest block the runtime reports having processed, when known.
    pub synched_to: Option<u64>,
}

/// Transport to a worker runtime endpoint. Implementations are expected to
/// be network-faulty; callers retry at their own cadence.
pub trait RuntimeClient: Send + Sync + 'static {
    fn fetch_info<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<RuntimeInfo>>;
}

pub struct WorkerRuntime {
    endpoint: String,
    client: Arc<dyn RuntimeClient>,
    info: Mutex<Option<RuntimeInfo>>,
    cancel: CancellationToken,
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerRuntime {
    pub fn new(client: Arc<dyn RuntimeClient>, endpoint: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.into(),
            client,
            info: Mutex::new(None),
            cancel: CancellationToken::new(),
            refresh_handle: Mutex::new(None),
        })
    }

    /// Fetches the initial runtime info and starts the periodic refresh
    /// task. Fails when the runtime is unreachable, leaving nothing running.
    pub async fn start(self: &Arc<Self>, refresh_interval: Duration) -> Result<RuntimeInfo> {
        let info = self
            .client
            .fetch_info(&self.endpoint)
            .await
            .with_context(|| format!("failed to fetch runtime info from {}", self.endpoint))?;

        tracing::info!(
            endpoint = %self.endpoint,
            public_key = %info.public_key,
            "worker runtime attached"
        );
        *self.info.lock().expect("runtime info mutex poisoned") = Some(info.clone());

        let runtime = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately, info is fresh

            loop {
                tokio::select! {
                    _ = runtime.cancel.cancelled() => break,
                    _ = ticker.tick() => runtime.refresh().await,
                }
            }
        });
        *self
            .refresh_handle
            .lock()
            .expect("runtime handle mutex poisoned") = Some(handle);

        Ok(info)
    }

    async fn refresh(&self) {
        match self.client.fetch_info(&self.endpoint).await {
            Ok(info) => {
                *self.info.lock().expect("runtime info mutex poisoned") = Some(info);
            }
            Err(err) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    error = %format!("{err:#}"),
                    "runtime info refresh failed; keeping last known info"
                );
            }
        }
    }

    pub fn info(&self) -> Option<RuntimeInfo> {
        self.info.lock().expect("runtime info mutex poisoned").clone()
    }

    pub fn public_key(&self) -> Option<String> {
        self.info().map(|info| info.public_key)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stops the refresh task. Safe to call repeatedly or before `start`.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self
            .refresh_handle
            .lock()
            .expect("runtime handle mutex poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
