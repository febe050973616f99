//! Block synchronization engine: bulk backfill from the last checkpoint,
//! then live tail-following of finalized headers. Every fetched block is
//! persisted exactly once; duplicate inserts from concurrent fetches are
//! treated as success.

use crate::chain::client::{ChainClient, HeaderStream};
use crate::chain::types::{StorageKey, GRANDPA_AUTHORITIES_KEY};
use crate::runtime::config::OperatorConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::Telemetry;
use crate::sync::cache::{BlockCache, BlockRecord};
use crate::sync::checkpoint::{self, CheckpointStore};
use crate::sync::gates::ConcurrencyGates;
use crate::sync::machine::{transition, SyncEffect, SyncEvent, SyncState};
use anyhow::{bail, Context, Result};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Dependencies and tuning for a [`BlockSyncEngine`].
pub struct SyncEngineParams {
    pub chain_name: String,
    pub chain: Arc<dyn ChainClient>,
    pub cache: Arc<dyn BlockCache>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub telemetry: Arc<Telemetry>,
    pub fatal: FatalErrorHandler,
    pub config: OperatorConfig,
    pub shutdown: CancellationToken,
}

/// Everything a fetch task needs, shared across backfill and live mode.
pub(crate) struct SyncShared {
    pub(crate) chain_name: String,
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) cache: Arc<dyn BlockCache>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) gates: ConcurrencyGates,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) events_key: StorageKey,
    pub(crate) fetch_max_retries: Option<usize>,
    pub(crate) fetch_retry_backoff: Duration,
    pub(crate) cancel: CancellationToken,
}

enum FetchOutcome {
    CacheHit,
    Fetched,
    AlreadyPresent,
    Cancelled,
}

pub struct BlockSyncEngine {
    chain_name: String,
    chain: Arc<dyn ChainClient>,
    cache: Arc<dyn BlockCache>,
    checkpoints: Arc<dyn CheckpointStore>,
    telemetry: Arc<Telemetry>,
    fatal: FatalErrorHandler,
    config: OperatorConfig,
    shutdown: CancellationToken,
    state_tx: watch::Sender<SyncState>,
    head_handle: Option<JoinHandle<()>>,
    running: bool,
}

impl BlockSyncEngine {
    pub fn new(params: SyncEngineParams) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            chain_name: params.chain_name,
            chain: params.chain,
            cache: params.cache,
            checkpoints: params.checkpoints,
            telemetry: params.telemetry,
            fatal: params.fatal,
            config: params.config,
            shutdown: params.shutdown,
            state_tx,
            head_handle: None,
            running: false,
        }
    }

    /// Observes sync state transitions. Starts at [`SyncState::Idle`].
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    /// Subscribes to finalized headers and begins driving the sync machine.
    /// The first header arms the backfill; every header, first included,
    /// triggers an independent live fetch of its block.
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            bail!("sync engine already running");
        }

        let events_key = self
            .chain
            .events_storage_key()
            .await
            .context("failed to resolve events storage key")?;

        let stream = self
            .chain
            .subscribe_finalized_heads()
            .await
            .context("failed to subscribe finalized heads")?;

        tracing::info!(
            chain = %self.chain_name,
            events_key = %events_key,
            "starting block sync engine"
        );

        let shared = Arc::new(SyncShared {
            chain_name: self.chain_name.clone(),
            chain: self.chain.clone(),
            cache: self.cache.clone(),
            checkpoints: self.checkpoints.clone(),
            gates: ConcurrencyGates::from_config(&self.config),
            telemetry: self.telemetry.clone(),
            events_key,
            fetch_max_retries: self.config.fetch_max_retries(),
            fetch_retry_backoff: self.config.fetch_retry_backoff(),
            cancel: self.shutdown.child_token(),
        });

        let handle = tokio::spawn(run_head_loop(
            shared,
            stream,
            self.state_tx.clone(),
            self.fatal.clone(),
            self.config.backfill_concurrency(),
        ));

        self.head_handle = Some(handle);
        self.running = true;
        Ok(())
    }

    /// Stops the engine and waits for the head loop to wind down.
    pub async fn stop(&mut self) {
        if !self.running {
            return;
        }

        self.shutdown.cancel();
        if let Some(handle) = self.head_handle.take() {
            if let Err(err) = handle.await {
                tracing::warn!(
                    chain = %self.chain_name,
                    error = %err,
                    "sync head loop terminated unexpectedly"
                );
            }
        }
        self.running = false;
    }
}

async fn run_head_loop(
    shared: Arc<SyncShared>,
    mut stream: HeaderStream,
    state_tx: watch::Sender<SyncState>,
    fatal: FatalErrorHandler,
    backfill_concurrency: usize,
) {
    let (machine_tx, mut machine_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let mut state = SyncState::Idle;
    let mut backfill_handle: Option<JoinHandle<()>> = None;

    loop {
        let event = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            event = machine_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
            item = stream.next() => match item {
                Some(Ok(header)) => {
                    shared.telemetry.record_live_header();
                    spawn_live_fetch(&shared, header.number);
                    SyncEvent::HeaderFinalized { number: header.number }
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        chain = %shared.chain_name,
                        error = %err,
                        "finalized header notification failed; waiting for next"
                    );
                    continue;
                }
                None => {
                    match resubscribe(&shared).await {
                        Some(next) => {
                            stream = next;
                            continue;
                        }
                        None => break,
                    }
                }
            },
        };

        let (next_state, effect) = transition(state, event);
        if next_state != state {
            tracing::info!(
                chain = %shared.chain_name,
                from = ?state,
                to = ?next_state,
                "sync state changed"
            );
            state = next_state;
            let _ = state_tx.send(state);
        }

        match effect {
            Some(SyncEffect::StartBackfill { target }) => {
                let shared = shared.clone();
                let machine_tx = machine_tx.clone();
                backfill_handle = Some(tokio::spawn(async move {
                    match run_backfill(&shared, target, backfill_concurrency).await {
                        Ok(true) => {
                            let _ = machine_tx.send(SyncEvent::BackfillSucceeded);
                        }
                        Ok(false) => {} // cancelled mid-flight, checkpoint untouched
                        Err(err) => {
                            tracing::error!(
                                chain = %shared.chain_name,
                                error = %format!("{err:#}"),
                                "backfill failed"
                            );
                            let _ = machine_tx.send(SyncEvent::BackfillFailed);
                        }
                    }
                }));
            }
            Some(SyncEffect::Fatal) => {
                fatal.trigger(
                    "block backfill",
                    anyhow::anyhow!("backfill failed; verified checkpoint cannot be trusted"),
                );
                break;
            }
            None => {}
        }
    }

    if let Some(handle) = backfill_handle {
        handle.abort();
        let _ = handle.await;
    }

    tracing::info!(chain = %shared.chain_name, "sync head loop stopped");
}

async fn resubscribe(shared: &Arc<SyncShared>) -> Option<HeaderStream> {
    tracing::warn!(
        chain = %shared.chain_name,
        "finalized header stream ended; resubscribing"
    );

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => return None,
            result = shared.chain.subscribe_finalized_heads() => match result {
                Ok(stream) => return Some(stream),
                Err(err) => {
                    tracing::warn!(
                        chain = %shared.chain_name,
                        error = %format!("{err:#}"),
                        "resubscribe failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
        }
    }
}

fn spawn_live_fetch(shared: &Arc<SyncShared>, number: u64) {
    let shared = shared.clone();
    tokio::spawn(async move {
        if let Err(err) = fetch_and_cache_block(&shared, number).await {
            tracing::error!(
                chain = %shared.chain_name,
                number,
                error = %format!("{err:#}"),
                "live block fetch gave up"
            );
        }
    });
}

/// Drains `[checkpoint, target)` through the gates, then advances the
/// checkpoint. Returns `Ok(false)` when cancelled before completion.
async fn run_backfill(
    shared: &Arc<SyncShared>,
    target: u64,
    concurrency: usize,
) -> Result<bool> {
    checkpoint::write_events_storage_key(
        shared.checkpoints.as_ref(),
        &shared.chain_name,
        &shared.events_key.to_hex(),
    )
    .await
    .context("failed to persist events storage key")?;

    let from = checkpoint::read_verified_height(shared.checkpoints.as_ref(), &shared.chain_name)
        .await
        .context("failed to read verified height")?;

    tracing::info!(
        chain = %shared.chain_name,
        from,
        target,
        "backfilling old blocks"
    );

    futures::stream::iter(from..target)
        .map(Ok)
        .try_for_each_concurrent(concurrency.max(1), |number| {
            let shared = shared.clone();
            async move { fetch_and_cache_block(&shared, number).await }
        })
        .await?;

    if shared.cancel.is_cancelled() {
        return Ok(false);
    }

    let verified =
        checkpoint::write_verified_height(shared.checkpoints.as_ref(), &shared.chain_name, target)
            .await
            .context("failed to persist verified height")?;

    tracing::info!(
        chain = %shared.chain_name,
        verified_height = verified,
        "old blocks synched"
    );
    Ok(true)
}

/// Fetches one block into the cache, consulting the cache first. Transient
/// failures are retried, by default unboundedly with no backoff; a duplicate
/// insert is success. Returns early without error when cancelled.
pub(crate) async fn fetch_and_cache_block(shared: &Arc<SyncShared>, number: u64) -> Result<()> {
    let mut attempt = 0usize;
    loop {
        if shared.cancel.is_cancelled() {
            return Ok(());
        }

        match fetch_once(shared, number).await {
            Ok(FetchOutcome::CacheHit) => {
                shared.telemetry.record_cache_hit();
                tracing::info!(chain = %shared.chain_name, number, "block found in cache");
                return Ok(());
            }
            Ok(FetchOutcome::Fetched) => {
                shared.telemetry.record_block_cached();
                tracing::info!(chain = %shared.chain_name, number, "fetched block");
                return Ok(());
            }
            Ok(FetchOutcome::AlreadyPresent) => {
                shared.telemetry.record_duplicate_insert();
                tracing::info!(
                    chain = %shared.chain_name,
                    number,
                    "block already present; concurrent fetch won the insert"
                );
                return Ok(());
            }
            Ok(FetchOutcome::Cancelled) => return Ok(()),
            Err(err) => {
                attempt += 1;
                shared.telemetry.record_fetch_retry();
                tracing::warn!(
                    chain = %shared.chain_name,
                    number,
                    attempt,
                    error = %format!("{err:#}"),
                    "fetch-and-cache failed; retrying"
                );

                if let Some(max) = shared.fetch_max_retries {
                    if attempt >= max {
                        return Err(err)
                            .with_context(|| format!("block #{number} exhausted {max} retries"));
                    }
                }

                if !shared.fetch_retry_backoff.is_zero() {
                    tokio::select! {
                        _ = shared.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(shared.fetch_retry_backoff) => {}
                    }
                }
            }
        }
    }
}

async fn fetch_once(shared: &Arc<SyncShared>, number: u64) -> Result<FetchOutcome> {
    {
        let _read = shared.gates.cache_read.admit().await;
        if shared.cache.get(number).await?.is_some() {
            return Ok(FetchOutcome::CacheHit);
        }
    }

    if shared.cancel.is_cancelled() {
        return Ok(FetchOutcome::Cancelled);
    }

    let authorities_key = StorageKey(GRANDPA_AUTHORITIES_KEY.to_vec());
    let record = {
        let _fetch = shared.gates.chain_fetch.admit().await;

        // One hash resolution, then every read against that same hash so the
        // record is a consistent view of a single block.
        let hash = shared.chain.block_hash(number).await?;
        let (parts, events, events_proof, authorities, authorities_proof) = tokio::try_join!(
            shared.chain.block_parts(hash),
            shared.chain.storage(&shared.events_key, hash),
            shared.chain.read_proof(&shared.events_key, hash),
            shared.chain.storage(&authorities_key, hash),
            shared.chain.read_proof(&authorities_key, hash),
        )?;

        BlockRecord {
            number,
            hash,
            header: parts.header,
            justification: parts.justification,
            events,
            events_storage_proof: events_proof,
            grandpa_authorities: authorities,
            grandpa_authorities_storage_proof: authorities_proof,
        }
    };

    let _write = shared.gates.cache_write.admit().await;
    match shared.cache.insert(&record).await {
        Ok(()) => Ok(FetchOutcome::Fetched),
        Err(err) if err.is_already_exists() => Ok(FetchOutcome::AlreadyPresent),
        Err(err) => Err(anyhow::Error::new(err)),
    }
}
