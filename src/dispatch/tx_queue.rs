//! Per-worker serial wrapper over the pool's durable topic. The pool topic
//! at concurrency 1 is the real ordering authority; this local queue only
//! guarantees one worker's own submissions reach it in issue order and can
//! be cleared before they are handed to the durable queue.

use crate::dispatch::queue::JobQueue;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum DispatchError {
    /// The entry was cleared before it reached the durable queue.
    Cancelled,
    /// The durable queue resolved the job as a terminal failure.
    Failed(anyhow::Error),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Cancelled => write!(f, "dispatch cancelled before submission"),
            DispatchError::Failed(err) => write!(f, "dispatch failed: {err:#}"),
        }
    }
}

impl std::error::Error for DispatchError {}

struct PendingTx {
    action: String,
    data: Value,
    responder: oneshot::Sender<Result<Value, DispatchError>>,
}

pub struct TxDispatchQueue {
    topic: String,
    pending: Mutex<VecDeque<PendingTx>>,
    notify: Notify,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TxDispatchQueue {
    /// Binds a fresh serial queue to `topic` on the pool's shared durable
    /// queue and starts its single submission loop.
    pub fn new(queue: Arc<JobQueue>, topic: impl Into<String>) -> Arc<Self> {
        let this = Arc::new(Self {
            topic: topic.into(),
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::run(this.clone(), queue));
        *this.worker.lock().expect("tx queue mutex poisoned") = Some(handle);
        this
    }

    /// Enqueues one chain-mutating action and waits for the durable queue to
    /// resolve it. Entries from concurrent callers keep their issue order.
    pub async fn dispatch(
        &self,
        action: impl Into<String>,
        data: Value,
    ) -> Result<Value, DispatchError> {
        let (responder, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("tx queue mutex poisoned");
            pending.push_back(PendingTx {
                action: action.into(),
                data,
                responder,
            });
        }
        // notify_one stores a permit when the loop is not yet waiting, so a
        // push racing the loop's recheck is never lost.
        self.notify.notify_one();

        match rx.await {
            Ok(result) => result,
            // The queue shut down with this entry still pending.
            Err(_) => Err(DispatchError::Cancelled),
        }
    }

    /// Drops every entry that has not yet been handed to the durable queue.
    /// A job the durable queue already accepted still executes.
    pub fn clear(&self) {
        let drained: Vec<PendingTx> = {
            let mut pending = self.pending.lock().expect("tx queue mutex poisoned");
            pending.drain(..).collect()
        };
        if !drained.is_empty() {
            tracing::info!(
                topic = %self.topic,
                cleared = drained.len(),
                "cleared pending tx dispatch entries"
            );
        }
        for entry in drained {
            let _ = entry.responder.send(Err(DispatchError::Cancelled));
        }
    }

    /// Clears pending entries and stops the submission loop. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        self.clear();
        self.cancel.cancel();
        let handle = self
            .worker
            .lock()
            .expect("tx queue mutex poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().expect("tx queue mutex poisoned").len()
    }

    async fn run(this: Arc<Self>, queue: Arc<JobQueue>) {
        loop {
            let entry = {
                let mut pending = this.pending.lock().expect("tx queue mutex poisoned");
                pending.pop_front()
            };

            let entry = match entry {
                Some(entry) => entry,
                None => {
                    tokio::select! {
                        _ = this.cancel.cancelled() => break,
                        _ = this.notify.notified() => continue,
                    }
                }
            };

            let result = tokio::select! {
                _ = this.cancel.cancelled() => {
                    let _ = entry.responder.send(Err(DispatchError::Cancelled));
                    break;
                }
                result = queue.dispatch(&this.topic, &entry.action, entry.data.clone()) => result,
            };

            let _ = entry
                .responder
                .send(result.map_err(DispatchError::Failed));
        }
    }
}
