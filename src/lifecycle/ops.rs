//! Mining start/stop requests. These are dispatch operations, not state
//! machine transitions: they push a signed request through the worker's tx
//! queue and resolve with the durable queue's verdict.

use crate::dispatch::tx_queue::DispatchError;
use crate::lifecycle::context::WorkerContext;
use serde_json::{json, Value};

pub const START_MINING: &str = "START_MINING";
pub const STOP_MINING: &str = "STOP_MINING";

fn runtime_public_key(ctx: &WorkerContext) -> Result<String, DispatchError> {
    ctx.runtime.public_key().ok_or_else(|| {
        DispatchError::Failed(anyhow::anyhow!(
            "worker {} runtime has not reported a public key yet",
            ctx.worker.name
        ))
    })
}

/// Submits the request and records a terminal verdict in the worker's error
/// log. A cleared entry is an orderly teardown, not a worker error.
async fn dispatch_recorded(
    ctx: &WorkerContext,
    action: &str,
    data: Value,
) -> Result<Value, DispatchError> {
    match ctx.tx_queue.dispatch(action, data).await {
        Ok(value) => Ok(value),
        Err(err) => {
            if matches!(err, DispatchError::Failed(_)) {
                ctx.errors.append(format!("{action} request failed: {err}"));
            }
            Err(err)
        }
    }
}

pub async fn start_mining(ctx: &WorkerContext) -> Result<Value, DispatchError> {
    let public_key = runtime_public_key(ctx)?;
    tracing::info!(
        worker = %ctx.worker.name,
        pid = ctx.worker.pid,
        stake = %ctx.worker.stake,
        "requesting mining start"
    );
    dispatch_recorded(
        ctx,
        START_MINING,
        json!({
            "pid": ctx.worker.pid,
            "public_key": public_key,
            "stake": ctx.worker.stake.to_string(),
        }),
    )
    .await
}

pub async fn stop_mining(ctx: &WorkerContext) -> Result<Value, DispatchError> {
    let public_key = runtime_public_key(ctx)?;
    tracing::info!(
        worker = %ctx.worker.name,
        pid = ctx.worker.pid,
        "requesting mining stop"
    );
    dispatch_recorded(
        ctx,
        STOP_MINING,
        json!({
            "pid": ctx.worker.pid,
            "public_key": public_key,
        }),
    )
    .await
}
