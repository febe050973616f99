//! Worker lifecycle state machine. The transition function is pure; a small
//! driver performs the effects (attach, teardown) and feeds the resulting
//! events back in, so the transition logic is testable without I/O.

use anyhow::Result;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Attaching,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Stopped | WorkerState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEvent {
    ShouldStart,
    AttachSucceeded,
    AttachFailed,
    ShouldKick,
    TeardownFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerEffect {
    Attach,
    Teardown,
}

/// Pure transition. `ShouldKick` forces teardown from every state except
/// `Stopped` (already torn down) and `Stopping` (teardown in flight);
/// everything else that does not match is ignored.
pub fn transition(state: WorkerState, event: WorkerEvent) -> (WorkerState, Option<WorkerEffect>) {
    use WorkerEffect::*;
    use WorkerEvent::*;
    use WorkerState::*;

    match (state, event) {
        (Init, ShouldStart) => (Attaching, Some(Attach)),
        (Attaching, AttachSucceeded) => (Running, None),
        (Attaching, AttachFailed) => (Failed, None),
        (Init | Attaching | Running | Failed, ShouldKick) => (Stopping, Some(Teardown)),
        (Stopping, TeardownFinished) => (Stopped, None),
        (state, _) => (state, None),
    }
}

/// The side effects a lifecycle machine drives. Implementations must make
/// `teardown` run every cleanup step even when an earlier one fails.
pub trait LifecycleEffects: Send + Sync + 'static {
    fn attach(&self) -> BoxFuture<'_, Result<()>>;
    fn teardown(&self) -> BoxFuture<'_, Result<()>>;
}

type ErrorSink = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// Handle to a running lifecycle machine.
pub struct LifecycleMachine {
    events: mpsc::UnboundedSender<WorkerEvent>,
    state_rx: watch::Receiver<WorkerState>,
    handle: JoinHandle<()>,
}

impl LifecycleMachine {
    /// Starts a machine in `Init` over the given effects. Attach failures
    /// are reported to `on_error` before the machine moves to `Failed`.
    pub fn spawn(effects: Arc<dyn LifecycleEffects>, on_error: ErrorSink) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(WorkerState::Init);
        let loop_events = events.clone();
        let handle = tokio::spawn(drive(effects, on_error, loop_events, rx, state_tx));
        Self {
            events,
            state_rx,
            handle,
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    pub fn should_start(&self) {
        let _ = self.events.send(WorkerEvent::ShouldStart);
    }

    /// Forces teardown and waits until the machine reaches `Stopped`.
    /// Returns immediately when it already has.
    pub async fn kick_and_wait(&self) {
        let _ = self.events.send(WorkerEvent::ShouldKick);
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow_and_update() == WorkerState::Stopped {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn join(self) {
        drop(self.events);
        let _ = self.handle.await;
    }
}

async fn drive(
    effects: Arc<dyn LifecycleEffects>,
    on_error: ErrorSink,
    events: mpsc::UnboundedSender<WorkerEvent>,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    state_tx: watch::Sender<WorkerState>,
) {
    let mut state = WorkerState::Init;

    while let Some(event) = rx.recv().await {
        let (next_state, effect) = transition(state, event);
        if next_state != state {
            tracing::info!(from = ?state, to = ?next_state, ?event, "worker state changed");
            state = next_state;
            let _ = state_tx.send(state);
        }

        match effect {
            Some(WorkerEffect::Attach) => match effects.attach().await {
                Ok(()) => {
                    let _ = events.send(WorkerEvent::AttachSucceeded);
                }
                Err(err) => {
                    tracing::warn!(error = %format!("{err:#}"), "worker attach failed");
                    on_error(err);
                    let _ = events.send(WorkerEvent::AttachFailed);
                }
            },
            Some(WorkerEffect::Teardown) => {
                if let Err(err) = effects.teardown().await {
                    tracing::warn!(error = %format!("{err:#}"), "worker teardown reported errors");
                    on_error(err);
                }
                let _ = events.send(WorkerEvent::TeardownFinished);
            }
            None => {}
        }

        if state == WorkerState::Stopped {
            break;
        }
    }
}
