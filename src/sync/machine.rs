//! Pure state machine for the sync engine. Transitions carry no I/O; the
//! engine driver performs the returned effect and feeds the resulting event
//! back in, which keeps the transition table testable in isolation.

/// Sync engine phases. `Synched` and `Error` are absorbing: live per-header
/// fetches continue independently of this machine once backfill has settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    BackfillingOldBlocks { target: u64 },
    Synched,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    HeaderFinalized { number: u64 },
    BackfillSucceeded,
    BackfillFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEffect {
    /// Launch the bulk backfill task covering `[checkpoint, target)`.
    StartBackfill { target: u64 },
    /// Backfill failed; a checkpoint of unknown validity must never be
    /// trusted forward, so the process has to terminate.
    Fatal,
}

pub fn transition(state: SyncState, event: SyncEvent) -> (SyncState, Option<SyncEffect>) {
    match (state, event) {
        (SyncState::Idle, SyncEvent::HeaderFinalized { number }) => (
            SyncState::BackfillingOldBlocks { target: number },
            Some(SyncEffect::StartBackfill { target: number }),
        ),
        (SyncState::BackfillingOldBlocks { .. }, SyncEvent::BackfillSucceeded) => {
            (SyncState::Synched, None)
        }
        (SyncState::BackfillingOldBlocks { .. }, SyncEvent::BackfillFailed) => {
            (SyncState::Error, Some(SyncEffect::Fatal))
        }
        // Later headers never re-arm the backfill; absorbing states ignore
        // everything.
        (state, _) => (state, None),
    }
}
