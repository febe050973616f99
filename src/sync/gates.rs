//! Bounded admission gates shaping load across the sync pipeline. A gate is
//! a semaphore, optionally with a minimum spacing between admissions; it
//! limits in-flight work, it does not own threads.

use crate::runtime::config::OperatorConfig;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Instant};

pub struct Gate {
    permits: Semaphore,
    spacing: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl Gate {
    pub fn new(concurrency: usize) -> Self {
        Self::build(concurrency, None)
    }

    /// A gate that additionally enforces a minimum interval between
    /// admissions, for resources that are rate-limited and not just
    /// concurrency-limited.
    pub fn with_spacing(concurrency: usize, spacing: Duration) -> Self {
        let spacing = (!spacing.is_zero()).then_some(spacing);
        Self::build(concurrency, spacing)
    }

    fn build(concurrency: usize, spacing: Option<Duration>) -> Self {
        Self {
            permits: Semaphore::new(concurrency.max(1)),
            spacing,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits for a permit, honouring the inter-admission spacing if one is
    /// configured. The returned guard releases the slot on drop.
    pub async fn admit(&self) -> SemaphorePermit<'_> {
        let permit = self
            .permits
            .acquire()
            .await
            .expect("gate semaphore closed");

        if let Some(spacing) = self.spacing {
            let slot = {
                let mut next_slot = self.next_slot.lock().await;
                let slot = (*next_slot).max(Instant::now());
                *next_slot = slot + spacing;
                slot
            };
            sleep_until(slot).await;
        }

        permit
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// The three independent gates of the sync pipeline: cache reads are cheap
/// and wide, cache writes are throttled to protect the store, and chain
/// fetches are the scarce rate-limited resource.
pub struct ConcurrencyGates {
    pub cache_read: Gate,
    pub cache_write: Gate,
    pub chain_fetch: Gate,
}

impl ConcurrencyGates {
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            cache_read: Gate::new(config.cache_read_concurrency()),
            cache_write: Gate::new(config.cache_write_concurrency()),
            chain_fetch: Gate::with_spacing(
                config.chain_fetch_concurrency(),
                config.chain_fetch_spacing(),
            ),
        }
    }
}
