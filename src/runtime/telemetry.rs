use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters used to derive runtime metrics.
#[derive(Default, Debug)]
pub struct Telemetry {
    live_headers: AtomicU64,
    cache_hits: AtomicU64,
    blocks_cached: AtomicU64,
    duplicate_inserts: AtomicU64,
    fetch_retries: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
}

impl Telemetry {
    pub fn record_live_header(&self) {
        self.live_headers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_cached(&self) {
        self.blocks_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_insert(&self) {
        self.duplicate_inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_retry(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn blocks_cached(&self) -> u64 {
        self.blocks_cached.load(Ordering::Relaxed)
    }

    pub fn fetch_retries(&self) -> u64 {
        self.fetch_retries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            live_headers: self.live_headers.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            blocks_cached: self.blocks_cached.load(Ordering::Relaxed),
            duplicate_inserts: self.duplicate_inserts.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct TelemetrySnapshot {
    pub live_headers: u64,
    pub cache_hits: u64,
    pub blocks_cached: u64,
    pub duplicate_inserts: u64,
    pub fetch_retries: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
}

/// Spawns a background task that periodically logs sync throughput and job
/// outcomes.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "poolkeeper::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let cached_delta = current_snapshot
                        .blocks_cached
                        .saturating_sub(last_snapshot.blocks_cached);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        cached_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "poolkeeper::metrics",
                        throughput = format!("{throughput:.2}"),
                        blocks_cached = current_snapshot.blocks_cached,
                        cache_hits = current_snapshot.cache_hits,
                        duplicate_inserts = current_snapshot.duplicate_inserts,
                        fetch_retries = current_snapshot.fetch_retries,
                        live_headers = current_snapshot.live_headers,
                        jobs_succeeded = current_snapshot.jobs_succeeded,
                        jobs_retried = current_snapshot.jobs_retried,
                        jobs_failed = current_snapshot.jobs_failed,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[test]
    fn telemetry_records_counters() {
        let telemetry = Telemetry::default();
        telemetry.record_live_header();
        telemetry.record_cache_hit();
        telemetry.record_block_cached();
        telemetry.record_block_cached();
        telemetry.record_duplicate_insert();
        telemetry.record_fetch_retry();
        telemetry.record_job_succeeded();
        telemetry.record_job_retry();
        telemetry.record_job_failed();

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.live_headers, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.blocks_cached, 2);
        assert_eq!(snapshot.duplicate_inserts, 1);
        assert_eq!(snapshot.fetch_retries, 1);
        assert_eq!(snapshot.jobs_succeeded, 1);
        assert_eq!(snapshot.jobs_retried, 1);
        assert_eq!(snapshot.jobs_failed, 1);
    }

    #[tokio::test]
    async fn metrics_reporter_logs_until_shutdown() {
        let telemetry = Arc::new(Telemetry::default());
        telemetry.record_block_cached();

        let shutdown = CancellationToken::new();
        let handle = spawn_metrics_reporter(telemetry, shutdown.clone(), Duration::from_millis(10));

        shutdown.cancel();
        timeout(Duration::from_secs(1), handle)
            .await
            .expect("reporter should stop promptly")
            .expect("task should not panic");
    }
}
