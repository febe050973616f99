use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_MIN_STAKE_UNITS: u128 = 1_000_000_000_000;
const DEFAULT_CACHE_READ_CONCURRENCY: usize = 3000;
const DEFAULT_CACHE_WRITE_CONCURRENCY: usize = 80;
const DEFAULT_CHAIN_FETCH_CONCURRENCY: usize = 50;
const DEFAULT_CHAIN_FETCH_SPACING_MS: u64 = 100;
const DEFAULT_BACKFILL_CONCURRENCY: usize = 10_000;
const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_JOB_RETRY_BACKOFF_SECS: u64 = 1;
const DEFAULT_RUNTIME_UPDATE_INTERVAL_SECS: u64 = 10;

/// Runtime configuration for the operator.
///
/// All instances must be constructed via [`OperatorConfig::builder`] or
/// [`OperatorConfig::new`] so invariants are validated before any consumer
/// observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    chain_name: String,
    min_stake: u128,
    cache_read_concurrency: usize,
    cache_write_concurrency: usize,
    chain_fetch_concurrency: usize,
    chain_fetch_spacing: Duration,
    backfill_concurrency: usize,
    fetch_max_retries: Option<usize>,
    fetch_retry_backoff: Duration,
    job_max_attempts: u32,
    job_retry_backoff: Duration,
    runtime_update_interval: Duration,
    metrics_interval: Duration,
}

pub struct OperatorConfigParams {
    pub chain_name: String,
    pub min_stake: u128,
    pub cache_read_concurrency: usize,
    pub cache_write_concurrency: usize,
    pub chain_fetch_concurrency: usize,
    pub chain_fetch_spacing: Duration,
    pub backfill_concurrency: usize,
    pub fetch_max_retries: Option<usize>,
    pub fetch_retry_backoff: Duration,
    pub job_max_attempts: u32,
    pub job_retry_backoff: Duration,
    pub runtime_update_interval: Duration,
    pub metrics_interval: Duration,
}

impl OperatorConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> OperatorConfigBuilder {
        OperatorConfigBuilder::default()
    }

    pub fn new(params: OperatorConfigParams) -> Result<Self> {
        let OperatorConfigParams {
            chain_name,
            min_stake,
            cache_read_concurrency,
            cache_write_concurrency,
            chain_fetch_concurrency,
            chain_fetch_spacing,
            backfill_concurrency,
            fetch_max_retries,
            fetch_retry_backoff,
            job_max_attempts,
            job_retry_backoff,
            runtime_update_interval,
            metrics_interval,
        } = params;

        let config = Self {
            chain_name: chain_name.trim().to_owned(),
            min_stake,
            cache_read_concurrency,
            cache_write_concurrency,
            chain_fetch_concurrency,
            chain_fetch_spacing,
            backfill_concurrency,
            fetch_max_retries,
            fetch_retry_backoff,
            job_max_attempts,
            job_retry_backoff,
            runtime_update_interval,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Chain identifier used in checkpoint keys and log labels.
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// Minimum worker stake, in minimum chain units.
    pub fn min_stake(&self) -> u128 {
        self.min_stake
    }

    pub fn cache_read_concurrency(&self) -> usize {
        self.cache_read_concurrency
    }

    pub fn cache_write_concurrency(&self) -> usize {
        self.cache_write_concurrency
    }

    pub fn chain_fetch_concurrency(&self) -> usize {
        self.chain_fetch_concurrency
    }

    /// Minimum interval between chain RPC admissions.
    pub fn chain_fetch_spacing(&self) -> Duration {
        self.chain_fetch_spacing
    }

    /// Block numbers in flight during a backfill pass.
    pub fn backfill_concurrency(&self) -> usize {
        self.backfill_concurrency
    }

    /// Cap on fetch-and-cache retries per block. `None` retries forever.
    pub fn fetch_max_retries(&self) -> Option<usize> {
        self.fetch_max_retries
    }

    /// Delay between fetch-and-cache retries. Zero means retry immediately.
    pub fn fetch_retry_backoff(&self) -> Duration {
        self.fetch_retry_backoff
    }

    pub fn job_max_attempts(&self) -> u32 {
        self.job_max_attempts
    }

    pub fn job_retry_backoff(&self) -> Duration {
        self.job_retry_backoff
    }

    /// Interval between worker runtime info refreshes.
    pub fn runtime_update_interval(&self) -> Duration {
        self.runtime_update_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.chain_name.is_empty() {
            bail!("chain_name cannot be empty");
        }

        if self.cache_read_concurrency == 0 {
            bail!("cache_read_concurrency must be greater than 0");
        }

        if self.cache_write_concurrency == 0 {
            bail!("cache_write_concurrency must be greater than 0");
        }

        if self.chain_fetch_concurrency == 0 {
            bail!("chain_fetch_concurrency must be greater than 0");
        }

        if self.backfill_concurrency == 0 {
            bail!("backfill_concurrency must be greater than 0");
        }

        if self.job_max_attempts == 0 {
            bail!("job_max_attempts must be greater than 0");
        }

        if self.runtime_update_interval.is_zero() {
            bail!("runtime_update_interval must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if matches!(self.fetch_max_retries, Some(0)) {
            bail!("fetch_max_retries must be greater than 0 when set");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct OperatorConfigBuilder {
    chain_name: Option<String>,
    min_stake: Option<u128>,
    cache_read_concurrency: Option<usize>,
    cache_write_concurrency: Option<usize>,
    chain_fetch_concurrency: Option<usize>,
    chain_fetch_spacing: Option<Duration>,
    backfill_concurrency: Option<usize>,
    fetch_max_retries: Option<usize>,
    fetch_retry_backoff: Option<Duration>,
    job_max_attempts: Option<u32>,
    job_retry_backoff: Option<Duration>,
    runtime_update_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl OperatorConfigBuilder {
    pub fn chain_name(mut self, name: impl Into<String>) -> Self {
        self.chain_name = Some(name.into());
        self
    }

    pub fn min_stake(mut self, units: u128) -> Self {
        self.min_stake = Some(units);
        self
    }

    pub fn cache_read_concurrency(mut self, concurrency: usize) -> Self {
        self.cache_read_concurrency = Some(concurrency);
        self
    }

    pub fn cache_write_concurrency(mut self, concurrency: usize) -> Self {
        self.cache_write_concurrency = Some(concurrency);
        self
    }

    pub fn chain_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.chain_fetch_concurrency = Some(concurrency);
        self
    }

    pub fn chain_fetch_spacing(mut self, spacing: Duration) -> Self {
        self.chain_fetch_spacing = Some(spacing);
        self
    }

    pub fn backfill_concurrency(mut self, concurrency: usize) -> Self {
        self.backfill_concurrency = Some(concurrency);
        self
    }

    pub fn fetch_max_retries(mut self, retries: usize) -> Self {
        self.fetch_max_retries = Some(retries);
        self
    }

    pub fn fetch_retry_backoff(mut self, backoff: Duration) -> Self {
        self.fetch_retry_backoff = Some(backoff);
        self
    }

    pub fn job_max_attempts(mut self, attempts: u32) -> Self {
        self.job_max_attempts = Some(attempts);
        self
    }

    pub fn job_retry_backoff(mut self, backoff: Duration) -> Self {
        self.job_retry_backoff = Some(backoff);
        self
    }

    pub fn runtime_update_interval(mut self, interval: Duration) -> Self {
        self.runtime_update_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<OperatorConfig> {
        let params = OperatorConfigParams {
            chain_name: self.chain_name.context("chain_name is required")?,
            min_stake: self.min_stake.unwrap_or(DEFAULT_MIN_STAKE_UNITS),
            cache_read_concurrency: self
                .cache_read_concurrency
                .unwrap_or(DEFAULT_CACHE_READ_CONCURRENCY),
            cache_write_concurrency: self
                .cache_write_concurrency
                .unwrap_or(DEFAULT_CACHE_WRITE_CONCURRENCY),
            chain_fetch_concurrency: self
                .chain_fetch_concurrency
                .unwrap_or(DEFAULT_CHAIN_FETCH_CONCURRENCY),
            chain_fetch_spacing: self
                .chain_fetch_spacing
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_CHAIN_FETCH_SPACING_MS)),
            backfill_concurrency: self
                .backfill_concurrency
                .unwrap_or(DEFAULT_BACKFILL_CONCURRENCY),
            fetch_max_retries: self.fetch_max_retries,
            fetch_retry_backoff: self.fetch_retry_backoff.unwrap_or(Duration::ZERO),
            job_max_attempts: self.job_max_attempts.unwrap_or(DEFAULT_JOB_MAX_ATTEMPTS),
            job_retry_backoff: self
                .job_retry_backoff
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_JOB_RETRY_BACKOFF_SECS)),
            runtime_update_interval: self
                .runtime_update_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RUNTIME_UPDATE_INTERVAL_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        OperatorConfig::new(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_config_with_defaults() {
        let config = OperatorConfig::builder()
            .chain_name("khala")
            .build()
            .unwrap();

        assert_eq!(config.chain_name(), "khala");
        assert_eq!(config.min_stake(), DEFAULT_MIN_STAKE_UNITS);
        assert_eq!(config.cache_read_concurrency(), 3000);
        assert_eq!(config.cache_write_concurrency(), 80);
        assert_eq!(config.chain_fetch_concurrency(), 50);
        assert_eq!(config.chain_fetch_spacing(), Duration::from_millis(100));
        assert_eq!(config.fetch_max_retries(), None);
        assert_eq!(config.fetch_retry_backoff(), Duration::ZERO);
        assert_eq!(config.job_max_attempts(), DEFAULT_JOB_MAX_ATTEMPTS);
        assert_eq!(config.metrics_interval(), telemetry::DEFAULT_METRICS_INTERVAL);
    }

    #[test]
    fn chain_name_is_required_and_trimmed() {
        let err = OperatorConfig::builder().build().unwrap_err();
        assert!(format!("{err}").contains("chain_name"));

        let config = OperatorConfig::builder()
            .chain_name("  khala  ")
            .build()
            .unwrap();
        assert_eq!(config.chain_name(), "khala");

        let err = OperatorConfig::builder()
            .chain_name("   ")
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("chain_name"));
    }

    #[test]
    fn validation_catches_invalid_values() {
        let err = OperatorConfig::builder()
            .chain_name("khala")
            .cache_read_concurrency(0)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("cache_read_concurrency"));

        let err = OperatorConfig::builder()
            .chain_name("khala")
            .job_max_attempts(0)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("job_max_attempts"));

        let err = OperatorConfig::builder()
            .chain_name("khala")
            .fetch_max_retries(0)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("fetch_max_retries"));

        let err = OperatorConfig::builder()
            .chain_name("khala")
            .metrics_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(format!("{err}").contains("metrics_interval"));
    }

    #[test]
    fn overrides_are_honoured() {
        let config = OperatorConfig::builder()
            .chain_name("khala")
            .min_stake(5)
            .chain_fetch_concurrency(2)
            .chain_fetch_spacing(Duration::ZERO)
            .backfill_concurrency(16)
            .fetch_max_retries(4)
            .fetch_retry_backoff(Duration::from_millis(250))
            .build()
            .unwrap();

        assert_eq!(config.min_stake(), 5);
        assert_eq!(config.chain_fetch_concurrency(), 2);
        assert_eq!(config.chain_fetch_spacing(), Duration::ZERO);
        assert_eq!(config.backfill_concurrency(), 16);
        assert_eq!(config.fetch_max_retries(), Some(4));
        assert_eq!(config.fetch_retry_backoff(), Duration::from_millis(250));
    }
}
