//! Orchestrator configuration.

use std::time::Duration;

use dbclone_core::defaults;

/// Configuration for the clone orchestrator and its pipelines.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Batch size used when a request does not set one.
    pub default_batch_size: usize,
    /// Extra attempts for a failed batch write (0 disables retries).
    pub write_retries: u32,
    /// Base delay between write attempts; attempt `n` waits `n` times this.
    pub write_retry_delay: Duration,
    /// Upper bound for any single backend call.
    pub stall_timeout: Duration,
    /// Upper bound for opening a connection to an environment.
    pub connect_timeout: Duration,
    /// How long finished operations stay queryable.
    pub retention: Duration,
    /// How often the sweeper purges expired operations.
    pub sweep_interval: Duration,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_batch_size: defaults::BATCH_SIZE,
            write_retries: defaults::WRITE_RETRIES,
            write_retry_delay: Duration::from_millis(defaults::WRITE_RETRY_DELAY_MS),
            stall_timeout: Duration::from_secs(defaults::STALL_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
            retention: Duration::from_secs(defaults::RETENTION_SECS),
            sweep_interval: Duration::from_secs(defaults::SWEEP_INTERVAL_SECS),
            event_capacity: defaults::EVENT_BUS_CAPACITY,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

impl OrchestratorConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CLONER_DEFAULT_BATCH_SIZE` | `1000` | Rows per batch when unset in a request |
    /// | `CLONER_WRITE_RETRIES` | `2` | Extra attempts per failed batch write |
    /// | `CLONER_STALL_TIMEOUT_SECS` | `1800` | Bound on any single backend call |
    /// | `CLONER_CONNECT_TIMEOUT_SECS` | `15` | Bound on opening a connection |
    /// | `CLONER_RETENTION_SECS` | `86400` | How long finished operations are kept |
    pub fn from_env() -> Self {
        let base = Self::default();

        let default_batch_size = env_parse::<usize>("CLONER_DEFAULT_BATCH_SIZE")
            .unwrap_or(base.default_batch_size)
            .clamp(1, defaults::MAX_BATCH_SIZE);

        let write_retries = env_parse::<u32>("CLONER_WRITE_RETRIES").unwrap_or(base.write_retries);

        let stall_timeout = env_parse::<u64>("CLONER_STALL_TIMEOUT_SECS")
            .map(|s| Duration::from_secs(s.max(1)))
            .unwrap_or(base.stall_timeout);

        let connect_timeout = env_parse::<u64>("CLONER_CONNECT_TIMEOUT_SECS")
            .map(|s| Duration::from_secs(s.max(1)))
            .unwrap_or(base.connect_timeout);

        let retention = env_parse::<u64>("CLONER_RETENTION_SECS")
            .map(Duration::from_secs)
            .unwrap_or(base.retention);

        Self {
            default_batch_size,
            write_retries,
            stall_timeout,
            connect_timeout,
            retention,
            ..base
        }
    }

    /// Set the default batch size.
    pub fn with_default_batch_size(mut self, size: usize) -> Self {
        self.default_batch_size = size;
        self
    }

    /// Set the number of write retries.
    pub fn with_write_retries(mut self, retries: u32) -> Self {
        self.write_retries = retries;
        self
    }

    /// Set the base retry delay.
    pub fn with_write_retry_delay(mut self, delay: Duration) -> Self {
        self.write_retry_delay = delay;
        self
    }

    /// Set the stall timeout.
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the retention period for finished operations.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the sweeper interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}
