//! Connection pool management for environment databases.

use std::str::FromStr;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use dbclone_core::{defaults, Credentials, Error, Result};

/// Default idle timeout in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Idle connection timeout duration.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::MAX_CONNECTIONS,
            min_connections: 0,
            connect_timeout: Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the minimum number of connections.
    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Build connect options from credentials. The key, when present, overrides
/// the URL's password.
pub fn connect_options(credentials: &Credentials) -> Result<PgConnectOptions> {
    credentials.validate()?;

    // The parse error may echo the URL, so it is replaced wholesale.
    let options = PgConnectOptions::from_str(credentials.url.trim()).map_err(|_| {
        Error::InvalidCredentials("connection url could not be parsed".to_string())
    })?;

    Ok(match credentials.key.as_deref() {
        Some(key) => options.password(key),
        None => options,
    })
}

/// Create a pool for one environment and open its first connection.
pub async fn create_pool(
    environment: &str,
    options: PgConnectOptions,
    config: PoolConfig,
) -> Result<PgPool> {
    let start = Instant::now();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "create",
        environment,
        max_connections = config.max_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        "Creating environment connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .connect_with(options)
        .await
        .map_err(classify_connect_error)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        environment,
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Environment connection pool established"
    );
    Ok(pool)
}

/// Map a connection-time sqlx error onto the cloner's error taxonomy.
///
/// Messages are rebuilt from error codes rather than forwarded, since server
/// messages can echo user names and hosts.
pub fn classify_connect_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("28P01") | Some("28000") => {
                Error::Authentication("credentials rejected by the database".to_string())
            }
            Some("42501") => Error::Permission("role is not allowed to connect".to_string()),
            Some("3D000") => Error::Connection("database does not exist".to_string()),
            Some(code) => Error::Connection(format!("database refused connection ({})", code)),
            None => Error::Connection("database refused connection".to_string()),
        },
        sqlx::Error::PoolTimedOut => {
            Error::Connection("timed out while connecting to the database".to_string())
        }
        sqlx::Error::Io(io) => Error::Connection(format!("network error: {}", io.kind())),
        sqlx::Error::Tls(_) => Error::Connection("TLS negotiation failed".to_string()),
        sqlx::Error::Configuration(_) => {
            Error::InvalidCredentials("connection settings are invalid".to_string())
        }
        _ => {
            warn!(subsystem = "db", component = "pool", "Unclassified connection error");
            Error::Connection("unable to connect to the database".to_string())
        }
    }
}

/// Log current pool health metrics.
pub fn log_pool_metrics(environment: &str, pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        environment,
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            environment,
            pool_size = size,
            "Connection pool has no idle connections, potential exhaustion"
        );
    }
}
