//! Centralized default constants for the cloner.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration loaders fall back to these when an environment variable is
//! absent or unparsable.

// =============================================================================
// BATCHING
// =============================================================================

/// Rows per read/write batch when the request does not specify one.
pub const BATCH_SIZE: usize = 1000;

/// Upper bound accepted for a request's batch size.
pub const MAX_BATCH_SIZE: usize = 10_000;

// =============================================================================
// RETRIES
// =============================================================================

/// Extra attempts for a failed batch write (0 disables retries).
pub const WRITE_RETRIES: u32 = 2;

/// Base delay between write retries; linear backoff (delay * attempt).
pub const WRITE_RETRY_DELAY_MS: u64 = 200;

// =============================================================================
// TIMEOUTS
// =============================================================================

/// Maximum wall-clock time for a single backend call before the operation
/// is considered stalled and failed.
pub const STALL_TIMEOUT_SECS: u64 = 30 * 60;

/// Connection establishment timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// RETENTION
// =============================================================================

/// How long terminal operations stay queryable before garbage collection.
pub const RETENTION_SECS: u64 = 24 * 60 * 60;

/// Interval of the retention sweeper.
pub const SWEEP_INTERVAL_SECS: u64 = 5 * 60;

// =============================================================================
// POOLS
// =============================================================================

/// Connections per environment pool. One operation copies one table at a time,
/// so a small pool suffices.
pub const MAX_CONNECTIONS: u32 = 4;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast channel capacity for orchestrator events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default bind address.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Request body limit. Bodies only carry credentials and options.
pub const REQUEST_BODY_LIMIT: usize = 64 * 1024;

/// Role a session must carry to use any cloner route.
pub const SUPERUSER_ROLE: &str = "superuser";

/// Default schema for environments that do not name one.
pub const DEFAULT_SCHEMA: &str = "public";
