//! # dbclone-db
//!
//! Database backends for the environment cloner.
//!
//! This crate provides:
//! - Connection pool creation with classified connect errors
//! - A PostgreSQL `DatabaseBackend` that copies rows as JSON batches
//! - Identifier validation for dynamically built SQL
//! - An in-memory backend and connector for tests
//!
//! ## Example
//!
//! ```ignore
//! use dbclone_core::{BackendConnector, Credentials, Environment, EnvironmentRole};
//! use dbclone_db::{PgConnector, PoolConfig};
//!
//! let connector = PgConnector::new(PoolConfig::default());
//! let env = Environment::new(
//!     "production",
//!     Credentials::new("postgres://cloner@db.internal/loft").with_key(key),
//!     EnvironmentRole::Source,
//! );
//! let backend = connector.connect(&env).await?;
//! let tables = backend.list_tables().await?;
//! ```

pub mod identifier;
pub mod mock;
pub mod pool;
pub mod postgres;

// Re-export core types
pub use dbclone_core::*;

pub use identifier::{qualified_name, quote_ident, validate_identifier, validate_schema_name};
pub use mock::{ConnectFailure, MockBackend, MockConnector, ReadGate};
pub use pool::{classify_connect_error, connect_options, create_pool, log_pool_metrics, PoolConfig};
pub use postgres::{PgBackend, PgConnector};
