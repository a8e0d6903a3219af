//! Core traits for the cloner's pluggable collaborators.
//!
//! These traits define the interfaces concrete implementations must satisfy:
//! the hosted database (`DatabaseBackend`, `BackendConnector`) and the
//! session/auth service (`SessionProvider`).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Environment, Privilege, Row, Session, TableInfo};

// =============================================================================
// DATABASE BACKEND
// =============================================================================

/// Bulk primitives the clone pipeline needs from a database environment.
///
/// Implementations are bound to one environment (and schema) at connect time.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// List the tables of the environment's schema, with foreign-key
    /// references and primary keys.
    async fn list_tables(&self) -> Result<Vec<TableInfo>>;

    /// Read up to `limit` rows starting at `offset`, in a stable order.
    async fn read_rows(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Row>>;

    /// Write a batch of rows. The batch is all-or-nothing.
    async fn write_rows(&self, table: &str, rows: &[Row]) -> Result<u64>;

    /// Remove all rows from a table.
    async fn truncate(&self, table: &str) -> Result<()>;

    /// Truncate several tables, given in dependency-safe order (referencing
    /// tables before the tables they reference).
    ///
    /// A failure is reported as `Error::Transfer` naming the table that
    /// could not be truncated.
    async fn truncate_many(&self, tables: &[String]) -> Result<()> {
        for table in tables {
            self.truncate(table).await.map_err(|e| {
                if e.is_cancelled() || e.table().is_some() {
                    e
                } else {
                    Error::transfer(table.as_str(), e.to_string())
                }
            })?;
        }
        Ok(())
    }

    /// Whether the connected role holds `privilege` on `table`. Never mutates.
    async fn has_privilege(&self, table: &str, privilege: Privilege) -> Result<bool>;

    /// Post-copy fix-ups for a table (e.g. sequence re-sync).
    async fn finalize_table(&self, _table: &str) -> Result<()> {
        Ok(())
    }

    /// Backend name for logs.
    fn backend_name(&self) -> &str;
}

/// Opens a `DatabaseBackend` for an environment.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Connect using the environment's credentials.
    ///
    /// Errors are classified: `InvalidCredentials`, `Connection`,
    /// `Authentication`. Error text must not contain credentials.
    async fn connect(&self, environment: &Environment) -> Result<Arc<dyn DatabaseBackend>>;
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Resolves a bearer token to the caller's session.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// `Ok(None)` when the token does not identify a live session.
    async fn get_session(&self, token: &str) -> Result<Option<Session>>;
}
