//! Data model for environments, clone operations, and validation results.
//!
//! API-facing types serialize in camelCase to match the HTTP contract.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// One table row as a JSON object keyed by column name.
pub type Row = serde_json::Map<String, JsonValue>;

// =============================================================================
// ENVIRONMENTS
// =============================================================================

/// Which side of a clone an environment plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentRole {
    #[default]
    Source,
    Target,
}

impl EnvironmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentRole::Source => "source",
            EnvironmentRole::Target => "target",
        }
    }
}

/// Secret connection material for an environment.
///
/// Deliberately not `Serialize`: credentials can be received but never
/// written back out. `Debug` is redacted.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    /// Connection URL (e.g. `postgres://user@host:5432/db`).
    #[serde(default)]
    pub url: String,
    /// Service key or password, applied on top of the URL when present.
    #[serde(default)]
    pub key: Option<String>,
}

impl Credentials {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Check that the required secret fields are present.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidCredentials(
                "connection url is required".to_string(),
            ));
        }
        if matches!(self.key.as_deref(), Some(k) if k.trim().is_empty()) {
            return Err(Error::InvalidCredentials(
                "key must not be blank when provided".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether two credential bundles address the same database.
    pub fn same_database(&self, other: &Credentials) -> bool {
        self.url.trim() == other.url.trim()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &"<redacted>")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A named, credentialed handle to one database instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub credentials: Credentials,
    /// Schema holding the cloned tables (defaults to `public`).
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub role: EnvironmentRole,
}

impl Environment {
    pub fn new(name: impl Into<String>, credentials: Credentials, role: EnvironmentRole) -> Self {
        Self {
            name: name.into(),
            credentials,
            schema: None,
            role,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_role(mut self, role: EnvironmentRole) -> Self {
        self.role = role;
        self
    }

    /// Effective schema name.
    pub fn schema(&self) -> &str {
        self.schema
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults::DEFAULT_SCHEMA)
    }

    /// Credential-free view for status responses and logs.
    pub fn to_ref(&self) -> EnvironmentRef {
        EnvironmentRef {
            name: self.name.clone(),
            schema: self.schema().to_string(),
            role: self.role,
        }
    }
}

/// Public view of an environment (no credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentRef {
    pub name: String,
    pub schema: String,
    pub role: EnvironmentRole,
}

// =============================================================================
// CLONE OPTIONS
// =============================================================================

/// Options controlling one clone operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CloneOptions {
    /// Explicit, ordered table list. When set it is both the allow-list and
    /// the copy order; otherwise tables are discovered and dependency-ordered.
    pub tables: Option<Vec<String>>,
    /// Tables never copied.
    pub exclude_tables: Vec<String>,
    /// Rows per read/write batch; the orchestrator's default when unset.
    pub batch_size: Option<usize>,
    /// Truncate every planned target table before the first write.
    pub truncate_first: bool,
}

impl CloneOptions {
    pub fn with_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_excluded<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_truncate_first(mut self, truncate_first: bool) -> Self {
        self.truncate_first = truncate_first;
        self
    }

    /// Whether a table passes the deny-list.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.exclude_tables.iter().any(|t| t == table)
    }

    /// Batch size to use, falling back to `default` when unset.
    pub fn effective_batch_size(&self, default: usize) -> usize {
        self.batch_size.unwrap_or(default)
    }

    /// Reject options that cannot describe a valid clone.
    pub fn validate(&self) -> Result<()> {
        if let Some(batch_size) = self.batch_size {
            if batch_size == 0 || batch_size > defaults::MAX_BATCH_SIZE {
                return Err(Error::InvalidInput(format!(
                    "batchSize must be between 1 and {}, got {}",
                    defaults::MAX_BATCH_SIZE,
                    batch_size
                )));
            }
        }

        if let Some(tables) = &self.tables {
            if tables.is_empty() {
                return Err(Error::InvalidInput(
                    "tables must not be empty when provided".to_string(),
                ));
            }
            let mut seen = std::collections::HashSet::new();
            for table in tables {
                if table.trim().is_empty() {
                    return Err(Error::InvalidInput(
                        "table names must not be blank".to_string(),
                    ));
                }
                if !seen.insert(table.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "table '{}' is listed more than once",
                        table
                    )));
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Lifecycle state of a clone operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Running => "running",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions or progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// Whether `next` is a legal forward move from this state.
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress counters, updated only while the operation is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneProgress {
    pub current_table: Option<String>,
    pub tables_completed: usize,
    pub tables_total: usize,
    pub rows_copied: u64,
    pub rows_estimated: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CloneProgress {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_table: None,
            tables_completed: 0,
            tables_total: 0,
            rows_copied: 0,
            rows_estimated: 0,
            started_at: now,
            updated_at: now,
        }
    }
}

/// Failure details of a `failed` operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    pub message: String,
    /// Table being copied when the failure happened, if any.
    pub table: Option<String>,
}

/// Outcome of copying one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCopyResult {
    pub table_name: String,
    pub rows_copied: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One invocation of the clone pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneOperation {
    pub id: Uuid,
    pub status: OperationStatus,
    pub source: EnvironmentRef,
    pub target: EnvironmentRef,
    pub options: CloneOptions,
    pub progress: CloneProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
    pub table_results: Vec<TableCopyResult>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CloneOperation {
    /// Create a new operation in `pending`.
    pub fn new(id: Uuid, source: EnvironmentRef, target: EnvironmentRef, options: CloneOptions) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OperationStatus::Pending,
            source,
            target,
            options,
            progress: CloneProgress::new(now),
            error: None,
            table_results: Vec::new(),
            cancel_requested: false,
            created_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` if the state machine allows it. Returns whether the
    /// transition happened.
    pub fn transition(&mut self, next: OperationStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == OperationStatus::Running {
            self.progress.started_at = now;
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            self.progress.current_table = None;
        }
        self.progress.updated_at = now;
        self.status = next;
        true
    }

    /// Apply a progress mutation. Ignored unless the operation is running.
    pub fn update_progress<F>(&mut self, f: F) -> bool
    where
        F: FnOnce(&mut CloneProgress),
    {
        if self.status != OperationStatus::Running {
            return false;
        }
        f(&mut self.progress);
        self.progress.updated_at = Utc::now();
        true
    }
}

// =============================================================================
// SCHEMA INTROSPECTION
// =============================================================================

/// Table metadata reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    /// Planner estimate; zero when unknown.
    pub estimated_rows: u64,
    /// Tables this table references through foreign keys.
    pub references: Vec<String>,
    /// Primary-key columns in key order (empty when none).
    pub primary_key: Vec<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_references<I, S>(mut self, references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = references.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_estimated_rows(mut self, rows: u64) -> Self {
        self.estimated_rows = rows;
        self
    }

    pub fn with_primary_key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// Table privilege checked during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Privilege {
    Select,
    Insert,
    Truncate,
}

impl Privilege {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Privilege::Select => "SELECT",
            Privilege::Insert => "INSERT",
            Privilege::Truncate => "TRUNCATE",
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Category of a failed connection validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValidationErrorKind {
    InvalidCredentials,
    Connection,
    Authentication,
    Permission,
}

impl ValidationErrorKind {
    /// Classify an error; anything unexpected counts as a connection problem.
    pub fn classify(err: &Error) -> Self {
        match err {
            Error::InvalidCredentials(_) => ValidationErrorKind::InvalidCredentials,
            Error::Authentication(_) => ValidationErrorKind::Authentication,
            Error::Permission(_) => ValidationErrorKind::Permission,
            _ => ValidationErrorKind::Connection,
        }
    }
}

/// Facts gathered by a successful (or permission-failed) validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMetadata {
    pub tables_found: usize,
    pub permissions_ok: bool,
}

/// Result of validating one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ValidationErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ConnectionMetadata>,
}

impl ValidationResult {
    pub fn ok(metadata: ConnectionMetadata) -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            metadata: Some(metadata),
        }
    }

    pub fn failed(err: &Error, metadata: Option<ConnectionMetadata>) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(ValidationErrorKind::classify(err)),
            metadata,
        }
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

/// Authenticated user as reported by the session collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: String,
}

/// Session returned by `SessionProvider::get_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: SessionUser,
}

impl Session {
    pub fn with_role(role: impl Into<String>) -> Self {
        Self {
            user: SessionUser {
                id: None,
                email: None,
                role: role.into(),
            },
        }
    }

    pub fn is_superuser(&self) -> bool {
        self.user.role == defaults::SUPERUSER_ROLE
    }
}
