//! In-memory database backend for deterministic testing.
//!
//! ## Usage
//!
//! ```rust
//! use dbclone_core::{DatabaseBackend, TableInfo};
//! use dbclone_db::mock::MockBackend;
//!
//! # tokio_test_block(async {
//! let backend = MockBackend::new()
//!     .with_table(TableInfo::new("lofts"), MockBackend::generate_rows(3));
//!
//! let rows = backend.read_rows("lofts", 0, 10).await.unwrap();
//! assert_eq!(rows.len(), 3);
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use dbclone_core::{
    BackendConnector, DatabaseBackend, Environment, Error, Privilege, Result, Row, TableInfo,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct MockTable {
    info: TableInfo,
    rows: Vec<Row>,
}

/// A recorded backend call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub table: Option<String>,
    pub rows: usize,
    pub timestamp: Instant,
}

/// Pauses the first read of a table until released.
///
/// `entered` fires once the read is parked; `release` lets it continue.
#[derive(Debug, Clone, Default)]
pub struct ReadGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ReadGate {
    /// Wait until the gated read has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated read return.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// In-memory backend with call logging, latency, and failure injection.
///
/// Clones share state, so a test can keep a handle while the pipeline owns
/// another.
#[derive(Clone, Default)]
pub struct MockBackend {
    tables: Arc<Mutex<BTreeMap<String, MockTable>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    // None fails every write; Some(n) fails the next n writes.
    write_failures: Arc<Mutex<HashMap<String, Option<u32>>>>,
    denied: Arc<Mutex<HashSet<(String, Privilege)>>>,
    truncate_failures: Arc<Mutex<HashSet<String>>>,
    gates: Arc<Mutex<HashMap<String, ReadGate>>>,
    latency_ms: u64,
}

impl MockBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a table with its rows.
    pub fn with_table(self, info: TableInfo, rows: Vec<Row>) -> Self {
        self.put_table(info, rows);
        self
    }

    /// Set simulated latency for every call.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Every write to `table` fails.
    pub fn with_write_failure(self, table: impl Into<String>) -> Self {
        lock(&self.write_failures).insert(table.into(), None);
        self
    }

    /// The next `times` writes to `table` fail, later ones succeed.
    pub fn with_transient_write_failures(self, table: impl Into<String>, times: u32) -> Self {
        lock(&self.write_failures).insert(table.into(), Some(times));
        self
    }

    /// Every truncate of `table` fails with a permission error.
    pub fn with_truncate_failure(self, table: impl Into<String>) -> Self {
        lock(&self.truncate_failures).insert(table.into());
        self
    }

    /// Revoke a privilege on a table.
    pub fn with_denied_privilege(self, table: impl Into<String>, privilege: Privilege) -> Self {
        lock(&self.denied).insert((table.into(), privilege));
        self
    }

    /// Gate the next read of `table`.
    pub fn gate_reads(&self, table: impl Into<String>) -> ReadGate {
        let gate = ReadGate::default();
        lock(&self.gates).insert(table.into(), gate.clone());
        gate
    }

    /// Add (or replace) a table in place.
    pub fn put_table(&self, info: TableInfo, rows: Vec<Row>) {
        lock(&self.tables).insert(info.name.clone(), MockTable { info, rows });
    }

    /// Current rows of a table (empty when the table is missing).
    pub fn rows(&self, table: &str) -> Vec<Row> {
        lock(&self.tables)
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of rows currently in a table.
    pub fn row_count(&self, table: &str) -> usize {
        lock(&self.tables).get(table).map_or(0, |t| t.rows.len())
    }

    /// Rows `{"id": 1} .. {"id": count}` with a name column.
    pub fn generate_rows(count: usize) -> Vec<Row> {
        (1..=count)
            .filter_map(|i| match json!({"id": i, "name": format!("row-{}", i)}) {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    }

    /// Get all logged calls for assertion.
    pub fn get_calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    /// Count calls of one operation.
    pub fn call_count(&self, operation: &str) -> usize {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Tables touched by an operation, in call order.
    pub fn tables_for(&self, operation: &str) -> Vec<String> {
        lock(&self.call_log)
            .iter()
            .filter(|c| c.operation == operation)
            .filter_map(|c| c.table.clone())
            .collect()
    }

    /// Whether any mutating call reached this backend.
    pub fn was_mutated(&self) -> bool {
        lock(&self.call_log)
            .iter()
            .any(|c| matches!(c.operation.as_str(), "write_rows" | "truncate"))
    }

    fn log_call(&self, operation: &str, table: Option<&str>, rows: usize) {
        lock(&self.call_log).push(MockCall {
            operation: operation.to_string(),
            table: table.map(str::to_string),
            rows,
            timestamp: Instant::now(),
        });
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }
    }

    fn should_fail_write(&self, table: &str) -> bool {
        let mut failures = lock(&self.write_failures);
        match failures.get_mut(table) {
            Some(None) => true,
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn missing(table: &str) -> Error {
        Error::NotFound(format!("table '{}' does not exist", table))
    }
}

#[async_trait]
impl DatabaseBackend for MockBackend {
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        self.simulate_latency().await;
        self.log_call("list_tables", None, 0);
        Ok(lock(&self.tables)
            .values()
            .map(|t| {
                let mut info = t.info.clone();
                if info.estimated_rows == 0 {
                    info.estimated_rows = t.rows.len() as u64;
                }
                info
            })
            .collect())
    }

    async fn read_rows(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Row>> {
        self.simulate_latency().await;

        let gate = lock(&self.gates).remove(table);
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let rows = {
            let tables = lock(&self.tables);
            let data = tables.get(table).ok_or_else(|| Self::missing(table))?;
            let start = (offset as usize).min(data.rows.len());
            let end = start.saturating_add(limit).min(data.rows.len());
            data.rows[start..end].to_vec()
        };
        self.log_call("read_rows", Some(table), rows.len());
        Ok(rows)
    }

    async fn write_rows(&self, table: &str, rows: &[Row]) -> Result<u64> {
        self.simulate_latency().await;
        self.log_call("write_rows", Some(table), rows.len());

        if self.should_fail_write(table) {
            return Err(Error::Internal(format!(
                "simulated write failure on {}",
                table
            )));
        }

        let mut tables = lock(&self.tables);
        let data = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        data.rows.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.simulate_latency().await;
        self.log_call("truncate", Some(table), 0);

        if lock(&self.truncate_failures).contains(table) {
            return Err(Error::Permission(format!(
                "simulated truncate failure on {}",
                table
            )));
        }

        let mut tables = lock(&self.tables);
        let data = tables.get_mut(table).ok_or_else(|| Self::missing(table))?;
        data.rows.clear();
        Ok(())
    }

    async fn has_privilege(&self, table: &str, privilege: Privilege) -> Result<bool> {
        self.log_call("has_privilege", Some(table), 0);
        if !lock(&self.tables).contains_key(table) {
            return Err(Self::missing(table));
        }
        Ok(!lock(&self.denied).contains(&(table.to_string(), privilege)))
    }

    async fn finalize_table(&self, table: &str) -> Result<()> {
        self.log_call("finalize_table", Some(table), 0);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

/// Failure a `MockConnector` reports for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Connection,
    Authentication,
}

/// Connector that resolves environment names to registered mock backends.
#[derive(Clone, Default)]
pub struct MockConnector {
    backends: HashMap<String, MockBackend>,
    failures: HashMap<String, ConnectFailure>,
    latency_ms: u64,
    connects: Arc<Mutex<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the backend returned for `environment`.
    pub fn with_backend(mut self, environment: impl Into<String>, backend: MockBackend) -> Self {
        self.backends.insert(environment.into(), backend);
        self
    }

    /// Make connecting to `environment` fail.
    pub fn with_failure(mut self, environment: impl Into<String>, failure: ConnectFailure) -> Self {
        self.failures.insert(environment.into(), failure);
        self
    }

    /// Set simulated connect latency.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    /// Environment names passed to `connect`, in call order.
    pub fn connect_calls(&self) -> Vec<String> {
        lock(&self.connects).clone()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(&self, environment: &Environment) -> Result<Arc<dyn DatabaseBackend>> {
        lock(&self.connects).push(environment.name.clone());
        if self.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;
        }

        environment.credentials.validate()?;

        match self.failures.get(&environment.name) {
            Some(ConnectFailure::Connection) => {
                return Err(Error::Connection("host unreachable".to_string()))
            }
            Some(ConnectFailure::Authentication) => {
                return Err(Error::Authentication(
                    "credentials rejected by the database".to_string(),
                ))
            }
            None => {}
        }

        self.backends
            .get(&environment.name)
            .map(|b| Arc::new(b.clone()) as Arc<dyn DatabaseBackend>)
            .ok_or_else(|| {
                Error::Connection(format!("no database for environment '{}'", environment.name))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbclone_core::{Credentials, EnvironmentRole};

    fn environment(name: &str) -> Environment {
        Environment::new(
            name,
            Credentials::new("postgres://mock/loft"),
            EnvironmentRole::Source,
        )
    }

    #[tokio::test]
    async fn test_mock_backend_reads_in_pages() {
        let backend =
            MockBackend::new().with_table(TableInfo::new("lofts"), MockBackend::generate_rows(5));

        let first = backend.read_rows("lofts", 0, 2).await.unwrap();
        let last = backend.read_rows("lofts", 4, 2).await.unwrap();
        let past_end = backend.read_rows("lofts", 10, 2).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0]["id"], 1);
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["id"], 5);
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_mock_backend_write_and_truncate() {
        let backend = MockBackend::new().with_table(TableInfo::new("lofts"), vec![]);

        let written = backend
            .write_rows("lofts", &MockBackend::generate_rows(3))
            .await
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(backend.row_count("lofts"), 3);

        backend.truncate("lofts").await.unwrap();
        assert_eq!(backend.row_count("lofts"), 0);
        assert!(backend.was_mutated());
    }

    #[tokio::test]
    async fn test_truncate_many_names_the_failing_table() {
        let backend = MockBackend::new()
            .with_table(TableInfo::new("bookings"), MockBackend::generate_rows(2))
            .with_table(TableInfo::new("lofts"), MockBackend::generate_rows(2))
            .with_truncate_failure("lofts");

        let err = backend
            .truncate_many(&["bookings".to_string(), "lofts".to_string()])
            .await
            .unwrap_err();

        assert_eq!(err.table(), Some("lofts"));
        assert!(err.to_string().contains("simulated truncate failure"));
        assert_eq!(backend.row_count("bookings"), 0);
        assert_eq!(backend.row_count("lofts"), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_missing_table_is_not_found() {
        let backend = MockBackend::new();
        let err = backend.read_rows("ghost", 0, 10).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mock_backend_transient_write_failures() {
        let backend = MockBackend::new()
            .with_table(TableInfo::new("lofts"), vec![])
            .with_transient_write_failures("lofts", 1);
        let rows = MockBackend::generate_rows(1);

        assert!(backend.write_rows("lofts", &rows).await.is_err());
        assert!(backend.write_rows("lofts", &rows).await.is_ok());
        assert_eq!(backend.call_count("write_rows"), 2);
    }

    #[tokio::test]
    async fn test_mock_backend_denied_privilege() {
        let backend = MockBackend::new()
            .with_table(TableInfo::new("lofts"), vec![])
            .with_denied_privilege("lofts", Privilege::Insert);

        assert!(backend.has_privilege("lofts", Privilege::Select).await.unwrap());
        assert!(!backend.has_privilege("lofts", Privilege::Insert).await.unwrap());
        assert!(!backend.was_mutated());
    }

    #[tokio::test]
    async fn test_mock_backend_read_gate() {
        let backend =
            MockBackend::new().with_table(TableInfo::new("lofts"), MockBackend::generate_rows(2));
        let gate = backend.gate_reads("lofts");

        let reader = backend.clone();
        let handle = tokio::spawn(async move { reader.read_rows("lofts", 0, 10).await });

        gate.entered().await;
        assert!(!handle.is_finished());
        gate.release();

        let rows = handle.await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_connector_resolves_by_name() {
        let connector = MockConnector::new()
            .with_backend("production", MockBackend::new())
            .with_failure("staging", ConnectFailure::Authentication);

        assert!(connector.connect(&environment("production")).await.is_ok());
        assert!(matches!(
            connector.connect(&environment("staging")).await.err(),
            Some(Error::Authentication(_))
        ));
        assert!(matches!(
            connector.connect(&environment("unknown")).await.err(),
            Some(Error::Connection(_))
        ));
        assert_eq!(
            connector.connect_calls(),
            vec!["production", "staging", "unknown"]
        );
    }

    #[tokio::test]
    async fn test_mock_connector_validates_credentials_first() {
        let connector = MockConnector::new().with_backend("production", MockBackend::new());
        let env = Environment::new("production", Credentials::default(), EnvironmentRole::Source);

        assert!(matches!(
            connector.connect(&env).await.err(),
            Some(Error::InvalidCredentials(_))
        ));
    }
}
