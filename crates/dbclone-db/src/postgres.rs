//! PostgreSQL implementation of the database backend.
//!
//! Rows travel as JSON objects: reads use `to_jsonb(t)` and writes use
//! `jsonb_populate_recordset`, so the pipeline never needs column types.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Row as _};
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use dbclone_core::{
    BackendConnector, DatabaseBackend, Environment, Error, Privilege, Result, Row, TableInfo,
};

use crate::identifier::{qualified_name, quote_ident, validate_schema_name};
use crate::pool::{connect_options, create_pool, log_pool_metrics, PoolConfig};

/// Per-table SQL fragments derived from the catalog once and reused per batch.
#[derive(Debug, Clone)]
struct TableShape {
    order_by: String,
    insert_columns: String,
}

/// Backend bound to one schema of one PostgreSQL database.
pub struct PgBackend {
    pool: PgPool,
    environment: String,
    schema: String,
    shapes: RwLock<HashMap<String, TableShape>>,
}

impl PgBackend {
    /// Wrap an existing pool. The schema must already be validated.
    pub fn new(pool: PgPool, environment: impl Into<String>, schema: impl Into<String>) -> Self {
        Self {
            pool,
            environment: environment.into(),
            schema: schema.into(),
            shapes: RwLock::new(HashMap::new()),
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn qualified(&self, table: &str) -> Result<String> {
        qualified_name(&self.schema, table)
    }

    async fn shape(&self, table: &str) -> Result<TableShape> {
        if let Some(shape) = self.shapes.read().await.get(table) {
            return Ok(shape.clone());
        }

        let qualified = self.qualified(table)?;

        let pk_columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_index i
            JOIN pg_attribute a
                ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = $1::regclass
                AND i.indisprimary
            ORDER BY array_position(i.indkey::int2[], a.attnum)
            "#,
        )
        .bind(&qualified)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_table_error(table, e))?;

        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT a.attname::text
            FROM pg_attribute a
            WHERE a.attrelid = $1::regclass
                AND a.attnum > 0
                AND NOT a.attisdropped
                AND a.attgenerated = ''
            ORDER BY a.attnum
            "#,
        )
        .bind(&qualified)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_table_error(table, e))?;

        // Heap order is stable for the duration of a copy when no key exists.
        let order_by = if pk_columns.is_empty() {
            "t.ctid".to_string()
        } else {
            pk_columns
                .iter()
                .map(|c| format!("t.{}", quote_ident(c)))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let shape = TableShape {
            order_by,
            insert_columns: columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
        };

        self.shapes
            .write()
            .await
            .insert(table.to_string(), shape.clone());
        Ok(shape)
    }
}

/// Map a query error for a named table, surfacing missing tables as `NotFound`.
fn map_table_error(table: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("42P01") {
            return Error::NotFound(format!("table '{}' does not exist", table));
        }
        if db_err.code().as_deref() == Some("42501") {
            return Error::Permission(format!("access to table '{}' denied", table));
        }
    }
    Error::Database(err)
}

/// The listed table a multi-table statement failed on: the one the server
/// reports, else the one its message quotes, else the first.
fn failing_table<'a>(err: &sqlx::Error, tables: &'a [String]) -> &'a str {
    let first = tables.first().map(String::as_str).unwrap_or_default();
    let sqlx::Error::Database(db_err) = err else {
        return first;
    };
    if let Some(reported) = db_err.table() {
        if let Some(t) = tables.iter().find(|t| t.as_str() == reported) {
            return t;
        }
    }
    let message = db_err.message();
    tables
        .iter()
        .find(|t| {
            message.contains(&format!("\"{}\"", t)) || message.contains(&format!(".{}\"", t))
        })
        .map(String::as_str)
        .unwrap_or(first)
}

#[async_trait]
impl DatabaseBackend for PgBackend {
    async fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let start = Instant::now();

        // Extension-owned tables belong to the extension, not the application.
        let rows = sqlx::query(
            r#"
            SELECT
                c.relname::text AS name,
                GREATEST(c.reltuples, 0)::bigint AS estimated_rows
            FROM pg_class c
            JOIN pg_namespace n ON c.relnamespace = n.oid
            WHERE n.nspname = $1
                AND c.relkind IN ('r', 'p')
                AND NOT c.relispartition
                AND NOT EXISTS (
                    SELECT 1 FROM pg_depend d
                    WHERE d.objid = c.oid AND d.deptype = 'e'
                )
            ORDER BY c.relname
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let fk_rows = sqlx::query(
            r#"
            SELECT DISTINCT
                src.relname::text AS source_table,
                ref.relname::text AS reference_table
            FROM pg_constraint c
            JOIN pg_class src ON c.conrelid = src.oid
            JOIN pg_namespace sn ON src.relnamespace = sn.oid
            JOIN pg_class ref ON c.confrelid = ref.oid
            JOIN pg_namespace rn ON ref.relnamespace = rn.oid
            WHERE c.contype = 'f'
                AND sn.nspname = $1
                AND rn.nspname = $1
            ORDER BY 1, 2
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let pk_rows = sqlx::query(
            r#"
            SELECT
                c.relname::text AS table_name,
                a.attname::text AS column_name
            FROM pg_index i
            JOIN pg_class c ON i.indrelid = c.oid
            JOIN pg_namespace n ON c.relnamespace = n.oid
            JOIN pg_attribute a
                ON a.attrelid = c.oid AND a.attnum = ANY(i.indkey)
            WHERE i.indisprimary
                AND n.nspname = $1
            ORDER BY c.relname, array_position(i.indkey::int2[], a.attnum)
            "#,
        )
        .bind(&self.schema)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut references: HashMap<String, Vec<String>> = HashMap::new();
        for row in &fk_rows {
            let source: String = row.get("source_table");
            let reference: String = row.get("reference_table");
            references.entry(source).or_default().push(reference);
        }

        let mut primary_keys: HashMap<String, Vec<String>> = HashMap::new();
        for row in &pk_rows {
            let table: String = row.get("table_name");
            let column: String = row.get("column_name");
            primary_keys.entry(table).or_default().push(column);
        }

        let tables: Vec<TableInfo> = rows
            .iter()
            .map(|row| {
                let name: String = row.get("name");
                let estimated: i64 = row.get("estimated_rows");
                TableInfo {
                    references: references.remove(&name).unwrap_or_default(),
                    primary_key: primary_keys.remove(&name).unwrap_or_default(),
                    estimated_rows: estimated.max(0) as u64,
                    name,
                }
            })
            .collect();

        debug!(
            subsystem = "db",
            component = "postgres",
            op = "list_tables",
            environment = %self.environment,
            schema = %self.schema,
            table_count = tables.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Listed tables"
        );
        Ok(tables)
    }

    async fn read_rows(&self, table: &str, offset: u64, limit: usize) -> Result<Vec<Row>> {
        let qualified = self.qualified(table)?;
        let shape = self.shape(table).await?;

        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t ORDER BY {} LIMIT $1 OFFSET $2",
            qualified, shape.order_by
        );
        let rows: Vec<Json<Row>> = sqlx::query_scalar(&sql)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_table_error(table, e))?;

        trace!(
            subsystem = "db",
            component = "postgres",
            op = "read_rows",
            environment = %self.environment,
            db_table = table,
            offset,
            rows = rows.len(),
            "Read batch"
        );
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn write_rows(&self, table: &str, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let qualified = self.qualified(table)?;
        let shape = self.shape(table).await?;

        // OVERRIDING SYSTEM VALUE keeps source ids in GENERATED ALWAYS columns.
        let sql = format!(
            "INSERT INTO {q} ({cols}) OVERRIDING SYSTEM VALUE \
             SELECT {cols} FROM jsonb_populate_recordset(NULL::{q}, $1)",
            q = qualified,
            cols = shape.insert_columns
        );
        let result = sqlx::query(&sql)
            .bind(Json(rows))
            .execute(&self.pool)
            .await
            .map_err(|e| map_table_error(table, e))?;

        trace!(
            subsystem = "db",
            component = "postgres",
            op = "write_rows",
            environment = %self.environment,
            db_table = table,
            rows = result.rows_affected(),
            "Wrote batch"
        );
        Ok(result.rows_affected())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        self.truncate_many(&[table.to_string()]).await
    }

    async fn truncate_many(&self, tables: &[String]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let names = tables
            .iter()
            .map(|t| self.qualified(t))
            .collect::<Result<Vec<_>>>()?;

        // One statement, so FKs between the listed tables never block it.
        sqlx::query(&format!("TRUNCATE TABLE {}", names.join(", ")))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                let table = failing_table(&e, tables);
                let cause = map_table_error(table, e);
                Error::transfer(table, cause.to_string())
            })?;

        info!(
            subsystem = "db",
            component = "postgres",
            op = "truncate",
            environment = %self.environment,
            table_count = tables.len(),
            "Truncated target tables"
        );
        Ok(())
    }

    async fn has_privilege(&self, table: &str, privilege: Privilege) -> Result<bool> {
        let qualified = self.qualified(table)?;
        let granted: bool = sqlx::query_scalar("SELECT has_table_privilege($1, $2)")
            .bind(&qualified)
            .bind(privilege.as_sql())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_table_error(table, e))?;
        Ok(granted)
    }

    async fn finalize_table(&self, table: &str) -> Result<()> {
        let qualified = self.qualified(table)?;

        let sequences = sqlx::query(
            r#"
            SELECT
                a.attname::text AS column_name,
                pg_get_serial_sequence($1, a.attname) AS sequence_name
            FROM pg_attribute a
            WHERE a.attrelid = $1::regclass
                AND a.attnum > 0
                AND NOT a.attisdropped
                AND pg_get_serial_sequence($1, a.attname) IS NOT NULL
            "#,
        )
        .bind(&qualified)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_table_error(table, e))?;

        for row in &sequences {
            let column: String = row.get("column_name");
            let sequence: String = row.get("sequence_name");
            let col = quote_ident(&column);

            // Empty tables reset to 1 with is_called = false.
            sqlx::query(&format!(
                "SELECT setval($1::regclass, COALESCE(MAX({col}), 1), MAX({col}) IS NOT NULL) FROM {q}",
                col = col,
                q = qualified
            ))
            .bind(&sequence)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        }

        log_pool_metrics(&self.environment, &self.pool);

        if !sequences.is_empty() {
            debug!(
                subsystem = "db",
                component = "postgres",
                op = "finalize_table",
                environment = %self.environment,
                db_table = table,
                sequences = sequences.len(),
                "Sequences re-synced"
            );
        }
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "postgres"
    }
}

/// Connects environments to PostgreSQL using their credentials.
#[derive(Debug, Clone, Default)]
pub struct PgConnector {
    config: PoolConfig,
}

impl PgConnector {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl BackendConnector for PgConnector {
    async fn connect(&self, environment: &Environment) -> Result<Arc<dyn DatabaseBackend>> {
        if environment.name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "environment name is required".to_string(),
            ));
        }
        let schema = environment.schema();
        validate_schema_name(schema)?;

        let options = connect_options(&environment.credentials)?;
        let pool = create_pool(&environment.name, options, self.config.clone()).await?;

        Ok(Arc::new(PgBackend::new(pool, &environment.name, schema)))
    }
}
