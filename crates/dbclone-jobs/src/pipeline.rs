//! Table copy pipeline.
//!
//! Copies planned tables from a source backend to a target backend in
//! batches. Cancellation is cooperative: the token is checked before every
//! read and before every write, so an in-flight batch always finishes.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use dbclone_core::{DatabaseBackend, Error, Result, Row, TableCopyResult, TableInfo};

use crate::config::OrchestratorConfig;

/// Receives pipeline progress as it happens.
#[async_trait]
pub trait CopyObserver: Send + Sync {
    /// A table is about to be read.
    async fn table_started(&self, table: &str);

    /// A batch of `rows` was written to `table`.
    async fn rows_copied(&self, table: &str, rows: u64);

    /// A table finished; `result.error` is set unless it was copied fully.
    async fn table_finished(&self, result: &TableCopyResult);
}

/// Observer that ignores everything.
pub struct NoopObserver;

#[async_trait]
impl CopyObserver for NoopObserver {
    async fn table_started(&self, _table: &str) {}
    async fn rows_copied(&self, _table: &str, _rows: u64) {}
    async fn table_finished(&self, _result: &TableCopyResult) {}
}

/// Result of copying one table.
#[derive(Debug)]
pub enum TableOutcome {
    Copied(TableCopyResult),
    Failed(TableCopyResult, Error),
    Cancelled(TableCopyResult),
}

impl TableOutcome {
    pub fn result(&self) -> &TableCopyResult {
        match self {
            TableOutcome::Copied(r) | TableOutcome::Failed(r, _) | TableOutcome::Cancelled(r) => r,
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed,
    Failed { error: Error, table: Option<String> },
    Cancelled,
}

/// Batch size and resilience settings for one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub batch_size: usize,
    pub write_retries: u32,
    pub write_retry_delay: Duration,
    pub stall_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &OrchestratorConfig, batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            write_retries: config.write_retries,
            write_retry_delay: config.write_retry_delay,
            stall_timeout: config.stall_timeout,
        }
    }
}

/// Copies tables between two connected environments.
pub struct TableCopyPipeline {
    source: Arc<dyn DatabaseBackend>,
    target: Arc<dyn DatabaseBackend>,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl TableCopyPipeline {
    pub fn new(
        source: Arc<dyn DatabaseBackend>,
        target: Arc<dyn DatabaseBackend>,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            target,
            settings,
            cancel,
        }
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a backend call under the stall timeout.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.settings.stall_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{} made no progress within {}ms",
                what,
                self.settings.stall_timeout.as_millis()
            ))),
        }
    }

    /// Copy every table in order, truncating the target first when asked.
    pub async fn run(
        &self,
        tables: &[TableInfo],
        truncate_first: bool,
        observer: &dyn CopyObserver,
    ) -> PipelineOutcome {
        if truncate_first {
            if self.cancel.is_cancelled() {
                return PipelineOutcome::Cancelled;
            }
            if let Err(error) = self.truncate_targets(tables).await {
                if error.is_cancelled() {
                    return PipelineOutcome::Cancelled;
                }
                // Targets are truncated in reverse order.
                let table = error
                    .table()
                    .map(str::to_string)
                    .or_else(|| tables.last().map(|t| t.name.clone()));
                return PipelineOutcome::Failed { error, table };
            }
        }

        for table in tables {
            match self.copy_table(table, observer).await {
                TableOutcome::Copied(_) => {}
                TableOutcome::Failed(result, error) => {
                    return PipelineOutcome::Failed {
                        error,
                        table: Some(result.table_name),
                    };
                }
                TableOutcome::Cancelled(_) => return PipelineOutcome::Cancelled,
            }
        }

        PipelineOutcome::Completed
    }

    /// Truncate all planned target tables, dependents first, in one call.
    pub async fn truncate_targets(&self, tables: &[TableInfo]) -> Result<()> {
        let names: Vec<String> = tables.iter().rev().map(|t| t.name.clone()).collect();
        debug!(
            subsystem = "jobs",
            component = "pipeline",
            op = "truncate",
            table_count = names.len(),
            "Truncating target tables"
        );
        self.bounded("truncate", self.target.truncate_many(&names))
            .await
    }

    /// Copy one table and report it to the observer.
    pub async fn copy_table(&self, table: &TableInfo, observer: &dyn CopyObserver) -> TableOutcome {
        let start = Instant::now();
        let name = table.name.as_str();
        observer.table_started(name).await;

        let mut copied: u64 = 0;
        let result = self.copy_rows(name, observer, &mut copied).await;
        let result = match result {
            Ok(()) => self.bounded("finalize", self.target.finalize_table(name)).await,
            Err(e) => Err(e),
        };

        let mut report = TableCopyResult {
            table_name: name.to_string(),
            rows_copied: copied,
            duration_ms: start.elapsed().as_millis() as u64,
            error: None,
        };

        let outcome = match result {
            Ok(()) => {
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    op = "copy_table",
                    db_table = name,
                    rows = copied,
                    duration_ms = report.duration_ms,
                    "Table copied"
                );
                TableOutcome::Copied(report)
            }
            Err(error) if error.is_cancelled() => {
                report.error = Some(error.to_string());
                info!(
                    subsystem = "jobs",
                    component = "pipeline",
                    db_table = name,
                    rows = copied,
                    "Table copy cancelled"
                );
                TableOutcome::Cancelled(report)
            }
            Err(error) => {
                report.error = Some(error.to_string());
                warn!(
                    subsystem = "jobs",
                    component = "pipeline",
                    op = "copy_table",
                    db_table = name,
                    rows = copied,
                    error = %error,
                    "Table copy failed"
                );
                TableOutcome::Failed(report, error)
            }
        };

        observer.table_finished(outcome.result()).await;
        outcome
    }

    async fn copy_rows(
        &self,
        table: &str,
        observer: &dyn CopyObserver,
        copied: &mut u64,
    ) -> Result<()> {
        let batch_size = self.settings.batch_size;
        let mut offset: u64 = 0;

        loop {
            self.check_cancelled()?;
            let rows = self
                .bounded("read", self.source.read_rows(table, offset, batch_size))
                .await?;
            if rows.is_empty() {
                break;
            }

            self.check_cancelled()?;
            let written = self.write_with_retry(table, &rows).await?;

            offset += rows.len() as u64;
            *copied += written;
            observer.rows_copied(table, written).await;
            trace!(
                subsystem = "jobs",
                component = "pipeline",
                db_table = table,
                offset,
                rows = written,
                "Batch copied"
            );

            if rows.len() < batch_size {
                break;
            }
        }

        Ok(())
    }

    /// Write one batch, retrying transient failures with linear backoff.
    async fn write_with_retry(&self, table: &str, rows: &[Row]) -> Result<u64> {
        let mut attempt: u32 = 0;
        loop {
            match self.bounded("write", self.target.write_rows(table, rows)).await {
                Ok(written) => return Ok(written),
                Err(e) if attempt < self.settings.write_retries && is_retryable(&e) => {
                    attempt += 1;
                    let delay = self.settings.write_retry_delay * attempt;
                    warn!(
                        subsystem = "jobs",
                        component = "pipeline",
                        db_table = table,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch write failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors worth another attempt; a rejected batch stays rejected.
fn is_retryable(err: &Error) -> bool {
    matches!(
        err,
        Error::Database(_) | Error::Connection(_) | Error::Internal(_) | Error::Request(_)
    )
}
