//! Clone orchestrator: owns the operation registry and runs each clone in a
//! supervised background task.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use dbclone_core::{
    BackendConnector, CloneOperation, CloneOptions, Environment, EnvironmentRole, Error,
    OperationError, OperationStatus, Result, TableCopyResult,
};

use crate::config::OrchestratorConfig;
use crate::ordering::plan_tables;
use crate::pipeline::{CopyObserver, PipelineOutcome, PipelineSettings, TableCopyPipeline};
use crate::validator::{AccessRequirements, ConnectionValidator};

/// Event emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum CloneEvent {
    /// The pipeline passed validation and started copying.
    OperationStarted {
        operation_id: Uuid,
        tables_total: usize,
    },
    /// A table copy began.
    TableStarted { operation_id: Uuid, table: String },
    /// A batch was written.
    Progress {
        operation_id: Uuid,
        table: String,
        rows_copied: u64,
    },
    /// A table finished, successfully or not.
    TableCompleted {
        operation_id: Uuid,
        result: TableCopyResult,
    },
    /// The operation reached a terminal status.
    OperationFinished {
        operation_id: Uuid,
        status: OperationStatus,
    },
}

struct Entry {
    operation: CloneOperation,
    cancel: CancellationToken,
}

type Registry = Arc<RwLock<HashMap<Uuid, Entry>>>;

/// Starts, tracks, and cancels clone operations.
///
/// Operations live in memory only and are lost on restart.
pub struct ClonerOrchestrator {
    registry: Registry,
    validator: ConnectionValidator,
    config: OrchestratorConfig,
    event_tx: broadcast::Sender<CloneEvent>,
}

impl ClonerOrchestrator {
    /// Create an orchestrator that opens environments through `connector`.
    pub fn new(connector: Arc<dyn BackendConnector>, config: OrchestratorConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        let validator =
            ConnectionValidator::new(connector).with_connect_timeout(config.connect_timeout);
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            validator,
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Validator sharing this orchestrator's connector and timeouts.
    pub fn validator(&self) -> &ConnectionValidator {
        &self.validator
    }

    /// Get a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<CloneEvent> {
        self.event_tx.subscribe()
    }

    /// Register a clone and start it in the background.
    ///
    /// Returns as soon as the `pending` record exists; connection, validation
    /// and copying all happen in the spawned task.
    pub async fn start_clone(
        &self,
        source: Environment,
        target: Environment,
        mut options: CloneOptions,
    ) -> Result<Uuid> {
        if source.name.trim().is_empty() || target.name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "source and target environments must be named".to_string(),
            ));
        }
        options.validate()?;
        if source.credentials.same_database(&target.credentials)
            && source.schema() == target.schema()
        {
            return Err(Error::InvalidInput(
                "source and target must be different databases".to_string(),
            ));
        }

        let source = source.with_role(EnvironmentRole::Source);
        let target = target.with_role(EnvironmentRole::Target);
        options
            .batch_size
            .get_or_insert(self.config.default_batch_size);

        let id = Uuid::now_v7();
        let cancel = CancellationToken::new();
        let operation = CloneOperation::new(id, source.to_ref(), target.to_ref(), options.clone());

        self.registry.write().await.insert(
            id,
            Entry {
                operation,
                cancel: cancel.clone(),
            },
        );

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "start_clone",
            operation_id = %id,
            source = %source.name,
            target = %target.name,
            truncate_first = options.truncate_first,
            "Clone operation registered"
        );

        let run = OperationRun {
            id,
            registry: self.registry.clone(),
            validator: self.validator.clone(),
            config: self.config.clone(),
            event_tx: self.event_tx.clone(),
            cancel,
        };
        tokio::spawn(run.supervise(source, target, options));

        Ok(id)
    }

    /// Snapshot of an operation, or `None` for unknown ids.
    pub async fn get_operation_status(&self, id: Uuid) -> Option<CloneOperation> {
        self.registry
            .read()
            .await
            .get(&id)
            .map(|entry| entry.operation.clone())
    }

    /// Request cancellation. Returns `false` for unknown or finished
    /// operations; the pipeline records `cancelled` once it observes the
    /// request.
    pub async fn cancel_operation(&self, id: Uuid) -> bool {
        let mut registry = self.registry.write().await;
        match registry.get_mut(&id) {
            Some(entry) if !entry.operation.is_terminal() => {
                entry.operation.cancel_requested = true;
                entry.cancel.cancel();
                info!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    op = "cancel",
                    operation_id = %id,
                    status = %entry.operation.status,
                    "Cancellation requested"
                );
                true
            }
            Some(entry) => {
                debug!(
                    operation_id = %id,
                    status = %entry.operation.status,
                    "Cancel ignored for finished operation"
                );
                false
            }
            None => false,
        }
    }

    /// Snapshots of all retained operations, newest first.
    pub async fn list_operations(&self) -> Vec<CloneOperation> {
        let mut operations: Vec<CloneOperation> = self
            .registry
            .read()
            .await
            .values()
            .map(|entry| entry.operation.clone())
            .collect();
        operations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        operations
    }

    /// Drop finished operations older than the retention period.
    pub async fn purge_finished(&self) -> usize {
        let retention = self.config.retention;
        let now = Utc::now();
        let mut registry = self.registry.write().await;
        let before = registry.len();

        registry.retain(|_, entry| match entry.operation.finished_at {
            Some(finished) if entry.operation.is_terminal() => (now - finished)
                .to_std()
                .map(|age| age < retention)
                .unwrap_or(true),
            _ => true,
        });

        let purged = before - registry.len();
        if purged > 0 {
            debug!(
                subsystem = "jobs",
                component = "orchestrator",
                op = "purge",
                purged,
                remaining = registry.len(),
                "Purged finished operations"
            );
        }
        purged
    }

    /// Periodically purge finished operations until the task is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let period = orchestrator.config.sweep_interval.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                orchestrator.purge_finished().await;
            }
        })
    }
}

/// Everything one background operation needs, detached from the orchestrator.
#[derive(Clone)]
struct OperationRun {
    id: Uuid,
    registry: Registry,
    validator: ConnectionValidator,
    config: OrchestratorConfig,
    event_tx: broadcast::Sender<CloneEvent>,
    cancel: CancellationToken,
}

impl OperationRun {
    /// Run the clone in its own task and turn a panic into `failed`.
    async fn supervise(self, source: Environment, target: Environment, options: CloneOptions) {
        let worker = self.clone();
        let handle = tokio::spawn(async move {
            let start = Instant::now();
            let outcome = worker.execute(&source, &target, &options).await;
            worker.finish(outcome, start).await;
        });

        if let Err(e) = handle.await {
            error!(
                subsystem = "jobs",
                component = "orchestrator",
                operation_id = %self.id,
                error = ?e,
                "Clone task panicked"
            );
            self.finish(
                PipelineOutcome::Failed {
                    error: Error::Internal("clone task panicked".to_string()),
                    table: None,
                },
                Instant::now(),
            )
            .await;
        }
    }

    /// Run one pre-copy step under the stall timeout, abandoning it as soon
    /// as cancellation is requested.
    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.config.stall_timeout, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "{} made no progress within {}ms",
                    what,
                    self.config.stall_timeout.as_millis()
                ))),
            },
        }
    }

    /// Connect, plan, validate, then copy.
    async fn execute(
        &self,
        source: &Environment,
        target: &Environment,
        options: &CloneOptions,
    ) -> PipelineOutcome {
        // A step that fails after cancellation was requested ends `cancelled`.
        let failed = |error: Error| {
            if error.is_cancelled() || self.cancel.is_cancelled() {
                PipelineOutcome::Cancelled
            } else {
                PipelineOutcome::Failed { error, table: None }
            }
        };

        if self.cancel.is_cancelled() {
            return PipelineOutcome::Cancelled;
        }

        let source_backend = match self
            .bounded("connect source", self.validator.connect(source))
            .await
        {
            Ok(b) => b,
            Err(e) => return failed(e),
        };
        let target_backend = match self
            .bounded("connect target", self.validator.connect(target))
            .await
        {
            Ok(b) => b,
            Err(e) => return failed(e),
        };

        let available = match self
            .bounded("list tables", source_backend.list_tables())
            .await
        {
            Ok(tables) => tables,
            Err(e) => return failed(e),
        };
        let planned = match plan_tables(&available, options) {
            Ok(planned) => planned,
            Err(e) => return failed(e),
        };
        let names: Vec<String> = planned.iter().map(|t| t.name.clone()).collect();

        debug!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "plan",
            operation_id = %self.id,
            table_count = names.len(),
            tables = %names.join(","),
            "Table order planned"
        );

        let source_reqs =
            AccessRequirements::for_role(EnvironmentRole::Source).with_tables(names.clone());
        let target_reqs = AccessRequirements::for_role(EnvironmentRole::Target)
            .with_tables(names)
            .with_truncate(options.truncate_first);

        for (backend, reqs) in [
            (&source_backend, &source_reqs),
            (&target_backend, &target_reqs),
        ] {
            let checked = self
                .bounded("validate", async {
                    self.validator
                        .check_backend(backend.as_ref(), reqs)
                        .await
                        .map_err(|(e, _)| e)
                })
                .await;
            if let Err(e) = checked {
                return failed(e);
            }
        }

        if self.cancel.is_cancelled() {
            return PipelineOutcome::Cancelled;
        }

        let rows_estimated: u64 = planned.iter().map(|t| t.estimated_rows).sum();
        let tables_total = planned.len();
        let started = self
            .update(|op| {
                if op.transition(OperationStatus::Running) {
                    op.progress.tables_total = tables_total;
                    op.progress.rows_estimated = rows_estimated;
                    true
                } else {
                    false
                }
            })
            .await
            .unwrap_or(false);
        if !started {
            return PipelineOutcome::Cancelled;
        }

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            op = "run",
            operation_id = %self.id,
            table_count = tables_total,
            rows_estimated,
            "Clone operation running"
        );
        let _ = self.event_tx.send(CloneEvent::OperationStarted {
            operation_id: self.id,
            tables_total,
        });

        let batch_size = options.effective_batch_size(self.config.default_batch_size);
        let pipeline = TableCopyPipeline::new(
            source_backend,
            target_backend,
            PipelineSettings::from_config(&self.config, batch_size),
            self.cancel.clone(),
        );
        pipeline.run(&planned, options.truncate_first, self).await
    }

    /// Record the terminal status. A no-op if the operation already finished.
    async fn finish(&self, outcome: PipelineOutcome, start: Instant) {
        let duration_ms = start.elapsed().as_millis() as u64;
        let (status, error) = match outcome {
            PipelineOutcome::Completed => (OperationStatus::Completed, None),
            PipelineOutcome::Cancelled => (OperationStatus::Cancelled, None),
            PipelineOutcome::Failed { error, table } => (
                OperationStatus::Failed,
                Some(OperationError {
                    message: error.to_string(),
                    table,
                }),
            ),
        };

        let snapshot = self
            .update(|op| {
                if !op.transition(status) {
                    return None;
                }
                op.error = error.clone();
                Some((op.progress.tables_completed, op.progress.rows_copied))
            })
            .await
            .flatten();

        let Some((tables_completed, rows_copied)) = snapshot else {
            return;
        };

        match &error {
            Some(err) => error!(
                subsystem = "jobs",
                component = "orchestrator",
                op = "finish",
                operation_id = %self.id,
                status = %status,
                db_table = err.table.as_deref().unwrap_or(""),
                error = %err.message,
                tables_completed,
                rows_copied,
                duration_ms,
                "Clone operation failed; target may hold a partial copy"
            ),
            None => info!(
                subsystem = "jobs",
                component = "orchestrator",
                op = "finish",
                operation_id = %self.id,
                status = %status,
                tables_completed,
                rows_copied,
                duration_ms,
                "Clone operation finished"
            ),
        }

        let _ = self.event_tx.send(CloneEvent::OperationFinished {
            operation_id: self.id,
            status,
        });
    }

    /// Apply `f` to this run's operation under the registry write lock.
    async fn update<T>(&self, f: impl FnOnce(&mut CloneOperation) -> T) -> Option<T> {
        let mut registry = self.registry.write().await;
        match registry.get_mut(&self.id) {
            Some(entry) => Some(f(&mut entry.operation)),
            None => {
                warn!(operation_id = %self.id, "Operation vanished from registry");
                None
            }
        }
    }
}

#[async_trait]
impl CopyObserver for OperationRun {
    async fn table_started(&self, table: &str) {
        self.update(|op| {
            op.update_progress(|p| p.current_table = Some(table.to_string()));
        })
        .await;
        let _ = self.event_tx.send(CloneEvent::TableStarted {
            operation_id: self.id,
            table: table.to_string(),
        });
    }

    async fn rows_copied(&self, table: &str, rows: u64) {
        let total = self
            .update(|op| {
                op.update_progress(|p| p.rows_copied += rows);
                op.progress.rows_copied
            })
            .await
            .unwrap_or(0);
        let _ = self.event_tx.send(CloneEvent::Progress {
            operation_id: self.id,
            table: table.to_string(),
            rows_copied: total,
        });
    }

    async fn table_finished(&self, result: &TableCopyResult) {
        self.update(|op| {
            op.table_results.push(result.clone());
            if result.error.is_none() {
                op.update_progress(|p| {
                    p.tables_completed += 1;
                    p.current_table = None;
                });
            }
        })
        .await;
        let _ = self.event_tx.send(CloneEvent::TableCompleted {
            operation_id: self.id,
            result: result.clone(),
        });
    }
}
