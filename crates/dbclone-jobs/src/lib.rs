//! # dbclone-jobs
//!
//! Clone orchestration for the environment cloner.
//!
//! This crate provides:
//! - Connection validation with classified failures and dry privilege checks
//! - Dependency-aware table planning
//! - A batched, cancellable table copy pipeline
//! - The orchestrator that registers, runs, and reports clone operations
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dbclone_jobs::{ClonerOrchestrator, OrchestratorConfig, CloneOptions};
//! use dbclone_db::{PgConnector, PoolConfig};
//!
//! let orchestrator = Arc::new(ClonerOrchestrator::new(
//!     Arc::new(PgConnector::new(PoolConfig::default())),
//!     OrchestratorConfig::from_env(),
//! ));
//! let _sweeper = orchestrator.spawn_sweeper();
//!
//! let id = orchestrator
//!     .start_clone(production, development, CloneOptions::default())
//!     .await?;
//!
//! let mut events = orchestrator.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! ```

pub mod config;
pub mod orchestrator;
pub mod ordering;
pub mod pipeline;
pub mod validator;

// Re-export core types
pub use dbclone_core::*;

pub use config::OrchestratorConfig;
pub use orchestrator::{CloneEvent, ClonerOrchestrator};
pub use ordering::{dependency_order, plan_tables};
pub use pipeline::{
    CopyObserver, NoopObserver, PipelineOutcome, PipelineSettings, TableCopyPipeline, TableOutcome,
};
pub use validator::{AccessRequirements, ConnectionValidator};
