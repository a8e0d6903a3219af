//! # dbclone-core
//!
//! Core types, traits, and abstractions for the environment cloner.
//!
//! This crate provides the data model (environments, clone operations,
//! validation results), the error taxonomy, and the traits other crates
//! implement for the hosted database and the session service.
//!
//! ## Log Level Contract
//!
//! Every crate logs with `tracing` using the same structured field names:
//! `subsystem` ("api", "db", "jobs"), `component`, `op`, `operation_id`,
//! `environment`, `db_table`, `rows` and `duration_ms`.
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Operation failed, requires operator attention (inspect target) |
//! | WARN  | Recoverable issue (batch retry, cycle in FK graph, slow call) |
//! | INFO  | Lifecycle events (startup, operation start/finish, table done) |
//! | DEBUG | Decision points (table order, truncation, validation steps) |
//! | TRACE | Per-batch reads and writes |
//!
//! Credentials are never passed to any log macro; only environment names are.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
