//! Error types for the environment cloner.

use thiserror::Error;

/// Result type alias using the cloner's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cloner operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Required credential fields are missing or malformed
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Database unreachable (network failure, DNS, timeout while connecting)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Database rejected the supplied credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Connected, but the role lacks a required privilege
    #[error("Permission error: {0}")]
    Permission(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Copying a specific table failed
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// A backend call produced no result within the stall timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled cooperatively
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a Transfer error for a table.
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// The table an error is attributed to, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Error::Transfer { table, .. } => Some(table),
            _ => None,
        }
    }

    /// Whether this error is the cooperative-cancellation marker.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // URLs stay out of error text; query strings may carry tokens.
        Error::Request(e.without_url().to_string())
    }
}
