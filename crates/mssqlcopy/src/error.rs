//! Error types for the copy library.

use thiserror::Error;

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum CopyError {
    /// Configuration error (missing fields, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Query filter could not be parsed.
    #[error("Filter error: {0}")]
    Filter(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Store(#[from] tiberius::error::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Schema could not be read for a table.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Source and target schemas differ for a table.
    #[error("Schema mismatch between source and target for table {table}")]
    SchemaMismatch { table: String },

    /// Data transfer failed for a specific table.
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// Progress monitor protocol violation.
    #[error("Monitor error: {0}")]
    Monitor(String),

    /// IO error (terminal output).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The job deadline fired or the user cancelled.
    #[error("Copy cancelled")]
    Cancelled,
}

impl CopyError {
    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        CopyError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transfer error.
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        CopyError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, CopyError>;
