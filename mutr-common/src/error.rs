//! Common error types for MUTR services

use thiserror::Error;

/// Common result type for MUTR operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across MUTR services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A status transition was attempted from the wrong state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite reported lock contention ("database is locked" / busy)
    pub fn is_lock_contention(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}
