//! Common error types for the flyer services

use thiserror::Error;

/// Common result type for flyer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the flyer crates
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
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

    /// Write refused because the row is no longer in the state it requires
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the underlying database reported lock contention
    ///
    /// Used by the write retry helper to decide whether an attempt may be repeated.
    pub fn is_database_locked(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
