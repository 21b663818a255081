//! Common error types for ACP

use thiserror::Error;

/// Common result type for ACP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across ACP crates
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

    /// Invalid input or rejected mutation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation later may succeed.
    ///
    /// SQLite lock contention, pool exhaustion and I/O hiccups are transient.
    /// Constraint violations, missing rows and decoding problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(err) => is_transient_sqlx(err),
            Error::Io(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => {
            let message = db_err.message();
            message.contains("database is locked") || message.contains("database is busy")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(Error::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_row_not_found_is_permanent() {
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_transient());
    }

    #[test]
    fn test_io_is_transient() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_domain_errors_are_permanent() {
        assert!(!Error::NotFound("membership 1".to_string()).is_transient());
        assert!(!Error::InvalidInput("bad".to_string()).is_transient());
        assert!(!Error::Config("bad".to_string()).is_transient());
    }
}
