//! Error types for storage operations
//!
//! These errors stay inside the crate: the services turn every store failure
//! into a gate degradation and carry on from memory.

use thiserror::Error;

/// Storage layer error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Core domain error: {0}")]
    Core(#[from] banking_mcp_core::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl Error {
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        Self::Unavailable(reason.into())
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Database(_) => "database",
            Error::Migration(_) => "migration",
            Error::Serialization(_) => "serialization",
            Error::Core(_) => "core",
            Error::Unavailable(_) => "unavailable",
        }
    }
}

/// Convenience result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;
