//! Persistence layer for cellblockd
//!
//! Provides:
//! - Versioned prisoner and jail documents
//! - Schema migration from every earlier document version
//! - SQLite document store
//! - Single-writer storage gateway with ordered, awaitable operations

mod gateway;
mod migrate;
mod record;
mod sqlite;
mod traits;

pub use gateway::*;
pub use migrate::*;
pub use record::*;
pub use sqlite::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} of {total} records failed to save", failed.len())]
    Partial { failed: Vec<String>, total: usize },

    #[error("Storage gateway is closed")]
    Closed,

    #[error("Storage operation cancelled at shutdown")]
    Cancelled,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
