//! IPC layer for cellblockd
//!
//! Provides:
//! - Unix domain socket server shared by the game host bridge and admin tools
//! - NDJSON (newline-delimited JSON) protocol
//! - Event fan-out to subscribed connections
//! - Peer UID roles

mod client;
mod hub;
mod server;

pub use client::*;
pub use hub::*;
pub use server::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Reply to request {0} arrived out of order")]
    UnexpectedReply(u64),
}

pub type IpcResult<T> = Result<T, IpcError>;
