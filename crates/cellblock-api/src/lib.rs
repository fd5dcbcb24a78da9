//! Protocol types for cellblockd IPC
//!
//! This crate defines the stable API between cellblockd and its clients
//! (the game host bridge and the admin CLI):
//! - Commands (requests from clients)
//! - Responses
//! - Events (service -> clients), including host directives
//! - Shared views of prisoners and jails

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
