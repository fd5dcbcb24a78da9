//! Shared utilities for cellblock
//!
//! This crate provides:
//! - ID types (SubjectId, JailName, ClientId)
//! - Time utilities (wall-clock `now()` with mock support, duration parsing and formatting)
//! - Default paths for socket, data, and config files

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
