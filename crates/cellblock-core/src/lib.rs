//! Prisoner lifecycle engine for cellblockd
//!
//! This crate is the heart of cellblockd, containing:
//! - Sentence clocks (frozen remaining time vs. absolute deadline)
//! - The jail registry
//! - The prisoner registry: jail, release, sweep, connect/disconnect transitions
//! - Typed event publishing

mod jails;
mod prisoner;
mod publish;
mod registry;
mod sentence;

pub use jails::*;
pub use prisoner::*;
pub use publish::*;
pub use registry::*;
pub use sentence::*;

use cellblock_util::JailName;
use thiserror::Error;

/// Errors from registry operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("No jail named '{0}'")]
    JailNotFound(JailName),

    #[error("Sentence duration must be greater than zero and at most 100 years")]
    InvalidDuration,
}

pub type CoreResult<T> = Result<T, CoreError>;
