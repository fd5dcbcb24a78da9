//! Host interface traits for cellblockd
//!
//! This crate defines the interface between the prisoner engine and the game
//! host it runs against: who is online and where, how to move them, how to
//! change their permission groups, and where to send notifications. It
//! contains no host-specific code itself.

mod mock;
mod null;
mod traits;

pub use mock::*;
pub use null::*;
pub use traits::*;
