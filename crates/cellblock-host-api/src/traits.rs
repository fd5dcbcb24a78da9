//! Host interface traits

use async_trait::async_trait;
use cellblock_api::{Actor, Event, Executor, Location};
use cellblock_util::SubjectId;
use std::sync::Arc;
use thiserror::Error;

/// Errors from host operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Teleport failed: {0}")]
    TeleportFailed(String),

    #[error("No host connected")]
    NoHost,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Errors from the permission backend
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("Permission backend does not support group changes")]
    Unsupported,

    #[error("Unknown subject {0}")]
    UnknownSubject(SubjectId),

    #[error("Permission backend failed: {0}")]
    Backend(String),
}

pub type PermissionResult<T> = Result<T, PermissionError>;

/// Who is connected, and where
pub trait Presence: Send + Sync {
    fn is_connected(&self, subject: SubjectId) -> bool;

    /// Current location of a connected subject
    fn location(&self, subject: SubjectId) -> Option<Location>;

    /// Last known display name
    fn name(&self, subject: SubjectId) -> Option<String>;
}

/// Moves connected subjects
#[async_trait]
pub trait Teleporter: Send + Sync {
    /// Best-effort teleport; `Ok(false)` when the host declined
    async fn teleport(&self, subject: SubjectId, location: &Location) -> HostResult<bool>;
}

/// Permission group backend
#[async_trait]
pub trait PermissionInterface: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// True for the backend that supports nothing; its failures are not logged
    fn is_null(&self) -> bool {
        false
    }

    async fn fetch_primary_group(&self, subject: SubjectId) -> PermissionResult<Option<String>>;

    async fn fetch_parent_groups(&self, subject: SubjectId) -> PermissionResult<Vec<String>>;

    /// Move the subject into the configured prisoner group
    async fn set_prisoner_group(&self, subject: SubjectId, actor: &Actor) -> PermissionResult<()>;

    /// Restore the groups captured at jailing time
    async fn set_parent_groups(
        &self,
        subject: SubjectId,
        groups: &[String],
        actor: &Actor,
    ) -> PermissionResult<()>;
}

/// Runs configured side-effect commands
pub trait SubcommandRunner: Send + Sync {
    /// `command` has its placeholders filled already
    fn dispatch(&self, subject: SubjectId, executor: Executor, command: String);
}

/// Fire-and-forget event sink
pub trait EventNotifier: Send + Sync {
    fn notify(&self, event: Event);
}

/// Everything the engine needs from its host
#[derive(Clone)]
pub struct HostServices {
    pub presence: Arc<dyn Presence>,
    pub teleporter: Arc<dyn Teleporter>,
    pub permissions: Arc<dyn PermissionInterface>,
    pub subcommands: Arc<dyn SubcommandRunner>,
    pub notifier: Arc<dyn EventNotifier>,
}
