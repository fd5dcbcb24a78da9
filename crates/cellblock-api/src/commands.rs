//! Command types for the cellblockd protocol

use cellblock_util::{ClientId, JailName, SubjectId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{Actor, JailView, Location, PrisonerView, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    JailNotFound,
    NotJailed,
    InvalidDuration,
    PermissionDenied,
    StorageError,
    ConfigError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Jail (or re-jail) a subject
    Jail {
        subject: SubjectId,
        jail: JailName,
        duration: Duration,
        #[serde(default)]
        jailer: Actor,
        reason: Option<String>,
    },

    /// Release a prisoner
    Unjail {
        subject: SubjectId,
        #[serde(default)]
        actor: Actor,
    },

    /// Look up one prisoner
    Info { subject: SubjectId },

    /// List every prisoner
    ListPrisoners,

    /// List every jail
    ListJails,

    /// Create a jail, or move an existing one
    SetJail { name: JailName, location: Location },

    /// Delete a jail
    DelJail { name: JailName },

    /// Save, re-read configuration and reload persisted state
    Reload,

    /// Persist every prisoner and jail now
    Save,

    // Presence reports from the game host

    PlayerConnected {
        subject: SubjectId,
        name: Option<String>,
        location: Location,
        #[serde(default)]
        primary_group: Option<String>,
        #[serde(default)]
        parent_groups: Vec<String>,
    },

    PlayerMoved {
        subject: SubjectId,
        location: Location,
    },

    PlayerDisconnected {
        subject: SubjectId,
        location: Option<Location>,
    },

    /// Where a respawning subject must reappear, if jailed
    Respawn { subject: SubjectId },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Whether the command only reads state
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Command::Info { .. }
                | Command::ListPrisoners
                | Command::ListJails
                | Command::SubscribeEvents
                | Command::UnsubscribeEvents
                | Command::Ping
        )
    }

    /// Host reports about who is online and where
    pub fn is_presence_report(&self) -> bool {
        matches!(
            self,
            Command::PlayerConnected { .. }
                | Command::PlayerMoved { .. }
                | Command::PlayerDisconnected { .. }
                | Command::Respawn { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Jailed { prisoner: PrisonerView },
    Released { changed: bool },
    Prisoner { prisoner: Option<PrisonerView> },
    Prisoners { prisoners: Vec<PrisonerView> },
    Jails { jails: Vec<JailView> },
    JailSet { jail: JailView },
    JailDeleted,
    Reloaded {
        prisoner_count: usize,
        jail_count: usize,
    },
    Saved {
        prisoner_count: usize,
        jail_count: usize,
    },
    PresenceUpdated,
    RespawnAt { location: Option<Location> },
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Pong,
}

/// Role of a connected client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Root or the daemon's own user: may mutate state
    Admin,
    /// Anyone else: queries and presence reports only
    Observer,
}

impl ClientRole {
    pub fn may_issue(&self, command: &Command) -> bool {
        match self {
            ClientRole::Admin => true,
            ClientRole::Observer => command.is_read_only() || command.is_presence_report(),
        }
    }
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
