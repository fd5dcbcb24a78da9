//! Event types for cellblockd -> client streaming

use chrono::{DateTime, Local};
use cellblock_util::{JailName, SubjectId};
use serde::{Deserialize, Serialize};

use crate::{Executor, JailView, Location, PrisonerView, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: cellblock_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A subject was jailed or moved to another jail
    PlayerJailed { prisoner: PrisonerView },

    /// A prisoner was released (snapshot taken before release)
    PlayerReleased { prisoner: PrisonerView },

    /// A jail was created or relocated
    JailCreated { jail: JailView },

    /// A jail was deleted
    JailDeleted { name: JailName },

    /// A full save pass finished
    DataSaved {
        prisoner_count: usize,
        jail_count: usize,
    },

    /// Configuration and persisted state were reloaded
    ConfigReloaded {
        prisoner_count: usize,
        jail_count: usize,
    },

    // Host directives: the game host acts on these

    /// Move a connected subject
    TeleportRequested {
        subject: SubjectId,
        location: Location,
    },

    /// Run a configured side-effect command
    SubcommandDispatched {
        subject: SubjectId,
        executor: Executor,
        command: String,
    },

    /// Change a subject's permission groups
    GroupChangeRequested {
        subject: SubjectId,
        add: Vec<String>,
        remove: Vec<String>,
    },

    /// Service is shutting down
    Shutdown,
}
