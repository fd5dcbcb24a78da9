//! Host services backed by IPC
//!
//! The game host reports presence over the socket and acts on directive
//! events it receives back. Everything here is what the prisoner engine sees
//! of that host.

use async_trait::async_trait;
use cellblock_api::{Actor, Event, EventPayload, Executor, Location};
use cellblock_ipc::EventHub;
use cellblock_config::GroupPolicy;
use cellblock_host_api::{
    EventNotifier, HostResult, HostServices, NullPermissions, PermissionError,
    PermissionInterface, PermissionResult, Presence, SubcommandRunner, Teleporter,
};
use cellblock_util::SubjectId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// A connected subject as last reported by the host
#[derive(Debug, Clone)]
pub struct OnlinePlayer {
    pub name: Option<String>,
    pub location: Location,
    pub primary_group: Option<String>,
    pub parent_groups: Vec<String>,
}

/// Who the host says is online
#[derive(Default)]
pub struct PlayerTable {
    players: RwLock<HashMap<SubjectId, OnlinePlayer>>,
}

impl PlayerTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect(&self, subject: SubjectId, player: OnlinePlayer) {
        self.players
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subject, player);
    }

    pub fn move_to(&self, subject: SubjectId, location: Location) {
        let mut players = self.players.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(player) = players.get_mut(&subject) {
            player.location = location;
        }
    }

    pub fn disconnect(&self, subject: SubjectId) -> Option<OnlinePlayer> {
        self.players
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subject)
    }

    pub fn get(&self, subject: SubjectId) -> Option<OnlinePlayer> {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&subject)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.players.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Presence for PlayerTable {
    fn is_connected(&self, subject: SubjectId) -> bool {
        self.players
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&subject)
    }

    fn location(&self, subject: SubjectId) -> Option<Location> {
        self.get(subject).map(|p| p.location)
    }

    fn name(&self, subject: SubjectId) -> Option<String> {
        self.get(subject).and_then(|p| p.name)
    }
}

/// Sends engine events and host directives to subscribed clients
#[derive(Clone)]
pub struct IpcBridge {
    events: EventHub,
    players: Arc<PlayerTable>,
}

impl IpcBridge {
    pub fn new(events: EventHub, players: Arc<PlayerTable>) -> Self {
        Self { events, players }
    }

    /// Host services for the engine; group changes go to the host only when
    /// `change_group` is on
    pub fn services(&self, groups: &GroupPolicy) -> HostServices {
        let bridge = Arc::new(self.clone());
        let permissions: Arc<dyn PermissionInterface> = match (&groups.prisoner_group, groups.change_group) {
            (Some(group), true) => Arc::new(BridgePermissions {
                bridge: self.clone(),
                prisoner_group: group.clone(),
            }),
            _ => Arc::new(NullPermissions),
        };

        HostServices {
            presence: self.players.clone(),
            teleporter: bridge.clone(),
            permissions,
            subcommands: bridge.clone(),
            notifier: bridge,
        }
    }
}

#[async_trait]
impl Teleporter for IpcBridge {
    async fn teleport(&self, subject: SubjectId, location: &Location) -> HostResult<bool> {
        if !self.players.is_connected(subject) {
            return Ok(false);
        }

        // Assume the host complies; its next move report corrects us if not
        self.players.move_to(subject, location.clone());
        self.events.publish(EventPayload::TeleportRequested {
            subject,
            location: location.clone(),
        });
        Ok(true)
    }
}

impl SubcommandRunner for IpcBridge {
    fn dispatch(&self, subject: SubjectId, executor: Executor, command: String) {
        debug!(subject = %subject, executor = ?executor, command = %command, "Dispatching subcommand");
        self.events.publish(EventPayload::SubcommandDispatched {
            subject,
            executor,
            command,
        });
    }
}

impl EventNotifier for IpcBridge {
    fn notify(&self, event: Event) {
        self.events.emit(event);
    }
}

/// Group backend driven by the host: groups are read from the connect
/// report and changes are sent as directives
pub struct BridgePermissions {
    bridge: IpcBridge,
    prisoner_group: String,
}

impl BridgePermissions {
    fn online(&self, subject: SubjectId) -> PermissionResult<OnlinePlayer> {
        self.bridge
            .players
            .get(subject)
            .ok_or(PermissionError::UnknownSubject(subject))
    }
}

#[async_trait]
impl PermissionInterface for BridgePermissions {
    fn name(&self) -> &str {
        "host"
    }

    async fn fetch_primary_group(&self, subject: SubjectId) -> PermissionResult<Option<String>> {
        Ok(self.online(subject)?.primary_group)
    }

    async fn fetch_parent_groups(&self, subject: SubjectId) -> PermissionResult<Vec<String>> {
        Ok(self.online(subject)?.parent_groups)
    }

    async fn set_prisoner_group(&self, subject: SubjectId, actor: &Actor) -> PermissionResult<()> {
        let player = self.online(subject)?;
        debug!(subject = %subject, actor = ?actor.name, group = %self.prisoner_group, "Requesting prisoner group");

        self.bridge.events.publish(EventPayload::GroupChangeRequested {
            subject,
            add: vec![self.prisoner_group.clone()],
            remove: player.parent_groups,
        });
        Ok(())
    }

    async fn set_parent_groups(
        &self,
        subject: SubjectId,
        groups: &[String],
        actor: &Actor,
    ) -> PermissionResult<()> {
        self.online(subject)?;
        debug!(subject = %subject, actor = ?actor.name, groups = ?groups, "Requesting group restore");

        self.bridge.events.publish(EventPayload::GroupChangeRequested {
            subject,
            add: groups.to_vec(),
            remove: vec![self.prisoner_group.clone()],
        });
        Ok(())
    }
}
