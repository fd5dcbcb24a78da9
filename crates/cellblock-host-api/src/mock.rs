//! Mock host for testing

use async_trait::async_trait;
use cellblock_api::{Actor, Event, EventPayload, Executor, Location};
use cellblock_util::SubjectId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::{
    EventNotifier, HostError, HostResult, HostServices, PermissionError, PermissionInterface,
    PermissionResult, Presence, SubcommandRunner, Teleporter,
};

/// Group the mock moves prisoners into
pub const MOCK_PRISONER_GROUP: &str = "prisoner";

/// A connected subject in the mock world
#[derive(Debug, Clone)]
pub struct MockPlayer {
    pub name: String,
    pub location: Location,
}

/// Groups the mock permission backend knows about for a subject
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockGroups {
    pub primary: Option<String>,
    pub parents: Vec<String>,
}

/// A group change the engine requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange {
    Prisoner { subject: SubjectId },
    Restored { subject: SubjectId, groups: Vec<String> },
}

/// A dispatched subcommand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedCommand {
    pub subject: SubjectId,
    pub executor: Executor,
    pub command: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock host for unit/integration testing
///
/// Implements every host trait and records what the engine asked for.
#[derive(Default)]
pub struct MockHost {
    players: Mutex<HashMap<SubjectId, MockPlayer>>,
    groups: Mutex<HashMap<SubjectId, MockGroups>>,
    teleports: Mutex<Vec<(SubjectId, Location)>>,
    commands: Mutex<Vec<DispatchedCommand>>,
    events: Mutex<Vec<Event>>,
    group_changes: Mutex<Vec<GroupChange>>,

    /// Configure teleports to fail
    pub fail_teleport: Arc<Mutex<bool>>,

    /// Configure every permission call to fail
    pub fail_permissions: Arc<Mutex<bool>>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bundle this mock as every host service
    pub fn services(self: &Arc<Self>) -> HostServices {
        HostServices {
            presence: self.clone(),
            teleporter: self.clone(),
            permissions: self.clone(),
            subcommands: self.clone(),
            notifier: self.clone(),
        }
    }

    /// Simulate a subject joining at `location`
    pub fn connect(&self, subject: SubjectId, name: &str, location: Location) {
        lock(&self.players).insert(
            subject,
            MockPlayer {
                name: name.to_string(),
                location,
            },
        );
    }

    pub fn disconnect(&self, subject: SubjectId) {
        lock(&self.players).remove(&subject);
    }

    /// Simulate a subject walking somewhere
    pub fn move_to(&self, subject: SubjectId, location: Location) {
        if let Some(player) = lock(&self.players).get_mut(&subject) {
            player.location = location;
        }
    }

    /// Set the groups the permission backend reports for a subject
    pub fn set_groups(&self, subject: SubjectId, primary: &str, parents: &[&str]) {
        lock(&self.groups).insert(
            subject,
            MockGroups {
                primary: Some(primary.to_string()),
                parents: parents.iter().map(|g| g.to_string()).collect(),
            },
        );
    }

    pub fn groups_of(&self, subject: SubjectId) -> MockGroups {
        lock(&self.groups).get(&subject).cloned().unwrap_or_default()
    }

    pub fn teleports(&self) -> Vec<(SubjectId, Location)> {
        lock(&self.teleports).clone()
    }

    pub fn commands(&self) -> Vec<DispatchedCommand> {
        lock(&self.commands).clone()
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn event_payloads(&self) -> Vec<EventPayload> {
        lock(&self.events).iter().map(|e| e.payload.clone()).collect()
    }

    pub fn group_changes(&self) -> Vec<GroupChange> {
        lock(&self.group_changes).clone()
    }

    /// Forget everything recorded so far
    pub fn clear_recorded(&self) {
        lock(&self.teleports).clear();
        lock(&self.commands).clear();
        lock(&self.events).clear();
        lock(&self.group_changes).clear();
    }

    fn permissions_failing(&self) -> bool {
        *lock(&self.fail_permissions)
    }
}

impl Presence for MockHost {
    fn is_connected(&self, subject: SubjectId) -> bool {
        lock(&self.players).contains_key(&subject)
    }

    fn location(&self, subject: SubjectId) -> Option<Location> {
        lock(&self.players).get(&subject).map(|p| p.location.clone())
    }

    fn name(&self, subject: SubjectId) -> Option<String> {
        lock(&self.players).get(&subject).map(|p| p.name.clone())
    }
}

#[async_trait]
impl Teleporter for MockHost {
    async fn teleport(&self, subject: SubjectId, location: &Location) -> HostResult<bool> {
        if *lock(&self.fail_teleport) {
            return Err(HostError::TeleportFailed("Mock teleport failure".into()));
        }

        lock(&self.teleports).push((subject, location.clone()));

        match lock(&self.players).get_mut(&subject) {
            Some(player) => {
                player.location = location.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl PermissionInterface for MockHost {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_primary_group(&self, subject: SubjectId) -> PermissionResult<Option<String>> {
        if self.permissions_failing() {
            return Err(PermissionError::Backend("Mock permission failure".into()));
        }
        Ok(self.groups_of(subject).primary)
    }

    async fn fetch_parent_groups(&self, subject: SubjectId) -> PermissionResult<Vec<String>> {
        if self.permissions_failing() {
            return Err(PermissionError::Backend("Mock permission failure".into()));
        }
        Ok(self.groups_of(subject).parents)
    }

    async fn set_prisoner_group(&self, subject: SubjectId, _actor: &Actor) -> PermissionResult<()> {
        if self.permissions_failing() {
            return Err(PermissionError::Backend("Mock permission failure".into()));
        }

        lock(&self.group_changes).push(GroupChange::Prisoner { subject });
        let mut groups = lock(&self.groups);
        let entry = groups.entry(subject).or_default();
        entry.primary = Some(MOCK_PRISONER_GROUP.to_string());
        entry.parents = vec![MOCK_PRISONER_GROUP.to_string()];
        Ok(())
    }

    async fn set_parent_groups(
        &self,
        subject: SubjectId,
        groups: &[String],
        _actor: &Actor,
    ) -> PermissionResult<()> {
        if self.permissions_failing() {
            return Err(PermissionError::Backend("Mock permission failure".into()));
        }

        lock(&self.group_changes).push(GroupChange::Restored {
            subject,
            groups: groups.to_vec(),
        });
        let mut known = lock(&self.groups);
        let entry = known.entry(subject).or_default();
        entry.primary = groups.first().cloned();
        entry.parents = groups.to_vec();
        Ok(())
    }
}

impl SubcommandRunner for MockHost {
    fn dispatch(&self, subject: SubjectId, executor: Executor, command: String) {
        lock(&self.commands).push(DispatchedCommand {
            subject,
            executor,
            command,
        });
    }
}

impl EventNotifier for MockHost {
    fn notify(&self, event: Event) {
        lock(&self.events).push(event);
    }
}
