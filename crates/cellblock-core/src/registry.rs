//! Prisoner registry
//!
//! Owns every prisoner record and drives the lifecycle: jailing, release,
//! the periodic sweep, and the connect/disconnect clock transitions.
//! Host calls (teleports, permission changes) run as spawned tasks and never
//! block a registry operation; permission lookups come back through a
//! channel the owner drains into [`PrisonerRegistry::apply_group_sync`].

use cellblock_api::{Actor, Location, PrisonerView};
use cellblock_config::{SentencePolicy, Subcommands};
use cellblock_host_api::{HostServices, PermissionError, PermissionInterface};
use cellblock_store::{Pending, StorageGateway, StoreResult};
use cellblock_util::{JailName, SubjectId};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{
    CoreError, CoreResult, JailRegistry, LastLocation, MAX_SENTENCE, Prisoner, Publisher, SentenceClock,
};

/// A request to jail a subject
#[derive(Debug, Clone)]
pub struct JailRequest {
    pub subject: SubjectId,
    pub jail: JailName,
    pub duration: Duration,
    pub jailer: Actor,
    pub reason: Option<String>,
}

/// Permission groups fetched for one jailing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSync {
    pub subject: SubjectId,
    pub generation: u64,
    pub primary_group: Option<String>,
    pub parent_groups: Vec<String>,
}

/// What a sweep did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub released: Vec<SubjectId>,
    pub purged: Vec<SubjectId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.released.is_empty() && self.purged.is_empty()
    }
}

/// All prisoners, keyed by subject
pub struct PrisonerRegistry {
    prisoners: HashMap<SubjectId, Prisoner>,
    sentences: SentencePolicy,
    subcommands: Subcommands,
    host: HostServices,
    gateway: StorageGateway,
    publisher: Publisher,
    next_generation: u64,
    sync_tx: mpsc::UnboundedSender<GroupSync>,
    sync_rx: Option<mpsc::UnboundedReceiver<GroupSync>>,
}

impl PrisonerRegistry {
    pub fn new(
        sentences: SentencePolicy,
        subcommands: Subcommands,
        host: HostServices,
        gateway: StorageGateway,
    ) -> Self {
        let (sync_tx, sync_rx) = mpsc::unbounded_channel();
        let publisher = Publisher::new(host.notifier.clone());

        Self {
            prisoners: HashMap::new(),
            sentences,
            subcommands,
            host,
            gateway,
            publisher,
            next_generation: 1,
            sync_tx,
            sync_rx: Some(sync_rx),
        }
    }

    /// Receiver for completed permission lookups; can be taken once
    pub fn take_sync_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<GroupSync>> {
        self.sync_rx.take()
    }

    /// Swap in reloaded settings
    pub fn set_policy(&mut self, sentences: SentencePolicy, subcommands: Subcommands) {
        self.sentences = sentences;
        self.subcommands = subcommands;
    }

    pub fn sentences(&self) -> &SentencePolicy {
        &self.sentences
    }

    /// Jailed and not yet released
    pub fn is_jailed(&self, subject: SubjectId) -> bool {
        self.prisoners.get(&subject).is_some_and(|p| !p.released)
    }

    pub fn get(&self, subject: SubjectId) -> Option<&Prisoner> {
        self.prisoners.get(&subject)
    }

    pub fn all(&self) -> impl Iterator<Item = &Prisoner> {
        self.prisoners.values()
    }

    pub fn len(&self) -> usize {
        self.prisoners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prisoners.is_empty()
    }

    pub fn view(&self, subject: SubjectId, now: DateTime<Local>) -> Option<PrisonerView> {
        self.prisoners.get(&subject).map(|p| p.view(now))
    }

    fn generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    /// Jail a subject, or move an existing prisoner to a new sentence.
    pub fn jail(
        &mut self,
        jails: &JailRegistry,
        request: JailRequest,
        now: DateTime<Local>,
    ) -> CoreResult<Prisoner> {
        if request.duration.is_zero() || request.duration > MAX_SENTENCE {
            return Err(CoreError::InvalidDuration);
        }
        let jail = jails
            .get(&request.jail)
            .ok_or_else(|| CoreError::JailNotFound(request.jail.clone()))?;

        let subject = request.subject;
        let existing = self.prisoners.get(&subject);
        let newly_jailed = existing.is_none_or(|p| p.released);
        let connected = self.host.presence.is_connected(subject);

        let last_location = match existing {
            Some(previous) => previous.last_location.clone(),
            None if connected => self.host.presence.location(subject).into(),
            None => LastLocation::Unknown,
        };

        let stale_groups = existing.is_none_or(|p| p.primary_group.is_none() || p.released);
        let (primary_group, parent_groups) = match existing {
            Some(previous) if !stale_groups => {
                (previous.primary_group.clone(), previous.parent_groups.clone())
            }
            _ => (None, Vec::new()),
        };

        let display_name = self
            .host
            .presence
            .name(subject)
            .or_else(|| existing.and_then(|p| p.display_name.clone()));

        let running = connected || self.sentences.offline_time;
        let jail_location = jail.location.clone();
        let generation = self.generation();

        let prisoner = Prisoner {
            id: subject,
            display_name,
            jail: jail.name.clone(),
            jailed_by: request.jailer.name.clone(),
            reason: request.reason,
            sentence: SentenceClock::start(request.duration, running, now),
            total_sentence: request.duration,
            last_location,
            primary_group,
            parent_groups,
            released: false,
            generation,
        };

        if connected {
            self.teleport(subject, jail_location);
        }
        if connected && newly_jailed {
            let commands = self
                .subcommands
                .on_jail
                .render(&prisoner.label(), request.jailer.display_name());
            for (executor, command) in commands {
                self.host.subcommands.dispatch(subject, executor, command);
            }
        }

        if stale_groups {
            self.spawn_group_sync(subject, generation, request.jailer);
        }

        self.persist(&prisoner, now);
        self.prisoners.insert(subject, prisoner.clone());

        info!(
            subject = %subject,
            jail = %prisoner.jail,
            duration_secs = prisoner.total_sentence.as_secs(),
            connected,
            "Player jailed"
        );
        self.publisher.player_jailed(prisoner.view(now));

        Ok(prisoner)
    }

    /// Release a prisoner; returns whether anything changed.
    ///
    /// A connected prisoner is moved out and forgotten. An offline prisoner
    /// is marked released and finishes release on their next connect,
    /// unless they were never seen since jailing, in which case the record
    /// is dropped at once.
    pub fn release(
        &mut self,
        jails: &JailRegistry,
        subject: SubjectId,
        actor: &Actor,
        now: DateTime<Local>,
    ) -> bool {
        let connected = self.host.presence.is_connected(subject);
        let Some(prisoner) = self.prisoners.get(&subject) else {
            return false;
        };
        if !connected && prisoner.released {
            return false;
        }

        let snapshot = prisoner.view(now);
        self.spawn_group_restore(subject, prisoner.parent_groups.clone(), actor.clone());

        if connected {
            let destination = jails
                .get(&prisoner.jail)
                .and_then(|j| j.release_location.clone())
                .or_else(|| prisoner.last_location.known().cloned());
            let commands = self.subcommands.on_release.render(
                &prisoner.label(),
                prisoner.jailed_by.as_deref().unwrap_or(""),
            );

            match destination {
                Some(location) => self.teleport(subject, location),
                None => debug!(subject = %subject, "No release location; leaving player in place"),
            }
            for (executor, command) in commands {
                self.host.subcommands.dispatch(subject, executor, command);
            }
            self.forget(subject);
        } else if prisoner.last_location.is_unknown() {
            self.forget(subject);
        } else if let Some(prisoner) = self.prisoners.get_mut(&subject) {
            prisoner.released = true;
            let prisoner = prisoner.clone();
            self.persist(&prisoner, now);
        }

        info!(subject = %subject, connected, "Player released");
        self.publisher.player_released(snapshot);
        true
    }

    /// Release everyone whose time is up and drop released records nobody
    /// can complete. Safe to run repeatedly.
    pub fn sweep(&mut self, jails: &JailRegistry, now: DateTime<Local>) -> SweepReport {
        let mut to_release = Vec::new();
        let mut to_purge = Vec::new();

        for prisoner in self.prisoners.values() {
            match prisoner.last_location {
                LastLocation::Unknown if prisoner.released => to_purge.push(prisoner.id),
                LastLocation::Unknown => {}
                LastLocation::Known(_) => {
                    if prisoner.released || prisoner.sentence.is_served(now) {
                        to_release.push(prisoner.id);
                    }
                }
            }
        }

        let mut report = SweepReport::default();
        for subject in to_purge {
            self.forget(subject);
            debug!(subject = %subject, "Purged released record with no known location");
            report.purged.push(subject);
        }
        for subject in to_release {
            if self.release(jails, subject, &Actor::console(), now) {
                report.released.push(subject);
            }
        }

        report
    }

    /// Subject came online
    pub fn on_connect(&mut self, jails: &JailRegistry, subject: SubjectId, now: DateTime<Local>) {
        let Some(prisoner) = self.prisoners.get(&subject) else {
            return;
        };

        if prisoner.released {
            debug!(subject = %subject, "Completing release on connect");
            self.release(jails, subject, &Actor::console(), now);
            return;
        }

        let presence = self.host.presence.clone();
        let Some(prisoner) = self.prisoners.get_mut(&subject) else {
            return;
        };

        prisoner.sentence = prisoner.sentence.to_deadline(now);
        if let Some(name) = presence.name(subject) {
            prisoner.display_name = Some(name);
        }
        if prisoner.last_location.is_unknown()
            && let Some(location) = presence.location(subject)
        {
            prisoner.last_location = LastLocation::Known(location);
        }

        let prisoner = prisoner.clone();
        match self.jail_location(jails, &prisoner.jail) {
            Some(location) => self.teleport(subject, location),
            None => warn!(subject = %subject, "No jails exist; cannot hold prisoner"),
        }
        self.persist(&prisoner, now);
        debug!(subject = %subject, "Prisoner connected");
    }

    /// Subject went offline
    pub fn on_disconnect(&mut self, subject: SubjectId, now: DateTime<Local>) {
        let offline_time = self.sentences.offline_time;
        let Some(prisoner) = self.prisoners.get_mut(&subject) else {
            return;
        };

        if !offline_time && !prisoner.released {
            prisoner.sentence = prisoner.sentence.to_remaining(now);
        }

        let prisoner = prisoner.clone();
        self.persist(&prisoner, now);
        debug!(subject = %subject, "Prisoner disconnected");
    }

    /// Where a respawning subject belongs, if they are held
    pub fn respawn_location(&self, jails: &JailRegistry, subject: SubjectId) -> Option<Location> {
        let prisoner = self.prisoners.get(&subject).filter(|p| !p.released)?;
        self.jail_location(jails, &prisoner.jail)
    }

    fn jail_location(&self, jails: &JailRegistry, name: &JailName) -> Option<Location> {
        if let Some(jail) = jails.get(name) {
            return Some(jail.location.clone());
        }
        let fallback = jails.first()?;
        warn!(jail = %name, fallback = %fallback.name, "Jail missing; using fallback jail");
        Some(fallback.location.clone())
    }

    /// Move prisoners whose jail no longer exists into the first remaining
    /// jail. Returns how many moved.
    pub fn relocate_orphans(&mut self, jails: &JailRegistry, now: DateTime<Local>) -> usize {
        let orphans: Vec<SubjectId> = self
            .prisoners
            .values()
            .filter(|p| jails.get(&p.jail).is_none())
            .map(|p| p.id)
            .collect();
        if orphans.is_empty() {
            return 0;
        }

        let Some(fallback) = jails.first().map(|j| j.name.clone()) else {
            warn!(count = orphans.len(), "Prisoners reference missing jails and no jails exist");
            return 0;
        };

        for subject in &orphans {
            let Some(prisoner) = self.prisoners.get_mut(subject) else {
                continue;
            };
            warn!(
                subject = %subject,
                jail = %prisoner.jail,
                fallback = %fallback,
                "Jail missing; moving prisoner to fallback jail"
            );
            prisoner.jail = fallback.clone();
            let prisoner = prisoner.clone();
            self.persist(&prisoner, now);
        }

        orphans.len()
    }

    /// Fold a finished permission lookup into the prisoner it belongs to.
    ///
    /// Lookups from an earlier jailing of the same subject are discarded.
    pub fn apply_group_sync(&mut self, sync: GroupSync, now: DateTime<Local>) -> bool {
        let Some(prisoner) = self.prisoners.get_mut(&sync.subject) else {
            debug!(subject = %sync.subject, "Group lookup for a released subject; ignoring");
            return false;
        };
        if prisoner.generation != sync.generation {
            debug!(
                subject = %sync.subject,
                generation = sync.generation,
                current = prisoner.generation,
                "Stale group lookup; ignoring"
            );
            return false;
        }

        prisoner.primary_group = sync.primary_group;
        prisoner.parent_groups = sync.parent_groups;
        let prisoner = prisoner.clone();
        self.persist(&prisoner, now);
        true
    }

    /// Write every prisoner
    pub fn save_all(&self, now: DateTime<Local>) -> Pending<()> {
        let records: Vec<_> = self.prisoners.values().map(|p| p.to_record(now)).collect();
        self.gateway.save_prisoners(&records)
    }

    /// Replace the in-memory prisoners with what storage holds
    pub async fn load(&mut self, jails: &JailRegistry, now: DateTime<Local>) -> StoreResult<usize> {
        let records = self.gateway.load_prisoners().await?;
        let offline_time = self.sentences.offline_time;

        let mut prisoners = HashMap::with_capacity(records.len());
        for record in records {
            let running = offline_time || self.host.presence.is_connected(record.uuid);
            // Keep generations so lookups still in flight land after a reload
            let generation = match self.prisoners.get(&record.uuid) {
                Some(current) => current.generation,
                None => self.generation(),
            };
            let prisoner = Prisoner::from_record(record, running, generation, now);
            prisoners.insert(prisoner.id, prisoner);
        }
        self.prisoners = prisoners;

        let moved = self.relocate_orphans(jails, now);
        info!(count = self.prisoners.len(), relocated = moved, "Prisoners loaded");
        Ok(self.prisoners.len())
    }

    pub async fn reload(&mut self, jails: &JailRegistry, now: DateTime<Local>) -> StoreResult<usize> {
        self.load(jails, now).await
    }

    fn persist(&self, prisoner: &Prisoner, now: DateTime<Local>) {
        let pending = self.gateway.save_prisoner(&prisoner.to_record(now));
        let subject = prisoner.id;
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                error!(subject = %subject, error = %e, "Failed to save prisoner");
            }
        });
    }

    fn forget(&mut self, subject: SubjectId) {
        self.prisoners.remove(&subject);
        let pending = self.gateway.delete_prisoner(subject);
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                error!(subject = %subject, error = %e, "Failed to delete prisoner");
            }
        });
    }

    fn teleport(&self, subject: SubjectId, location: Location) {
        let teleporter = self.host.teleporter.clone();
        tokio::spawn(async move {
            match teleporter.teleport(subject, &location).await {
                Ok(true) => debug!(subject = %subject, location = %location, "Teleported"),
                Ok(false) => warn!(subject = %subject, "Host declined teleport"),
                Err(e) => warn!(subject = %subject, error = %e, "Teleport failed"),
            }
        });
    }

    fn spawn_group_sync(&self, subject: SubjectId, generation: u64, actor: Actor) {
        let permissions = self.host.permissions.clone();
        let tx = self.sync_tx.clone();

        tokio::spawn(async move {
            let fetched = async {
                let primary_group = permissions.fetch_primary_group(subject).await?;
                let parent_groups = permissions.fetch_parent_groups(subject).await?;
                Ok::<_, PermissionError>((primary_group, parent_groups))
            }
            .await;

            let (primary_group, parent_groups) = match fetched {
                Ok(groups) => groups,
                Err(e) => {
                    log_permission_failure(permissions.as_ref(), subject, &e, "fetch groups");
                    return;
                }
            };

            let _ = tx.send(GroupSync {
                subject,
                generation,
                primary_group,
                parent_groups,
            });

            if let Err(e) = permissions.set_prisoner_group(subject, &actor).await {
                log_permission_failure(permissions.as_ref(), subject, &e, "set prisoner group");
            }
        });
    }

    fn spawn_group_restore(&self, subject: SubjectId, groups: Vec<String>, actor: Actor) {
        let permissions = self.host.permissions.clone();
        tokio::spawn(async move {
            if let Err(e) = permissions.set_parent_groups(subject, &groups, &actor).await {
                log_permission_failure(permissions.as_ref(), subject, &e, "restore groups");
            }
        });
    }
}

fn log_permission_failure(
    permissions: &dyn PermissionInterface,
    subject: SubjectId,
    error: &PermissionError,
    action: &str,
) {
    if !permissions.is_null() {
        warn!(
            subject = %subject,
            backend = permissions.name(),
            action,
            error = %error,
            "Permission change failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellblock_api::{EventPayload, Executor};
    use cellblock_config::SubcommandSet;
    use cellblock_host_api::{GroupChange, MOCK_PRISONER_GROUP, MockHost, Presence};
    use cellblock_store::{MigrationContext, SqliteStore};
    use std::sync::Arc;

    struct Fixture {
        host: Arc<MockHost>,
        gateway: StorageGateway,
        jails: JailRegistry,
        prisoners: PrisonerRegistry,
    }

    async fn fixture(offline_time: bool) -> Fixture {
        let host = MockHost::new();
        let store = SqliteStore::in_memory().unwrap();
        let gateway = StorageGateway::start(Box::new(store), MigrationContext::default()).unwrap();

        let mut jails = JailRegistry::new(gateway.clone(), Publisher::new(host.services().notifier));
        jails
            .add(JailName::new("max"), Location::new("world", 0.0, 64.0, 0.0))
            .await
            .unwrap();

        let sentences = SentencePolicy {
            offline_time,
            ..Default::default()
        };
        let subcommands = Subcommands {
            on_jail: SubcommandSet {
                as_prisoner: vec![],
                as_console: vec!["say {prisoner} jailed by {player}".into()],
            },
            on_release: SubcommandSet {
                as_prisoner: vec!["spawn".into()],
                as_console: vec![],
            },
        };
        let prisoners = PrisonerRegistry::new(sentences, subcommands, host.services(), gateway.clone());
        host.clear_recorded();

        Fixture {
            host,
            gateway,
            jails,
            prisoners,
        }
    }

    fn request(subject: SubjectId, seconds: u64) -> JailRequest {
        JailRequest {
            subject,
            jail: JailName::new("MAX"),
            duration: Duration::from_secs(seconds),
            jailer: Actor::player(SubjectId::new(), "Alex"),
            reason: Some("griefing".into()),
        }
    }

    /// Let spawned host tasks run
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    async fn stored(gateway: &StorageGateway) -> Vec<cellblock_store::PrisonerRecord> {
        gateway.flush().await.unwrap();
        gateway.load_prisoners().await.unwrap()
    }

    #[tokio::test]
    async fn test_jail_rejects_bad_requests() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();

        let mut bad_jail = request(SubjectId::new(), 60);
        bad_jail.jail = JailName::new("nowhere");
        assert_eq!(
            f.prisoners.jail(&f.jails, bad_jail, now),
            Err(CoreError::JailNotFound(JailName::new("nowhere")))
        );
        assert_eq!(
            f.prisoners.jail(&f.jails, request(SubjectId::new(), 0), now),
            Err(CoreError::InvalidDuration)
        );
        assert!(f.prisoners.is_empty());
    }

    #[tokio::test]
    async fn test_jail_connected_player() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        let home = Location::new("world", 100.0, 70.0, 100.0);
        f.host.connect(id, "Steve", home.clone());

        let prisoner = f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        settle().await;

        assert!(f.prisoners.is_jailed(id));
        assert_eq!(prisoner.last_location, LastLocation::Known(home));
        assert_eq!(prisoner.sentence.kind(), cellblock_api::ClockKind::Deadline);
        assert_eq!(f.host.location(id), Some(Location::new("world", 0.0, 64.0, 0.0)));
        assert_eq!(f.host.commands()[0].command, "say Steve jailed by Alex");
        assert_eq!(f.host.commands()[0].executor, Executor::Console);
        assert!(matches!(
            f.host.event_payloads()[..],
            [EventPayload::PlayerJailed { .. }]
        ));
        assert_eq!(stored(&f.gateway).await.len(), 1);
    }

    #[tokio::test]
    async fn test_jail_offline_player_freezes_clock() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();

        let prisoner = f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        settle().await;

        assert!(prisoner.last_location.is_unknown());
        assert_eq!(prisoner.sentence, SentenceClock::Remaining(Duration::from_secs(60)));
        assert!(f.host.teleports().is_empty());
        assert!(f.host.commands().is_empty());
    }

    #[tokio::test]
    async fn test_offline_time_runs_clock_while_offline() {
        let mut f = fixture(true).await;
        let now = cellblock_util::now();
        let prisoner = f.prisoners.jail(&f.jails, request(SubjectId::new(), 60), now).unwrap();
        assert_eq!(prisoner.sentence.kind(), cellblock_api::ClockKind::Deadline);
    }

    #[tokio::test]
    async fn test_rejail_preserves_location() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        let home = Location::new("world", 100.0, 70.0, 100.0);
        f.host.connect(id, "Steve", home.clone());

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        settle().await;
        // Now standing in the jail
        let again = f.prisoners.jail(&f.jails, request(id, 300), now).unwrap();

        assert_eq!(again.last_location, LastLocation::Known(home));
        assert_eq!(again.total_sentence, Duration::from_secs(300));
        assert!(again.generation() > 1);
    }

    #[tokio::test]
    async fn test_group_sync_applies_only_to_current_generation() {
        let mut f = fixture(false).await;
        let mut rx = f.prisoners.take_sync_receiver().unwrap();
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.set_groups(id, "builder", &["builder", "default"]);

        let first = f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        let sync = rx.recv().await.unwrap();
        assert_eq!(sync.generation, first.generation());
        settle().await;
        assert_eq!(f.host.group_changes(), vec![GroupChange::Prisoner { subject: id }]);

        // Re-jail before the lookup is applied; groups are still unknown so a new lookup starts
        f.prisoners.jail(&f.jails, request(id, 120), now).unwrap();
        assert!(!f.prisoners.apply_group_sync(sync, now));

        let second = rx.recv().await.unwrap();
        assert!(f.prisoners.apply_group_sync(second, now));
        let prisoner = f.prisoners.get(id).unwrap();
        assert_eq!(prisoner.primary_group.as_deref(), Some(MOCK_PRISONER_GROUP));
    }

    #[tokio::test]
    async fn test_permission_failure_never_blocks_jail() {
        let mut f = fixture(false).await;
        *f.host.fail_permissions.lock().unwrap() = true;
        let now = cellblock_util::now();
        let id = SubjectId::new();

        assert!(f.prisoners.jail(&f.jails, request(id, 60), now).is_ok());
        settle().await;
        assert!(f.prisoners.is_jailed(id));
        assert!(f.host.group_changes().is_empty());
    }

    #[tokio::test]
    async fn test_connected_release_removes_record() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        let home = Location::new("world", 100.0, 70.0, 100.0);
        f.host.connect(id, "Steve", home.clone());
        f.host.set_groups(id, "builder", &["builder"]);
        let mut rx = f.prisoners.take_sync_receiver().unwrap();

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        let sync = rx.recv().await.unwrap();
        f.prisoners.apply_group_sync(sync, now);
        settle().await;
        f.host.clear_recorded();

        assert!(f.prisoners.release(&f.jails, id, &Actor::console(), now));
        settle().await;

        assert!(f.prisoners.get(id).is_none());
        assert!(stored(&f.gateway).await.is_empty());
        assert_eq!(f.host.location(id), Some(home));
        assert_eq!(f.host.commands()[0].command, "spawn");
        assert_eq!(f.host.commands()[0].executor, Executor::Prisoner);
        assert_eq!(
            f.host.group_changes(),
            vec![GroupChange::Restored {
                subject: id,
                groups: vec!["builder".into()]
            }]
        );
        assert!(matches!(
            &f.host.event_payloads()[..],
            [EventPayload::PlayerReleased { prisoner }] if !prisoner.released
        ));
    }

    #[tokio::test]
    async fn test_release_uses_jail_release_location() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.connect(id, "Steve", Location::new("world", 100.0, 70.0, 100.0));

        let gate = Location::new("world", 50.0, 64.0, 50.0);
        let mut records: Vec<_> = f.gateway.load_jails().await.unwrap();
        records[0].release_location = Some(gate.clone());
        f.gateway.save_jails(&records).await.unwrap();
        f.jails.reload().await.unwrap();

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        settle().await;
        f.prisoners.release(&f.jails, id, &Actor::console(), now);
        settle().await;

        assert_eq!(f.host.location(id), Some(gate));
    }

    #[tokio::test]
    async fn test_offline_release_with_unknown_location_purges() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        assert!(f.prisoners.release(&f.jails, id, &Actor::console(), now));

        assert!(f.prisoners.get(id).is_none());
        assert!(stored(&f.gateway).await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_release_with_known_location_waits() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.connect(id, "Steve", Location::new("world", 100.0, 70.0, 100.0));
        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        f.host.disconnect(id);
        f.prisoners.on_disconnect(id, now);

        assert!(f.prisoners.release(&f.jails, id, &Actor::console(), now));
        assert!(!f.prisoners.release(&f.jails, id, &Actor::console(), now));

        let prisoner = f.prisoners.get(id).unwrap();
        assert!(prisoner.released);
        assert!(!f.prisoners.is_jailed(id));

        let records = stored(&f.gateway).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].seconds_left, 0);

        // Coming back completes the release
        f.host.connect(id, "Steve", Location::new("world", 0.0, 64.0, 0.0));
        f.prisoners.on_connect(&f.jails, id, now);
        settle().await;
        assert!(f.prisoners.get(id).is_none());
        assert_eq!(f.host.location(id), Some(Location::new("world", 100.0, 70.0, 100.0)));
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.connect(id, "Steve", Location::new("world", 100.0, 70.0, 100.0));
        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();

        assert!(f.prisoners.sweep(&f.jails, now).is_empty());

        let later = now + chrono::Duration::seconds(61);
        let report = f.prisoners.sweep(&f.jails, later);
        assert_eq!(report.released, vec![id]);
        assert!(f.prisoners.sweep(&f.jails, later).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_unknown_unreleased() {
        let mut f = fixture(true).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.prisoners.jail(&f.jails, request(id, 10), now).unwrap();

        let later = now + chrono::Duration::seconds(30);
        assert!(f.prisoners.sweep(&f.jails, later).is_empty());
        assert!(f.prisoners.get(id).is_some());
    }

    #[tokio::test]
    async fn test_connect_converts_frozen_clock() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();

        let later = now + chrono::Duration::hours(2);
        let spot = Location::new("world", 7.0, 70.0, 7.0);
        f.host.connect(id, "Steve", spot.clone());
        f.prisoners.on_connect(&f.jails, id, later);
        settle().await;

        let prisoner = f.prisoners.get(id).unwrap();
        assert_eq!(prisoner.sentence, SentenceClock::Deadline(later + chrono::Duration::seconds(60)));
        assert_eq!(prisoner.last_location, LastLocation::Known(spot));
        assert_eq!(prisoner.display_name.as_deref(), Some("Steve"));
        assert_eq!(f.host.location(id), Some(Location::new("world", 0.0, 64.0, 0.0)));
    }

    #[tokio::test]
    async fn test_respawn_location() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        assert_eq!(f.prisoners.respawn_location(&f.jails, id), None);

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        assert_eq!(
            f.prisoners.respawn_location(&f.jails, id),
            Some(Location::new("world", 0.0, 64.0, 0.0))
        );
    }

    #[tokio::test]
    async fn test_removed_jail_falls_back() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.jails
            .add(JailName::new("annex"), Location::new("world", 9.0, 64.0, 9.0))
            .await
            .unwrap();
        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();

        f.jails.remove(&JailName::new("max")).await.unwrap();
        assert_eq!(f.prisoners.relocate_orphans(&f.jails, now), 1);
        assert_eq!(f.prisoners.get(id).unwrap().jail, JailName::new("annex"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let a = SubjectId::new();
        let b = SubjectId::new();
        f.host.connect(a, "Steve", Location::new("world", 1.0, 70.0, 1.0));
        f.prisoners.jail(&f.jails, request(a, 60), now).unwrap();
        f.prisoners.jail(&f.jails, request(b, 90), now).unwrap();

        f.prisoners.save_all(now).await.unwrap();
        assert_eq!(f.prisoners.reload(&f.jails, now).await.unwrap(), 2);

        let reloaded_a = f.prisoners.get(a).unwrap();
        assert_eq!(reloaded_a.sentence.kind(), cellblock_api::ClockKind::Deadline);
        let reloaded_b = f.prisoners.get(b).unwrap();
        assert_eq!(reloaded_b.sentence, SentenceClock::Remaining(Duration::from_secs(90)));
        assert_eq!(reloaded_b.reason.as_deref(), Some("griefing"));
    }

    #[tokio::test]
    async fn test_rejail_runs_on_jail_commands_once() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.connect(id, "Steve", Location::new("world", 100.0, 70.0, 100.0));

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        settle().await;
        f.prisoners.jail(&f.jails, request(id, 120), now).unwrap();
        settle().await;

        assert_eq!(f.host.commands().len(), 1);
        // Still moved back into the jail both times
        assert_eq!(f.host.teleports().len(), 2);
    }

    #[tokio::test]
    async fn test_jail_rejects_sentence_beyond_limit() {
        let mut f = fixture(false).await;
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.connect(id, "Steve", Location::new("world", 100.0, 70.0, 100.0));

        assert_eq!(
            f.prisoners.jail(&f.jails, request(id, 10_000_000_000_000), now),
            Err(CoreError::InvalidDuration)
        );
        assert!(!f.prisoners.is_jailed(id));

        let longest = f
            .prisoners
            .jail(&f.jails, request(id, MAX_SENTENCE.as_secs()), now)
            .unwrap();
        assert_eq!(longest.time_left(now), MAX_SENTENCE);
    }

    #[tokio::test]
    async fn test_group_lookup_survives_reload() {
        let mut f = fixture(false).await;
        let mut rx = f.prisoners.take_sync_receiver().unwrap();
        let now = cellblock_util::now();
        let id = SubjectId::new();
        f.host.connect(id, "Steve", Location::new("world", 100.0, 70.0, 100.0));
        f.host.set_groups(id, "builder", &["builder", "default"]);

        f.prisoners.jail(&f.jails, request(id, 60), now).unwrap();
        let sync = rx.recv().await.unwrap();

        f.prisoners.save_all(now).await.unwrap();
        f.prisoners.reload(&f.jails, now).await.unwrap();

        assert!(f.prisoners.apply_group_sync(sync, now));
        let prisoner = f.prisoners.get(id).unwrap();
        assert_eq!(prisoner.primary_group.as_deref(), Some("builder"));
        assert_eq!(prisoner.parent_groups, vec!["builder".to_string(), "default".to_string()]);

        // Release hands back what was captured before the reload
        settle().await;
        f.host.clear_recorded();
        assert!(f.prisoners.release(&f.jails, id, &Actor::console(), now));
        settle().await;
        assert_eq!(
            f.host.group_changes(),
            vec![GroupChange::Restored {
                subject: id,
                groups: vec!["builder".into(), "default".into()]
            }]
        );
    }
}
