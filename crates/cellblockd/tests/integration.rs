//! Integration tests for cellblockd
//!
//! These tests drive the registries against an on-disk store the way the
//! daemon does, including restarts between steps.

use cellblock_api::{Actor, EventPayload, Executor, Location};
use cellblock_config::{parse_config, Settings};
use cellblock_core::{JailRegistry, JailRequest, PrisonerRegistry, Publisher, SentenceClock};
use cellblock_host_api::MockHost;
use cellblock_store::{
    MigrationContext, RecordStore, SqliteStore, StorageGateway, DEFAULT_CLOSE_TIMEOUT,
};
use cellblock_util::{JailName, SubjectId};
use chrono::{DateTime, Local};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

struct World {
    gateway: StorageGateway,
    jails: JailRegistry,
    prisoners: PrisonerRegistry,
}

fn settings(extra: &str) -> Settings {
    parse_config(&format!("config_version = 1\n{extra}")).unwrap()
}

/// Start the way the daemon does: gateway, then jails, then prisoners
async fn open(path: &Path, host: &Arc<MockHost>, settings: &Settings, now: DateTime<Local>) -> World {
    let store = SqliteStore::open(path).unwrap();
    let gateway = StorageGateway::start(
        Box::new(store),
        MigrationContext {
            legacy_backup_location: settings.legacy_backup_location.clone(),
        },
    )
    .unwrap();

    let mut jails = JailRegistry::new(gateway.clone(), Publisher::new(host.services().notifier));
    jails.load().await.unwrap();

    let mut prisoners = PrisonerRegistry::new(
        settings.sentences.clone(),
        settings.subcommands.clone(),
        host.services(),
        gateway.clone(),
    );
    prisoners.load(&jails, now).await.unwrap();

    World {
        gateway,
        jails,
        prisoners,
    }
}

/// Stop the way the daemon does: save everything, then drain storage
async fn shutdown(world: World, now: DateTime<Local>) {
    world.prisoners.save_all(now).await.unwrap();
    world.jails.save_all().await.unwrap();
    assert!(world.gateway.close(DEFAULT_CLOSE_TIMEOUT).await);
}

/// Let spawned host tasks run
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn later(now: DateTime<Local>, seconds: i64) -> DateTime<Local> {
    now + chrono::Duration::seconds(seconds)
}

fn request(subject: SubjectId, jail: &str, seconds: u64) -> JailRequest {
    JailRequest {
        subject,
        jail: JailName::new(jail),
        duration: Duration::from_secs(seconds),
        jailer: Actor::player(SubjectId::new(), "Warden"),
        reason: Some("griefing".into()),
    }
}

#[tokio::test]
async fn test_sentence_expires_after_a_minute() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cellblock.db");
    let host = MockHost::new();
    let settings = settings("");
    let now = cellblock_util::now();

    let mut world = open(&db, &host, &settings, now).await;
    world
        .jails
        .add(JailName::new("max"), Location::new("world", 0.0, 10.0, 0.0))
        .await
        .unwrap();

    let subject = SubjectId::new();
    let spawn = Location::new("world", 250.0, 70.0, -40.0);
    host.connect(subject, "Steve", spawn.clone());

    world
        .prisoners
        .jail(&world.jails, request(subject, "max", 60), now)
        .unwrap();
    assert!(world.prisoners.sweep(&world.jails, later(now, 30)).is_empty());

    let report = world.prisoners.sweep(&world.jails, later(now, 61));
    assert_eq!(report.released, vec![subject]);
    assert!(!world.prisoners.is_jailed(subject));
    assert!(world.prisoners.sweep(&world.jails, later(now, 62)).is_empty());

    settle().await;
    assert_eq!(host.teleports().last().map(|(_, l)| l.clone()), Some(spawn));
    assert!(host
        .event_payloads()
        .iter()
        .any(|p| matches!(p, EventPayload::PlayerReleased { prisoner } if prisoner.subject == subject)));

    shutdown(world, later(now, 62)).await;

    let world = open(&db, &host, &settings, later(now, 63)).await;
    assert!(world.prisoners.is_empty());
    assert_eq!(world.jails.len(), 1);
}

#[tokio::test]
async fn test_offline_clock_survives_restart_and_resumes_on_connect() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cellblock.db");
    let host = MockHost::new();
    let settings = settings("[sentences]\noffline_time = false");
    let now = cellblock_util::now();

    let mut world = open(&db, &host, &settings, now).await;
    world
        .jails
        .add(JailName::new("max"), Location::new("world", 0.0, 10.0, 0.0))
        .await
        .unwrap();

    let subject = SubjectId::new();
    host.connect(subject, "Steve", Location::new("world", 5.0, 70.0, 5.0));
    world
        .prisoners
        .jail(&world.jails, request(subject, "max", 120), now)
        .unwrap();

    // Thirty seconds served, then offline
    host.disconnect(subject);
    world.prisoners.on_disconnect(subject, later(now, 30));
    shutdown(world, later(now, 30)).await;

    // Two hours later the clock has not moved
    let restart = later(now, 7200);
    let mut world = open(&db, &host, &settings, restart).await;
    let prisoner = world.prisoners.get(subject).unwrap();
    assert_eq!(prisoner.sentence, SentenceClock::Remaining(Duration::from_secs(90)));
    assert_eq!(prisoner.reason.as_deref(), Some("griefing"));
    assert!(world.prisoners.sweep(&world.jails, later(restart, 3600)).is_empty());

    host.connect(subject, "Steve", Location::new("world", 100.0, 70.0, 100.0));
    world.prisoners.on_connect(&world.jails, subject, restart);
    let prisoner = world.prisoners.get(subject).unwrap();
    assert_eq!(prisoner.sentence, SentenceClock::Deadline(later(restart, 90)));

    assert!(world.prisoners.sweep(&world.jails, later(restart, 89)).is_empty());
    let report = world.prisoners.sweep(&world.jails, later(restart, 91));
    assert_eq!(report.released, vec![subject]);
}

#[tokio::test]
async fn test_deleted_jail_falls_back_across_restart() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cellblock.db");
    let host = MockHost::new();
    let settings = settings("");
    let now = cellblock_util::now();

    let mut world = open(&db, &host, &settings, now).await;
    let alpha = Location::new("world", -100.0, 10.0, -100.0);
    world.jails.add(JailName::new("alpha"), alpha.clone()).await.unwrap();
    world
        .jails
        .add(JailName::new("zulu"), Location::new("world", 100.0, 10.0, 100.0))
        .await
        .unwrap();

    // Offline when jailed, so the location is unknown
    let subject = SubjectId::new();
    world
        .prisoners
        .jail(&world.jails, request(subject, "zulu", 600), now)
        .unwrap();
    assert!(world.prisoners.get(subject).unwrap().last_location.is_unknown());

    assert!(world.jails.remove(&JailName::new("zulu")).await.unwrap());
    shutdown(world, now).await;

    let world = open(&db, &host, &settings, later(now, 5)).await;
    assert_eq!(world.jails.len(), 1);
    assert_eq!(world.prisoners.get(subject).unwrap().jail.as_str(), "alpha");
    assert_eq!(world.prisoners.respawn_location(&world.jails, subject), Some(alpha));
}

#[tokio::test]
async fn test_legacy_documents_upgraded_on_load() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cellblock.db");
    let subject = SubjectId::new();

    {
        let store = SqliteStore::open(&db).unwrap();
        let prisoner = json!({
            "uuid": subject.to_string(),
            "jail": "Max",
            "jailedby": "Alex",
            "secondsleft": 500,
            "lastlocation": {"==": "Location", "world": "world", "x": "1", "y": "64", "z": "2"}
        });
        let jails = json!({
            "max": {"world": "world", "x": 10, "y": 64, "z": 10}
        });
        store
            .put_prisoner(&subject, prisoner.as_object().unwrap())
            .unwrap();
        store.put_jails(jails.as_object().unwrap()).unwrap();
    }

    let host = MockHost::new();
    let settings = settings("");
    let now = cellblock_util::now();
    let world = open(&db, &host, &settings, now).await;

    assert_eq!(world.jails.get(&JailName::new("max")).unwrap().location.x, 10.0);
    let prisoner = world.prisoners.get(subject).unwrap();
    assert_eq!(prisoner.jail.as_str(), "max");
    assert_eq!(prisoner.jailed_by.as_deref(), Some("Alex"));
    assert_eq!(prisoner.time_left(now), Duration::from_secs(500));
    assert_eq!(
        prisoner.last_location.known(),
        Some(&Location::new("world", 1.0, 64.0, 2.0))
    );

    world.gateway.flush().await.unwrap();
    assert!(world.gateway.close(DEFAULT_CLOSE_TIMEOUT).await);

    let store = SqliteStore::open(&db).unwrap();
    let documents = store.prisoner_documents().unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].document["version"], json!(6));
    assert!(!documents[0].document.contains_key("secondsleft"));
}

#[tokio::test]
async fn test_configured_subcommands_run_on_jail_and_release() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("cellblock.db");
    let host = MockHost::new();
    let settings = settings(
        r#"
        [subcommands.on_jail]
        as_console = ["/say {prisoner} was jailed by {player}", "  "]

        [subcommands.on_release]
        as_prisoner = ["spawn"]
        "#,
    );
    let now = cellblock_util::now();

    let mut world = open(&db, &host, &settings, now).await;
    world
        .jails
        .add(JailName::new("max"), Location::new("world", 0.0, 10.0, 0.0))
        .await
        .unwrap();

    let subject = SubjectId::new();
    host.connect(subject, "Steve", Location::new("world", 5.0, 70.0, 5.0));
    world
        .prisoners
        .jail(&world.jails, request(subject, "max", 60), now)
        .unwrap();
    assert!(world
        .prisoners
        .release(&world.jails, subject, &Actor::console(), later(now, 10)));

    let commands: Vec<(Executor, String)> = host
        .commands()
        .into_iter()
        .map(|c| (c.executor, c.command))
        .collect();
    assert_eq!(
        commands,
        vec![
            (Executor::Console, "say Steve was jailed by Warden".to_string()),
            (Executor::Prisoner, "spawn".to_string()),
        ]
    );
}
