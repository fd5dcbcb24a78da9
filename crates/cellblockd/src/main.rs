//! cellblockd - The cellblock prisoner service
//!
//! This is the main entry point for the cellblockd service.
//! It wires together all the components:
//! - Configuration loading
//! - Storage gateway (SQLite, schema migration on load)
//! - Jail and prisoner registries
//! - IPC server for the game host bridge and admin tools

mod bridge;

use anyhow::{Context, Result};
use bridge::{IpcBridge, OnlinePlayer, PlayerTable};
use cellblock_api::{
    Command, ErrorCode, ErrorInfo, EventPayload, Response, ResponsePayload,
};
use cellblock_config::{load_config, ConfigError, SentencePolicy, Settings};
use cellblock_core::{
    CoreError, GroupSync, JailRegistry, JailRequest, PrisonerRegistry, Publisher,
};
use cellblock_ipc::{EventHub, Inbound, IpcServer};
use cellblock_store::{
    MigrationContext, SqliteStore, StorageGateway, StoreError, DEFAULT_CLOSE_TIMEOUT,
};
use cellblock_util::{default_config_path, ClientId};
use clap::{Parser, ValueEnum};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// cellblockd - Prisoner lifecycle and persistence service
#[derive(Parser, Debug)]
#[command(name = "cellblockd")]
#[command(about = "Prisoner lifecycle and persistence service for game servers", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/cellblock/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set CELLBLOCK_SOCKET env var)
    #[arg(short, long, env = "CELLBLOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set CELLBLOCK_DATA_DIR env var)
    #[arg(short, long, env = "CELLBLOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Failures of service-level operations reported back to clients
#[derive(Debug, Error)]
enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Config(_) => ErrorCode::ConfigError,
            ServiceError::Store(_) => ErrorCode::StorageError,
        }
    }
}

fn core_error_code(error: &CoreError) -> ErrorCode {
    match error {
        CoreError::JailNotFound(_) => ErrorCode::JailNotFound,
        CoreError::InvalidDuration => ErrorCode::InvalidDuration,
    }
}

/// Everything the coordination loop mutates
struct State {
    jails: JailRegistry,
    prisoners: PrisonerRegistry,
    settings: Settings,
}

/// Sweep and autosave timers for the current sentence policy
struct Timers {
    policy: SentencePolicy,
    sweep: Interval,
    autosave: Option<Interval>,
}

impl Timers {
    fn new(policy: &SentencePolicy) -> Self {
        let start = |period: Duration| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        };

        Self {
            policy: policy.clone(),
            sweep: start(policy.sweep_interval),
            autosave: policy.autosave_interval.map(start),
        }
    }

    /// Restart the timers if the intervals changed
    fn refresh(&mut self, policy: &SentencePolicy) {
        if *policy != self.policy {
            debug!(?policy, "Sentence timers restarted");
            *self = Self::new(policy);
        }
    }
}

/// Wait for the next tick of an optional timer; never resolves when disabled
async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// What the coordination loop, command handlers and spawned replies share
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<State>>,
    players: Arc<PlayerTable>,
    events: EventHub,
    publisher: Publisher,
    config_path: PathBuf,
    reloaded: mpsc::UnboundedSender<()>,
}

/// A command's answer: ready now, or waiting on storage off the loop
enum Reply {
    Ready(Response),
    Deferred(Pin<Box<dyn Future<Output = Response> + Send>>),
}

/// Main service state
struct Service {
    shared: Shared,
    ipc: Arc<IpcServer>,
    requests: mpsc::UnboundedReceiver<Inbound>,
    gateway: StorageGateway,
    group_sync: mpsc::UnboundedReceiver<GroupSync>,
    reloaded: mpsc::UnboundedReceiver<()>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let settings = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            offline_time = settings.sentences.offline_time,
            change_group = settings.groups.change_group,
            "Configuration loaded"
        );

        // Determine paths
        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| settings.daemon.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| settings.daemon.data_dir.clone());

        // Create data directory
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        // Initialize storage
        let db_path = data_dir.join("cellblock.db");
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?;
        let gateway = StorageGateway::start(
            Box::new(store),
            MigrationContext {
                legacy_backup_location: settings.legacy_backup_location.clone(),
            },
        )
        .context("Failed to start storage gateway")?;

        info!(db_path = %db_path.display(), "Store initialized");

        // Host services travel as events to subscribed connections
        let events = EventHub::new();
        let players = PlayerTable::new();
        let bridge = IpcBridge::new(events.clone(), players.clone());
        let services = bridge.services(&settings.groups);
        let publisher = Publisher::new(services.notifier.clone());

        info!(permissions = services.permissions.name(), "Permission backend selected");

        // Jails first: prisoners fall back to them on load
        let now = cellblock_util::now();
        let mut jails = JailRegistry::new(gateway.clone(), publisher.clone());
        jails.load().await.context("Failed to load jails")?;

        let mut prisoners = PrisonerRegistry::new(
            settings.sentences.clone(),
            settings.subcommands.clone(),
            services,
            gateway.clone(),
        );
        let group_sync = prisoners
            .take_sync_receiver()
            .context("Group sync receiver already taken")?;
        prisoners
            .load(&jails, now)
            .await
            .context("Failed to load prisoners")?;

        let (ipc, requests) = IpcServer::bind(&socket_path, events.clone())
            .with_context(|| format!("Failed to bind socket {:?}", socket_path))?;

        let (reloaded_tx, reloaded) = mpsc::unbounded_channel();

        Ok(Self {
            shared: Shared {
                state: Arc::new(Mutex::new(State {
                    jails,
                    prisoners,
                    settings,
                })),
                players,
                events,
                publisher,
                config_path: args.config.clone(),
                reloaded: reloaded_tx,
            },
            ipc: Arc::new(ipc),
            requests,
            gateway,
            group_sync,
            reloaded,
        })
    }

    async fn run(mut self) -> Result<()> {
        // Spawn IPC accept task
        let accept = self.ipc.clone();
        tokio::spawn(async move { accept.run().await });

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut timers = Timers::new(self.shared.state.lock().await.prisoners.sentences());

        info!("Service running");

        loop {
            tokio::select! {
                // Signal: SIGTERM or SIGINT - graceful shutdown
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // Signal: SIGHUP - reload configuration and state
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading");
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = shared.reload().await {
                            error!(error = %e, "Reload failed");
                        }
                    });
                }

                // A reload finished; intervals may have changed
                Some(()) = self.reloaded.recv() => {
                    timers.refresh(self.shared.state.lock().await.prisoners.sentences());
                }

                // Sweep - release served sentences
                _ = timers.sweep.tick() => {
                    let now = cellblock_util::now();
                    let mut state = self.shared.state.lock().await;
                    let State { jails, prisoners, .. } = &mut *state;
                    let report = prisoners.sweep(jails, now);
                    if !report.is_empty() {
                        debug!(
                            released = report.released.len(),
                            purged = report.purged.len(),
                            "Sweep finished"
                        );
                    }
                }

                // Autosave
                _ = next_tick(&mut timers.autosave) => {
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = shared.save().await {
                            error!(error = %e, "Autosave failed");
                        }
                    });
                }

                // Permission lookups finished by spawned tasks
                Some(sync) = self.group_sync.recv() => {
                    let now = cellblock_util::now();
                    self.shared.state.lock().await.prisoners.apply_group_sync(sync, now);
                }

                // IPC requests
                Some(inbound) = self.requests.recv() => {
                    self.shared.handle_inbound(inbound).await;
                }
            }
        }

        // Graceful shutdown
        info!("Shutting down cellblockd");

        match self.shared.save().await {
            Ok((prisoners, jails)) => info!(prisoners, jails, "Final save complete"),
            Err(e) => error!(error = %e, "Final save failed"),
        }

        self.shared.events.publish(EventPayload::Shutdown);

        self.gateway.close(DEFAULT_CLOSE_TIMEOUT).await;

        info!("Shutdown complete");
        Ok(())
    }
}

impl Shared {
    /// Persist every prisoner and jail; resolves to the counts written
    async fn save(&self) -> Result<(usize, usize), StoreError> {
        let now = cellblock_util::now();
        let (prisoner_write, jail_write, prisoner_count, jail_count) = {
            let state = self.state.lock().await;
            (
                state.prisoners.save_all(now),
                state.jails.save_all(),
                state.prisoners.len(),
                state.jails.len(),
            )
        };

        prisoner_write.await?;
        jail_write.await?;

        info!(prisoners = prisoner_count, jails = jail_count, "Data saved");
        self.publisher.data_saved(prisoner_count, jail_count);
        Ok((prisoner_count, jail_count))
    }

    /// Save, re-read configuration, then reload both registries from storage
    async fn reload(&self) -> Result<(usize, usize), ServiceError> {
        self.save().await?;
        let settings = load_config(&self.config_path)?;
        let now = cellblock_util::now();

        let mut state = self.state.lock().await;
        if settings.groups != state.settings.groups {
            warn!("Permission settings changed; they take effect after a restart");
        }
        if settings.legacy_backup_location != state.settings.legacy_backup_location {
            warn!("Legacy backup location changed; it takes effect after a restart");
        }

        let State {
            jails,
            prisoners,
            settings: current,
        } = &mut *state;
        prisoners.set_policy(settings.sentences.clone(), settings.subcommands.clone());
        *current = settings;

        let jail_count = jails.reload().await?;
        let prisoner_count = prisoners.reload(jails, now).await?;
        drop(state);

        info!(prisoners = prisoner_count, jails = jail_count, "Reloaded");
        self.publisher.config_reloaded(prisoner_count, jail_count);
        let _ = self.reloaded.send(());
        Ok((prisoner_count, jail_count))
    }

    /// Check the caller may issue the command, then answer it now or from a
    /// spawned task once storage catches up
    async fn handle_inbound(&self, inbound: Inbound) {
        let Inbound {
            client,
            request,
            responder,
        } = inbound;

        let reply = if client.role.may_issue(&request.command) {
            self.handle_command(&client.client_id, request.request_id, request.command)
                .await
        } else {
            warn!(client_id = %client.client_id, role = ?client.role, "Command denied");
            Reply::Ready(Response::error(
                request.request_id,
                ErrorInfo::new(ErrorCode::PermissionDenied, "Command requires an admin client"),
            ))
        };

        let client_id = client.client_id;
        match reply {
            Reply::Ready(response) => {
                if !responder.send(response) {
                    debug!(client_id = %client_id, "Client gone before reply");
                }
            }
            Reply::Deferred(pending) => {
                tokio::spawn(async move {
                    if !responder.send(pending.await) {
                        debug!(client_id = %client_id, "Client gone before reply");
                    }
                });
            }
        }
    }

    async fn handle_command(&self, client_id: &ClientId, request_id: u64, command: Command) -> Reply {
        let now = cellblock_util::now();
        let failed = move |code, message: String| Response::error(request_id, ErrorInfo::new(code, message));

        let response = match command {
            Command::Jail {
                subject,
                jail,
                duration,
                jailer,
                reason,
            } => {
                let mut state = self.state.lock().await;
                let State { jails, prisoners, .. } = &mut *state;
                let request = JailRequest {
                    subject,
                    jail,
                    duration,
                    jailer,
                    reason,
                };

                match prisoners.jail(jails, request, now) {
                    Ok(prisoner) => Response::success(
                        request_id,
                        ResponsePayload::Jailed {
                            prisoner: prisoner.view(now),
                        },
                    ),
                    Err(e) => failed(core_error_code(&e), e.to_string()),
                }
            }

            Command::Unjail { subject, actor } => {
                let mut state = self.state.lock().await;
                let State { jails, prisoners, .. } = &mut *state;

                if prisoners.get(subject).is_none() {
                    failed(ErrorCode::NotJailed, format!("{} is not jailed", subject))
                } else {
                    let changed = prisoners.release(jails, subject, &actor, now);
                    Response::success(request_id, ResponsePayload::Released { changed })
                }
            }

            Command::Info { subject } => {
                let prisoner = self.state.lock().await.prisoners.view(subject, now);
                Response::success(request_id, ResponsePayload::Prisoner { prisoner })
            }

            Command::ListPrisoners => {
                let mut prisoners: Vec<_> = {
                    let state = self.state.lock().await;
                    state.prisoners.all().map(|p| p.view(now)).collect()
                };
                prisoners.sort_by(|a, b| a.jail.cmp(&b.jail).then_with(|| a.name.cmp(&b.name)));
                Response::success(request_id, ResponsePayload::Prisoners { prisoners })
            }

            Command::ListJails => {
                let jails = self.state.lock().await.jails.all().map(|j| j.view()).collect();
                Response::success(request_id, ResponsePayload::Jails { jails })
            }

            Command::SetJail { name, location } => {
                if name.is_empty() {
                    return Reply::Ready(failed(
                        ErrorCode::InvalidRequest,
                        "Jail name must not be empty".into(),
                    ));
                }

                let write = self.state.lock().await.jails.add(name, location);
                return Reply::Deferred(Box::pin(async move {
                    match write.await {
                        Ok(jail) => Response::success(request_id, ResponsePayload::JailSet { jail: jail.view() }),
                        Err(e) => failed(ErrorCode::StorageError, e.to_string()),
                    }
                }));
            }

            Command::DelJail { name } => {
                let write = {
                    let mut state = self.state.lock().await;
                    let State { jails, prisoners, .. } = &mut *state;
                    let write = jails.remove(&name);
                    prisoners.relocate_orphans(jails, now);
                    write
                };

                return Reply::Deferred(Box::pin(async move {
                    match write.await {
                        Ok(true) => Response::success(request_id, ResponsePayload::JailDeleted),
                        Ok(false) => failed(ErrorCode::JailNotFound, format!("No jail named '{}'", name)),
                        Err(e) => failed(ErrorCode::StorageError, e.to_string()),
                    }
                }));
            }

            Command::Reload => {
                let shared = self.clone();
                return Reply::Deferred(Box::pin(async move {
                    match shared.reload().await {
                        Ok((prisoner_count, jail_count)) => Response::success(
                            request_id,
                            ResponsePayload::Reloaded {
                                prisoner_count,
                                jail_count,
                            },
                        ),
                        Err(e) => failed(e.code(), e.to_string()),
                    }
                }));
            }

            Command::Save => {
                let shared = self.clone();
                return Reply::Deferred(Box::pin(async move {
                    match shared.save().await {
                        Ok((prisoner_count, jail_count)) => Response::success(
                            request_id,
                            ResponsePayload::Saved {
                                prisoner_count,
                                jail_count,
                            },
                        ),
                        Err(e) => failed(ErrorCode::StorageError, e.to_string()),
                    }
                }));
            }

            Command::PlayerConnected {
                subject,
                name,
                location,
                primary_group,
                parent_groups,
            } => {
                self.players.connect(
                    subject,
                    OnlinePlayer {
                        name,
                        location,
                        primary_group,
                        parent_groups,
                    },
                );
                debug!(subject = %subject, online = self.players.len(), "Player connected");

                let mut state = self.state.lock().await;
                let State { jails, prisoners, .. } = &mut *state;
                prisoners.on_connect(jails, subject, now);
                Response::success(request_id, ResponsePayload::PresenceUpdated)
            }

            Command::PlayerMoved { subject, location } => {
                self.players.move_to(subject, location);
                Response::success(request_id, ResponsePayload::PresenceUpdated)
            }

            Command::PlayerDisconnected { subject, location } => {
                if let Some(location) = location {
                    self.players.move_to(subject, location);
                }
                self.state.lock().await.prisoners.on_disconnect(subject, now);
                self.players.disconnect(subject);
                Response::success(request_id, ResponsePayload::PresenceUpdated)
            }

            Command::Respawn { subject } => {
                let state = self.state.lock().await;
                let location = state.prisoners.respawn_location(&state.jails, subject);
                Response::success(request_id, ResponsePayload::RespawnAt { location })
            }

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            ),

            Command::UnsubscribeEvents => Response::success(request_id, ResponsePayload::Unsubscribed),

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        };

        Reply::Ready(response)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "cellblockd starting"
    );

    // Create and run the service
    let service = Service::new(&args).await?;
    service.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellblock_api::{Location, ResponseResult};
    use cellblock_host_api::MockHost;
    use cellblock_util::JailName;

    fn shared() -> Shared {
        let host = MockHost::new();
        let store = SqliteStore::in_memory().unwrap();
        let gateway = StorageGateway::start(Box::new(store), MigrationContext::default()).unwrap();
        let publisher = Publisher::new(host.services().notifier);
        let settings = cellblock_config::parse_config("config_version = 1").unwrap();

        let jails = JailRegistry::new(gateway.clone(), publisher.clone());
        let prisoners = PrisonerRegistry::new(
            settings.sentences.clone(),
            settings.subcommands.clone(),
            host.services(),
            gateway,
        );
        let (reloaded, _) = mpsc::unbounded_channel();

        Shared {
            state: Arc::new(Mutex::new(State {
                jails,
                prisoners,
                settings,
            })),
            players: PlayerTable::new(),
            events: EventHub::new(),
            publisher,
            config_path: PathBuf::from("/nonexistent/config.toml"),
            reloaded,
        }
    }

    async fn ready(shared: &Shared, command: Command) -> Response {
        match shared.handle_command(&ClientId::new(), 1, command).await {
            Reply::Ready(response) => response,
            Reply::Deferred(_) => panic!("Expected an immediate reply"),
        }
    }

    #[tokio::test]
    async fn test_storage_commands_reply_after_the_write() {
        let shared = shared();
        let set = Command::SetJail {
            name: JailName::new("max"),
            location: Location::new("world", 0.0, 64.0, 0.0),
        };

        let Reply::Deferred(pending) = shared.handle_command(&ClientId::new(), 1, set).await else {
            panic!("Expected SetJail to wait on storage");
        };

        // The jail is visible to other commands before the write lands
        let listed = ready(&shared, Command::ListJails).await;
        assert!(matches!(
            listed.result,
            ResponseResult::Ok(ResponsePayload::Jails { ref jails }) if jails.len() == 1
        ));

        let response = pending.await;
        assert!(matches!(response.result, ResponseResult::Ok(ResponsePayload::JailSet { .. })));

        let Reply::Deferred(pending) = shared.handle_command(&ClientId::new(), 2, Command::Save).await else {
            panic!("Expected Save to wait on storage");
        };
        assert!(matches!(
            pending.await.result,
            ResponseResult::Ok(ResponsePayload::Saved { prisoner_count: 0, jail_count: 1 })
        ));
    }

    #[tokio::test]
    async fn test_failed_reload_is_reported() {
        let shared = shared();
        let Reply::Deferred(pending) = shared.handle_command(&ClientId::new(), 1, Command::Reload).await else {
            panic!("Expected Reload to run off the loop");
        };

        match pending.await.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::ConfigError),
            other => panic!("Expected a config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deleting_unknown_jail() {
        let shared = shared();
        let delete = Command::DelJail {
            name: JailName::new("nowhere"),
        };
        let Reply::Deferred(pending) = shared.handle_command(&ClientId::new(), 1, delete).await else {
            panic!("Expected DelJail to wait on storage");
        };

        match pending.await.result {
            ResponseResult::Err(e) => assert_eq!(e.code, ErrorCode::JailNotFound),
            other => panic!("Expected JailNotFound, got {other:?}"),
        }
    }
}
