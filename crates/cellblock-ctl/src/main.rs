//! cellblockctl - admin client for cellblockd
//!
//! Issues jail commands to a running cellblockd over its Unix socket.

use anyhow::{bail, Context, Result};
use cellblock_api::{
    Actor, Command, EventPayload, JailView, Location, PrisonerView, ResponsePayload,
};
use cellblock_ipc::IpcClient;
use cellblock_util::{
    default_socket_path, format_datetime_full, format_duration, parse_duration, JailName, SubjectId,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// cellblockctl - manage prisoners and jails
#[derive(Parser, Debug)]
#[command(name = "cellblockctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the cellblockd socket (or set CELLBLOCK_SOCKET env var)
    #[arg(short, long, env = "CELLBLOCK_SOCKET", default_value_os_t = default_socket_path())]
    socket: PathBuf,

    /// Print responses as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Jail a player, or move a prisoner to a new sentence
    Jail {
        /// Player UUID
        subject: SubjectId,

        /// Jail name
        jail: String,

        /// Sentence length, e.g. 90, 15m, 1h30m, 2d
        #[arg(value_parser = parse_sentence)]
        duration: Duration,

        /// Reason shown in info
        #[arg(short, long)]
        reason: Option<String>,

        /// Name recorded as the jailer (default: console)
        #[arg(long)]
        by: Option<String>,
    },

    /// Release a prisoner
    Unjail {
        /// Player UUID
        subject: SubjectId,

        /// Name recorded as the releaser (default: console)
        #[arg(long)]
        by: Option<String>,
    },

    /// Show one prisoner
    Info {
        /// Player UUID
        subject: SubjectId,
    },

    /// List every prisoner
    #[command(alias = "ls")]
    Prisoners,

    /// List every jail
    Jails,

    /// Create a jail, or move an existing one
    #[command(allow_negative_numbers = true)]
    Setjail {
        /// Jail name
        name: String,
        world: String,
        x: f64,
        y: f64,
        z: f64,
        #[arg(long, default_value_t = 0.0)]
        yaw: f32,
        #[arg(long, default_value_t = 0.0)]
        pitch: f32,
    },

    /// Delete a jail
    Deljail {
        /// Jail name
        name: String,
    },

    /// Save, re-read configuration and reload persisted state
    Reload,

    /// Persist every prisoner and jail now
    Save,

    /// Stream events until interrupted
    Watch,
}

fn parse_sentence(input: &str) -> Result<Duration, String> {
    match parse_duration(input) {
        Ok(d) if d.is_zero() => Err("sentence must be longer than zero".into()),
        Ok(d) => Ok(d),
        Err(e) => Err(e.to_string()),
    }
}

fn actor(by: Option<String>) -> Actor {
    Actor { id: None, name: by }
}

impl Commands {
    /// The protocol command, or None for commands handled locally
    fn into_command(self) -> Option<Command> {
        let command = match self {
            Commands::Jail {
                subject,
                jail,
                duration,
                reason,
                by,
            } => Command::Jail {
                subject,
                jail: JailName::new(jail),
                duration,
                jailer: actor(by),
                reason,
            },
            Commands::Unjail { subject, by } => Command::Unjail {
                subject,
                actor: actor(by),
            },
            Commands::Info { subject } => Command::Info { subject },
            Commands::Prisoners => Command::ListPrisoners,
            Commands::Jails => Command::ListJails,
            Commands::Setjail {
                name,
                world,
                x,
                y,
                z,
                yaw,
                pitch,
            } => Command::SetJail {
                name: JailName::new(name),
                location: Location::new(world, x, y, z).with_rotation(yaw, pitch),
            },
            Commands::Deljail { name } => Command::DelJail {
                name: JailName::new(name),
            },
            Commands::Reload => Command::Reload,
            Commands::Save => Command::Save,
            Commands::Watch => return None,
        };
        Some(command)
    }
}

fn describe_prisoner(p: &PrisonerView) -> String {
    let mut lines = vec![format!(
        "{} ({})",
        p.name.as_deref().unwrap_or("unknown"),
        p.subject
    )];
    lines.push(format!("  Jail: {}", p.jail));
    if p.released {
        lines.push("  Released; waiting for the player to come online".into());
    } else {
        lines.push(format!(
            "  Time left: {} of {}",
            format_duration(p.time_left),
            format_duration(p.total_sentence)
        ));
    }
    if let Some(deadline) = p.deadline
        && !p.released
    {
        lines.push(format!("  Release at: {}", format_datetime_full(&deadline)));
    }
    lines.push(format!("  Jailed by: {}", p.jailed_by.as_deref().unwrap_or("console")));
    if let Some(reason) = &p.reason {
        lines.push(format!("  Reason: {}", reason));
    }
    match &p.last_location {
        Some(location) => lines.push(format!("  Last location: {}", location)),
        None => lines.push("  Last location: unknown".into()),
    }
    lines.join("\n")
}

fn describe_jail(j: &JailView) -> String {
    match &j.release_location {
        Some(release) => format!("{}: {} (release at {})", j.name, j.location, release),
        None => format!("{}: {}", j.name, j.location),
    }
}

fn describe(payload: &ResponsePayload) -> String {
    match payload {
        ResponsePayload::Jailed { prisoner } => {
            format!("Jailed {}", describe_prisoner(prisoner))
        }
        ResponsePayload::Released { changed: true } => "Released".into(),
        ResponsePayload::Released { changed: false } => "Already released".into(),
        ResponsePayload::Prisoner { prisoner: Some(p) } => describe_prisoner(p),
        ResponsePayload::Prisoner { prisoner: None } => "Not jailed".into(),
        ResponsePayload::Prisoners { prisoners } if prisoners.is_empty() => "No prisoners".into(),
        ResponsePayload::Prisoners { prisoners } => prisoners
            .iter()
            .map(describe_prisoner)
            .collect::<Vec<_>>()
            .join("\n"),
        ResponsePayload::Jails { jails } if jails.is_empty() => "No jails".into(),
        ResponsePayload::Jails { jails } => jails
            .iter()
            .map(describe_jail)
            .collect::<Vec<_>>()
            .join("\n"),
        ResponsePayload::JailSet { jail } => format!("Jail set: {}", describe_jail(jail)),
        ResponsePayload::JailDeleted => "Jail deleted".into(),
        ResponsePayload::Reloaded {
            prisoner_count,
            jail_count,
        } => format!("Reloaded {} prisoners and {} jails", prisoner_count, jail_count),
        ResponsePayload::Saved {
            prisoner_count,
            jail_count,
        } => format!("Saved {} prisoners and {} jails", prisoner_count, jail_count),
        other => format!("{:?}", other),
    }
}

async fn watch(client: IpcClient, json: bool) -> Result<()> {
    let mut events = client.subscribe().await.context("Failed to subscribe")?;

    loop {
        let event = events.next().await.context("Event stream ended")?;
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }

        let time = format_datetime_full(&event.timestamp);
        match &event.payload {
            EventPayload::PlayerJailed { prisoner } => {
                println!("{} jailed {} in {}", time, prisoner.subject, prisoner.jail)
            }
            EventPayload::PlayerReleased { prisoner } => {
                println!("{} released {}", time, prisoner.subject)
            }
            EventPayload::Shutdown => {
                println!("{} service shutting down", time);
                return Ok(());
            }
            other => println!("{} {:?}", time, other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut client = IpcClient::connect(&cli.socket)
        .await
        .with_context(|| format!("Failed to connect to cellblockd at {}", cli.socket.display()))?;
    debug!(socket = %cli.socket.display(), "Connected");

    let Some(command) = cli.command.into_command() else {
        return watch(client, cli.json).await;
    };

    let payload = match client.request(command).await {
        Ok(payload) => payload,
        Err(cellblock_ipc::IpcError::ServerError(message)) => bail!("{}", message),
        Err(e) => return Err(e).context("Request failed"),
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        println!("{}", describe(&payload));
    }
    Ok(())
}
