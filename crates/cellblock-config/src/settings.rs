//! Validated settings

use crate::schema::{RawConfig, RawLocation, RawSubcommandSet};
use cellblock_api::{Executor, Location};
use std::path::PathBuf;
use std::time::Duration;

/// Validated settings ready for use by the daemon and the registries
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub daemon: DaemonConfig,
    pub sentences: SentencePolicy,
    pub groups: GroupPolicy,
    /// Only consulted while upgrading old prisoner records
    pub legacy_backup_location: Option<Location>,
    pub subcommands: Subcommands,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let change_group = raw.permissions.change_group.unwrap_or(false);
        let prisoner_group = raw
            .permissions
            .prisoner_group
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());

        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            sentences: SentencePolicy {
                offline_time: raw.sentences.offline_time.unwrap_or(false),
                sweep_interval: Duration::from_secs(
                    raw.sentences.sweep_interval_seconds.unwrap_or(1),
                ),
                autosave_interval: match raw.sentences.autosave_minutes.unwrap_or(5) {
                    0 => None,
                    minutes => Some(Duration::from_secs(minutes * 60)),
                },
            },
            groups: GroupPolicy {
                change_group,
                prisoner_group: if change_group { prisoner_group } else { None },
            },
            legacy_backup_location: raw.legacy.backup_location.map(convert_location),
            subcommands: Subcommands {
                on_jail: SubcommandSet::from_raw(raw.subcommands.on_jail),
                on_release: SubcommandSet::from_raw(raw.subcommands.on_release),
            },
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
}

impl DaemonConfig {
    fn from_raw(raw: crate::schema::RawDaemonConfig) -> Self {
        Self {
            socket_path: raw
                .socket_path
                .unwrap_or_else(cellblock_util::default_socket_path),
            data_dir: raw.data_dir.unwrap_or_else(cellblock_util::default_data_dir),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: cellblock_util::default_socket_path(),
            data_dir: cellblock_util::default_data_dir(),
        }
    }
}

/// How sentences are counted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentencePolicy {
    /// When true, a sentence keeps running while the prisoner is offline
    pub offline_time: bool,
    pub sweep_interval: Duration,
    /// None disables autosave
    pub autosave_interval: Option<Duration>,
}

impl Default for SentencePolicy {
    fn default() -> Self {
        Self {
            offline_time: false,
            sweep_interval: Duration::from_secs(1),
            autosave_interval: Some(Duration::from_secs(5 * 60)),
        }
    }
}

/// Permission group handling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupPolicy {
    pub change_group: bool,
    /// Set only when `change_group` is enabled
    pub prisoner_group: Option<String>,
}

/// On-jail and on-release command hooks
#[derive(Debug, Clone, Default)]
pub struct Subcommands {
    pub on_jail: SubcommandSet,
    pub on_release: SubcommandSet,
}

/// Commands run as the prisoner and as the console
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubcommandSet {
    pub as_prisoner: Vec<String>,
    pub as_console: Vec<String>,
}

impl SubcommandSet {
    fn from_raw(raw: RawSubcommandSet) -> Self {
        Self {
            as_prisoner: clean_commands(raw.as_prisoner),
            as_console: clean_commands(raw.as_console),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_prisoner.is_empty() && self.as_console.is_empty()
    }

    /// Fill `{prisoner}` and `{player}` and pair each command with its executor.
    ///
    /// Prisoner commands come first, then console commands.
    pub fn render(&self, prisoner: &str, player: &str) -> Vec<(Executor, String)> {
        let fill = |cmd: &String| cmd.replace("{prisoner}", prisoner).replace("{player}", player);

        self.as_prisoner
            .iter()
            .map(|cmd| (Executor::Prisoner, fill(cmd)))
            .chain(self.as_console.iter().map(|cmd| (Executor::Console, fill(cmd))))
            .collect()
    }
}

fn clean_commands(commands: Vec<String>) -> Vec<String> {
    commands
        .into_iter()
        .map(|c| c.trim().trim_start_matches('/').to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

fn convert_location(raw: RawLocation) -> Location {
    Location::new(raw.world, raw.x, raw.y, raw.z)
        .with_rotation(raw.yaw.unwrap_or(0.0), raw.pitch.unwrap_or(0.0))
}
