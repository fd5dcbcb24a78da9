//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub daemon: RawDaemonConfig,

    #[serde(default)]
    pub sentences: RawSentences,

    #[serde(default)]
    pub permissions: RawPermissions,

    #[serde(default)]
    pub legacy: RawLegacy,

    #[serde(default)]
    pub subcommands: RawSubcommands,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    /// IPC socket path
    pub socket_path: Option<PathBuf>,

    /// Data directory for the record store
    pub data_dir: Option<PathBuf>,
}

/// Sentence accounting
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSentences {
    /// Keep counting down while the prisoner is offline
    pub offline_time: Option<bool>,

    /// How often the release sweep runs
    pub sweep_interval_seconds: Option<u64>,

    /// Periodic full save; 0 disables it
    pub autosave_minutes: Option<u64>,
}

/// Permission group handling
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawPermissions {
    /// Move prisoners into `prisoner_group` while jailed
    pub change_group: Option<bool>,

    pub prisoner_group: Option<String>,
}

/// Settings kept only to read old data
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLegacy {
    /// Location older releases stored when a prisoner's real location was unknown
    pub backup_location: Option<RawLocation>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawLocation {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: Option<f32>,
    pub pitch: Option<f32>,
}

/// Commands run when a prisoner is jailed or released
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSubcommands {
    #[serde(default)]
    pub on_jail: RawSubcommandSet,

    #[serde(default)]
    pub on_release: RawSubcommandSet,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSubcommandSet {
    #[serde(default)]
    pub as_prisoner: Vec<String>,

    #[serde(default)]
    pub as_console: Vec<String>,
}
