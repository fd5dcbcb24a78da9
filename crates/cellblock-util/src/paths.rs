//! Default paths for cellblock components
//!
//! Paths are user-writable by default (no root required):
//! - Socket: `$XDG_RUNTIME_DIR/cellblock/cellblockd.sock` or `/tmp/cellblock-$USER/cellblockd.sock`
//! - Data: `$XDG_DATA_HOME/cellblock` or `~/.local/share/cellblock`
//! - Config: `$XDG_CONFIG_HOME/cellblock/config.toml` or `~/.config/cellblock/config.toml`

use std::path::PathBuf;

/// Environment variable for overriding the socket path
pub const CELLBLOCK_SOCKET_ENV: &str = "CELLBLOCK_SOCKET";

/// Environment variable for overriding the data directory
pub const CELLBLOCK_DATA_DIR_ENV: &str = "CELLBLOCK_DATA_DIR";

/// Environment variable for overriding the config file
pub const CELLBLOCK_CONFIG_ENV: &str = "CELLBLOCK_CONFIG";

const SOCKET_FILENAME: &str = "cellblockd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "cellblock";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$CELLBLOCK_SOCKET`
/// 2. `$XDG_RUNTIME_DIR/cellblock/cellblockd.sock`
/// 3. `/tmp/cellblock-$USER/cellblockd.sock`
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(CELLBLOCK_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking `CELLBLOCK_SOCKET`.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$CELLBLOCK_DATA_DIR`
/// 2. `$XDG_DATA_HOME/cellblock`
/// 3. `~/.local/share/cellblock`
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(CELLBLOCK_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking `CELLBLOCK_DATA_DIR`.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

/// Get the default configuration file path.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CELLBLOCK_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join(CONFIG_FILENAME);
    }

    PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILENAME)
}
