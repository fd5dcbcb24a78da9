//! Config validation CLI tool
//!
//! Validates a cellblockd configuration file and reports any errors.

use cellblock_config::{ConfigError, CURRENT_CONFIG_VERSION};
use cellblock_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a cellblockd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match cellblock_config::load_config(&config_path) {
        Ok(settings) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Data directory: {}", settings.daemon.data_dir.display());
            println!(
                "  Offline time counts: {}",
                if settings.sentences.offline_time { "yes" } else { "no" }
            );
            println!(
                "  Sweep interval: {}",
                format_duration(settings.sentences.sweep_interval)
            );
            match settings.sentences.autosave_interval {
                Some(interval) => println!("  Autosave: every {}", format_duration(interval)),
                None => println!("  Autosave: disabled"),
            }
            match &settings.groups.prisoner_group {
                Some(group) => println!("  Prisoner group: {}", group),
                None => println!("  Prisoner group: unchanged"),
            }
            if let Some(location) = &settings.legacy_backup_location {
                println!("  Legacy backup location: {}", location);
            }

            let hooks = [
                ("on jail", &settings.subcommands.on_jail),
                ("on release", &settings.subcommands.on_release),
            ];
            for (label, set) in hooks {
                if set.is_empty() {
                    continue;
                }
                println!();
                println!("Subcommands {}:", label);
                for cmd in &set.as_prisoner {
                    println!("  - [prisoner] {}", cmd);
                }
                for cmd in &set.as_console {
                    println!("  - [console] {}", cmd);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
