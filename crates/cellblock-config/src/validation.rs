//! Configuration validation

use crate::schema::{RawConfig, RawLocation};
use thiserror::Error;

/// Allowed range for the sweep interval, in seconds
pub const SWEEP_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 1..=60;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("sweep_interval_seconds must be between 1 and 60, got {0}")]
    InvalidSweepInterval(u64),

    #[error("change_group is enabled but prisoner_group is empty")]
    MissingPrisonerGroup,

    #[error("Invalid location for {field}: {message}")]
    InvalidLocation { field: &'static str, message: String },

    #[error("Subcommand '{command}' uses unknown placeholder '{placeholder}'")]
    UnknownPlaceholder { command: String, placeholder: String },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(secs) = config.sentences.sweep_interval_seconds
        && !SWEEP_INTERVAL_RANGE.contains(&secs)
    {
        errors.push(ValidationError::InvalidSweepInterval(secs));
    }

    if config.permissions.change_group.unwrap_or(false) {
        let group = config.permissions.prisoner_group.as_deref().unwrap_or("");
        if group.trim().is_empty() {
            errors.push(ValidationError::MissingPrisonerGroup);
        }
    }

    if let Some(location) = &config.legacy.backup_location {
        errors.extend(validate_location(location, "legacy.backup_location"));
    }

    let sets = [&config.subcommands.on_jail, &config.subcommands.on_release];
    for command in sets
        .iter()
        .flat_map(|set| set.as_prisoner.iter().chain(set.as_console.iter()))
    {
        errors.extend(validate_placeholders(command));
    }

    errors
}

fn validate_location(location: &RawLocation, field: &'static str) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if location.world.trim().is_empty() {
        errors.push(ValidationError::InvalidLocation {
            field,
            message: "world cannot be empty".into(),
        });
    }

    if ![location.x, location.y, location.z].iter().all(|c| c.is_finite()) {
        errors.push(ValidationError::InvalidLocation {
            field,
            message: "coordinates must be finite".into(),
        });
    }

    errors
}

/// Placeholders that subcommands may reference
pub const KNOWN_PLACEHOLDERS: [&str; 2] = ["prisoner", "player"];

fn validate_placeholders(command: &str) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut rest = command;

    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            break;
        };
        let placeholder = &after[..end];
        if !KNOWN_PLACEHOLDERS.contains(&placeholder) {
            errors.push(ValidationError::UnknownPlaceholder {
                command: command.to_string(),
                placeholder: placeholder.to_string(),
            });
        }
        rest = &after[end + 1..];
    }

    errors
}
