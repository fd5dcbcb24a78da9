//! Time utilities for cellblock
//!
//! Sentences are measured against wall-clock time so that deadlines survive
//! daemon restarts. All code reads the clock through [`now()`].
//!
//! # Mock Time for Development
//!
//! In debug builds, the `CELLBLOCK_MOCK_TIME` environment variable can be set
//! to shift the clock, which makes long sentences testable by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "CELLBLOCK_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)]
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    expected_format = MOCK_TIME_FORMAT,
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() else {
                tracing::warn!(mock_time = %mock_time_str, "Failed to convert mock time to local timezone");
                return None;
            };
            let offset = mock_dt.signed_duration_since(chrono::Local::now());
            tracing::info!(
                mock_time = %mock_time_str,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)]
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Format a DateTime with full date and time.
pub fn format_datetime_full(dt: &DateTime<Local>) -> String {
    dt.format(MOCK_TIME_FORMAT).to_string()
}

/// Convert a std duration into a chrono one, saturating on overflow.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}

/// Helper to format durations in human-readable form
pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Errors from [`parse_duration`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,

    #[error("invalid number in duration '{0}'")]
    InvalidNumber(String),

    #[error("unknown duration unit '{0}' (expected s, m, h, d or w)")]
    UnknownUnit(char),

    #[error("duration overflows")]
    Overflow,
}

/// Parse a human duration such as `90`, `90s`, `15m`, `1h30m` or `2d`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }

    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit: u64 = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            other => return Err(DurationParseError::UnknownUnit(other)),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| DurationParseError::InvalidNumber(input.to_string()))?;
        digits.clear();
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or(DurationParseError::Overflow)?;
    }

    if !digits.is_empty() {
        return Err(DurationParseError::InvalidNumber(input.to_string()));
    }

    Ok(Duration::from_secs(total))
}
