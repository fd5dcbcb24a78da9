//! Shared types for the cellblock API

use chrono::{DateTime, Local};
use cellblock_util::{JailName, SubjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A position in a game world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub world: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
}

impl Location {
    pub fn new(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self {
            world: world.into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}, {:.1}, {:.1})", self.world, self.x, self.y, self.z)
    }
}

/// Who performed an action: a player, or the console when `id` is None
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<SubjectId>,
    pub name: Option<String>,
}

impl Actor {
    pub fn console() -> Self {
        Self::default()
    }

    pub fn player(id: SubjectId, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
        }
    }

    /// Name used when filling command placeholders
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Identity a configured subcommand runs as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
    Prisoner,
    Console,
}

/// Which representation a sentence clock currently uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Frozen remaining duration (subject offline, offline time not counted)
    Remaining,
    /// Absolute release deadline
    Deadline,
}

/// View of a prisoner for clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrisonerView {
    pub subject: SubjectId,
    pub name: Option<String>,
    pub jail: JailName,
    pub jailed_by: Option<String>,
    pub reason: Option<String>,
    pub clock: ClockKind,
    pub time_left: Duration,
    /// Release deadline; None while the clock is frozen
    pub deadline: Option<DateTime<Local>>,
    pub total_sentence: Duration,
    /// None when the subject has not been seen since being jailed
    pub last_location: Option<Location>,
    pub primary_group: Option<String>,
    pub parent_groups: Vec<String>,
    pub released: bool,
}

/// View of a jail for clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JailView {
    pub name: JailName,
    pub location: Location,
    pub release_location: Option<Location>,
}
