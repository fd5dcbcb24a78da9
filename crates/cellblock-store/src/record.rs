//! Persisted record shapes
//!
//! Records are stored as JSON documents carrying an integer `version`.
//! Writing always produces the current layout; reading is lenient so that a
//! damaged field costs that field, not the whole prisoner.

use cellblock_api::Location;
use cellblock_util::{JailName, SubjectId};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::migrate::{JAIL_VERSION, PRISONER_VERSION};

/// A persisted document
pub type Document = Map<String, Value>;

pub const VERSION_FIELD: &str = "version";

const UUID_FIELD: &str = "uuid";
const NAME_FIELD: &str = "name";
const JAIL_FIELD: &str = "jail";
const JAILED_BY_FIELD: &str = "jailed-by";
const SECONDS_LEFT_FIELD: &str = "seconds-left";
const TOTAL_SENTENCE_FIELD: &str = "total-sentence-time";
const REASON_FIELD: &str = "reason";
const LAST_LOCATION_FIELD: &str = "last-location";
const GROUP_FIELD: &str = "group";
const EXTRA_GROUPS_FIELD: &str = "extra-groups";

const JAILS_FIELD: &str = "jails";
const LOCATION_FIELD: &str = "location";
const RELEASE_LOCATION_FIELD: &str = "release-location";

/// Errors that make a document unusable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing or invalid field '{0}'")]
    MissingField(&'static str),
}

/// Schema version of a document; documents without one predate versioning
pub fn document_version(doc: &Document) -> u32 {
    doc.get(VERSION_FIELD)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
}

/// Read a location from any of the shapes older releases wrote.
///
/// Coordinates may be numbers or numeric strings; extra keys are ignored.
pub fn normalize_location(value: &Value) -> Option<Location> {
    let obj = value.as_object()?;
    let world = obj.get("world")?.as_str()?.trim();
    if world.is_empty() {
        return None;
    }

    let num = |key: &str| -> Option<f64> {
        match obj.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };

    let (x, y, z) = (num("x")?, num("y")?, num("z")?);
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return None;
    }

    Some(
        Location::new(world, x, y, z)
            .with_rotation(num("yaw").unwrap_or(0.0) as f32, num("pitch").unwrap_or(0.0) as f32),
    )
}

/// Canonical document form of a location
pub fn location_value(location: &Location) -> Value {
    json!({
        "world": location.world,
        "x": location.x,
        "y": location.y,
        "z": location.z,
        "yaw": location.yaw,
        "pitch": location.pitch,
    })
}

fn optional_location_value(location: Option<&Location>) -> Value {
    location.map(location_value).unwrap_or(Value::Null)
}

/// Prisoner record at the current schema version
#[derive(Debug, Clone, PartialEq)]
pub struct PrisonerRecord {
    pub uuid: SubjectId,
    pub name: Option<String>,
    pub jail: JailName,
    pub jailed_by: Option<String>,
    /// Zero means the sentence is served
    pub seconds_left: u64,
    pub total_sentence_time: u64,
    pub reason: Option<String>,
    /// None when the prisoner has not been seen since being jailed
    pub last_location: Option<Location>,
    pub group: Option<String>,
    pub extra_groups: Vec<String>,
}

impl PrisonerRecord {
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(VERSION_FIELD.into(), json!(PRISONER_VERSION));
        doc.insert(UUID_FIELD.into(), json!(self.uuid.to_string()));
        doc.insert(NAME_FIELD.into(), json!(self.name));
        doc.insert(JAIL_FIELD.into(), json!(self.jail.as_str()));
        doc.insert(JAILED_BY_FIELD.into(), json!(self.jailed_by));
        doc.insert(SECONDS_LEFT_FIELD.into(), json!(self.seconds_left));
        doc.insert(TOTAL_SENTENCE_FIELD.into(), json!(self.total_sentence_time));
        doc.insert(REASON_FIELD.into(), json!(self.reason));
        doc.insert(
            LAST_LOCATION_FIELD.into(),
            optional_location_value(self.last_location.as_ref()),
        );
        doc.insert(GROUP_FIELD.into(), json!(self.group));
        doc.insert(EXTRA_GROUPS_FIELD.into(), json!(self.extra_groups));
        doc
    }

    /// Parse a current-version document.
    ///
    /// `key` is the storage key, used when the document lacks its own uuid.
    pub fn from_document(key: &str, doc: &Document) -> Result<Self, RecordError> {
        let fields = Fields { key, doc };

        let uuid = fields
            .opt_string(UUID_FIELD)
            .and_then(|s| s.parse().ok())
            .or_else(|| key.parse().ok())
            .ok_or(RecordError::MissingField(UUID_FIELD))?;

        let jail = fields
            .opt_string(JAIL_FIELD)
            .map(JailName::new)
            .filter(|j| !j.is_empty())
            .ok_or(RecordError::MissingField(JAIL_FIELD))?;

        let last_location = if doc.contains_key(LAST_LOCATION_FIELD) {
            fields.location(LAST_LOCATION_FIELD)
        } else {
            error!(
                record = key,
                "Prisoner record has no last location; they will stay where they are on release"
            );
            None
        };

        Ok(Self {
            uuid,
            name: fields.opt_string(NAME_FIELD),
            jail,
            jailed_by: fields.opt_string(JAILED_BY_FIELD),
            seconds_left: fields.seconds(SECONDS_LEFT_FIELD),
            total_sentence_time: fields.seconds(TOTAL_SENTENCE_FIELD),
            reason: fields.opt_string(REASON_FIELD),
            last_location,
            group: fields.opt_string(GROUP_FIELD),
            extra_groups: fields.string_list(EXTRA_GROUPS_FIELD),
        })
    }
}

/// Jail record at the current schema version
#[derive(Debug, Clone, PartialEq)]
pub struct JailRecord {
    pub name: JailName,
    pub location: Location,
    pub release_location: Option<Location>,
}

impl JailRecord {
    fn to_value(&self) -> Value {
        json!({
            NAME_FIELD: self.name.as_str(),
            LOCATION_FIELD: location_value(&self.location),
            RELEASE_LOCATION_FIELD: optional_location_value(self.release_location.as_ref()),
        })
    }

    fn from_value(index: usize, value: &Value) -> Option<Self> {
        let Some(obj) = value.as_object() else {
            warn!(index, "Skipping jail entry that is not a map");
            return None;
        };

        let name = obj
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .map(JailName::new)
            .filter(|n| !n.is_empty());
        let Some(name) = name else {
            warn!(index, "Skipping jail entry without a name");
            return None;
        };

        let Some(location) = obj.get(LOCATION_FIELD).and_then(normalize_location) else {
            warn!(jail = %name, "Skipping jail with an unreadable location");
            return None;
        };

        let release_location = match obj.get(RELEASE_LOCATION_FIELD) {
            None | Some(Value::Null) => None,
            Some(value) => {
                let parsed = normalize_location(value);
                if parsed.is_none() {
                    warn!(jail = %name, "Ignoring unreadable release location");
                }
                parsed
            }
        };

        Some(Self {
            name,
            location,
            release_location,
        })
    }
}

/// Build the single document holding every jail
pub fn jails_to_document(jails: &[JailRecord]) -> Document {
    let mut doc = Document::new();
    doc.insert(VERSION_FIELD.into(), json!(JAIL_VERSION));
    doc.insert(
        JAILS_FIELD.into(),
        Value::Array(jails.iter().map(JailRecord::to_value).collect()),
    );
    doc
}

/// Parse the jail list document, skipping unusable entries
pub fn jails_from_document(doc: &Document) -> Vec<JailRecord> {
    match doc.get(JAILS_FIELD) {
        Some(Value::Array(entries)) => entries
            .iter()
            .enumerate()
            .filter_map(|(i, v)| JailRecord::from_value(i, v))
            .collect(),
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            error!("Jail document has a malformed jail list; no jails loaded");
            Vec::new()
        }
    }
}

/// Lenient field access that logs what it has to default
struct Fields<'a> {
    key: &'a str,
    doc: &'a Document,
}

impl Fields<'_> {
    fn opt_string(&self, field: &'static str) -> Option<String> {
        match self.doc.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                warn!(record = self.key, field, value = %other, "Expected text, ignoring field");
                None
            }
        }
    }

    fn seconds(&self, field: &'static str) -> u64 {
        match self.doc.get(field) {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.max(0.0) as u64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_else(|_| {
                warn!(record = self.key, field, value = %s, "Expected seconds, using 0");
                0
            }),
            Some(other) => {
                warn!(record = self.key, field, value = %other, "Expected seconds, using 0");
                0
            }
        }
    }

    fn string_list(&self, field: &'static str) -> Vec<String> {
        match self.doc.get(field) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(other) => {
                warn!(record = self.key, field, value = %other, "Expected a list, ignoring field");
                Vec::new()
            }
        }
    }

    fn location(&self, field: &'static str) -> Option<Location> {
        match self.doc.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => {
                let parsed = normalize_location(value);
                if parsed.is_none() {
                    warn!(
                        record = self.key,
                        field, "Unreadable location, treating it as unknown"
                    );
                }
                parsed
            }
        }
    }
}
